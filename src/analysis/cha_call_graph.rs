//! CHA (class-hierarchy analysis) call graph (spec §4.13): a cheaper
//! alternative to the points-to engine's on-the-fly dispatch. BFS from a
//! set of entry methods; each resolvable invoke gets an edge to the
//! resolved target and to every method in its virtual-override subtree.
use std::collections::{HashSet, VecDeque};

use petgraph::graph::NodeIndex;

use crate::insn::ConstVal;
use crate::insn_info::info;
use crate::vm::{MethodEdgeKind, VirtualMachine};
use crate::Result;

pub fn build(vm: &mut VirtualMachine, entries: &[NodeIndex]) -> Result<()> {
    let mut visited: HashSet<NodeIndex> = HashSet::new();
    let mut queue: VecDeque<NodeIndex> = entries.iter().copied().collect();

    while let Some(m) = queue.pop_front() {
        if !visited.insert(m) {
            continue;
        }

        let insn_graph = match &vm.method(m).insn_graph {
            Some(g) => g,
            None => continue,
        };
        let mut call_sites = Vec::new();
        for v in insn_graph.graph().node_indices() {
            let insn = &insn_graph.graph()[v].insn;
            if insn.is_pseudo() {
                continue;
            }
            let mnemonic = info(insn.op() as u8).mnemonic;
            if !mnemonic.starts_with("invoke") {
                continue;
            }
            if let ConstVal::Method(handle) = insn.const_val() {
                call_sites.push((*handle, mnemonic.starts_with("invoke-virtual") || mnemonic.starts_with("invoke-interface")));
            }
        }

        for (handle, virtual_dispatch) in call_sites {
            let jvm = vm.jvm_method_handle(handle)?;
            let target = match vm.find_method(&jvm, true) {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("cha call graph: unresolved call target {}: {}", jvm, e);
                    continue;
                }
            };
            vm.method_graph
                .add_edge(m, target, MethodEdgeKind::Call { virtual_dispatch });
            queue.push_back(target);
            for descendant in super::recursive_loader::virtual_override_subtree(vm, target) {
                vm.method_graph
                    .add_edge(m, descendant, MethodEdgeKind::Call { virtual_dispatch: true });
                queue.push_back(descendant);
            }
        }
    }
    Ok(())
}
