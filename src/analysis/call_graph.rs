//! Call-graph edges (spec §4.9): walks a method's instruction graph and
//! resolves `invoke*` targets through [`VirtualMachine::find_method`],
//! adding an edge in the method graph for each resolved call site.
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::insn::ConstVal;
use crate::insn_info::{info, InsnProps};
use crate::vm::{MethodEdgeKind, VirtualMachine};
use crate::Result;

/// Adds call-graph edges for method `m`. Idempotent: a no-op if `m`
/// already has an outgoing call-graph edge.
pub fn build_for_method(vm: &mut VirtualMachine, m: NodeIndex) -> Result<()> {
    if vm
        .method_graph()
        .edges_directed(m, Direction::Outgoing)
        .any(|e| matches!(e.weight(), MethodEdgeKind::Call { .. }))
    {
        return Ok(());
    }

    let insn_graph = match &vm.method(m).insn_graph {
        Some(g) => g,
        None => return Ok(()),
    };

    let mut call_sites = Vec::new();
    for v in insn_graph.graph().node_indices() {
        let insn = &insn_graph.graph()[v].insn;
        if insn.is_pseudo() {
            continue;
        }
        let meta = info(insn.op() as u8);
        if meta.props.contains(InsnProps::ODEX_ONLY) {
            continue;
        }
        let virtual_dispatch = meta.props.contains(InsnProps::CAN_VIRTUALLY_INVOKE);
        if !virtual_dispatch && !meta.props.contains(InsnProps::CAN_DIRECTLY_INVOKE) {
            continue;
        }
        if let ConstVal::Method(handle) = insn.const_val() {
            call_sites.push((*handle, virtual_dispatch));
        }
    }

    for (handle, virtual_dispatch) in call_sites {
        let jvm = vm.jvm_method_handle(handle)?;
        match vm.find_method(&jvm, true) {
            Ok(target) => {
                vm.method_graph
                    .add_edge(m, target, MethodEdgeKind::Call { virtual_dispatch });
            }
            Err(e) => log::warn!("call graph: unresolved call target {}: {}", jvm, e),
        }
    }
    Ok(())
}

/// Runs [`build_for_method`] over every method currently loaded,
/// re-sweeping while resolution keeps discovering new methods.
pub fn build_all(vm: &mut VirtualMachine) -> Result<()> {
    loop {
        let before = vm.method_graph().node_count();
        let methods: Vec<NodeIndex> = vm.method_graph().node_indices().collect();
        for m in methods {
            build_for_method(vm, m)?;
        }
        if vm.method_graph().node_count() == before {
            return Ok(());
        }
    }
}
