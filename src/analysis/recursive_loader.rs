//! Recursive loader (spec §4.10): a depth-first walk over a method's
//! instructions that triggers the class/field/`<clinit>` loading a real
//! interpreter would perform on first execution, plus every override of
//! a virtually-invoked target.
use std::collections::HashSet;

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::insn::ConstVal;
use crate::insn_info::info;
use crate::vm::{MethodEdgeKind, VirtualMachine};
use crate::Result;

/// Runs `load_recursive` from method `m`, visiting methods at most once.
pub fn load_recursive(vm: &mut VirtualMachine, m: NodeIndex) -> Result<()> {
    let mut visited = HashSet::new();
    walk(vm, m, &mut visited)
}

fn walk(vm: &mut VirtualMachine, m: NodeIndex, visited: &mut HashSet<NodeIndex>) -> Result<()> {
    if !visited.insert(m) {
        return Ok(());
    }

    let insn_graph = match &vm.method(m).insn_graph {
        Some(g) => g,
        None => return Ok(()),
    };

    let mut instructions = Vec::new();
    for v in insn_graph.graph().node_indices() {
        let insn = &insn_graph.graph()[v].insn;
        if insn.is_pseudo() {
            continue;
        }
        instructions.push((info(insn.op() as u8).mnemonic, insn.const_val().clone()));
    }

    for (mnemonic, const_val) in instructions {
        if mnemonic == "new-instance" {
            if let ConstVal::Type(ty) = const_val {
                let jvm = vm.jvm_type_handle(ty)?;
                let _ = vm.find_class(&jvm, true);
            }
        } else if mnemonic.starts_with("sget") || mnemonic.starts_with("sput") {
            if let ConstVal::Field(field) = const_val {
                let jvm = vm.jvm_field_handle(field)?;
                if let Ok(field_node) = vm.find_field(&jvm, true) {
                    load_clinit(vm, vm.field(field_node).owner_class, visited)?;
                }
            }
        } else if mnemonic.starts_with("invoke") {
            if let ConstVal::Method(method) = const_val {
                let jvm = vm.jvm_method_handle(method)?;
                if let Ok(target) = vm.find_method(&jvm, true) {
                    if mnemonic.starts_with("invoke-static") {
                        load_clinit(vm, vm.method(target).owner_class, visited)?;
                    }
                    for descendant in virtual_override_subtree(vm, target) {
                        walk(vm, descendant, visited)?;
                    }
                    walk(vm, target, visited)?;
                }
            }
        }
    }
    Ok(())
}

/// Every method reachable from `root` via outgoing `VirtualOverride`
/// edges (spec §4.5's `overridden -> overriding` direction). Also used
/// by [`super::cha_call_graph`].
pub(crate) fn virtual_override_subtree(vm: &VirtualMachine, root: NodeIndex) -> Vec<NodeIndex> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    let mut seen = HashSet::new();
    while let Some(v) = stack.pop() {
        if !seen.insert(v) {
            continue;
        }
        for e in vm.method_graph().edges_directed(v, Direction::Outgoing) {
            if matches!(e.weight(), MethodEdgeKind::VirtualOverride) {
                out.push(e.target());
                stack.push(e.target());
            }
        }
    }
    out
}

fn load_clinit(vm: &mut VirtualMachine, class: NodeIndex, visited: &mut HashSet<NodeIndex>) -> Result<()> {
    let jvm_type = vm.class(class).jvm_handle.clone();
    let clinit = crate::hdl::JvmMethodHandle::new(jvm_type, "<clinit>", "V");
    if let Ok(m) = vm.find_method(&clinit, true) {
        walk(vm, m, visited)?;
    }
    Ok(())
}
