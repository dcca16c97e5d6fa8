//! Data-flow analysis with field paths (spec §4.8): like [`def_use`],
//! except the tracked element is a `Variable` rather than a bare
//! register, so instance/static field writes and reads participate in
//! the same fixpoint as register defs/uses.
//!
//! [`def_use`]: super::def_use
use petgraph::graph::NodeIndex;

use crate::algorithm::monotonic_dataflow::solve;
use crate::algorithm::unique_sort::{merge_sorted, unique_sort};
use crate::hdl::FieldHandle;
use crate::insn::{ConstVal, Insn};
use crate::insn_graph::InsnGraph;

/// One data-flow variable (spec §4.8): register-only, static-field-only,
/// or an instance field qualified by the register holding its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variable {
    Register(i32),
    StaticField(FieldHandle),
    InstanceField(i32, FieldHandle),
}

impl Variable {
    fn is_register_only(&self) -> bool {
        matches!(self, Variable::Register(_))
    }
}

fn field_mnemonic(insn: &Insn) -> Option<&'static str> {
    if insn.is_pseudo() {
        return None;
    }
    if matches!(insn.const_val(), ConstVal::Field(_)) {
        Some(crate::insn_info::info(insn.op() as u8).mnemonic)
    } else {
        None
    }
}

/// Variables `insn` writes.
pub fn defs(insn: &Insn) -> Vec<Variable> {
    if let (Some(m), ConstVal::Field(field)) = (field_mnemonic(insn), insn.const_val()) {
        if m.starts_with("sput") {
            return vec![Variable::StaticField(*field)];
        }
        if m.starts_with("iput") {
            return vec![Variable::InstanceField(insn.regs()[1], *field)];
        }
    }
    insn.defs().into_iter().map(Variable::Register).collect()
}

/// Variables `insn` reads.
pub fn uses(insn: &Insn) -> Vec<Variable> {
    if let (Some(m), ConstVal::Field(field)) = (field_mnemonic(insn), insn.const_val()) {
        if m.starts_with("sget") {
            return vec![Variable::StaticField(*field)];
        }
        if m.starts_with("iget") {
            return vec![
                Variable::Register(insn.regs()[1]),
                Variable::InstanceField(insn.regs()[1], *field),
            ];
        }
        if m.starts_with("iput") {
            return vec![
                Variable::Register(insn.regs()[0]),
                Variable::Register(insn.regs()[1]),
            ];
        }
    }
    insn.uses().into_iter().map(Variable::Register).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFlowEdge {
    pub from: NodeIndex,
    pub to: NodeIndex,
    pub variable: Variable,
}

/// Runs the fixpoint and returns def/use edges, after applying spec
/// §4.8's pseudo-entry/pseudo-exit pre-processing: the pseudo-entry's
/// defs become the union of every use in the method, and the
/// pseudo-exit's uses become every def minus register-only variables,
/// plus the result register if the method is non-void.
pub fn compute(g: &InsnGraph) -> Vec<DataFlowEdge> {
    let graph = g.graph();

    let mut all_uses: Vec<Variable> = Vec::new();
    let mut all_defs: Vec<Variable> = Vec::new();
    for v in graph.node_indices() {
        if v == g.entry() || v == g.exit() {
            continue;
        }
        all_uses.extend(uses(&graph[v].insn));
        all_defs.extend(defs(&graph[v].insn));
    }
    let entry_defs = unique_sort(all_uses);
    let mut exit_uses: Vec<Variable> = all_defs.into_iter().filter(|v| !v.is_register_only()).collect();
    if !graph[g.exit()].insn.uses().is_empty() {
        exit_uses.push(Variable::Register(crate::hdl::REG_RESULT));
    }
    let exit_uses = unique_sort(exit_uses);

    let defs_of = |v: NodeIndex| -> Vec<Variable> {
        if v == g.entry() {
            entry_defs.clone()
        } else if v == g.exit() {
            Vec::new()
        } else {
            defs(&graph[v].insn)
        }
    };
    let uses_of = |v: NodeIndex| -> Vec<Variable> {
        if v == g.exit() {
            exit_uses.clone()
        } else {
            uses(&graph[v].insn)
        }
    };

    let (in_map, _) = solve::<_, _, Vec<(NodeIndex, Variable)>, _, _>(
        graph,
        g.entry(),
        Vec::new(),
        |v, inp| {
            let d = defs_of(v);
            let mut out: Vec<(NodeIndex, Variable)> = inp
                .iter()
                .cloned()
                .filter(|(_, var)| !d.contains(var))
                .collect();
            out.extend(d.into_iter().map(|var| (v, var)));
            unique_sort(out)
        },
        |acc, other| {
            merge_sorted(acc, other);
        },
    );

    let mut edges = Vec::new();
    for v in graph.node_indices() {
        let used = uses_of(v);
        for (u, var) in &in_map[&v] {
            if *u != v && used.contains(var) {
                edges.push(DataFlowEdge {
                    from: *u,
                    to: v,
                    variable: *var,
                });
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdl::{ClassLoaderHandle, DexFileHandle};
    use crate::insn_graph::build;
    use crate::rawdex::code::CodeItem;

    fn file() -> DexFileHandle {
        DexFileHandle {
            loader: ClassLoaderHandle(0),
            idx: 0,
        }
    }

    #[test]
    fn register_edges_survive_field_variable_support() {
        let code = CodeItem {
            registers_size: 1,
            ins_size: 0,
            outs_size: 0,
            insns: vec![0x5012, 0x000f],
            tries: Vec::new(),
            debug_info: None,
        };
        let g = build(file(), &code, false).unwrap();
        let edges = compute(&g);
        assert!(edges
            .iter()
            .any(|e| e.variable == Variable::Register(0)));
    }
}
