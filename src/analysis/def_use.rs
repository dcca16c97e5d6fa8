//! Def-use analysis (spec §4.8): element = (defining vertex, register),
//! `comb` = set union, `flow(v, in) = (in - defs(v)) ∪ {(v, r) : r ∈
//! defs(v)}`. After the fixpoint, emits an edge `u -> v` tagged `r` for
//! every `(u, r) ∈ in[v]` with `u != v` and `r ∈ uses(v)`.
use petgraph::graph::NodeIndex;

use crate::algorithm::monotonic_dataflow::solve;
use crate::algorithm::unique_sort::{merge_sorted, unique_sort};
use crate::insn_graph::InsnGraph;

/// A def-use edge: `from` defines register `register`, consumed at `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefUseEdge {
    pub from: NodeIndex,
    pub to: NodeIndex,
    pub register: i32,
}

pub fn compute(g: &InsnGraph) -> Vec<DefUseEdge> {
    let graph = g.graph();
    let (in_map, _) = solve::<_, _, Vec<(NodeIndex, i32)>, _, _>(
        graph,
        g.entry(),
        Vec::new(),
        |v, inp| {
            let defs = graph[v].insn.defs();
            let mut out: Vec<(NodeIndex, i32)> =
                inp.iter().cloned().filter(|(_, r)| !defs.contains(r)).collect();
            out.extend(defs.into_iter().map(|r| (v, r)));
            unique_sort(out)
        },
        |acc, other| {
            merge_sorted(acc, other);
        },
    );

    let mut edges = Vec::new();
    for v in graph.node_indices() {
        let uses = graph[v].insn.uses();
        for (u, r) in &in_map[&v] {
            if *u != v && uses.contains(r) {
                edges.push(DefUseEdge {
                    from: *u,
                    to: v,
                    register: *r,
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
    fn const_feeds_return() {
        // const/4 v0, #5 ; return v0
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
        assert!(edges.iter().any(|e| e.register == 0));
    }
}
