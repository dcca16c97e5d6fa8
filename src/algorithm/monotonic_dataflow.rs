//! Generic monotonic worklist solver (spec §4.7) over a `petgraph`
//! `DiGraph`. The caller supplies the lattice (`S`), a combining
//! operator and a transfer function; termination relies on the
//! caller's lattice being monotonic, as spec §4.7 requires.
use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::DfsPostOrder;
use petgraph::Direction;

/// Runs the solver to a fixpoint and returns `(in_map, out_map)`.
///
/// `flow(v, in)` must be pure given `in`; the solver reruns it whenever
/// `in_map[v]` changes.
pub fn solve<N, E, S, Flow, Comb>(
    graph: &DiGraph<N, E>,
    entry: NodeIndex,
    bottom: S,
    mut flow: Flow,
    mut comb: Comb,
) -> (HashMap<NodeIndex, S>, HashMap<NodeIndex, S>)
where
    S: Clone + PartialEq,
    Flow: FnMut(NodeIndex, &S) -> S,
    Comb: FnMut(&mut S, &S),
{
    let mut in_map: HashMap<NodeIndex, S> = graph.node_indices().map(|v| (v, bottom.clone())).collect();
    let mut out_map: HashMap<NodeIndex, S> = HashMap::new();
    for v in graph.node_indices() {
        let out = flow(v, &in_map[&v]);
        out_map.insert(v, out);
    }

    // Step 2: seed the worklist in reverse postorder of the reverse CFG,
    // i.e. postorder of the forward CFG from the entry vertex.
    let mut order = Vec::new();
    let mut dfs = DfsPostOrder::new(&*graph, entry);
    while let Some(n) = dfs.next(&*graph) {
        order.push(n);
    }
    let seen: HashSet<NodeIndex> = order.iter().copied().collect();
    for v in graph.node_indices() {
        if !seen.contains(&v) {
            order.push(v);
        }
    }

    let mut dirty: HashSet<NodeIndex> = order.iter().copied().collect();
    let mut worklist: VecDeque<NodeIndex> = order.into_iter().collect();

    while let Some(v) = worklist.pop_front() {
        dirty.remove(&v);
        let preds: Vec<NodeIndex> = graph.neighbors_directed(v, Direction::Incoming).collect();
        if preds.is_empty() {
            continue;
        }
        let mut new_in = out_map[&preds[0]].clone();
        for p in &preds[1..] {
            comb(&mut new_in, &out_map[p]);
        }
        if new_in != in_map[&v] {
            in_map.insert(v, new_in.clone());
            let new_out = flow(v, &new_in);
            out_map.insert(v, new_out);
            for s in graph.neighbors_directed(v, Direction::Outgoing) {
                if dirty.insert(s) {
                    worklist.push_back(s);
                }
            }
        }
    }

    (in_map, out_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagates_union_along_a_chain() {
        let mut g: DiGraph<(), ()> = DiGraph::new();
        let a = g.add_node(());
        let b = g.add_node(());
        let c = g.add_node(());
        g.add_edge(a, b, ());
        g.add_edge(b, c, ());

        let defs: HashMap<NodeIndex, Vec<u32>> =
            [(a, vec![1]), (b, vec![2]), (c, vec![])].into_iter().collect();

        let (_, out) = solve::<(), (), Vec<u32>, _, _>(
            &g,
            a,
            Vec::new(),
            |v, inp| {
                let mut out = inp.clone();
                out.extend(defs[&v].iter().copied());
                out.sort_unstable();
                out.dedup();
                out
            },
            |acc, other| {
                acc.extend(other.iter().copied());
                acc.sort_unstable();
                acc.dedup();
            },
        );

        assert_eq!(out[&c], vec![1, 2]);
    }
}
