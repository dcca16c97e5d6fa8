//! Contextual call graph (spec §4.12): a vertex per (method handle,
//! call-site context), populated as a side effect of the points-to
//! engine's phase-A edge synthesis and phase-B on-the-fly dispatch.
use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::analysis_graph::pag::CallSite;
use crate::hdl::JvmMethodHandle;

/// `caller@context -> callee`, bundled with whether the call was a
/// virtual dispatch and the caller-side instruction vertex handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallEdge {
    pub virtual_dispatch: bool,
    pub caller_insn: CallSite,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub method: JvmMethodHandle,
    pub context: Option<CallSite>,
}

pub struct ContextualCallGraph {
    graph: DiGraph<ContextKey, CallEdge>,
    by_key: HashMap<ContextKey, NodeIndex>,
}

impl Default for ContextualCallGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextualCallGraph {
    pub fn new() -> Self {
        ContextualCallGraph {
            graph: DiGraph::new(),
            by_key: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &DiGraph<ContextKey, CallEdge> {
        &self.graph
    }

    pub fn vertex(&mut self, method: JvmMethodHandle, context: Option<CallSite>) -> NodeIndex {
        let key = ContextKey { method, context };
        if let Some(&idx) = self.by_key.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(key.clone());
        self.by_key.insert(key, idx);
        idx
    }

    pub fn add_call(&mut self, caller: NodeIndex, callee: NodeIndex, edge: CallEdge) {
        if !self
            .graph
            .edges_connecting(caller, callee)
            .any(|e| *e.weight() == edge)
        {
            self.graph.add_edge(caller, callee, edge);
        }
    }
}
