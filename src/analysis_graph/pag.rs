//! The Pointer Assignment Graph (spec §4.11): seven node kinds, a
//! union-find parent pointer per vertex for cheap post-hoc merging, and
//! the in-set/points-to-set/dereferencer bookkeeping the points-to
//! worklist needs. Grounded in
//! `include/jitana/analysis/points_to.hpp`'s `pag_vertex_property`
//! (`disjoint_sets`-based union-find over a `boost::adjacency_list`),
//! rendered here as a `petgraph::DiGraph` with an explicit `parent`
//! field instead of a separate rank/parent property map.
use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::hdl::{FieldHandle, MethodHandle};

/// Identifies one instruction for points-to purposes: the method that
/// owns it plus its code-unit offset within that method's instruction
/// stream. `hdl::InsnHandle`'s offset is only unique *within* one
/// method's code item, so it can't double as a cross-method allocation
/// -site/call-site key the way the PAG needs; this compound key is used
/// instead (SPEC_FULL §3 open-question resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub method: MethodHandle,
    pub offset: u32,
}

/// One of the seven PAG node kinds (spec §4.11's table). [`CallSite`]
/// doubles as both "instruction" and "allocation site" identity, since
/// every allocation is an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Reg(CallSite, i32),
    Alloc(CallSite),
    RegField(CallSite, i32, FieldHandle),
    AllocField(CallSite, FieldHandle),
    StaticField(FieldHandle),
    RegArray(CallSite, i32),
    AllocArray(CallSite),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagEdgeKind {
    Alloc,
    Assign,
    IStore,
    ILoad,
    SStore,
    SLoad,
    AStore,
    ALoad,
}

/// A virtual-invoke record attached to a receiver's PAG vertex (spec
/// §4.11 phase A's invoke bullet): the invoke site plus enough of the
/// statically-resolved target's identity (name, shorty) to re-resolve
/// it against whatever type the receiver turns out to point to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualInvokeSite {
    pub site: CallSite,
    pub method_name: String,
    pub shorty: String,
}

/// One PAG vertex (spec §4.11's vertex-field list). `alloc_type` is the
/// vertex's declared/allocated *class-graph* node rather than a
/// dex-local type handle: every allocation the engine creates one for
/// has already gone through `find_class`, and subclass checks (phase-B
/// step 1) need a loaded [`crate::vm::VirtualMachine::is_superclass_of`]
/// node, not just a descriptor.
pub struct PagVertex {
    pub kind: NodeKind,
    pub alloc_type: Option<NodeIndex>,
    /// The call-site instruction context this vertex was created under;
    /// `None` is the spec's `no_insn` (non-register nodes and context
    /// -insensitive static/alloc nodes).
    pub context: Option<CallSite>,
    parent: NodeIndex,
    pub in_set: Vec<NodeIndex>,
    pub points_to: Vec<NodeIndex>,
    pub dereferencers: Vec<NodeIndex>,
    pub virtual_invokes: Vec<VirtualInvokeSite>,
    dirty: bool,
}

/// The PAG: a directed graph of [`PagVertex`] plus a `(kind, context)`
/// lookup index.
pub struct Pag {
    graph: DiGraph<PagVertex, PagEdgeKind>,
    by_kind: HashMap<NodeKind, Vec<NodeIndex>>,
}

impl Default for Pag {
    fn default() -> Self {
        Self::new()
    }
}

impl Pag {
    pub fn new() -> Self {
        Pag {
            graph: DiGraph::new(),
            by_kind: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &DiGraph<PagVertex, PagEdgeKind> {
        &self.graph
    }

    /// Looks up the vertex matching `kind` and `context`, creating one
    /// if absent (spec §4.11's lookup-table-with-context-filter).
    pub fn get_or_create(&mut self, kind: NodeKind, context: Option<CallSite>) -> NodeIndex {
        if let Some(existing) = self
            .by_kind
            .get(&kind)
            .and_then(|vs| vs.iter().copied().find(|&idx| self.graph[idx].context == context))
        {
            return existing;
        }
        let idx = self.graph.add_node(PagVertex {
            kind,
            alloc_type: None,
            context,
            parent: NodeIndex::new(0),
            in_set: Vec::new(),
            points_to: Vec::new(),
            dereferencers: Vec::new(),
            virtual_invokes: Vec::new(),
            dirty: false,
        });
        self.graph[idx].parent = idx;
        self.by_kind.entry(kind).or_default().push(idx);
        idx
    }

    pub fn set_alloc_type(&mut self, v: NodeIndex, class_node: NodeIndex) {
        self.graph[v].alloc_type = Some(class_node);
    }

    /// Union-find root with path compression (spec §4.11's parent
    /// pointer, used by `check_cast`'s self-assign and alias merging).
    pub fn find(&mut self, v: NodeIndex) -> NodeIndex {
        let parent = self.graph[v].parent;
        if parent == v {
            return v;
        }
        let root = self.find(parent);
        self.graph[v].parent = root;
        root
    }

    pub fn union(&mut self, a: NodeIndex, b: NodeIndex) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.graph[ra].parent = rb;
        }
    }

    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, kind: PagEdgeKind) {
        self.graph.add_edge(from, to, kind);
    }

    pub fn vertex(&self, v: NodeIndex) -> &PagVertex {
        &self.graph[v]
    }

    pub fn vertex_mut(&mut self, v: NodeIndex) -> &mut PagVertex {
        &mut self.graph[v]
    }

    pub fn is_dirty(&self, v: NodeIndex) -> bool {
        self.graph[v].dirty
    }

    pub fn mark_dirty(&mut self, v: NodeIndex) {
        self.graph[v].dirty = true;
    }

    pub fn clear_dirty(&mut self, v: NodeIndex) {
        self.graph[v].dirty = false;
    }
}
