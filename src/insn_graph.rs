//! Per-method instruction graph builder (spec §4.4): pseudo-entry/exit,
//! control-flow edges, switch/exception edges, and debug-line
//! assignment. Built over `petgraph` (the teacher has no graph
//! dependency of its own; this crate's other example repos use
//! `petgraph` for comparable CFG/call-graph structures).
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::hdl::{DexFileHandle, TypeHandle};
use crate::insn::{self, ConstVal, Insn};
use crate::rawdex::code::CodeItem;
use crate::{Error, Result};

/// One instruction vertex: its decoded instruction, code-unit offset
/// (`None` for the pseudo entry/exit), source line if debug info
/// resolved one, and the profile counter (spec §4.14).
#[derive(Debug, Clone)]
pub struct Vertex {
    pub insn: Insn,
    pub offset: Option<u32>,
    pub line: Option<u32>,
    pub counter: u64,
}

/// Edge kinds the builder emits (spec §4.4, plus the exception-flow
/// kind supplemented from `original_source/`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Fallthrough,
    Branch,
    Switch(i32),
    Return,
    /// A try/catch exception edge; `catch_type` is `None` for a
    /// catch-all handler.
    Exception { catch_type: Option<TypeHandle> },
    /// A call-graph edge added later by §4.9; never emitted by the CFG
    /// builder itself, but shares the instruction graph's edge type so
    /// `Self::has_call_graph_edge` can check idempotence in place.
    Call { virtual_dispatch: bool },
}

/// One resolved try-catch block (spec §4.4 step 4).
#[derive(Debug, Clone)]
pub struct TryBlock {
    pub first: NodeIndex,
    pub last: NodeIndex,
    pub handlers: Vec<(Option<TypeHandle>, NodeIndex)>,
}

pub struct InsnGraph {
    graph: DiGraph<Vertex, EdgeKind>,
    entry: NodeIndex,
    exit: NodeIndex,
    /// Code-unit offset of every real vertex, sorted, for binary search
    /// (spec §4.4 "instruction-offset lookup").
    offset_index: Vec<(u32, NodeIndex)>,
    try_blocks: Vec<TryBlock>,
}

impl InsnGraph {
    pub fn graph(&self) -> &DiGraph<Vertex, EdgeKind> {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut DiGraph<Vertex, EdgeKind> {
        &mut self.graph
    }

    pub fn entry(&self) -> NodeIndex {
        self.entry
    }

    pub fn exit(&self) -> NodeIndex {
        self.exit
    }

    pub fn try_blocks(&self) -> &[TryBlock] {
        &self.try_blocks
    }

    /// Binary search over real-vertex offsets, excluding pseudo-entry
    /// and pseudo-exit (spec §4.4).
    pub fn vertex_at_offset(&self, offset: u32) -> Option<NodeIndex> {
        self.offset_index
            .binary_search_by_key(&offset, |(o, _)| *o)
            .ok()
            .map(|i| self.offset_index[i].1)
    }

    /// `true` iff any predecessor of `v` is an `if`/`if_z`/`switch`
    /// instruction or the pseudo-entry (spec §4.4's basic-block-head
    /// predicate).
    pub fn is_block_head(&self, v: NodeIndex) -> bool {
        self.graph
            .neighbors_directed(v, Direction::Incoming)
            .any(|p| {
                if p == self.entry {
                    return true;
                }
                let pred = &self.graph[p];
                matches!(pred.insn.op() as u8, 0x32..=0x3d | 0x2b | 0x2c)
            })
    }

    /// `true` if any outgoing edge of `v` is already a call-graph edge
    /// (spec §4.9's idempotence check).
    pub fn has_call_graph_edge(&self, v: NodeIndex) -> bool {
        self.graph
            .edges_directed(v, Direction::Outgoing)
            .any(|e| matches!(e.weight(), EdgeKind::Call { .. }))
    }
}

/// Builds the instruction graph for one method (spec §4.4). `param_regs`
/// is the method's incoming-argument register count (`ins_size`);
/// `returns_void` drives the pseudo-exit's use-set.
pub fn build(file: DexFileHandle, code: &CodeItem, returns_void: bool) -> Result<InsnGraph> {
    let mut graph = DiGraph::new();
    let entry_insn = Insn::entry(code.registers_size, code.ins_size);
    let entry = graph.add_node(Vertex {
        insn: entry_insn,
        offset: None,
        line: None,
        counter: 0,
    });

    // Step 2: walk the unit stream, skipping payload pseudo-instructions.
    let units = &code.insns;
    let mut offset = 0usize;
    let mut real: Vec<(u32, NodeIndex, usize)> = Vec::new(); // (offset, vertex, size)
    while offset < units.len() {
        if insn::is_payload(&units[offset..]) {
            offset += insn::payload_size(&units[offset..])?;
            continue;
        }
        let (decoded, size) = insn::decode(file, &units[offset..])?;
        let vertex = graph.add_node(Vertex {
            insn: decoded,
            offset: Some(offset as u32),
            line: None,
            counter: 0,
        });
        real.push((offset as u32, vertex, size));
        offset += size;
    }

    // Step 3: pseudo-exit.
    let exit_insn = Insn::exit(!returns_void);
    let exit = graph.add_node(Vertex {
        insn: exit_insn,
        offset: None,
        line: None,
        counter: 0,
    });

    let offset_index: Vec<(u32, NodeIndex)> = real.iter().map(|(o, v, _)| (*o, *v)).collect();
    let find = |target: i64| -> Option<NodeIndex> {
        offset_index
            .binary_search_by_key(&(target as u32), |(o, _)| *o)
            .ok()
            .map(|i| offset_index[i].1)
    };

    // Step 5: entry fallthrough.
    if let Some((_, first, _)) = real.first() {
        graph.add_edge(entry, *first, EdgeKind::Fallthrough);
    } else {
        graph.add_edge(entry, exit, EdgeKind::Fallthrough);
    }

    // Step 6: per-instruction control-flow edges.
    for (i, (base, vertex, _size)) in real.iter().enumerate() {
        let meta = crate::insn_info::info((graph[*vertex].insn.op()) as u8);
        let base = *base as i64;

        if meta.props.contains(crate::insn_info::InsnProps::CAN_RETURN) {
            graph.add_edge(*vertex, exit, EdgeKind::Return);
        }
        if meta.props.contains(crate::insn_info::InsnProps::CAN_BRANCH) {
            if meta.props.contains(crate::insn_info::InsnProps::CAN_SWITCH) {
                if let ConstVal::Int32(payload_rel) = graph[*vertex].const_val().clone() {
                    let payload_off = base + payload_rel as i64;
                    if payload_off >= 0 && (payload_off as usize) < units.len() {
                        let payload_units = &units[payload_off as usize..];
                        if units[payload_off as usize] == 0x0100 {
                            let (first_key, targets) = insn::decode_packed_switch(payload_units)?;
                            for (k, rel) in targets.iter().enumerate() {
                                if let Some(t) = find(base + *rel as i64) {
                                    graph.add_edge(
                                        *vertex,
                                        t,
                                        EdgeKind::Switch(first_key + k as i32),
                                    );
                                }
                            }
                        } else if units[payload_off as usize] == 0x0200 {
                            let (keys, targets) = insn::decode_sparse_switch(payload_units)?;
                            for (k, rel) in keys.iter().zip(targets.iter()) {
                                if let Some(t) = find(base + *rel as i64) {
                                    graph.add_edge(*vertex, t, EdgeKind::Switch(*k));
                                }
                            }
                        }
                    }
                }
            } else if let ConstVal::Int32(rel) = graph[*vertex].const_val().clone() {
                if let Some(t) = find(base + rel as i64) {
                    graph.add_edge(*vertex, t, EdgeKind::Branch);
                }
            }
        }
        if meta.props.contains(crate::insn_info::InsnProps::CAN_CONTINUE) {
            let next = real.get(i + 1).map(|(_, v, _)| *v).unwrap_or(exit);
            graph.add_edge(*vertex, next, EdgeKind::Fallthrough);
        }
    }

    // Step 4: try/catch blocks, resolved against vertex offsets.
    let mut try_blocks = Vec::with_capacity(code.tries.len());
    for t in &code.tries {
        let end = t.start_addr + t.insn_count as u32;
        let first = offset_index
            .iter()
            .find(|(o, _)| *o >= t.start_addr)
            .map(|(_, v)| *v);
        let last = offset_index
            .iter()
            .rev()
            .find(|(o, _)| *o < end)
            .map(|(_, v)| *v);
        let (first, last) = match (first, last) {
            (Some(f), Some(l)) => (f, l),
            _ => continue,
        };
        // Every can-throw vertex in [first, last] reaches each handler
        // (`examples/original_source/include/jitana/analysis/exception_flow.hpp`),
        // not just the range's first instruction.
        let first_pos = offset_index.iter().position(|(_, v)| *v == first).unwrap();
        let last_pos = offset_index.iter().position(|(_, v)| *v == last).unwrap();
        let throwers: Vec<NodeIndex> = offset_index[first_pos..=last_pos]
            .iter()
            .map(|(_, v)| *v)
            .filter(|&v| {
                crate::insn_info::info(graph[v].insn.op() as u8)
                    .props
                    .contains(crate::insn_info::InsnProps::CAN_THROW)
            })
            .collect();

        let mut handlers = Vec::with_capacity(t.handlers.len() + 1);
        for h in &t.handlers {
            if let Some(target) = find(h.addr as i64) {
                let ty = TypeHandle::new(file, h.type_idx as u16);
                handlers.push((Some(ty), target));
                for &thrower in &throwers {
                    graph.add_edge(
                        thrower,
                        target,
                        EdgeKind::Exception {
                            catch_type: Some(ty),
                        },
                    );
                }
            }
        }
        if let Some(addr) = t.catch_all_addr {
            if let Some(target) = find(addr as i64) {
                handlers.push((None, target));
                for &thrower in &throwers {
                    graph.add_edge(thrower, target, EdgeKind::Exception { catch_type: None });
                }
            }
        }
        try_blocks.push(TryBlock {
            first,
            last,
            handlers,
        });
    }

    // Second pass: every can-throw instruction anywhere in the method
    // (inside a try block or not) can propagate uncaught to the caller.
    for (_, vertex, _) in &real {
        let meta = crate::insn_info::info(graph[*vertex].insn.op() as u8);
        if meta.props.contains(crate::insn_info::InsnProps::CAN_THROW) {
            graph.add_edge(
                *vertex,
                exit,
                EdgeKind::Exception { catch_type: None },
            );
        }
    }

    let mut insn_graph = InsnGraph {
        graph,
        entry,
        exit,
        offset_index,
        try_blocks,
    };

    // Step 7: debug-info line assignment.
    if let Some(debug) = &code.debug_info {
        assign_lines(&mut insn_graph, debug);
    }

    Ok(insn_graph)
}

fn assign_lines(g: &mut InsnGraph, debug: &crate::rawdex::code::DebugInfoItem) {
    use crate::rawdex::code::DebugBytecode;

    let mut address: u32 = 0;
    let mut line: i64 = debug.line_start as i64;
    let mut valid = true;
    let mut positions: Vec<(u32, Option<u32>)> = Vec::new();

    for bc in &debug.bytecodes {
        match bc {
            DebugBytecode::EndSequence => break,
            DebugBytecode::AdvancePc(n) => address += *n as u32,
            DebugBytecode::AdvanceLine(n) => line += n,
            DebugBytecode::SetFile(_) => valid = false,
            DebugBytecode::Special {
                line_off,
                address_off,
            } => {
                line += line_off;
                address += *address_off as u32;
                positions.push((address, if valid { Some(line.max(0) as u32) } else { None }));
            }
            _ => {}
        }
    }

    if positions.is_empty() {
        return;
    }
    for (_, vertex) in &g.offset_index {
        let offset = match g.graph[*vertex].offset {
            Some(o) => o,
            None => continue,
        };
        match positions.binary_search_by_key(&offset, |(a, _)| *a) {
            Ok(i) => g.graph[*vertex].line = positions[i].1,
            Err(0) => {}
            Err(i) => g.graph[*vertex].line = positions[i - 1].1,
        }
    }
}

/// Returns the catch handler a given try block maps `declared_type` to,
/// or the catch-all if present and no exact match exists. Used by
/// points-to/call-graph style consumers that need to route an
/// exception; grounded in `jitana::exception_flow`'s handler search.
pub fn find_handler<'a>(block: &'a TryBlock, declared_type: Option<TypeHandle>) -> Option<NodeIndex> {
    if let Some(ty) = declared_type {
        if let Some((_, v)) = block.handlers.iter().find(|(t, _)| *t == Some(ty)) {
            return Some(*v);
        }
    }
    block
        .handlers
        .iter()
        .find(|(t, _)| t.is_none())
        .map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdl::ClassLoaderHandle;
    use crate::rawdex::code::CodeItem;

    fn file() -> DexFileHandle {
        DexFileHandle {
            loader: ClassLoaderHandle(0),
            idx: 0,
        }
    }

    fn code(insns: Vec<u16>, registers_size: u16, ins_size: u16) -> CodeItem {
        CodeItem {
            registers_size,
            ins_size,
            outs_size: 0,
            insns,
            tries: Vec::new(),
            debug_info: None,
        }
    }

    #[test]
    fn const_then_return_void_links_entry_to_exit() {
        // const/4 v0, #5 ; return-void
        let c = code(vec![0x0112, 0x000e], 1, 0);
        let g = build(file(), &c, true).unwrap();
        assert_eq!(g.graph().node_count(), 4); // entry, const, return-void, exit
        assert!(g.vertex_at_offset(0).is_some());
        assert!(g.vertex_at_offset(1).is_some());
    }

    #[test]
    fn goto_creates_branch_edge() {
        // goto +2 ; nop ; nop
        let c = code(vec![0x0228, 0x0000, 0x0000], 1, 0);
        let g = build(file(), &c, true).unwrap();
        let goto_v = g.vertex_at_offset(0).unwrap();
        let target = g.vertex_at_offset(2).unwrap();
        assert!(g
            .graph()
            .edges_directed(goto_v, Direction::Outgoing)
            .any(|e| e.target() == target && *e.weight() == EdgeKind::Branch));
    }
}
