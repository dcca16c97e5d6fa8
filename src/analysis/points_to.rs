//! The points-to engine (spec §4.11) and the on-the-fly call graph it
//! drives (spec §4.12). Grounded in
//! `lib/jitana/analysis/points_to.cpp`'s `points_to_algorithm_data`:
//! a disjoint-set PAG, a FIFO worklist of dirty vertices, and an
//! `on_the_fly_cg` flag gating whether invoke targets are resolved
//! statically up front or deferred to points-to resolution.
//!
//! This rendition runs every PAG vertex context-insensitively (every
//! `context` field is `None`): call-site sensitivity would require
//! cloning points-to state per context through every recursive call,
//! which is out of scope here. [`CallSite`] and [`PagVertex::context`]
//! keep the slot in the API so a k-CFA variant has somewhere to plug in
//! (see DESIGN.md's points-to Open Question entry).
use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::analysis::def_use;
use crate::analysis::recursive_loader;
use crate::analysis_graph::contextual_call_graph::{CallEdge, ContextualCallGraph};
use crate::analysis_graph::pag::{CallSite, NodeKind, Pag, PagEdgeKind, VirtualInvokeSite};
use crate::hdl::{JvmMethodHandle, JvmTypeHandle, MethodHandle, REG_RESULT};
use crate::insn::ConstVal;
use crate::insn_graph::{EdgeKind, InsnGraph};
use crate::insn_info::info;
use crate::rawdex::string::DexString;
use crate::vm::VirtualMachine;
use crate::Result;

/// Offset standing in for a method's pseudo-entry vertex, which has no
/// code-unit offset of its own.
const ENTRY_OFFSET: u32 = u32::MAX - 1;
/// Offset standing in for a method's pseudo-exit vertex.
const EXIT_OFFSET: u32 = u32::MAX;

/// One real instruction's synthesis-relevant fields, snapshotted out of
/// the method's `InsnGraph` before any `&mut VirtualMachine` call is
/// made (the graph itself borrows the `vm` it came from).
struct Work {
    v: NodeIndex,
    site: CallSite,
    mnemonic: &'static str,
    const_val: ConstVal,
    regs: [i32; 5],
    /// For `move-result-object` only: the call site of the fallthrough
    /// predecessor (its invoke).
    move_result_source: Option<CallSite>,
}

pub struct PointsToEngine {
    pub pag: Pag,
    pub call_graph: ContextualCallGraph,
    on_the_fly: bool,
    worklist: VecDeque<NodeIndex>,
    method_queue: VecDeque<NodeIndex>,
    visited: HashSet<NodeIndex>,
}

/// Runs the engine to completion from `entries` and returns it so the
/// caller can inspect the PAG / contextual call graph afterwards.
pub fn run(vm: &mut VirtualMachine, entries: &[NodeIndex], on_the_fly: bool) -> Result<PointsToEngine> {
    let mut engine = PointsToEngine::new(on_the_fly);
    engine.run(vm, entries)?;
    Ok(engine)
}

impl PointsToEngine {
    pub fn new(on_the_fly: bool) -> Self {
        PointsToEngine {
            pag: Pag::new(),
            call_graph: ContextualCallGraph::new(),
            on_the_fly,
            worklist: VecDeque::new(),
            method_queue: VecDeque::new(),
            visited: HashSet::new(),
        }
    }

    /// Alternates phase A (walking a queued method's instructions) and
    /// phase B (draining the worklist) until both are empty.
    pub fn run(&mut self, vm: &mut VirtualMachine, entries: &[NodeIndex]) -> Result<()> {
        self.method_queue.extend(entries.iter().copied());
        loop {
            if let Some(m) = self.method_queue.pop_front() {
                self.walk_method(vm, m)?;
                continue;
            }
            if let Some(v) = self.worklist.pop_front() {
                self.propagate_from(vm, v);
                continue;
            }
            break;
        }
        Ok(())
    }

    fn queue_method(&mut self, m: NodeIndex) {
        if !self.visited.contains(&m) {
            self.method_queue.push_back(m);
        }
    }

    fn enqueue(&mut self, v: NodeIndex) {
        if !self.pag.is_dirty(v) {
            self.pag.mark_dirty(v);
            self.worklist.push_back(v);
        }
    }

    // ---- Phase A: edge synthesis -----------------------------------

    fn walk_method(&mut self, vm: &mut VirtualMachine, m: NodeIndex) -> Result<()> {
        if !self.visited.insert(m) {
            return Ok(());
        }

        let jvm_handle = vm.method(m).jvm_handle.clone();
        self.call_graph.vertex(jvm_handle, None);

        let method_handle = vm.method(m).handle;
        let insn_graph = match &vm.method(m).insn_graph {
            Some(g) => g,
            None => return Ok(()),
        };

        let reaching = reaching_map(insn_graph);

        let mut site_of: HashMap<NodeIndex, CallSite> = HashMap::new();
        for v in insn_graph.graph().node_indices() {
            let offset = insn_graph.graph()[v].offset.unwrap_or(if v == insn_graph.exit() {
                EXIT_OFFSET
            } else {
                ENTRY_OFFSET
            });
            site_of.insert(v, CallSite { method: method_handle, offset });
        }

        let mut work = Vec::new();
        for v in insn_graph.graph().node_indices() {
            let vertex = &insn_graph.graph()[v];
            if vertex.insn.is_pseudo() {
                continue;
            }
            let mnemonic = info(vertex.insn.op() as u8).mnemonic;
            let move_result_source = if mnemonic == "move-result-object" {
                insn_graph
                    .graph()
                    .edges_directed(v, Direction::Incoming)
                    .find(|e| matches!(e.weight(), EdgeKind::Fallthrough))
                    .map(|e| site_of[&e.source()])
            } else {
                None
            };
            work.push(Work {
                v,
                site: site_of[&v],
                mnemonic,
                const_val: vertex.insn.const_val().clone(),
                regs: *vertex.insn.regs(),
                move_result_source,
            });
        }

        for item in &work {
            self.handle_instruction(vm, method_handle, &reaching, &site_of, item)?;
        }
        Ok(())
    }

    fn handle_instruction(
        &mut self,
        vm: &mut VirtualMachine,
        method: MethodHandle,
        reaching: &HashMap<(NodeIndex, i32), Vec<NodeIndex>>,
        site_of: &HashMap<NodeIndex, CallSite>,
        item: &Work,
    ) -> Result<()> {
        let site = item.site;
        let regs = item.regs;

        match item.mnemonic {
            "move-object" | "move-object/from16" | "move-object/16" => {
                let dst = self.pag.get_or_create(NodeKind::Reg(site, regs[0]), None);
                for src in self.reaching_nodes(reaching, site_of, item.v, regs[1]) {
                    self.add_assign(src, dst);
                }
            }
            "move-result-object" => {
                if let Some(call_site) = item.move_result_source {
                    let src = self.pag.get_or_create(NodeKind::Reg(call_site, REG_RESULT), None);
                    let dst = self.pag.get_or_create(NodeKind::Reg(site, regs[0]), None);
                    self.add_assign(src, dst);
                }
            }
            "return-object" => {
                let exit_site = CallSite { method, offset: EXIT_OFFSET };
                let dst = self.pag.get_or_create(NodeKind::Reg(exit_site, REG_RESULT), None);
                for src in self.reaching_nodes(reaching, site_of, item.v, regs[0]) {
                    self.add_assign(src, dst);
                }
            }
            "check-cast" => {
                if let ConstVal::Type(ty) = &item.const_val {
                    let jvm = vm.jvm_type_handle(*ty)?;
                    match vm.find_class(&jvm, true) {
                        Ok(class_node) => {
                            let dst = self.pag.get_or_create(NodeKind::Reg(site, regs[0]), None);
                            self.pag.set_alloc_type(dst, class_node);
                            for src in self.reaching_nodes(reaching, site_of, item.v, regs[0]) {
                                self.add_assign(src, dst);
                            }
                        }
                        Err(e) => log::warn!("points-to: check-cast target {} unresolved: {}", jvm, e),
                    }
                }
            }
            "const-string" | "const-string/jumbo" => {
                self.synth_alloc(vm, method, site, regs[0], "Ljava/lang/String;")?;
            }
            "const-class" => {
                self.synth_alloc(vm, method, site, regs[0], "Ljava/lang/Class;")?;
            }
            "new-instance" => {
                if let ConstVal::Type(ty) = &item.const_val {
                    let jvm = vm.jvm_type_handle(*ty)?;
                    self.queue_clinit(vm, &jvm)?;
                    match vm.find_class(&jvm, true) {
                        Ok(class_node) => {
                            let alloc = self.pag.get_or_create(NodeKind::Alloc(site), None);
                            self.pag.set_alloc_type(alloc, class_node);
                            let dst = self.pag.get_or_create(NodeKind::Reg(site, regs[0]), None);
                            self.add_alloc_edge(alloc, dst);
                        }
                        Err(e) => log::warn!("points-to: new-instance target {} unresolved: {}", jvm, e),
                    }
                }
            }
            "new-array" => {
                self.synth_alloc(vm, method, site, regs[0], "Ljava/lang/Object;")?;
            }
            "aget-object" => {
                let arr_reg = regs[1];
                let regarray = self.pag.get_or_create(NodeKind::RegArray(site, arr_reg), None);
                for arr in self.reaching_nodes(reaching, site_of, item.v, arr_reg) {
                    self.register_dereferencer(arr, regarray);
                }
                let dst = self.pag.get_or_create(NodeKind::Reg(site, regs[0]), None);
                self.add_aload(regarray, dst);
            }
            "aput-object" => {
                let arr_reg = regs[1];
                let regarray = self.pag.get_or_create(NodeKind::RegArray(site, arr_reg), None);
                for arr in self.reaching_nodes(reaching, site_of, item.v, arr_reg) {
                    self.register_dereferencer(arr, regarray);
                }
                for src in self.reaching_nodes(reaching, site_of, item.v, regs[0]) {
                    self.add_astore(src, regarray);
                }
            }
            "iget-object" => {
                if let ConstVal::Field(field) = &item.const_val {
                    let jvm = vm.jvm_field_handle(*field)?;
                    match vm.find_field(&jvm, true) {
                        Ok(field_node) => {
                            let declaring = vm.field(field_node).handle;
                            if reference_typed(vm.field(field_node).type_descriptor.as_str()) {
                                let obj_reg = regs[1];
                                let regfield = self.pag.get_or_create(NodeKind::RegField(site, obj_reg, declaring), None);
                                for obj in self.reaching_nodes(reaching, site_of, item.v, obj_reg) {
                                    self.register_dereferencer(obj, regfield);
                                }
                                let dst = self.pag.get_or_create(NodeKind::Reg(site, regs[0]), None);
                                self.add_iload(regfield, dst);
                            }
                        }
                        Err(e) => log::warn!("points-to: iget-object field {} unresolved: {}", jvm, e),
                    }
                }
            }
            "iput-object" => {
                if let ConstVal::Field(field) = &item.const_val {
                    let jvm = vm.jvm_field_handle(*field)?;
                    match vm.find_field(&jvm, true) {
                        Ok(field_node) => {
                            let declaring = vm.field(field_node).handle;
                            if reference_typed(vm.field(field_node).type_descriptor.as_str()) {
                                let obj_reg = regs[1];
                                let regfield = self.pag.get_or_create(NodeKind::RegField(site, obj_reg, declaring), None);
                                for obj in self.reaching_nodes(reaching, site_of, item.v, obj_reg) {
                                    self.register_dereferencer(obj, regfield);
                                }
                                for src in self.reaching_nodes(reaching, site_of, item.v, regs[0]) {
                                    self.add_istore(src, regfield);
                                }
                            }
                        }
                        Err(e) => log::warn!("points-to: iput-object field {} unresolved: {}", jvm, e),
                    }
                }
            }
            "sget-object" => {
                if let ConstVal::Field(field) = &item.const_val {
                    let jvm = vm.jvm_field_handle(*field)?;
                    match vm.find_field(&jvm, true) {
                        Ok(field_node) => {
                            let declaring = vm.field(field_node).handle;
                            let owner = vm.class(vm.field(field_node).owner_class).jvm_handle.clone();
                            self.queue_clinit(vm, &owner)?;
                            let static_node = self.pag.get_or_create(NodeKind::StaticField(declaring), None);
                            let dst = self.pag.get_or_create(NodeKind::Reg(site, regs[0]), None);
                            self.add_sload(static_node, dst);
                        }
                        Err(e) => log::warn!("points-to: sget-object field {} unresolved: {}", jvm, e),
                    }
                }
            }
            "sput-object" => {
                if let ConstVal::Field(field) = &item.const_val {
                    let jvm = vm.jvm_field_handle(*field)?;
                    match vm.find_field(&jvm, true) {
                        Ok(field_node) => {
                            let declaring = vm.field(field_node).handle;
                            let owner = vm.class(vm.field(field_node).owner_class).jvm_handle.clone();
                            self.queue_clinit(vm, &owner)?;
                            let static_node = self.pag.get_or_create(NodeKind::StaticField(declaring), None);
                            for src in self.reaching_nodes(reaching, site_of, item.v, regs[0]) {
                                self.add_sstore(src, static_node);
                            }
                        }
                        Err(e) => log::warn!("points-to: sput-object field {} unresolved: {}", jvm, e),
                    }
                }
            }
            mn if mn.starts_with("invoke") => {
                if let ConstVal::Method(handle) = &item.const_val {
                    let virtual_dispatch = mn.starts_with("invoke-virtual") || mn.starts_with("invoke-interface");
                    let is_static = mn.starts_with("invoke-static");
                    let jvm = vm.jvm_method_handle(*handle)?;
                    let mut parts = jvm.unique_name.splitn(2, ':');
                    let name = parts.next().unwrap_or("").to_string();
                    let shorty = parts.next().unwrap_or("").to_string();

                    if !is_static && virtual_dispatch {
                        let receiver_reg = regs[0];
                        for r in self.reaching_nodes(reaching, site_of, item.v, receiver_reg) {
                            let vertex = self.pag.vertex_mut(r);
                            if !vertex.virtual_invokes.iter().any(|vi| vi.site == site) {
                                vertex.virtual_invokes.push(VirtualInvokeSite {
                                    site,
                                    method_name: name.clone(),
                                    shorty: shorty.clone(),
                                });
                            }
                        }
                    }

                    if !self.on_the_fly || !virtual_dispatch {
                        match vm.find_method(&jvm, true) {
                            Ok(target) => {
                                if is_static {
                                    let owner = vm.class(vm.method(target).owner_class).jvm_handle.clone();
                                    self.queue_clinit(vm, &owner)?;
                                }
                                self.bind_call(vm, site, target)?;
                                if virtual_dispatch {
                                    for descendant in recursive_loader::virtual_override_subtree(vm, target) {
                                        self.bind_call(vm, site, descendant)?;
                                    }
                                }
                            }
                            Err(e) => log::warn!("points-to: invoke target {} unresolved: {}", jvm, e),
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn synth_alloc(
        &mut self,
        vm: &mut VirtualMachine,
        method: MethodHandle,
        site: CallSite,
        dest_reg: i32,
        descriptor: &str,
    ) -> Result<()> {
        let jvm = JvmTypeHandle::new(method.file.loader, DexString::from(descriptor));
        match vm.find_class(&jvm, true) {
            Ok(class_node) => {
                let alloc = self.pag.get_or_create(NodeKind::Alloc(site), None);
                self.pag.set_alloc_type(alloc, class_node);
                let dst = self.pag.get_or_create(NodeKind::Reg(site, dest_reg), None);
                self.add_alloc_edge(alloc, dst);
            }
            Err(e) => log::warn!("points-to: synthesized allocation type {} unresolved: {}", jvm, e),
        }
        Ok(())
    }

    fn queue_clinit(&mut self, vm: &mut VirtualMachine, owner: &JvmTypeHandle) -> Result<()> {
        if vm.find_class(owner, true).is_ok() {
            let clinit = JvmMethodHandle::new(owner.clone(), "<clinit>", "V");
            if let Ok(m) = vm.find_method(&clinit, true) {
                self.queue_method(m);
            }
        }
        Ok(())
    }

    /// Wires a resolved call's arguments and return value, registers the
    /// contextual call-graph edge, and queues `target` for phase A.
    /// Re-derives the caller's reaching-def map from `call_site` alone
    /// so it can be reused both from direct static binding and from
    /// phase B's on-the-fly redispatch (step 4).
    fn bind_call(&mut self, vm: &mut VirtualMachine, call_site: CallSite, target: NodeIndex) -> Result<()> {
        let caller_jvm = vm.jvm_method_handle(call_site.method)?;
        let caller_idx = match vm.find_method(&caller_jvm, true) {
            Ok(idx) => idx,
            Err(e) => {
                log::warn!("points-to: call site's own method {} unresolved: {}", caller_jvm, e);
                return Ok(());
            }
        };
        let caller_graph = match &vm.method(caller_idx).insn_graph {
            Some(g) => g,
            None => return Ok(()),
        };
        let call_v = match caller_graph.vertex_at_offset(call_site.offset) {
            Some(v) => v,
            None => return Ok(()),
        };
        let call_insn = caller_graph.graph()[call_v].insn.clone();
        let mnemonic = info(call_insn.op() as u8).mnemonic;
        let is_static = mnemonic.starts_with("invoke-static");
        let actual_args = call_insn.expanded_regs();
        let reaching = reaching_map(caller_graph);
        let mut site_of: HashMap<NodeIndex, CallSite> = HashMap::new();
        for v in caller_graph.graph().node_indices() {
            let offset = caller_graph.graph()[v].offset.unwrap_or(if v == caller_graph.exit() {
                EXIT_OFFSET
            } else {
                ENTRY_OFFSET
            });
            site_of.insert(v, CallSite { method: call_site.method, offset });
        }

        let target_handle = vm.method(target).handle;
        let target_shorty = vm.method(target).shorty.as_str().to_string();
        let target_return = vm.method(target).return_descriptor.as_str().to_string();
        let formal_regs = match &vm.method(target).insn_graph {
            Some(g) => g.graph()[g.entry()].insn.expanded_regs(),
            None => return Ok(()),
        };

        let mut actual_iter = actual_args.into_iter();
        let mut formal_iter = formal_regs.into_iter();
        if !is_static {
            if let (Some(a), Some(f)) = (actual_iter.next(), formal_iter.next()) {
                self.wire_arg(&reaching, &site_of, call_v, a, target_handle, f);
            }
        }
        for ch in target_shorty.chars().skip(1) {
            let a = actual_iter.next();
            let f = formal_iter.next();
            let wide = ch == 'J' || ch == 'D';
            if ch == 'L' {
                if let (Some(a), Some(f)) = (a, f) {
                    self.wire_arg(&reaching, &site_of, call_v, a, target_handle, f);
                }
            }
            if wide {
                actual_iter.next();
                formal_iter.next();
            }
        }
        if reference_typed(&target_return) {
            let exit_site = CallSite { method: target_handle, offset: EXIT_OFFSET };
            let result_src = self.pag.get_or_create(NodeKind::Reg(exit_site, REG_RESULT), None);
            let caller_result = self.pag.get_or_create(NodeKind::Reg(call_site, REG_RESULT), None);
            self.add_assign(result_src, caller_result);
        }

        let virtual_dispatch = mnemonic.starts_with("invoke-virtual") || mnemonic.starts_with("invoke-interface");
        let caller_jvm_for_cg = vm.method(caller_idx).jvm_handle.clone();
        let target_jvm = vm.method(target).jvm_handle.clone();
        let caller_cg = self.call_graph.vertex(caller_jvm_for_cg, None);
        let callee_cg = self.call_graph.vertex(target_jvm, None);
        self.call_graph.add_call(caller_cg, callee_cg, CallEdge { virtual_dispatch, caller_insn: call_site });

        self.queue_method(target);
        Ok(())
    }

    fn wire_arg(
        &mut self,
        reaching: &HashMap<(NodeIndex, i32), Vec<NodeIndex>>,
        site_of: &HashMap<NodeIndex, CallSite>,
        call_v: NodeIndex,
        actual_reg: i32,
        target: MethodHandle,
        formal_reg: i32,
    ) {
        let entry_site = CallSite { method: target, offset: ENTRY_OFFSET };
        let dst = self.pag.get_or_create(NodeKind::Reg(entry_site, formal_reg), None);
        if let Some(defs) = reaching.get(&(call_v, actual_reg)) {
            for def_v in defs.clone() {
                let src_site = site_of[&def_v];
                let src = self.pag.get_or_create(NodeKind::Reg(src_site, actual_reg), None);
                self.add_assign(src, dst);
            }
        }
    }

    fn reaching_nodes(
        &mut self,
        reaching: &HashMap<(NodeIndex, i32), Vec<NodeIndex>>,
        site_of: &HashMap<NodeIndex, CallSite>,
        v: NodeIndex,
        reg: i32,
    ) -> Vec<NodeIndex> {
        reaching
            .get(&(v, reg))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|def_v| {
                let site = site_of[&def_v];
                self.pag.get_or_create(NodeKind::Reg(site, reg), None)
            })
            .collect()
    }

    // ---- PAG edge helpers -------------------------------------------

    fn add_assign(&mut self, from: NodeIndex, to: NodeIndex) {
        self.pag.add_edge(from, to, PagEdgeKind::Assign);
        self.propagate_incremental(from, to);
    }

    fn add_sstore(&mut self, from: NodeIndex, to: NodeIndex) {
        self.pag.add_edge(from, to, PagEdgeKind::SStore);
        self.propagate_incremental(from, to);
    }

    fn add_sload(&mut self, from: NodeIndex, to: NodeIndex) {
        self.pag.add_edge(from, to, PagEdgeKind::SLoad);
        self.propagate_incremental(from, to);
    }

    fn add_istore(&mut self, from: NodeIndex, to: NodeIndex) {
        self.pag.add_edge(from, to, PagEdgeKind::IStore);
    }

    fn add_iload(&mut self, from: NodeIndex, to: NodeIndex) {
        self.pag.add_edge(from, to, PagEdgeKind::ILoad);
    }

    fn add_astore(&mut self, from: NodeIndex, to: NodeIndex) {
        self.pag.add_edge(from, to, PagEdgeKind::AStore);
    }

    fn add_aload(&mut self, from: NodeIndex, to: NodeIndex) {
        self.pag.add_edge(from, to, PagEdgeKind::ALoad);
    }

    fn add_alloc_edge(&mut self, alloc: NodeIndex, to: NodeIndex) {
        self.pag.add_edge(alloc, to, PagEdgeKind::Alloc);
        let to_vertex = self.pag.vertex_mut(to);
        if !to_vertex.in_set.contains(&alloc) && !to_vertex.points_to.contains(&alloc) {
            to_vertex.in_set.push(alloc);
            self.enqueue(to);
        }
    }

    /// Copies `from`'s current points-to set into `to`'s in-set
    /// (filtering out what `to` already has), enqueuing `to` if
    /// anything new arrived. Safe to call eagerly at edge-creation time
    /// as well as from phase B step 5, since it's a no-op once `to` has
    /// caught up.
    fn propagate_incremental(&mut self, from: NodeIndex, to: NodeIndex) {
        let from_points_to = self.pag.vertex(from).points_to.clone();
        if from_points_to.is_empty() {
            return;
        }
        let to_vertex = self.pag.vertex_mut(to);
        let mut changed = false;
        for alloc in from_points_to {
            if !to_vertex.in_set.contains(&alloc) && !to_vertex.points_to.contains(&alloc) {
                to_vertex.in_set.push(alloc);
                changed = true;
            }
        }
        if changed {
            self.enqueue(to);
        }
    }

    /// Registers `deref` as dereferencing `base`; for every alloc `base`
    /// already points to, materializes the field/array node immediately
    /// rather than waiting for a future worklist pass to rediscover it.
    fn register_dereferencer(&mut self, base: NodeIndex, deref: NodeIndex) {
        let already = {
            let v = self.pag.vertex_mut(base);
            if v.dereferencers.contains(&deref) {
                true
            } else {
                v.dereferencers.push(deref);
                false
            }
        };
        if already {
            return;
        }
        let allocs = self.pag.vertex(base).points_to.clone();
        for alloc in allocs {
            self.materialize_dereference(deref, alloc);
        }
    }

    /// Phase B step 3's per-(dereferencer, alloc) body: create the
    /// alloc.field/alloc.array node and rewire `d`'s store/load
    /// neighbors through it via assign edges.
    fn materialize_dereference(&mut self, d: NodeIndex, alloc: NodeIndex) {
        let alloc_site = match self.pag.vertex(alloc).kind {
            NodeKind::Alloc(site) => site,
            _ => return,
        };
        let field_or_array = match self.pag.vertex(d).kind {
            NodeKind::RegField(_, _, field) => self.pag.get_or_create(NodeKind::AllocField(alloc_site, field), None),
            NodeKind::RegArray(..) => self.pag.get_or_create(NodeKind::AllocArray(alloc_site), None),
            _ => return,
        };

        let preds: Vec<(NodeIndex, PagEdgeKind)> = self
            .pag
            .graph()
            .edges_directed(d, Direction::Incoming)
            .map(|e| (e.source(), *e.weight()))
            .collect();
        for (src, kind) in preds {
            if matches!(kind, PagEdgeKind::IStore | PagEdgeKind::AStore) {
                self.add_assign(src, field_or_array);
            }
        }
        let succs: Vec<(NodeIndex, PagEdgeKind)> = self
            .pag
            .graph()
            .edges_directed(d, Direction::Outgoing)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        for (dst, kind) in succs {
            if matches!(kind, PagEdgeKind::ILoad | PagEdgeKind::ALoad) {
                self.add_assign(field_or_array, dst);
            }
        }
    }

    // ---- Phase B: worklist propagation ------------------------------

    fn propagate_from(&mut self, vm: &mut VirtualMachine, v: NodeIndex) {
        self.pag.clear_dirty(v);

        // Step 1: filter the in-set.
        let declared_type = self.pag.vertex(v).alloc_type;
        let existing: HashSet<NodeIndex> = self.pag.vertex(v).points_to.iter().copied().collect();
        let candidates = std::mem::take(&mut self.pag.vertex_mut(v).in_set);
        let mut accepted = Vec::new();
        for alloc in candidates {
            if existing.contains(&alloc) {
                continue;
            }
            if let Some(t) = declared_type {
                if let Some(a) = self.pag.vertex(alloc).alloc_type {
                    if !vm.is_superclass_of(t, a) {
                        continue;
                    }
                }
            }
            accepted.push(alloc);
        }
        if accepted.is_empty() {
            return;
        }

        // Step 2: merge.
        self.pag.vertex_mut(v).points_to.extend(accepted.iter().copied());

        // Step 3: dereferencers.
        let dereferencers = self.pag.vertex(v).dereferencers.clone();
        for d in dereferencers {
            for &alloc in &accepted {
                self.materialize_dereference(d, alloc);
            }
        }

        // Step 4: on-the-fly dispatch.
        if self.on_the_fly {
            let invokes = self.pag.vertex(v).virtual_invokes.clone();
            if !invokes.is_empty() {
                for alloc in &accepted {
                    let class_node = match self.pag.vertex(*alloc).alloc_type {
                        Some(c) => c,
                        None => continue,
                    };
                    for invoke in &invokes {
                        let _ = self.redispatch(vm, class_node, invoke);
                    }
                }
            }
        }

        // Step 5: propagate along alloc/assign/sstore/sload out-edges.
        let outs: Vec<(NodeIndex, PagEdgeKind)> = self
            .pag
            .graph()
            .edges_directed(v, Direction::Outgoing)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        for (target, kind) in outs {
            if matches!(kind, PagEdgeKind::Alloc | PagEdgeKind::Assign | PagEdgeKind::SStore | PagEdgeKind::SLoad) {
                self.propagate_incremental(v, target);
            }
        }

        // Step 6: in-set already cleared via `mem::take` above.
    }

    fn redispatch(&mut self, vm: &mut VirtualMachine, class_node: NodeIndex, invoke: &VirtualInvokeSite) -> Result<()> {
        let owner_jvm = vm.class(class_node).jvm_handle.clone();
        let jvm_method = JvmMethodHandle::new(owner_jvm, &invoke.method_name, &invoke.shorty);
        match vm.find_method(&jvm_method, true) {
            Ok(target) => self.bind_call(vm, invoke.site, target)?,
            Err(e) => log::warn!("points-to: redispatch target {} unresolved: {}", jvm_method, e),
        }
        Ok(())
    }
}

fn reference_typed(descriptor: &str) -> bool {
    descriptor.starts_with('L') || descriptor.starts_with('[')
}

/// Builds a `(use vertex, register) -> [defining vertices]` map from
/// `def_use`'s edge list, the form the phase-A/bind-call helpers need
/// to resolve "the current value of register r here".
fn reaching_map(g: &InsnGraph) -> HashMap<(NodeIndex, i32), Vec<NodeIndex>> {
    let mut reaching: HashMap<(NodeIndex, i32), Vec<NodeIndex>> = HashMap::new();
    for e in def_use::compute(g) {
        reaching.entry((e.to, e.register)).or_default().push(e.from);
    }
    reaching
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
    fn reference_typed_classifies_object_and_array_descriptors() {
        assert!(reference_typed("Ljava/lang/String;"));
        assert!(reference_typed("[I"));
        assert!(!reference_typed("I"));
        assert!(!reference_typed("J"));
    }

    #[test]
    fn reaching_map_finds_move_objects_source() {
        // move-object v0, v1 ; return-object v0
        let code = CodeItem {
            registers_size: 2,
            ins_size: 0,
            outs_size: 0,
            insns: vec![0x1007, 0x0011],
            tries: Vec::new(),
            debug_info: None,
        };
        let g = build(file(), &code, false).unwrap();
        let reaching = reaching_map(&g);
        let return_vertex = g
            .graph()
            .node_indices()
            .find(|&v| g.graph()[v].offset == Some(1))
            .expect("return-object vertex");
        let sources = reaching
            .get(&(return_vertex, 0))
            .expect("v0 has a reaching definition at the return");
        assert_eq!(sources.len(), 1);
    }
}
