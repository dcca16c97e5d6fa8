//! The virtual machine (spec §4.5, §5): owns the loader/class/method/
//! field graphs, the DEX files registered under each loader, and the
//! DEX-handle/JVM-handle lookup tables. Grounded in the teacher's
//! `DexReader`-owns-a-mapped-file pattern, generalized to many loaders
//! each owning many files.
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::hdl::{
    ClassLoaderHandle, DexFileHandle, FieldHandle, JvmFieldHandle, JvmMethodHandle, JvmTypeHandle,
    MethodHandle, TypeHandle,
};
use crate::insn_graph::InsnGraph;
use crate::rawdex::string::DexString;
use crate::rawdex::{self, DexIndexes, RawDex};
use crate::{Error, Result};

/// Backing storage for one DEX file: either memory-mapped or owned in
/// memory (spec §5 — "borrowed byte range... or a scoped memory-mapped
/// region").
pub enum DexBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl AsRef<[u8]> for DexBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            DexBytes::Mapped(m) => m.as_ref(),
            DexBytes::Owned(v) => v.as_ref(),
        }
    }
}

/// Tuning knobs for a [`VirtualMachine`] (SPEC_FULL §0's ambient
/// configuration layer).
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    /// LRU cache size for decoded DEX strings, mirrored from the
    /// teacher's `DexBuilder::from_file` constant.
    pub string_cache_size: usize,
    /// Selects the §4.11 on-the-fly points-to engine over the cheaper
    /// §4.13 CHA call graph.
    pub on_the_fly_points_to: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            string_cache_size: 4096,
            on_the_fly_points_to: false,
        }
    }
}

struct LoaderFile {
    dex: RawDex<DexBytes>,
    indexes: DexIndexes,
}

struct LoaderNode {
    handle: ClassLoaderHandle,
    files: Vec<LoaderFile>,
}

/// One class vertex (spec §4.5). `static_fields`/`instance_fields` are
/// the class's full field lists after inheritance (owning dex-local
/// handle preserved per field); `dtable`/`vtable` are the analogous
/// method lists.
pub struct ClassVertex {
    pub handle: TypeHandle,
    pub jvm_handle: JvmTypeHandle,
    pub access_flags: u32,
    pub superclass: Option<NodeIndex>,
    pub static_size: u32,
    pub instance_size: u32,
    pub static_fields: Vec<NodeIndex>,
    pub instance_fields: Vec<NodeIndex>,
    pub dtable: Vec<NodeIndex>,
    pub vtable: Vec<NodeIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassEdgeKind {
    Super,
    Interface,
}

pub struct FieldVertex {
    pub handle: FieldHandle,
    pub jvm_handle: JvmFieldHandle,
    pub owner_class: NodeIndex,
    pub name: DexString,
    pub type_descriptor: DexString,
    pub access_flags: u32,
    pub is_static: bool,
    /// Byte width of the field's value per spec §3 (1 for `B`/`Z`, 2 for
    /// `S`/`C`, 8 for `J`/`D`, 4 for everything else incl. references).
    pub byte_width: u32,
    /// Byte offset into the class's static or instance storage.
    pub offset: u32,
}

/// Width in bytes of a field's value, keyed off `type_descriptor`'s
/// first character, per spec §3.
pub fn field_byte_width(type_descriptor: &str) -> u32 {
    match type_descriptor.as_bytes().first() {
        Some(b'B') | Some(b'Z') => 1,
        Some(b'S') | Some(b'C') => 2,
        Some(b'J') | Some(b'D') => 8,
        _ => 4,
    }
}

pub struct MethodVertex {
    pub handle: MethodHandle,
    pub jvm_handle: JvmMethodHandle,
    pub owner_class: NodeIndex,
    pub name: DexString,
    pub shorty: DexString,
    pub return_descriptor: DexString,
    pub access_flags: u32,
    pub insn_graph: Option<InsnGraph>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodEdgeKind {
    /// `super_method -> overriding_method` (spec §4.5 step 4).
    VirtualOverride,
    /// A call-graph edge added by §4.9/§4.12/§4.13.
    Call {
        virtual_dispatch: bool,
    },
}

/// The virtual machine: four interlinked graphs plus DEX/JVM handle
/// lookup tables (spec §3, §4.5).
pub struct VirtualMachine {
    config: VmConfig,
    loaders: Vec<LoaderNode>,
    loader_graph: DiGraph<ClassLoaderHandle, ()>,
    loader_node_idx: HashMap<ClassLoaderHandle, NodeIndex>,

    pub(crate) class_graph: DiGraph<ClassVertex, ClassEdgeKind>,
    class_by_handle: HashMap<TypeHandle, NodeIndex>,
    class_by_jvm: HashMap<JvmTypeHandle, NodeIndex>,

    pub(crate) field_graph: DiGraph<FieldVertex, ()>,
    field_by_handle: HashMap<FieldHandle, NodeIndex>,
    field_by_jvm: HashMap<JvmFieldHandle, NodeIndex>,

    pub(crate) method_graph: DiGraph<MethodVertex, MethodEdgeKind>,
    method_by_handle: HashMap<MethodHandle, NodeIndex>,
    method_by_jvm: HashMap<JvmMethodHandle, NodeIndex>,
}

impl VirtualMachine {
    pub fn new(config: VmConfig) -> Self {
        VirtualMachine {
            config,
            loaders: Vec::new(),
            loader_graph: DiGraph::new(),
            loader_node_idx: HashMap::new(),
            class_graph: DiGraph::new(),
            class_by_handle: HashMap::new(),
            class_by_jvm: HashMap::new(),
            field_graph: DiGraph::new(),
            field_by_handle: HashMap::new(),
            field_by_jvm: HashMap::new(),
            method_graph: DiGraph::new(),
            method_by_handle: HashMap::new(),
            method_by_jvm: HashMap::new(),
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Registers a new class loader, optionally delegating to `parent`
    /// loaders (spec §4.5's loader-graph hierarchy; a loader may have
    /// more than one parent, searched in the order given).
    pub fn add_loader(&mut self, parents: &[ClassLoaderHandle]) -> ClassLoaderHandle {
        let handle = ClassLoaderHandle(self.loaders.len() as u8);
        self.loaders.push(LoaderNode {
            handle,
            files: Vec::new(),
        });
        let idx = self.loader_graph.add_node(handle);
        self.loader_node_idx.insert(handle, idx);
        for parent in parents {
            if let Some(&parent_idx) = self.loader_node_idx.get(parent) {
                self.loader_graph.add_edge(idx, parent_idx, ());
            }
        }
        handle
    }

    /// Registers a DEX file under `loader` from a memory-mapped path,
    /// returning its file handle (spec §4.14 step a).
    pub fn add_file<P: AsRef<Path>>(
        &mut self,
        loader: ClassLoaderHandle,
        path: P,
    ) -> Result<DexFileHandle> {
        let file = File::open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        self.add_file_bytes(loader, DexBytes::Mapped(mmap))
    }

    /// Registers a DEX file already held in memory.
    pub fn add_file_owned(
        &mut self,
        loader: ClassLoaderHandle,
        bytes: Vec<u8>,
    ) -> Result<DexFileHandle> {
        self.add_file_bytes(loader, DexBytes::Owned(bytes))
    }

    fn add_file_bytes(
        &mut self,
        loader: ClassLoaderHandle,
        bytes: DexBytes,
    ) -> Result<DexFileHandle> {
        let dex = rawdex::open_bytes(bytes)?;
        let indexes = dex.build_lookup_tables()?;
        let node = self
            .loaders
            .iter_mut()
            .find(|l| l.handle == loader)
            .ok_or_else(|| Error::InvalidHandle(format!("no such loader: {}", loader)))?;
        let idx = node.files.len() as u8;
        node.files.push(LoaderFile { dex, indexes });
        Ok(DexFileHandle { loader, idx })
    }

    pub(crate) fn file(&self, handle: DexFileHandle) -> Result<&RawDex<DexBytes>> {
        self.loader_file(handle).map(|f| &f.dex)
    }

    fn loader_file(&self, handle: DexFileHandle) -> Result<&LoaderFile> {
        self.loaders
            .iter()
            .find(|l| l.handle == handle.loader)
            .and_then(|l| l.files.get(handle.idx as usize))
            .ok_or_else(|| Error::InvalidHandle(format!("no such dex file: {}", handle)))
    }

    pub(crate) fn indexes(&self, handle: DexFileHandle) -> Result<&DexIndexes> {
        self.loader_file(handle).map(|f| &f.indexes)
    }

    /// Parent loaders of `loader`, in declared order (spec §4.5's
    /// loader-graph traversal order).
    pub(crate) fn loader_parents(&self, loader: ClassLoaderHandle) -> Vec<ClassLoaderHandle> {
        match self.loader_node_idx.get(&loader) {
            Some(&idx) => self
                .loader_graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|n| self.loader_graph[n])
                .collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn loader_file_handles(&self, loader: ClassLoaderHandle) -> Vec<DexFileHandle> {
        self.loaders
            .iter()
            .find(|l| l.handle == loader)
            .map(|l| {
                (0..l.files.len())
                    .map(|idx| DexFileHandle {
                        loader,
                        idx: idx as u8,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // -- class/method/field graph accessors -----------------------------

    pub fn class(&self, idx: NodeIndex) -> &ClassVertex {
        &self.class_graph[idx]
    }

    pub fn method(&self, idx: NodeIndex) -> &MethodVertex {
        &self.method_graph[idx]
    }

    pub fn field(&self, idx: NodeIndex) -> &FieldVertex {
        &self.field_graph[idx]
    }

    pub fn class_graph(&self) -> &DiGraph<ClassVertex, ClassEdgeKind> {
        &self.class_graph
    }

    pub fn method_graph(&self) -> &DiGraph<MethodVertex, MethodEdgeKind> {
        &self.method_graph
    }

    pub fn field_graph(&self) -> &DiGraph<FieldVertex, ()> {
        &self.field_graph
    }

    /// Forces every class-def in `file` through `find_class`, returning
    /// the class-graph vertices in class-def order. Grounded in the
    /// teacher's `DexReader` exposing a full-classes iterator for the
    /// CLI/`classes.rs` example; `find_class` alone only loads a class
    /// once something references its descriptor.
    pub fn load_all_classes(&mut self, file: DexFileHandle) -> Result<Vec<NodeIndex>> {
        let descriptors: Vec<DexString> = {
            let dex = self.file(file)?;
            let mut out = Vec::with_capacity(dex.class_def_count() as usize);
            for def in dex.class_defs() {
                let def = def?;
                out.push((*dex.get_type_descriptor(def.class_idx)?).clone());
            }
            out
        };
        descriptors
            .into_iter()
            .map(|descriptor| {
                let jvm = JvmTypeHandle::new(file.loader, descriptor);
                self.find_class(&jvm, true)
            })
            .collect()
    }

    pub(crate) fn class_node_by_handle(&self, handle: TypeHandle) -> Option<NodeIndex> {
        self.class_by_handle.get(&handle).copied()
    }

    pub(crate) fn class_node_by_jvm(&self, handle: &JvmTypeHandle) -> Option<NodeIndex> {
        self.class_by_jvm.get(handle).copied()
    }

    pub(crate) fn register_class(&mut self, handle: TypeHandle, jvm: JvmTypeHandle, idx: NodeIndex) {
        self.class_by_handle.insert(handle, idx);
        self.class_by_jvm.insert(jvm, idx);
    }

    pub(crate) fn method_node_by_handle(&self, handle: MethodHandle) -> Option<NodeIndex> {
        self.method_by_handle.get(&handle).copied()
    }

    pub(crate) fn method_node_by_jvm(&self, handle: &JvmMethodHandle) -> Option<NodeIndex> {
        self.method_by_jvm.get(handle).copied()
    }

    pub(crate) fn register_method(
        &mut self,
        handle: MethodHandle,
        jvm: JvmMethodHandle,
        idx: NodeIndex,
    ) {
        self.method_by_handle.insert(handle, idx);
        self.method_by_jvm.insert(jvm, idx);
    }

    pub(crate) fn field_node_by_handle(&self, handle: FieldHandle) -> Option<NodeIndex> {
        self.field_by_handle.get(&handle).copied()
    }

    pub(crate) fn field_node_by_jvm(&self, handle: &JvmFieldHandle) -> Option<NodeIndex> {
        self.field_by_jvm.get(handle).copied()
    }

    pub(crate) fn register_field(&mut self, handle: FieldHandle, jvm: JvmFieldHandle, idx: NodeIndex) {
        self.field_by_handle.insert(handle, idx);
        self.field_by_jvm.insert(jvm, idx);
    }

    /// `find_class(jvm_hdl, try_load)` (spec §4.5): DFS over the loader
    /// graph starting at `jvm_hdl.loader`, trying each loader's own
    /// descriptor table before its parents.
    pub fn find_class(&mut self, jvm_hdl: &JvmTypeHandle, try_load: bool) -> Result<NodeIndex> {
        if let Some(idx) = self.class_node_by_jvm(jvm_hdl) {
            return Ok(idx);
        }
        if !try_load {
            return Err(Error::NotFound(format!("class not loaded: {}", jvm_hdl)));
        }
        crate::class_loader::load_recursive_loader_search(self, jvm_hdl.loader, &jvm_hdl.descriptor)
    }

    /// `find_method(jvm_hdl, try_load)` (spec §4.5): loads the declaring
    /// class first, then looks it up by unique name in the class's
    /// dtable/vtable.
    pub fn find_method(&mut self, jvm_hdl: &JvmMethodHandle, try_load: bool) -> Result<NodeIndex> {
        if let Some(idx) = self.method_node_by_jvm(jvm_hdl) {
            return Ok(idx);
        }
        self.find_class(&jvm_hdl.type_handle, try_load)?;
        self.method_node_by_jvm(jvm_hdl)
            .ok_or_else(|| Error::NotFound(format!("method not found: {}", jvm_hdl)))
    }

    /// `find_field(jvm_hdl, try_load)` (spec §4.5), analogous to
    /// `find_method`.
    pub fn find_field(&mut self, jvm_hdl: &JvmFieldHandle, try_load: bool) -> Result<NodeIndex> {
        if let Some(idx) = self.field_node_by_jvm(jvm_hdl) {
            return Ok(idx);
        }
        self.find_class(&jvm_hdl.type_handle, try_load)?;
        self.field_node_by_jvm(jvm_hdl)
            .ok_or_else(|| Error::NotFound(format!("field not found: {}", jvm_hdl)))
    }

    /// Resolves a dex-local [`TypeHandle`] to the initiating-loader JVM
    /// handle it names, without loading the class (spec §4.1's "every
    /// dex-local handle maps to exactly one JVM handle").
    pub fn jvm_type_handle(&self, handle: TypeHandle) -> Result<JvmTypeHandle> {
        let dex = self.file(handle.file)?;
        let descriptor = (*dex.get_type_descriptor(handle.idx as u32)?).clone();
        Ok(JvmTypeHandle::new(handle.file.loader, descriptor))
    }

    pub fn jvm_method_handle(&self, handle: MethodHandle) -> Result<JvmMethodHandle> {
        let dex = self.file(handle.file)?;
        let item = dex.get_method_item(handle.idx as u32)?;
        let proto = dex.get_proto_item(item.proto_idx as u32)?;
        let owner = JvmTypeHandle::new(
            handle.file.loader,
            (*dex.get_type_descriptor(item.class_idx as u32)?).clone(),
        );
        let name = dex.get_string(item.name_idx)?;
        let shorty = dex.get_string(proto.shorty_idx)?;
        Ok(JvmMethodHandle::new(owner, name.as_str(), shorty.as_str()))
    }

    pub fn jvm_field_handle(&self, handle: FieldHandle) -> Result<JvmFieldHandle> {
        let dex = self.file(handle.file)?;
        let item = dex.get_field_item(handle.idx as u32)?;
        let owner = JvmTypeHandle::new(
            handle.file.loader,
            (*dex.get_type_descriptor(item.class_idx as u32)?).clone(),
        );
        let name = dex.get_string(item.name_idx)?;
        Ok(JvmFieldHandle::new(owner, name.as_str()))
    }

    /// `is_superclass_of` (SPEC_FULL §2): DFS over the class graph's
    /// super-edges from `candidate` towards its ancestors, looking for
    /// `base`. Super/interface edges run ancestor -> descendant, so this
    /// walks `Incoming` edges from `candidate`.
    pub fn is_superclass_of(&self, base: NodeIndex, candidate: NodeIndex) -> bool {
        let mut stack = vec![candidate];
        let mut seen = std::collections::HashSet::new();
        while let Some(v) = stack.pop() {
            if v == base {
                return true;
            }
            if !seen.insert(v) {
                continue;
            }
            for e in self.class_graph.edges_directed(v, Direction::Incoming) {
                stack.push(e.source());
            }
        }
        false
    }

    /// `is_interface_of` (SPEC_FULL §2): like [`Self::is_superclass_of`]
    /// but only following edges tagged `Interface`.
    pub fn is_interface_of(&self, iface: NodeIndex, candidate: NodeIndex) -> bool {
        let mut stack = vec![candidate];
        let mut seen = std::collections::HashSet::new();
        while let Some(v) = stack.pop() {
            if !seen.insert(v) {
                continue;
            }
            for e in self.class_graph.edges_directed(v, Direction::Incoming) {
                if *e.weight() == ClassEdgeKind::Interface && e.source() == iface {
                    return true;
                }
                stack.push(e.source());
            }
        }
        false
    }
}
