//! Recursive class loading (spec §4.5): superclass/interface loading,
//! field and vtable/dtable inheritance, and virtual-override edges.
use log::trace;
use petgraph::graph::NodeIndex;

use crate::access_flags::MethodAccessFlags;
use crate::hdl::{
    ClassLoaderHandle, DexFileHandle, FieldHandle, JvmFieldHandle, JvmMethodHandle, JvmTypeHandle,
    MethodHandle, TypeHandle,
};
use crate::rawdex::class_def::NO_INDEX;
use crate::rawdex::string::DexString;
use crate::vm::{ClassEdgeKind, ClassVertex, FieldVertex, MethodEdgeKind, MethodVertex, VirtualMachine};
use crate::{insn_graph, Error, Result};

/// `find_class`'s loader-graph DFS (spec §4.5): try `loader`'s own DEX
/// files first, then recurse into its parents in declaration order.
pub(crate) fn load_recursive_loader_search(
    vm: &mut VirtualMachine,
    loader: ClassLoaderHandle,
    descriptor: &DexString,
) -> Result<NodeIndex> {
    if let Some(idx) = load_in_loader(vm, loader, descriptor)? {
        return Ok(idx);
    }
    for parent in vm.loader_parents(loader) {
        if let Ok(idx) = load_recursive_loader_search(vm, parent, descriptor) {
            return Ok(idx);
        }
    }
    Err(Error::NotFound(format!(
        "class not found in loader {}: {}",
        loader, descriptor
    )))
}

fn load_in_loader(
    vm: &mut VirtualMachine,
    loader: ClassLoaderHandle,
    descriptor: &DexString,
) -> Result<Option<NodeIndex>> {
    for file in vm.loader_file_handles(loader) {
        if let Some(class_def_idx) = vm.indexes(file)?.class_def_by_descriptor(descriptor.as_str()) {
            return Ok(Some(load_class(vm, file, class_def_idx)?));
        }
    }
    Ok(None)
}

/// Loads class-def `class_def_idx` of `file` (spec §4.5 steps 1-6).
/// `find_class`/`load_recursive_loader_search` must be the only
/// entrypoints: this assumes the caller already checked the class isn't
/// loaded.
fn load_class(vm: &mut VirtualMachine, file: DexFileHandle, class_def_idx: u32) -> Result<NodeIndex> {
    let loader = file.loader;

    let (descriptor, access_flags, superclass_idx, interface_type_idxs, class_data) = {
        let dex = vm.file(file)?;
        let def = dex.get_class_def(class_def_idx)?;
        let descriptor = (*dex.get_type_descriptor(def.class_idx)?).clone();
        let interfaces = dex.get_type_list(def.interfaces_off)?;
        let class_data = dex.get_class_data(def.class_data_off)?;
        (
            descriptor,
            def.access_flags,
            def.superclass_idx,
            interfaces,
            class_data,
        )
    };

    let jvm_handle = JvmTypeHandle::new(loader, descriptor);
    if let Some(idx) = vm.class_node_by_jvm(&jvm_handle) {
        return Ok(idx);
    }

    trace!("loading class {}", jvm_handle);

    let superclass_node = if superclass_idx != NO_INDEX {
        let super_jvm = {
            let dex = vm.file(file)?;
            JvmTypeHandle::new(loader, (*dex.get_type_descriptor(superclass_idx)?).clone())
        };
        Some(vm.find_class(&super_jvm, true)?)
    } else {
        None
    };

    let mut interface_nodes = Vec::with_capacity(interface_type_idxs.len());
    for type_idx in &interface_type_idxs {
        let iface_jvm = {
            let dex = vm.file(file)?;
            JvmTypeHandle::new(loader, (*dex.get_type_descriptor(*type_idx as u32)?).clone())
        };
        interface_nodes.push(vm.find_class(&iface_jvm, true)?);
    }

    let (mut static_fields, mut instance_fields, mut dtable, mut vtable, mut static_offset, mut instance_offset) =
        match superclass_node {
            Some(s) => {
                let sc = vm.class(s);
                (
                    sc.static_fields.clone(),
                    sc.instance_fields.clone(),
                    sc.dtable.clone(),
                    sc.vtable.clone(),
                    sc.static_size,
                    sc.instance_size,
                )
            }
            None => (Vec::new(), Vec::new(), Vec::new(), Vec::new(), 0, 0),
        };

    let class_idx = vm.class_graph.add_node(ClassVertex {
        handle: TypeHandle::new(file, class_def_idx as u16),
        jvm_handle: jvm_handle.clone(),
        access_flags,
        superclass: superclass_node,
        static_size: 0,
        instance_size: 0,
        static_fields: Vec::new(),
        instance_fields: Vec::new(),
        dtable: Vec::new(),
        vtable: Vec::new(),
    });

    if let Some(data) = class_data {
        for ef in &data.static_fields {
            let idx = build_field_vertex(vm, file, class_idx, &jvm_handle, ef.field_idx, ef.access_flags, true, static_offset)?;
            static_offset += vm.field(idx).byte_width;
            static_fields.push(idx);
        }
        for ef in &data.instance_fields {
            let idx = build_field_vertex(vm, file, class_idx, &jvm_handle, ef.field_idx, ef.access_flags, false, instance_offset)?;
            instance_offset += vm.field(idx).byte_width;
            instance_fields.push(idx);
        }
        for em in &data.direct_methods {
            let idx = build_method_vertex(vm, file, class_idx, &jvm_handle, em.method_idx, em.access_flags, em.code_off)?;
            dtable.push(idx);
        }
        for em in &data.virtual_methods {
            let idx = build_method_vertex(vm, file, class_idx, &jvm_handle, em.method_idx, em.access_flags, em.code_off)?;
            let unique_name = vm.method(idx).jvm_handle.unique_name.clone();
            let existing = vtable
                .iter()
                .position(|&v| vm.method(v).jvm_handle.unique_name == unique_name);
            match existing {
                Some(pos) => {
                    let overridden = vtable[pos];
                    if vm.method(overridden).access_flags & MethodAccessFlags::FINAL.bits() != 0 {
                        log::warn!(
                            "{}",
                            Error::InconsistentVtable(format!(
                                "{} overrides final method {}",
                                jvm_handle, vm.method(overridden).jvm_handle,
                            ))
                        );
                    }
                    vm.method_graph
                        .add_edge(overridden, idx, MethodEdgeKind::VirtualOverride);
                    vtable[pos] = idx;
                }
                None => vtable.push(idx),
            }
        }
    }

    // Re-register every dtable/vtable/field entry (inherited or new)
    // under this class's JVM handle, per spec §4.5's field bullet,
    // generalized to methods so lookups don't need a linear scan.
    for &f in static_fields.iter().chain(instance_fields.iter()) {
        let field = vm.field(f);
        let name = field.name.clone();
        let dex_handle = field.handle;
        vm.register_field(dex_handle, JvmFieldHandle::new(jvm_handle.clone(), name.as_str()), f);
    }
    for &m in dtable.iter().chain(vtable.iter()) {
        let method = vm.method(m);
        let unique_name = method.jvm_handle.unique_name.clone();
        let dex_handle = method.handle;
        vm.register_method(
            dex_handle,
            JvmMethodHandle {
                type_handle: jvm_handle.clone(),
                unique_name,
            },
            m,
        );
    }

    {
        let v = &mut vm.class_graph[class_idx];
        v.static_fields = static_fields;
        v.instance_fields = instance_fields;
        v.dtable = dtable;
        v.vtable = vtable;
        v.static_size = static_offset;
        v.instance_size = instance_offset;
    }

    if let Some(s) = superclass_node {
        vm.class_graph.add_edge(s, class_idx, ClassEdgeKind::Super);
    }
    for iface in interface_nodes {
        vm.class_graph.add_edge(iface, class_idx, ClassEdgeKind::Interface);
    }

    vm.register_class(TypeHandle::new(file, class_def_idx as u16), jvm_handle, class_idx);
    Ok(class_idx)
}

#[allow(clippy::too_many_arguments)]
fn build_field_vertex(
    vm: &mut VirtualMachine,
    file: DexFileHandle,
    owner_class: NodeIndex,
    owner_jvm: &JvmTypeHandle,
    field_idx: u32,
    access_flags: u32,
    is_static: bool,
    offset: u32,
) -> Result<NodeIndex> {
    let (name, type_descriptor) = {
        let dex = vm.file(file)?;
        let item = dex.get_field_item(field_idx)?;
        (
            (*dex.get_string(item.name_idx)?).clone(),
            (*dex.get_type_descriptor(item.type_idx as u32)?).clone(),
        )
    };
    let handle = FieldHandle::new(file, field_idx as u16);
    let jvm_handle = JvmFieldHandle::new(owner_jvm.clone(), name.as_str());
    let byte_width = crate::vm::field_byte_width(type_descriptor.as_str());
    let idx = vm.field_graph.add_node(FieldVertex {
        handle,
        jvm_handle: jvm_handle.clone(),
        owner_class,
        name,
        type_descriptor,
        access_flags,
        is_static,
        byte_width,
        offset,
    });
    vm.register_field(handle, jvm_handle, idx);
    Ok(idx)
}

fn build_method_vertex(
    vm: &mut VirtualMachine,
    file: DexFileHandle,
    owner_class: NodeIndex,
    owner_jvm: &JvmTypeHandle,
    method_idx: u32,
    access_flags: u32,
    code_off: u32,
) -> Result<NodeIndex> {
    let (name, shorty, return_descriptor, returns_void, code_item) = {
        let dex = vm.file(file)?;
        let item = dex.get_method_item(method_idx)?;
        let proto = dex.get_proto_item(item.proto_idx as u32)?;
        let name = (*dex.get_string(item.name_idx)?).clone();
        let shorty = (*dex.get_string(proto.shorty_idx)?).clone();
        let return_descriptor = (*dex.get_type_descriptor(proto.return_type_idx)?).clone();
        let returns_void = return_descriptor.as_str().starts_with('V');
        let code_item = dex.get_code_item(code_off)?;
        (name, shorty, return_descriptor, returns_void, code_item)
    };

    let handle = MethodHandle::new(file, method_idx as u16);
    let jvm_handle = JvmMethodHandle::new(owner_jvm.clone(), name.as_str(), shorty.as_str());

    let insn_graph = match &code_item {
        Some(code) => Some(insn_graph::build(file, code, returns_void)?),
        None => None,
    };

    let idx = vm.method_graph.add_node(MethodVertex {
        handle,
        jvm_handle: jvm_handle.clone(),
        owner_class,
        name,
        shorty,
        return_descriptor,
        access_flags,
        insn_graph,
    });
    vm.register_method(handle, jvm_handle, idx);
    Ok(idx)
}
