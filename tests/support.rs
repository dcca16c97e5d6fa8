//! Hand-assembled DEX byte buffers (spec §8): precise control over
//! instruction bytes and field tables that a real `javac`+`d8` fixture
//! wouldn't give us. One synthetic class, `LTest;`, carries both
//! properties this module exercises: an `invoke-static` followed by
//! `move-result-object` (def/use correctness), and four instance
//! fields of mixed primitive/reference types (byte-offset totality).
use jitdex::analysis::def_use;
use jitdex::vm::{field_byte_width, VirtualMachine, VmConfig};
use jitdex::{DexString, JvmTypeHandle};

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_uleb128(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            buf.push(byte | 0x80);
        } else {
            buf.push(byte);
            break;
        }
    }
}

fn patch_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

/// A `code_item`: one method with no tries/debug info, per spec §6.
fn push_code_item(buf: &mut Vec<u8>, registers_size: u16, ins_size: u16, insns: &[u16]) -> u32 {
    let off = buf.len() as u32;
    push_u16(buf, registers_size);
    push_u16(buf, ins_size);
    push_u16(buf, 0); // outs_size
    push_u16(buf, 0); // tries_size
    push_u32(buf, 0); // debug_info_off
    push_u32(buf, insns.len() as u32);
    for &unit in insns {
        push_u16(buf, unit);
    }
    off
}

/// Builds a minimal standard DEX (spec §6) with one class, `LTest;`:
/// four instance fields (`b: B`, `s: S`, `j: J`, `obj: Ljava/lang/String;`)
/// and two static methods, `other()Ljava/lang/String;` (returns a
/// constant string) and `m()Ljava/lang/String;` (`invoke-static` into
/// `other`, `move-result-object`, `return-object`).
fn build_test_dex() -> Vec<u8> {
    const NO_INDEX: u32 = 0xffff_ffff;

    // string table, indices fixed by position in this list.
    let strings = [
        "LTest;",             // 0
        "Ljava/lang/String;", // 1
        "m",                  // 2
        "other",              // 3
        "L",                  // 4 (shorty: returns L, no params)
        "B",                  // 5
        "S",                  // 6
        "J",                  // 7
        "b",                  // 8
        "s",                  // 9
        "j",                  // 10
        "obj",                // 11
        "hi",                 // 12
    ];
    const TYPE_TEST: u32 = 0;
    const TYPE_STRING: u32 = 1;
    const TYPE_B: u32 = 2;
    const TYPE_S: u32 = 3;
    const TYPE_J: u32 = 4;
    let types = [0usize, 1, 5, 6, 7]; // string index for each type id

    let mut buf = vec![0u8; 112]; // header, patched at the end

    let string_ids_off = buf.len() as u32;
    let string_ids_patch_positions: Vec<usize> =
        (0..strings.len()).map(|i| string_ids_off as usize + i * 4).collect();
    buf.resize(buf.len() + strings.len() * 4, 0);

    let type_ids_off = buf.len() as u32;
    for &s in &types {
        push_u32(&mut buf, s as u32);
    }

    let proto_ids_off = buf.len() as u32;
    // proto 0: shorty "L", returns Ljava/lang/String;, no parameters.
    push_u32(&mut buf, 4); // shorty_idx
    push_u32(&mut buf, TYPE_STRING);
    push_u32(&mut buf, 0); // parameters_off

    let field_ids_off = buf.len() as u32;
    let fields = [
        (TYPE_TEST, TYPE_B, 8u32),      // b: B
        (TYPE_TEST, TYPE_S, 9u32),      // s: S
        (TYPE_TEST, TYPE_J, 10u32),     // j: J
        (TYPE_TEST, TYPE_STRING, 11u32), // obj: Ljava/lang/String;
    ];
    for (class_idx, type_idx, name_idx) in fields {
        push_u16(&mut buf, class_idx as u16);
        push_u16(&mut buf, type_idx as u16);
        push_u32(&mut buf, name_idx);
    }

    let method_ids_off = buf.len() as u32;
    // method 0: m, method 1: other, both proto 0.
    push_u16(&mut buf, TYPE_TEST as u16);
    push_u16(&mut buf, 0); // proto_idx
    push_u32(&mut buf, 2); // name "m"
    push_u16(&mut buf, TYPE_TEST as u16);
    push_u16(&mut buf, 0);
    push_u32(&mut buf, 3); // name "other"

    let map_off = buf.len() as u32;
    push_u32(&mut buf, 1); // one map item
    push_u16(&mut buf, 0x0000); // ItemType::Header
    push_u16(&mut buf, 0); // unused
    push_u32(&mut buf, 1); // size
    push_u32(&mut buf, 0); // offset

    // other()Ljava/lang/String; : const-string v0, "hi" ; return-object v0
    let code_off_other = push_code_item(&mut buf, 1, 0, &[0x001a, 0x000c, 0x0011]);
    // m()Ljava/lang/String; : invoke-static {}, other ; move-result-object v0 ; return-object v0
    let code_off_m = push_code_item(&mut buf, 1, 0, &[0x0071, 0x0001, 0x0000, 0x000c, 0x0011]);

    let class_data_off = buf.len() as u32;
    push_uleb128(&mut buf, 0); // static_fields_size
    push_uleb128(&mut buf, 4); // instance_fields_size
    push_uleb128(&mut buf, 2); // direct_methods_size
    push_uleb128(&mut buf, 0); // virtual_methods_size
    // instance fields: field_idx diffs 0,1,1,1; no access flags set.
    for diff in [0u64, 1, 1, 1] {
        push_uleb128(&mut buf, diff);
        push_uleb128(&mut buf, 0);
    }
    // direct methods: m (idx 0), other (idx 1), both public static.
    push_uleb128(&mut buf, 0);
    push_uleb128(&mut buf, 0x9); // PUBLIC | STATIC
    push_uleb128(&mut buf, code_off_m as u64);
    push_uleb128(&mut buf, 1);
    push_uleb128(&mut buf, 0x9);
    push_uleb128(&mut buf, code_off_other as u64);

    let class_defs_off = buf.len() as u32;
    push_u32(&mut buf, TYPE_TEST); // class_idx
    push_u32(&mut buf, 0x1); // access_flags: PUBLIC
    push_u32(&mut buf, NO_INDEX); // superclass_idx
    push_u32(&mut buf, 0); // interfaces_off
    push_u32(&mut buf, NO_INDEX); // source_file_idx
    push_u32(&mut buf, 0); // annotations_off
    push_u32(&mut buf, class_data_off);
    push_u32(&mut buf, 0); // static_values_off

    // string_data_item section; patch string_ids once offsets are known.
    for (i, s) in strings.iter().enumerate() {
        let off = buf.len() as u32;
        push_uleb128(&mut buf, s.chars().count() as u64);
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
        patch_u32(&mut buf, string_ids_patch_positions[i], off);
    }

    // header (spec §6): magic, checksum (patched last), signature,
    // sizes/offsets of every table above.
    buf[0..8].copy_from_slice(b"dex\n035\0");
    let file_size = buf.len() as u32;
    buf[32..36].copy_from_slice(&file_size.to_le_bytes());
    buf[36..40].copy_from_slice(&112u32.to_le_bytes());
    buf[40..44].copy_from_slice(&[0x78, 0x56, 0x34, 0x12]); // little-endian tag
    patch_u32(&mut buf, 52, map_off);
    patch_u32(&mut buf, 56, strings.len() as u32);
    patch_u32(&mut buf, 60, string_ids_off);
    patch_u32(&mut buf, 64, types.len() as u32);
    patch_u32(&mut buf, 68, type_ids_off);
    patch_u32(&mut buf, 72, 1); // proto_ids_size
    patch_u32(&mut buf, 76, proto_ids_off);
    patch_u32(&mut buf, 80, fields.len() as u32);
    patch_u32(&mut buf, 84, field_ids_off);
    patch_u32(&mut buf, 88, 2); // method_ids_size
    patch_u32(&mut buf, 92, method_ids_off);
    patch_u32(&mut buf, 96, 1); // class_defs_size
    patch_u32(&mut buf, 100, class_defs_off);

    let checksum = adler32::RollingAdler32::from_buffer(&buf[12..]).hash();
    patch_u32(&mut buf, 8, checksum);

    buf
}

fn load() -> (VirtualMachine, jitdex::ClassLoaderHandle) {
    let mut vm = VirtualMachine::new(VmConfig::default());
    let loader = vm.add_loader(&[]);
    vm.add_file_owned(loader, build_test_dex()).expect("loading synthetic dex");
    (vm, loader)
}

#[test]
fn move_result_object_def_use_targets_destination_not_invoke() {
    let (mut vm, loader) = load();
    let jvm = JvmTypeHandle::new(loader, DexString::from("LTest;"));
    let class = vm.find_class(&jvm, true).expect("LTest; not found");
    let m = *vm
        .class(class)
        .dtable
        .iter()
        .find(|&&method| vm.method(method).name.as_str() == "m")
        .expect("m not found");
    let graph = vm.method(m).insn_graph.as_ref().expect("m has code");
    let edges = def_use::compute(graph);

    let move_result = graph
        .graph()
        .node_indices()
        .find(|&v| graph.graph()[v].insn.op() == 0x0c)
        .expect("move-result-object vertex");
    let return_object = graph
        .graph()
        .node_indices()
        .find(|&v| graph.graph()[v].insn.op() == 0x11)
        .expect("return-object vertex");

    // move-result-object defines v0 with its real destination, and
    // return-object's use of v0 resolves back to it, not to the invoke.
    assert!(edges
        .iter()
        .any(|e| e.from == move_result && e.to == return_object && e.register == 0));
    assert!(graph.graph()[move_result].insn.uses().is_empty());
    assert_eq!(graph.graph()[move_result].insn.defs(), vec![0]);
}

#[test]
fn field_offsets_accumulate_byte_widths_per_descriptor() {
    let (mut vm, loader) = load();
    let jvm = JvmTypeHandle::new(loader, DexString::from("LTest;"));
    let class = vm.find_class(&jvm, true).expect("LTest; not found");
    let class = vm.class(class);
    assert_eq!(class.instance_fields.len(), 4);

    let field_named = |name: &str| {
        *class
            .instance_fields
            .iter()
            .find(|&&f| vm.field(f).name.as_str() == name)
            .unwrap_or_else(|| panic!("field {} not found", name))
    };

    let b = field_named("b");
    let s = field_named("s");
    let j = field_named("j");
    let obj = field_named("obj");

    assert_eq!(vm.field(b).byte_width, field_byte_width("B"));
    assert_eq!(vm.field(s).byte_width, field_byte_width("S"));
    assert_eq!(vm.field(j).byte_width, field_byte_width("J"));
    assert_eq!(vm.field(obj).byte_width, field_byte_width("Ljava/lang/String;"));

    assert_eq!(vm.field(b).offset, 0);
    assert_eq!(vm.field(s).offset, 1);
    assert_eq!(vm.field(j).offset, 3);
    assert_eq!(vm.field(obj).offset, 11);
    let instance_size = class.instance_size;
    assert_eq!(instance_size, 15);
}
