//! The five fixed-size ID tables (spec §6).
use scroll::Pread;

use crate::rawdex::string::StringId;

pub type TypeId = u32;
pub type ProtoId = u32;
pub type FieldId = u32;
pub type MethodId = u32;

/// `type_id`: 4 bytes, a `string_id` index for the type descriptor.
#[derive(Debug, Clone, Copy, Pread)]
pub(crate) struct TypeIdItem {
    pub descriptor_idx: StringId,
}

/// `proto_id`: 12 bytes.
#[derive(Debug, Clone, Copy, Pread)]
pub(crate) struct ProtoIdItem {
    pub shorty_idx: StringId,
    pub return_type_idx: TypeId,
    pub parameters_off: u32,
}

/// `field_id`: 8 bytes.
#[derive(Debug, Clone, Copy, Pread)]
pub(crate) struct FieldIdItem {
    pub class_idx: u16,
    pub type_idx: u16,
    pub name_idx: StringId,
}

/// `method_id`: 8 bytes.
#[derive(Debug, Clone, Copy, Pread)]
pub(crate) struct MethodIdItem {
    pub class_idx: u16,
    pub proto_idx: u16,
    pub name_idx: StringId,
}
