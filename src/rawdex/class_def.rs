//! `class_def_item` and `class_data_item` (spec §6).
use scroll::{Pread, Uleb128};

use crate::rawdex::ids::{FieldId, MethodId};
use crate::Result;

pub(crate) const NO_INDEX: u32 = 0xffff_ffff;

/// `class_def_item`: 32 bytes, fixed layout.
#[derive(Debug, Clone, Copy, Pread)]
pub(crate) struct ClassDefItem {
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: u32,
    pub interfaces_off: u32,
    pub source_file_idx: u32,
    pub annotations_off: u32,
    pub class_data_off: u32,
    pub static_values_off: u32,
}

/// One static or instance field inside a `class_data_item`: a
/// `field_idx` encoded as a difference from the previous entry's index,
/// plus access flags.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EncodedField {
    pub field_idx: FieldId,
    pub access_flags: u32,
}

/// One direct or virtual method inside a `class_data_item`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EncodedMethod {
    pub method_idx: MethodId,
    pub access_flags: u32,
    pub code_off: u32,
}

fn read_encoded_fields(source: &[u8], offset: &mut usize, count: u64) -> Result<Vec<EncodedField>> {
    let mut out = Vec::with_capacity(count as usize);
    let mut prev_idx: u64 = 0;
    for _ in 0..count {
        let diff = Uleb128::read(source, offset)?;
        let access_flags = Uleb128::read(source, offset)? as u32;
        prev_idx += diff;
        out.push(EncodedField {
            field_idx: prev_idx as FieldId,
            access_flags,
        });
    }
    Ok(out)
}

fn read_encoded_methods(
    source: &[u8],
    offset: &mut usize,
    count: u64,
) -> Result<Vec<EncodedMethod>> {
    let mut out = Vec::with_capacity(count as usize);
    let mut prev_idx: u64 = 0;
    for _ in 0..count {
        let diff = Uleb128::read(source, offset)?;
        let access_flags = Uleb128::read(source, offset)? as u32;
        let code_off = Uleb128::read(source, offset)? as u32;
        prev_idx += diff;
        out.push(EncodedMethod {
            method_idx: prev_idx as MethodId,
            access_flags,
            code_off,
        });
    }
    Ok(out)
}

/// Decoded contents of a class's `class_data_item`: the four encoded
/// arrays (static fields, instance fields, direct methods, virtual
/// methods), each ordered and empty when absent.
#[derive(Debug, Default)]
pub(crate) struct ClassDataItem {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

impl ClassDataItem {
    /// Parses a `class_data_item` starting at `source[0]`. `source`
    /// should be a slice starting at the item's `class_data_off`;
    /// callers are not expected to know its length up front since it is
    /// ULEB128-delimited.
    pub(crate) fn parse(source: &[u8]) -> Result<Self> {
        let offset = &mut 0;
        let static_fields_size = Uleb128::read(source, offset)?;
        let instance_fields_size = Uleb128::read(source, offset)?;
        let direct_methods_size = Uleb128::read(source, offset)?;
        let virtual_methods_size = Uleb128::read(source, offset)?;
        Ok(ClassDataItem {
            static_fields: read_encoded_fields(source, offset, static_fields_size)?,
            instance_fields: read_encoded_fields(source, offset, instance_fields_size)?,
            direct_methods: read_encoded_methods(source, offset, direct_methods_size)?,
            virtual_methods: read_encoded_methods(source, offset, virtual_methods_size)?,
        })
    }
}

/// Reads the `type_id` list pointed to by a `type_list` offset (used for
/// a class's `interfaces` and a proto's `parameters`). Returns an empty
/// list for offset `0`.
pub(crate) fn read_type_list(
    source: &[u8],
    offset: u32,
    endian: scroll::Endian,
) -> Result<Vec<u16>> {
    if offset == 0 {
        return Ok(Vec::new());
    }
    let mut cursor = offset as usize;
    let len: u32 = source.gread_with(&mut cursor, endian)?;
    let mut out = Vec::with_capacity(len as usize);
    for _ in 0..len {
        out.push(source.gread_with::<u16>(&mut cursor, endian)?);
    }
    Ok(out)
}
