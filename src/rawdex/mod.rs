//! The memory-mapped DEX/ODEX file reader (spec §4.3, §6): header,
//! five ID tables, class-def table and per-class code items.
pub(crate) mod cache;
pub(crate) mod class_def;
pub(crate) mod code;
pub(crate) mod ids;
pub(crate) mod odex;
pub(crate) mod source;
pub(crate) mod string;

use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use scroll::{ctx, Pread};

use crate::error::Error;
use crate::Result;

use cache::{Cache, Ref};
use class_def::{ClassDataItem, ClassDefItem};
use code::{resolve_tries, CodeItem, EncodedCatchHandlerList, TryItem};
use ids::{FieldIdItem, MethodIdItem, ProtoIdItem, TypeIdItem};
use source::Source;
use string::{DexString, StringCache, StringId};

pub(crate) const NO_INDEX: u32 = 0xffff_ffff;

const HEADER_SIZE: usize = 112;
const STRING_CACHE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, Pread)]
struct Header {
    magic: [u8; 8],
    checksum: u32,
    signature: [u8; 20],
    file_size: u32,
    header_size: u32,
    endian_tag: [u8; 4],
    link_size: u32,
    link_off: u32,
    map_off: u32,
    string_ids_size: u32,
    string_ids_off: u32,
    type_ids_size: u32,
    type_ids_off: u32,
    proto_ids_size: u32,
    proto_ids_off: u32,
    field_ids_size: u32,
    field_ids_off: u32,
    method_ids_size: u32,
    method_ids_off: u32,
    class_defs_size: u32,
    class_defs_off: u32,
    data_size: u32,
    data_off: u32,
}

#[derive(FromPrimitive, Debug, Clone, Copy, Eq, PartialEq)]
enum ItemType {
    Header = 0x0,
    StringIdItem = 0x1,
    TypeIdItem = 0x2,
    ProtoIdItem = 0x3,
    FieldIdItem = 0x4,
    MethodIdItem = 0x5,
    ClassDefItem = 0x6,
    CallSiteIdItem = 0x7,
    MethodHandleItem = 0x8,
    MapList = 0x1000,
    TypeList = 0x1001,
    AnnotationSetRefList = 0x1002,
    AnnotationSetItem = 0x1003,
    ClassDataItem = 0x2000,
    CodeItem = 0x2001,
    StringDataItem = 0x2002,
    DebugInfoItem = 0x2003,
    AnnotationItem = 0x2004,
    EncodedArrayItem = 0x2005,
    AnnotationsDirectoryItem = 0x2006,
}

#[derive(Debug, Clone, Copy)]
struct MapItem {
    item_type: ItemType,
    size: u32,
    offset: u32,
}

impl<'a> ctx::TryFromCtx<'a, scroll::Endian> for MapItem {
    type Error = Error;
    type Size = usize;

    fn try_from_ctx(source: &'a [u8], endian: scroll::Endian) -> Result<(Self, Self::Size)> {
        let offset = &mut 0;
        let raw_type: u16 = source.gread_with(offset, endian)?;
        let item_type = ItemType::from_u16(raw_type)
            .ok_or_else(|| Error::MalformedDex(format!("invalid map item type: {}", raw_type)))?;
        let _unused: u16 = source.gread_with(offset, endian)?;
        let size: u32 = source.gread_with(offset, endian)?;
        let item_offset: u32 = source.gread_with(offset, endian)?;
        Ok((
            MapItem {
                item_type,
                size,
                offset: item_offset,
            },
            *offset,
        ))
    }
}

#[derive(Debug)]
struct MapList {
    items: Vec<MapItem>,
}

impl<'a> ctx::TryFromCtx<'a, scroll::Endian> for MapList {
    type Error = Error;
    type Size = usize;

    fn try_from_ctx(source: &'a [u8], endian: scroll::Endian) -> Result<(Self, Self::Size)> {
        let offset = &mut 0;
        let size: u32 = source.gread_with(offset, endian)?;
        let mut items = Vec::with_capacity(size as usize);
        for _ in 0..size {
            items.push(source.gread_with(offset, endian)?);
        }
        Ok((MapList { items }, *offset))
    }
}

fn detect_endian(source: &[u8]) -> Result<scroll::Endian> {
    if source.len() < 44 {
        return Err(Error::MalformedDex("file too short for a dex header".into()));
    }
    match &source[40..44] {
        [0x78, 0x56, 0x34, 0x12] => Ok(scroll::LE),
        [0x12, 0x34, 0x56, 0x78] => Ok(scroll::BE),
        _ => Err(Error::MalformedDex("bad endian tag".into())),
    }
}

/// Verifies the DEX adler32 checksum, which covers every byte after the
/// `signature` field (offset 12 onward). Corresponds to spec §6's
/// `malformed_dex` condition "invalid try-catch block, inconsistent
/// code-item size" sibling check for whole-file corruption.
fn verify_checksum(bytes: &[u8], header: &Header) -> Result<()> {
    if bytes.len() < 12 {
        return Err(Error::MalformedDex("file too short".into()));
    }
    let computed = adler32::RollingAdler32::from_buffer(&bytes[12..]).hash();
    if computed != header.checksum {
        return Err(Error::MalformedDex(format!(
            "checksum mismatch: header says {:#x}, computed {:#x}",
            header.checksum, computed
        )));
    }
    Ok(())
}

/// A parsed DEX file: ID tables, class defs, code items, all addressed
/// relative to the embedded standard-DEX start (0 for a bare DEX, or
/// the ODEX header's `dex_off` for a wrapped one).
pub(crate) struct RawDex<T> {
    source: Source<T>,
    dex_start: usize,
    header: Header,
    endian: scroll::Endian,
    string_cache: StringCache<T>,
    class_data_cache: Cache<u32, ClassDataItem>,
}

impl<T> RawDex<T>
where
    T: AsRef<[u8]>,
{
    fn bytes(&self) -> &[u8] {
        &self.source.bytes()[self.dex_start..]
    }

    pub(crate) fn endian(&self) -> scroll::Endian {
        self.endian
    }

    pub(crate) fn string_count(&self) -> u32 {
        self.header.string_ids_size
    }

    pub(crate) fn get_string(&self, id: StringId) -> Result<Ref<DexString>> {
        self.string_cache.get(id)
    }

    pub(crate) fn get_optional_string(&self, id: u32) -> Result<Option<Ref<DexString>>> {
        if id == NO_INDEX {
            Ok(None)
        } else {
            Ok(Some(self.get_string(id)?))
        }
    }

    pub(crate) fn type_count(&self) -> u32 {
        self.header.type_ids_size
    }

    pub(crate) fn get_type_descriptor(&self, type_idx: u32) -> Result<Ref<DexString>> {
        if type_idx >= self.header.type_ids_size {
            return Err(Error::InvalidId(format!("invalid type id: {}", type_idx)));
        }
        let offset = self.header.type_ids_off as usize + type_idx as usize * 4;
        let item: TypeIdItem = self.bytes().pread_with(offset, self.endian)?;
        self.get_string(item.descriptor_idx)
    }

    pub(crate) fn proto_count(&self) -> u32 {
        self.header.proto_ids_size
    }

    pub(crate) fn get_proto_item(&self, proto_idx: u32) -> Result<ProtoIdItem> {
        if proto_idx >= self.header.proto_ids_size {
            return Err(Error::InvalidId(format!("invalid proto id: {}", proto_idx)));
        }
        let offset = self.header.proto_ids_off as usize + proto_idx as usize * 12;
        Ok(self.bytes().pread_with(offset, self.endian)?)
    }

    pub(crate) fn field_count(&self) -> u32 {
        self.header.field_ids_size
    }

    pub(crate) fn get_field_item(&self, field_idx: u32) -> Result<FieldIdItem> {
        if field_idx >= self.header.field_ids_size {
            return Err(Error::InvalidId(format!("invalid field id: {}", field_idx)));
        }
        let offset = self.header.field_ids_off as usize + field_idx as usize * 8;
        Ok(self.bytes().pread_with(offset, self.endian)?)
    }

    pub(crate) fn method_count(&self) -> u32 {
        self.header.method_ids_size
    }

    pub(crate) fn get_method_item(&self, method_idx: u32) -> Result<MethodIdItem> {
        if method_idx >= self.header.method_ids_size {
            return Err(Error::InvalidId(format!(
                "invalid method id: {}",
                method_idx
            )));
        }
        let offset = self.header.method_ids_off as usize + method_idx as usize * 8;
        Ok(self.bytes().pread_with(offset, self.endian)?)
    }

    pub(crate) fn get_type_list(&self, offset: u32) -> Result<Vec<u16>> {
        class_def::read_type_list(self.bytes(), offset, self.endian)
    }

    pub(crate) fn class_def_count(&self) -> u32 {
        self.header.class_defs_size
    }

    pub(crate) fn get_class_def(&self, index: u32) -> Result<ClassDefItem> {
        if index >= self.header.class_defs_size {
            return Err(Error::InvalidId(format!("invalid class def index: {}", index)));
        }
        let offset = self.header.class_defs_off as usize + index as usize * 32;
        Ok(self.bytes().pread_with(offset, self.endian)?)
    }

    pub(crate) fn class_defs(&self) -> impl Iterator<Item = Result<ClassDefItem>> + '_ {
        (0..self.header.class_defs_size).map(move |i| self.get_class_def(i))
    }

    pub(crate) fn get_class_data(&self, offset: u32) -> Result<Option<Ref<ClassDataItem>>> {
        if offset == 0 {
            return Ok(None);
        }
        if let Some(cached) = self.class_data_cache.get(&offset) {
            return Ok(Some(cached));
        }
        let parsed = ClassDataItem::parse(&self.bytes()[offset as usize..])?;
        self.class_data_cache.put(offset, parsed);
        Ok(Some(self.class_data_cache.get(&offset).expect("just inserted")))
    }

    pub(crate) fn get_code_item(&self, code_off: u32) -> Result<Option<CodeItem>> {
        if code_off == 0 {
            return Ok(None);
        }
        let bytes = self.bytes();
        let endian = self.endian;
        let offset = &mut (code_off as usize);
        let registers_size: u16 = bytes.gread_with(offset, endian)?;
        let ins_size: u16 = bytes.gread_with(offset, endian)?;
        let outs_size: u16 = bytes.gread_with(offset, endian)?;
        let tries_size: u16 = bytes.gread_with(offset, endian)?;
        let debug_info_off: u32 = bytes.gread_with(offset, endian)?;
        let insns_size: u32 = bytes.gread_with(offset, endian)?;
        let mut insns = Vec::with_capacity(insns_size as usize);
        for _ in 0..insns_size {
            insns.push(bytes.gread_with::<u16>(offset, endian)?);
        }
        if insns_size % 2 != 0 && tries_size != 0 {
            let _padding: u16 = bytes.gread_with(offset, endian)?;
        }
        let tries = if tries_size != 0 {
            let mut try_items = Vec::with_capacity(tries_size as usize);
            for _ in 0..tries_size {
                let item: TryItem = bytes.gread_with(offset, endian)?;
                try_items.push(item);
            }
            let handlers = EncodedCatchHandlerList::parse(&bytes[*offset..])?;
            resolve_tries(&try_items, &handlers)?
        } else {
            Vec::new()
        };
        let debug_info = if debug_info_off != 0 {
            Some(bytes.pread_with(debug_info_off as usize, endian)?)
        } else {
            None
        };
        Ok(Some(CodeItem {
            registers_size,
            ins_size,
            outs_size,
            insns,
            tries,
            debug_info,
        }))
    }

    /// Builds the descriptor→class-def index and the code-offset→method
    /// index used by `find_insn` (spec §4.3, §4.6).
    pub(crate) fn build_lookup_tables(&self) -> Result<DexIndexes> {
        let mut descriptor_to_class_def = std::collections::HashMap::new();
        let mut code_off_to_method: Vec<(u32, u32)> = Vec::new();
        for (i, def) in self.class_defs().enumerate() {
            let def = def?;
            let descriptor = self.get_type_descriptor(def.class_idx)?.as_str().to_string();
            descriptor_to_class_def.insert(descriptor, i as u32);
            if let Some(data) = self.get_class_data(def.class_data_off)? {
                for m in data.direct_methods.iter().chain(data.virtual_methods.iter()) {
                    if m.code_off != 0 {
                        code_off_to_method.push((m.code_off, m.method_idx));
                    }
                }
            }
        }
        code_off_to_method.sort_unstable_by_key(|(off, _)| *off);
        Ok(DexIndexes {
            descriptor_to_class_def,
            code_off_to_method,
        })
    }
}

/// Lookup indexes built once per DEX file (spec §4.3).
pub(crate) struct DexIndexes {
    descriptor_to_class_def: std::collections::HashMap<String, u32>,
    code_off_to_method: Vec<(u32, u32)>,
}

impl DexIndexes {
    pub(crate) fn class_def_by_descriptor(&self, descriptor: &str) -> Option<u32> {
        self.descriptor_to_class_def.get(descriptor).copied()
    }

    /// `find_method_handle(dex_offset)` (spec §4.3): binary search over
    /// the sorted code-offset index for the method whose code item
    /// covers `dex_offset`.
    pub(crate) fn method_by_code_offset(&self, dex_offset: u32) -> Option<u32> {
        match self
            .code_off_to_method
            .binary_search_by_key(&dex_offset, |(off, _)| *off)
        {
            Ok(i) => Some(self.code_off_to_method[i].1),
            Err(0) => None,
            Err(i) => Some(self.code_off_to_method[i - 1].1),
        }
    }
}

/// Opens a standard or ODEX-wrapped DEX file via a memory map. The
/// mapping's lifetime is tied to the returned `RawDex`; all borrows into
/// it (string/type lookups) are valid for as long as that value lives
/// (spec §5).
pub(crate) fn open_file<P: AsRef<Path>>(path: P) -> Result<RawDex<Mmap>> {
    let file = File::open(path)?;
    let map = unsafe { MmapOptions::new().map(&file)? };
    open_bytes(map)
}

/// Parses a DEX/ODEX already held in memory (a borrowed byte range, per
/// spec §5's "borrowed byte range" option).
pub(crate) fn open_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<RawDex<T>> {
    let dex_start = odex::dex_start_offset(bytes.as_ref())?;
    let dex_bytes = &bytes.as_ref()[dex_start..];
    let endian = detect_endian(dex_bytes)?;
    let header: Header = dex_bytes.pread_with(0, endian)?;
    if header.magic != odex::DEX_MAGIC {
        return Err(Error::MalformedDex("bad dex magic".into()));
    }
    verify_checksum(dex_bytes, &header)?;
    // Parsed for validation only; sections are located via the header.
    let _map: MapList = dex_bytes.pread_with(header.map_off as usize, endian)?;

    let source = Source::new(bytes);
    let string_cache = StringCache::new(
        source.clone(),
        endian,
        dex_start as u32 + header.string_ids_off,
        dex_start as u32,
        header.string_ids_size,
        STRING_CACHE_SIZE,
    );

    Ok(RawDex {
        source,
        dex_start,
        header,
        endian,
        string_cache,
        class_data_cache: Cache::new(256),
    })
}
