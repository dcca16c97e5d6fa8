//! Dex string data, decoded from MUTF-8 (spec §6, `string_data_item`).
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use cesu8::from_java_cesu8;
use scroll::{ctx, Pread, Uleb128};

use crate::error::Error;
use crate::rawdex::cache::{Cache, Ref};
use crate::rawdex::source::Source;
use crate::Result;

/// Index into the `string_ids` table.
pub type StringId = u32;

/// A decoded DEX string. Cheaply clonable (reference-counted) since the
/// same string is shared by many entities (names, descriptors, ...).
#[derive(Debug, Hash, Eq, PartialEq, Clone, PartialOrd, Ord)]
pub struct DexString {
    string: Rc<String>,
}

impl DexString {
    pub fn as_str(&self) -> &str {
        &self.string
    }
}

impl PartialEq<str> for DexString {
    fn eq(&self, other: &str) -> bool {
        *self.string == other
    }
}

impl<'a> PartialEq<&'a str> for DexString {
    fn eq(&self, other: &&'a str) -> bool {
        *self.string == *other
    }
}

impl fmt::Display for DexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.string)
    }
}

impl From<String> for DexString {
    fn from(string: String) -> Self {
        DexString {
            string: Rc::new(string),
        }
    }
}

impl From<&str> for DexString {
    fn from(string: &str) -> Self {
        DexString::from(string.to_string())
    }
}

impl Deref for DexString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.string
    }
}

impl<'a> ctx::TryFromCtx<'a, scroll::Endian> for DexString {
    type Error = Error;
    type Size = usize;

    // https://source.android.com/devices/tech/dalvik/dex-format#string-data-item
    fn try_from_ctx(source: &'a [u8], _: scroll::Endian) -> Result<(Self, Self::Size)> {
        let offset = &mut 0;
        // utf16_size: number of UTF-16 code units, not bytes; we don't
        // need it since the MUTF-8 bytes are NUL-terminated.
        let _utf16_size = Uleb128::read(source, offset)?;
        let count = source
            .iter()
            .skip(*offset)
            .take_while(|c| **c != b'\0')
            .count();
        let bytes = &source[*offset..*offset + count];
        let size = *offset + count + 1;
        let decoded = from_java_cesu8(bytes)
            .map_err(|e| Error::MalformedDex(format!("malformed string data: {:?}", e)))?
            .into_owned();
        Ok((DexString::from(decoded), size))
    }
}

/// LRU cache over the string table: strings are decoded on first use and
/// shared by reference thereafter (mirrors `DexBuilder::from_file`'s
/// cache sizing).
pub(crate) struct StringCache<T> {
    source: Source<T>,
    /// Absolute file offset of the `string_ids` table (already includes
    /// the ODEX `dex_off` shift, if any).
    offset: u32,
    /// Absolute file offset of the embedded DEX's start, added to every
    /// `string_data_off` read from the table (those offsets are
    /// DEX-relative, not file-relative).
    dex_start: u32,
    endian: scroll::Endian,
    len: u32,
    cache: Cache<StringId, DexString>,
}

impl<T> StringCache<T>
where
    T: AsRef<[u8]>,
{
    pub(crate) fn new(
        source: Source<T>,
        endian: scroll::Endian,
        offset: u32,
        dex_start: u32,
        len: u32,
        cache_size: usize,
    ) -> Self {
        Self {
            source,
            offset,
            dex_start,
            endian,
            len,
            cache: Cache::new(cache_size),
        }
    }

    fn parse(&self, id: StringId) -> Result<DexString> {
        let offset = self.offset as usize + id as usize * 4;
        let string_data_off: u32 = self.source.bytes().pread_with(offset, self.endian)?;
        self.source
            .bytes()
            .pread(self.dex_start as usize + string_data_off as usize)
    }

    pub(crate) fn get(&self, id: StringId) -> Result<Ref<DexString>> {
        if id >= self.len {
            return Err(Error::InvalidId(format!("invalid string id: {}", id)));
        }
        if let Some(string) = self.cache.get(&id) {
            return Ok(string);
        }
        self.cache.put(id, self.parse(id)?);
        Ok(self.cache.get(&id).expect("just inserted"))
    }

    pub(crate) fn len(&self) -> u32 {
        self.len
    }
}

impl<T> Clone for StringCache<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            offset: self.offset,
            dex_start: self.dex_start,
            endian: self.endian,
            len: self.len,
            cache: self.cache.clone(),
        }
    }
}
