//! ODEX v036 wrapper header (spec §6): `dey\n036\0` followed by offsets
//! into an embedded standard DEX.
use scroll::{ctx, Pread};

use crate::error::Error;
use crate::Result;

pub(crate) const ODEX_MAGIC: [u8; 8] = *b"dey\n036\0";
pub(crate) const DEX_MAGIC: [u8; 8] = *b"dex\n035\0";

#[derive(Debug, Clone, Copy, Pread)]
pub(crate) struct OdexHeader {
    magic: [u8; 8],
    pub dex_off: u32,
    pub dex_size: u32,
    pub deps_off: u32,
    pub deps_size: u32,
    pub opt_off: u32,
    pub opt_size: u32,
    pub flags: u32,
    pub checksum: u32,
}

impl<'a> ctx::TryFromCtx<'a, scroll::Endian> for OdexHeader {
    type Error = Error;
    type Size = usize;

    fn try_from_ctx(source: &'a [u8], endian: scroll::Endian) -> Result<(Self, Self::Size)> {
        let offset = &mut 0;
        let magic: [u8; 8] = source.gread(offset)?;
        if magic != ODEX_MAGIC {
            return Err(Error::MalformedDex("bad odex magic".into()));
        }
        Ok((
            OdexHeader {
                magic,
                dex_off: source.gread_with(offset, endian)?,
                dex_size: source.gread_with(offset, endian)?,
                deps_off: source.gread_with(offset, endian)?,
                deps_size: source.gread_with(offset, endian)?,
                opt_off: source.gread_with(offset, endian)?,
                opt_size: source.gread_with(offset, endian)?,
                flags: source.gread_with(offset, endian)?,
                checksum: source.gread_with(offset, endian)?,
            },
            *offset,
        ))
    }
}

/// Returns the byte offset at which the embedded standard DEX begins:
/// `0` if `source` is already a standard DEX, or the ODEX header's
/// `dex_off` if it is wrapped.
pub(crate) fn dex_start_offset(source: &[u8]) -> Result<usize> {
    if source.len() < 8 {
        return Err(Error::MalformedDex("file too short".into()));
    }
    if source[..8] == DEX_MAGIC {
        return Ok(0);
    }
    if source[..8] == ODEX_MAGIC {
        let header: OdexHeader = source.pread_with(0, scroll::LE)?;
        return Ok(header.dex_off as usize);
    }
    Err(Error::MalformedDex("unrecognized file magic".into()))
}
