//! `code_item`, try/catch blocks and `debug_info_item` (spec §6).
use scroll::{ctx, Pread, Sleb128, Uleb128};

use crate::rawdex::ids::TypeId;
use crate::rawdex::string::StringId;
use crate::Result;

/// `try_item`: 8 bytes, fixed layout.
#[derive(Debug, Clone, Copy, Pread)]
pub(crate) struct TryItem {
    pub start_addr: u32,
    pub insn_count: u16,
    pub handler_off: u16,
}

/// One `type_idx, addr` pair inside an `encoded_catch_handler`, plus the
/// handler list's shared catch-all address.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CatchTypeAddr {
    pub type_idx: TypeId,
    pub addr: u64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EncodedCatchHandler {
    pub handlers: Vec<CatchTypeAddr>,
    pub catch_all_addr: Option<u64>,
}

impl EncodedCatchHandler {
    fn parse(source: &[u8], offset: &mut usize) -> Result<Self> {
        let size = Sleb128::read(source, offset)?;
        let mut handlers = Vec::with_capacity(size.unsigned_abs() as usize);
        for _ in 0..size.unsigned_abs() {
            let type_idx = Uleb128::read(source, offset)? as TypeId;
            let addr = Uleb128::read(source, offset)?;
            handlers.push(CatchTypeAddr { type_idx, addr });
        }
        let catch_all_addr = if size <= 0 {
            Some(Uleb128::read(source, offset)?)
        } else {
            None
        };
        Ok(EncodedCatchHandler {
            handlers,
            catch_all_addr,
        })
    }
}

/// `encoded_catch_handler_list`: a ULEB128 count followed by that many
/// `encoded_catch_handler`s, each reachable by its byte offset relative
/// to the start of the list (this is what `try_item::handler_off`
/// points at).
#[derive(Debug, Default)]
pub(crate) struct EncodedCatchHandlerList {
    by_offset: Vec<(usize, EncodedCatchHandler)>,
}

impl EncodedCatchHandlerList {
    pub(crate) fn parse(source: &[u8]) -> Result<Self> {
        let offset = &mut 0;
        let size = Uleb128::read(source, offset)?;
        let mut by_offset = Vec::with_capacity(size as usize);
        for _ in 0..size {
            let start = *offset;
            let handler = EncodedCatchHandler::parse(source, offset)?;
            by_offset.push((start, handler));
        }
        Ok(EncodedCatchHandlerList { by_offset })
    }

    pub(crate) fn find(&self, handler_off: u16) -> Option<&EncodedCatchHandler> {
        self.by_offset
            .iter()
            .find(|(off, _)| *off == handler_off as usize)
            .map(|(_, h)| h)
    }
}

/// One try-block entry with its resolved catch handlers.
#[derive(Debug, Clone)]
pub(crate) struct TryCatchBlock {
    pub start_addr: u32,
    pub insn_count: u16,
    pub handlers: Vec<CatchTypeAddr>,
    pub catch_all_addr: Option<u64>,
}

pub(crate) fn resolve_tries(
    tries: &[TryItem],
    handlers: &EncodedCatchHandlerList,
) -> Result<Vec<TryCatchBlock>> {
    tries
        .iter()
        .map(|t| {
            let handler = handlers.find(t.handler_off).ok_or_else(|| {
                crate::error::Error::InvalidId(format!(
                    "no catch handler at offset {}",
                    t.handler_off
                ))
            })?;
            Ok(TryCatchBlock {
                start_addr: t.start_addr,
                insn_count: t.insn_count,
                handlers: handler.handlers.clone(),
                catch_all_addr: handler.catch_all_addr,
            })
        })
        .collect()
}

const DBG_FIRST_SPECIAL: u64 = 0x0a;
const DBG_LINE_BASE: i64 = -4;
const DBG_LINE_RANGE: u64 = 15;

#[derive(Debug, PartialEq, Clone)]
pub(crate) struct DebugLocal {
    pub register_num: u64,
    pub name_idx: Option<StringId>,
    pub type_idx: Option<TypeId>,
    pub sig_idx: Option<StringId>,
}

#[derive(Debug, PartialEq, Clone)]
pub(crate) enum DebugBytecode {
    EndSequence,
    AdvancePc(u64),
    AdvanceLine(i64),
    StartLocal(DebugLocal),
    EndLocal(u64),
    RestartLocal(u64),
    SetPrologueEnd,
    SetEpilogueBegin,
    SetFile(Option<StringId>),
    Special { line_off: i64, address_off: u64 },
}

/// `debug_info_item`: a ULEB128-encoded header plus a bytecode state
/// machine terminated by `EndSequence` (spec §6).
#[derive(Debug)]
pub(crate) struct DebugInfoItem {
    pub line_start: u64,
    pub parameter_names: Vec<Option<StringId>>,
    pub bytecodes: Vec<DebugBytecode>,
}

fn read_index_plus_one(source: &[u8], offset: &mut usize) -> Result<Option<u32>> {
    let raw = Uleb128::read(source, offset)?;
    if raw == 0 {
        Ok(None)
    } else {
        Ok(Some((raw - 1) as u32))
    }
}

impl<'a> ctx::TryFromCtx<'a, scroll::Endian> for DebugInfoItem {
    type Error = crate::error::Error;
    type Size = usize;

    fn try_from_ctx(source: &'a [u8], _endian: scroll::Endian) -> Result<(Self, Self::Size)> {
        let offset = &mut 0;
        let line_start = Uleb128::read(source, offset)?;
        let parameters_size = Uleb128::read(source, offset)?;
        let mut parameter_names = Vec::with_capacity(parameters_size as usize);
        for _ in 0..parameters_size {
            parameter_names.push(read_index_plus_one(source, offset)?);
        }

        let mut bytecodes = Vec::new();
        loop {
            let opcode: u8 = source.gread(offset)?;
            let bytecode = match opcode {
                0x00 => DebugBytecode::EndSequence,
                0x01 => DebugBytecode::AdvancePc(Uleb128::read(source, offset)?),
                0x02 => DebugBytecode::AdvanceLine(Sleb128::read(source, offset)?),
                0x03 => DebugBytecode::StartLocal(DebugLocal {
                    register_num: Uleb128::read(source, offset)?,
                    name_idx: read_index_plus_one(source, offset)?,
                    type_idx: read_index_plus_one(source, offset)?,
                    sig_idx: None,
                }),
                0x04 => DebugBytecode::StartLocal(DebugLocal {
                    register_num: Uleb128::read(source, offset)?,
                    name_idx: read_index_plus_one(source, offset)?,
                    type_idx: read_index_plus_one(source, offset)?,
                    sig_idx: read_index_plus_one(source, offset)?,
                }),
                0x05 => DebugBytecode::EndLocal(Uleb128::read(source, offset)?),
                0x06 => DebugBytecode::RestartLocal(Uleb128::read(source, offset)?),
                0x07 => DebugBytecode::SetPrologueEnd,
                0x08 => DebugBytecode::SetEpilogueBegin,
                0x09 => DebugBytecode::SetFile(read_index_plus_one(source, offset)?),
                _ => {
                    let adjusted = opcode as u64 - DBG_FIRST_SPECIAL;
                    DebugBytecode::Special {
                        line_off: DBG_LINE_BASE + (adjusted % DBG_LINE_RANGE) as i64,
                        address_off: adjusted / DBG_LINE_RANGE,
                    }
                }
            };
            let done = bytecode == DebugBytecode::EndSequence;
            bytecodes.push(bytecode);
            if done {
                break;
            }
        }

        Ok((
            DebugInfoItem {
                line_start,
                parameter_names,
                bytecodes,
            },
            *offset,
        ))
    }
}

/// `code_item` (spec §6): registers, incoming/outgoing argument counts,
/// the raw `u16` instruction stream, resolved try/catch blocks and the
/// optional debug info.
#[derive(Debug)]
pub(crate) struct CodeItem {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub insns: Vec<u16>,
    pub tries: Vec<TryCatchBlock>,
    pub debug_info: Option<DebugInfoItem>,
}
