//! Per-opcode instruction metadata (spec §4.2): mnemonic, wire format,
//! byte size and a property bit set, looked up by `info(opcode)`.
use bitflags::bitflags;

bitflags! {
    /// Property bits returned by `info(opcode)` (spec §4.2).
    pub struct InsnProps: u16 {
        const CAN_THROW           = 1 << 0;
        const ODEX_ONLY           = 1 << 1;
        const CAN_CONTINUE        = 1 << 2;
        const SETS_RESULT         = 1 << 3;
        const SETS_REGISTER       = 1 << 4;
        const SETS_WIDE_REGISTER  = 1 << 5;
        const READS_WIDE_REGISTER = 1 << 6;
        const CAN_RETURN          = 1 << 7;
        const CAN_BRANCH          = 1 << 8;
        const CAN_SWITCH          = 1 << 9;
        const CAN_INVOKE          = 1 << 10;
        const CAN_VIRTUALLY_INVOKE = 1 << 11;
        const CAN_DIRECTLY_INVOKE  = 1 << 12;
    }
}

/// One of the 31 wire formats named in spec §6, plus the three payload
/// pseudo-formats that appear as `31t` branch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsnFormat {
    Fmt10x,
    Fmt12x,
    Fmt11n,
    Fmt11x,
    Fmt10t,
    Fmt20t,
    Fmt20bc,
    Fmt22x,
    Fmt21t,
    Fmt21s,
    Fmt21h,
    Fmt21c,
    Fmt23x,
    Fmt22b,
    Fmt22t,
    Fmt22s,
    Fmt22c,
    Fmt22cs,
    Fmt30t,
    Fmt32x,
    Fmt31i,
    Fmt31t,
    Fmt31c,
    Fmt35c,
    Fmt35ms,
    Fmt35mi,
    Fmt3rc,
    Fmt3rms,
    Fmt3rmi,
    Fmt51l,
    PackedSwitchPayload,
    SparseSwitchPayload,
    FillArrayDataPayload,
}

impl InsnFormat {
    /// Size in 16-bit code units for every fixed-size format; payload
    /// pseudo-formats are variable-length and sized by their own
    /// leading count, so they report `0` here.
    pub fn unit_size(self) -> u8 {
        use InsnFormat::*;
        match self {
            Fmt10x | Fmt12x | Fmt11n | Fmt11x | Fmt10t => 1,
            Fmt20t | Fmt20bc | Fmt22x | Fmt21t | Fmt21s | Fmt21h | Fmt21c | Fmt23x | Fmt22b
            | Fmt22t | Fmt22s | Fmt22c | Fmt22cs => 2,
            Fmt30t | Fmt32x | Fmt31i | Fmt31t | Fmt31c | Fmt35c | Fmt35ms | Fmt35mi | Fmt3rc
            | Fmt3rms | Fmt3rmi => 3,
            Fmt51l => 5,
            PackedSwitchPayload | SparseSwitchPayload | FillArrayDataPayload => 0,
        }
    }
}

/// Immutable metadata for one opcode (spec §4.2).
#[derive(Debug, Clone, Copy)]
pub struct InsnInfo {
    pub opcode: u8,
    pub mnemonic: &'static str,
    pub format: InsnFormat,
    pub props: InsnProps,
}

impl InsnInfo {
    pub fn size(&self) -> u8 {
        self.format.unit_size()
    }
}

const fn entry(opcode: u8, mnemonic: &'static str, format: InsnFormat, props: InsnProps) -> InsnInfo {
    InsnInfo {
        opcode,
        mnemonic,
        format,
        props,
    }
}

const CMP: [&str; 5] = ["cmpl-float", "cmpg-float", "cmpl-double", "cmpg-double", "cmp-long"];
const IF: [&str; 6] = ["if-eq", "if-ne", "if-lt", "if-ge", "if-gt", "if-le"];
const IFZ: [&str; 6] = ["if-eqz", "if-nez", "if-ltz", "if-gez", "if-gtz", "if-lez"];
const ARRAYOP: [&str; 14] = [
    "aget", "aget-wide", "aget-object", "aget-boolean", "aget-byte", "aget-char", "aget-short",
    "aput", "aput-wide", "aput-object", "aput-boolean", "aput-byte", "aput-char", "aput-short",
];
const IINSTANCEOP: [&str; 14] = [
    "iget", "iget-wide", "iget-object", "iget-boolean", "iget-byte", "iget-char", "iget-short",
    "iput", "iput-wide", "iput-object", "iput-boolean", "iput-byte", "iput-char", "iput-short",
];
const SSTATICOP: [&str; 14] = [
    "sget", "sget-wide", "sget-object", "sget-boolean", "sget-byte", "sget-char", "sget-short",
    "sput", "sput-wide", "sput-object", "sput-boolean", "sput-byte", "sput-char", "sput-short",
];
const INVOKE: [&str; 5] = [
    "invoke-virtual",
    "invoke-super",
    "invoke-direct",
    "invoke-static",
    "invoke-interface",
];
const UNOP: [&str; 21] = [
    "neg-int", "not-int", "neg-long", "not-long", "neg-float", "neg-double", "int-to-long",
    "int-to-float", "int-to-double", "long-to-int", "long-to-float", "long-to-double",
    "float-to-int", "float-to-long", "float-to-double", "double-to-int", "double-to-long",
    "double-to-float", "int-to-byte", "int-to-char", "int-to-short",
];
const BINOP: [&str; 32] = [
    "add-int", "sub-int", "mul-int", "div-int", "rem-int", "and-int", "or-int", "xor-int",
    "shl-int", "shr-int", "ushr-int", "add-long", "sub-long", "mul-long", "div-long", "rem-long",
    "and-long", "or-long", "xor-long", "shl-long", "shr-long", "ushr-long", "add-float",
    "sub-float", "mul-float", "div-float", "rem-float", "add-double", "sub-double", "mul-double",
    "div-double", "rem-double",
];
const BINOP_2ADDR: [&str; 32] = [
    "add-int/2addr", "sub-int/2addr", "mul-int/2addr", "div-int/2addr", "rem-int/2addr",
    "and-int/2addr", "or-int/2addr", "xor-int/2addr", "shl-int/2addr", "shr-int/2addr",
    "ushr-int/2addr", "add-long/2addr", "sub-long/2addr", "mul-long/2addr", "div-long/2addr",
    "rem-long/2addr", "and-long/2addr", "or-long/2addr", "xor-long/2addr", "shl-long/2addr",
    "shr-long/2addr", "ushr-long/2addr", "add-float/2addr", "sub-float/2addr", "mul-float/2addr",
    "div-float/2addr", "rem-float/2addr", "add-double/2addr", "sub-double/2addr",
    "mul-double/2addr", "div-double/2addr", "rem-double/2addr",
];
const BINOP_LIT16: [&str; 8] = [
    "add-int/lit16", "rsub-int", "mul-int/lit16", "div-int/lit16", "rem-int/lit16",
    "and-int/lit16", "or-int/lit16", "xor-int/lit16",
];
const BINOP_LIT8: [&str; 11] = [
    "add-int/lit8", "rsub-int/lit8", "mul-int/lit8", "div-int/lit8", "rem-int/lit8",
    "and-int/lit8", "or-int/lit8", "xor-int/lit8", "shl-int/lit8", "shr-int/lit8",
    "ushr-int/lit8",
];

/// `true` for the wide (long/double) members of [`UNOP`]/[`BINOP`]-shaped
/// families, by their index into the family array.
fn unop_is_wide(index: usize) -> (bool, bool) {
    // (reads_wide, sets_wide), indexed as in UNOP.
    match index {
        2 => (true, true),    // neg-long
        3 => (true, true),    // not-long
        5 => (true, true),    // neg-double
        6 => (false, true),  // int-to-long
        8 => (false, true),  // int-to-double
        9 => (true, false),  // long-to-int
        10 => (true, false), // long-to-float
        11 => (true, true),  // long-to-double
        13 => (false, true), // float-to-long
        14 => (false, true), // float-to-double
        15 => (true, false), // double-to-int
        16 => (true, true),  // double-to-long
        17 => (true, false), // double-to-float
        _ => (false, false),
    }
}

fn binop_is_wide(index: usize) -> bool {
    (11..22).contains(&index)
}

fn arrayop_is_wide(index: usize) -> bool {
    index == 1 || index == 8
}

/// Returns the metadata for `opcode`. Unknown opcodes (gaps in the
/// Dalvik map past the documented ODEX-quick range) fall back to a
/// `nop`-shaped entry so lookups never panic; the CFG builder treats
/// them as non-branching, non-throwing, fallthrough-only.
pub fn info(opcode: u8) -> InsnInfo {
    use InsnFormat::*;
    use InsnProps as P;

    let cont = P::CAN_CONTINUE;
    let throws = P::CAN_THROW;
    let sets = P::SETS_REGISTER | P::CAN_CONTINUE;
    let sets_wide = P::SETS_REGISTER | P::SETS_WIDE_REGISTER | P::CAN_CONTINUE;

    match opcode {
        0x00 => entry(opcode, "nop", Fmt10x, cont),
        0x01 => entry(opcode, "move", Fmt12x, sets),
        0x02 => entry(opcode, "move/from16", Fmt22x, sets),
        0x03 => entry(opcode, "move/16", Fmt32x, sets),
        0x04 => entry(opcode, "move-wide", Fmt12x, sets_wide),
        0x05 => entry(opcode, "move-wide/from16", Fmt22x, sets_wide),
        0x06 => entry(opcode, "move-wide/16", Fmt32x, sets_wide),
        0x07 => entry(opcode, "move-object", Fmt12x, sets),
        0x08 => entry(opcode, "move-object/from16", Fmt22x, sets),
        0x09 => entry(opcode, "move-object/16", Fmt32x, sets),
        0x0a => entry(opcode, "move-result", Fmt11x, sets),
        0x0b => entry(opcode, "move-result-wide", Fmt11x, sets_wide),
        0x0c => entry(opcode, "move-result-object", Fmt11x, sets),
        0x0d => entry(opcode, "move-exception", Fmt11x, sets),
        0x0e => entry(opcode, "return-void", Fmt10x, P::CAN_RETURN),
        0x0f => entry(opcode, "return", Fmt11x, P::CAN_RETURN),
        0x10 => entry(opcode, "return-wide", Fmt11x, P::CAN_RETURN | P::READS_WIDE_REGISTER),
        0x11 => entry(opcode, "return-object", Fmt11x, P::CAN_RETURN),
        0x12 => entry(opcode, "const/4", Fmt11n, sets),
        0x13 => entry(opcode, "const/16", Fmt21s, sets),
        0x14 => entry(opcode, "const", Fmt31i, sets),
        0x15 => entry(opcode, "const/high16", Fmt21h, sets),
        0x16 => entry(opcode, "const-wide/16", Fmt21s, sets_wide),
        0x17 => entry(opcode, "const-wide/32", Fmt31i, sets_wide),
        0x18 => entry(opcode, "const-wide", Fmt51l, sets_wide),
        0x19 => entry(opcode, "const-wide/high16", Fmt21h, sets_wide),
        0x1a => entry(opcode, "const-string", Fmt21c, sets | throws),
        0x1b => entry(opcode, "const-string/jumbo", Fmt31c, sets | throws),
        0x1c => entry(opcode, "const-class", Fmt21c, sets | throws),
        0x1d => entry(opcode, "monitor-enter", Fmt11x, cont | throws),
        0x1e => entry(opcode, "monitor-exit", Fmt11x, cont | throws),
        0x1f => entry(opcode, "check-cast", Fmt21c, cont | throws),
        0x20 => entry(opcode, "instance-of", Fmt22c, sets | throws),
        0x21 => entry(opcode, "array-length", Fmt12x, sets | throws),
        0x22 => entry(opcode, "new-instance", Fmt21c, sets | throws),
        0x23 => entry(opcode, "new-array", Fmt22c, sets | throws),
        0x24 => entry(opcode, "filled-new-array", Fmt35c, cont | throws | P::SETS_RESULT),
        0x25 => entry(opcode, "filled-new-array/range", Fmt3rc, cont | throws | P::SETS_RESULT),
        0x26 => entry(opcode, "fill-array-data", Fmt31t, cont | throws),
        0x27 => entry(opcode, "throw", Fmt11x, throws),
        0x28 => entry(opcode, "goto", Fmt10t, P::CAN_BRANCH),
        0x29 => entry(opcode, "goto/16", Fmt20t, P::CAN_BRANCH),
        0x2a => entry(opcode, "goto/32", Fmt30t, P::CAN_BRANCH),
        0x2b => entry(opcode, "packed-switch", Fmt31t, cont | P::CAN_BRANCH | P::CAN_SWITCH),
        0x2c => entry(opcode, "sparse-switch", Fmt31t, cont | P::CAN_BRANCH | P::CAN_SWITCH),
        0x2d..=0x31 => entry(opcode, CMP[(opcode - 0x2d) as usize], Fmt23x, sets),
        0x32..=0x37 => {
            entry(opcode, IF[(opcode - 0x32) as usize], Fmt22t, cont | P::CAN_BRANCH)
        }
        0x38..=0x3d => {
            entry(opcode, IFZ[(opcode - 0x38) as usize], Fmt21t, cont | P::CAN_BRANCH)
        }
        0x3e..=0x43 => entry(opcode, "unused", Fmt10x, P::empty()),
        0x44..=0x51 => {
            let idx = (opcode - 0x44) as usize;
            let is_read = idx < 7;
            let mut props = cont | throws;
            if arrayop_is_wide(idx) {
                props |= if is_read {
                    P::SETS_WIDE_REGISTER | P::SETS_REGISTER
                } else {
                    P::READS_WIDE_REGISTER
                };
            } else if is_read {
                props |= P::SETS_REGISTER;
            }
            entry(opcode, ARRAYOP[idx], Fmt23x, props)
        }
        0x52..=0x5f => {
            let idx = (opcode - 0x52) as usize;
            let is_read = idx < 7;
            let mut props = cont | throws;
            if arrayop_is_wide(idx) {
                props |= if is_read {
                    P::SETS_WIDE_REGISTER | P::SETS_REGISTER
                } else {
                    P::READS_WIDE_REGISTER
                };
            } else if is_read {
                props |= P::SETS_REGISTER;
            }
            entry(opcode, IINSTANCEOP[idx], Fmt22c, props)
        }
        0x60..=0x6d => {
            let idx = (opcode - 0x60) as usize;
            let is_read = idx < 7;
            let mut props = cont | throws;
            if arrayop_is_wide(idx) {
                props |= if is_read {
                    P::SETS_WIDE_REGISTER | P::SETS_REGISTER
                } else {
                    P::READS_WIDE_REGISTER
                };
            } else if is_read {
                props |= P::SETS_REGISTER;
            }
            entry(opcode, SSTATICOP[idx], Fmt21c, props)
        }
        0x6e..=0x72 => {
            let idx = (opcode - 0x6e) as usize;
            let dispatch = if idx == 1 || idx == 2 || idx == 3 {
                P::CAN_DIRECTLY_INVOKE
            } else {
                P::CAN_VIRTUALLY_INVOKE
            };
            entry(
                opcode,
                INVOKE[idx],
                Fmt35c,
                cont | throws | P::CAN_INVOKE | P::SETS_RESULT | dispatch,
            )
        }
        0x73 => entry(opcode, "unused", Fmt10x, P::empty()),
        0x74..=0x78 => {
            let idx = (opcode - 0x74) as usize;
            let dispatch = if idx == 1 || idx == 2 || idx == 3 {
                P::CAN_DIRECTLY_INVOKE
            } else {
                P::CAN_VIRTUALLY_INVOKE
            };
            let mnemonic = match idx {
                0 => "invoke-virtual/range",
                1 => "invoke-super/range",
                2 => "invoke-direct/range",
                3 => "invoke-static/range",
                _ => "invoke-interface/range",
            };
            entry(
                opcode,
                mnemonic,
                Fmt3rc,
                cont | throws | P::CAN_INVOKE | P::SETS_RESULT | dispatch,
            )
        }
        0x79 | 0x7a => entry(opcode, "unused", Fmt10x, P::empty()),
        0x7b..=0x8f => {
            let idx = (opcode - 0x7b) as usize;
            let (reads_wide, sets_wide_reg) = unop_is_wide(idx);
            let mut props = sets;
            if reads_wide {
                props |= P::READS_WIDE_REGISTER;
            }
            if sets_wide_reg {
                props |= P::SETS_WIDE_REGISTER;
            }
            entry(opcode, UNOP[idx], Fmt12x, props)
        }
        0x90..=0xaf => {
            let idx = (opcode - 0x90) as usize;
            let mut props = sets;
            if binop_is_wide(idx) {
                props |= P::SETS_WIDE_REGISTER | P::READS_WIDE_REGISTER;
            }
            entry(opcode, BINOP[idx], Fmt23x, props)
        }
        0xb0..=0xcf => {
            let idx = (opcode - 0xb0) as usize;
            let mut props = sets;
            if binop_is_wide(idx) {
                props |= P::SETS_WIDE_REGISTER | P::READS_WIDE_REGISTER;
            }
            entry(opcode, BINOP_2ADDR[idx], Fmt12x, props)
        }
        0xd0..=0xd7 => entry(opcode, BINOP_LIT16[(opcode - 0xd0) as usize], Fmt22s, sets),
        0xd8..=0xe2 => entry(opcode, BINOP_LIT8[(opcode - 0xd8) as usize], Fmt22b, sets),
        // ODEX quick forms (spec §9 open question: decoded but their
        // field/vtable slot is left unresolved; `can_virtually_invoke`/
        // `can_directly_invoke` are never set here, so spec §4.9's
        // call-graph builder skips them per its `odex_only` check).
        0xe3..=0xe8 => entry(opcode, "iget-quick-family", Fmt22cs, sets | throws | P::ODEX_ONLY),
        0xe9..=0xee => entry(opcode, "iput-quick-family", Fmt22cs, cont | throws | P::ODEX_ONLY),
        0xef..=0xf2 => entry(
            opcode,
            "invoke-virtual-quick-family",
            Fmt35ms,
            cont | throws | P::CAN_INVOKE | P::SETS_RESULT | P::ODEX_ONLY,
        ),
        0xf3..=0xf6 => entry(
            opcode,
            "execute-inline-family",
            Fmt35mi,
            cont | throws | P::CAN_INVOKE | P::SETS_RESULT | P::ODEX_ONLY,
        ),
        0xf7..=0xff => entry(opcode, "odex-ext", Fmt3rms, cont | throws | P::ODEX_ONLY),
    }
}

/// True for the 2addr-shaped binop forms and `check-cast`: the
/// destination register is also an operand, so `uses` must include it
/// (spec §4.2).
pub fn sets_register_inplace(opcode: u8) -> bool {
    opcode == 0x1f || (0xb0..=0xcf).contains(&opcode)
}
