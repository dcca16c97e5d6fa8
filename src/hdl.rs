//! Handles and indices (spec §3, §4.1).
//!
//! Every entity in the system is named by a small, `Copy`, totally
//! ordered, hashable handle. DEX handles are file-local; JVM handles are
//! the "initiating" names used across the loader hierarchy. Handles
//! print in the fixed `loader_file_kindN` format spec §4.1 describes.
use std::fmt;

use crate::rawdex::string::DexString;

/// A class loader, identified by a small integer assigned in the order
/// loaders were added to the virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassLoaderHandle(pub u8);

impl fmt::Display for ClassLoaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A DEX file within a loader's ordered list of files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DexFileHandle {
    pub loader: ClassLoaderHandle,
    pub idx: u8,
}

impl fmt::Display for DexFileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.loader, self.idx)
    }
}

/// A type, method, field or instruction index local to one DEX file.
pub trait DexLocalHandle: Copy + Eq + std::hash::Hash + Ord {
    fn file(&self) -> DexFileHandle;
    fn idx(&self) -> u16;
    fn kind_char() -> char;
}

macro_rules! dex_local_handle {
    ($name:ident, $kind:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name {
            pub file: DexFileHandle,
            pub idx: u16,
        }

        impl $name {
            pub fn new(file: DexFileHandle, idx: u16) -> Self {
                Self { file, idx }
            }
        }

        impl DexLocalHandle for $name {
            fn file(&self) -> DexFileHandle {
                self.file
            }
            fn idx(&self) -> u16 {
                self.idx
            }
            fn kind_char() -> char {
                $kind
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}{}", self.file, $kind, self.idx)
            }
        }
    };
}

dex_local_handle!(TypeHandle, 't');
dex_local_handle!(MethodHandle, 'm');
dex_local_handle!(FieldHandle, 'f');
dex_local_handle!(InsnHandle, 'i');

/// The result pseudo-register, used by `move-result*` and the
/// pseudo-exit vertex's use-set.
pub const REG_RESULT: i32 = -2;
/// The exception pseudo-register, used by `move-exception`.
pub const REG_EXCEPTION: i32 = -3;

/// A register inside one instruction's defining method. `index >= 0` is
/// a real register; `-2` is the result pseudo-register; `-3` is the
/// exception pseudo-register (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterHandle {
    pub insn: InsnHandle,
    pub index: i32,
}

impl RegisterHandle {
    pub fn new(insn: InsnHandle, index: i32) -> Self {
        Self { insn, index }
    }

    pub fn is_result(&self) -> bool {
        self.index == REG_RESULT
    }

    pub fn is_exception(&self) -> bool {
        self.index == REG_EXCEPTION
    }
}

impl fmt::Display for RegisterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            REG_RESULT => write!(f, "vR"),
            REG_EXCEPTION => write!(f, "vE"),
            n if n < 0 => write!(f, "v?"),
            n => write!(f, "v{}", n),
        }
    }
}

/// An "initiating" type name, used across the loader hierarchy: the
/// loader that started the lookup plus the type descriptor string
/// (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JvmTypeHandle {
    pub loader: ClassLoaderHandle,
    pub descriptor: DexString,
}

impl JvmTypeHandle {
    pub fn new(loader: ClassLoaderHandle, descriptor: DexString) -> Self {
        Self { loader, descriptor }
    }
}

impl fmt::Display for JvmTypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_t[{}]", self.loader, self.descriptor)
    }
}

/// A method name unique within a class: name plus encoded parameter
/// and return descriptors, so overloads do not collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JvmMethodHandle {
    pub type_handle: JvmTypeHandle,
    pub unique_name: String,
}

impl JvmMethodHandle {
    pub fn new(type_handle: JvmTypeHandle, name: &str, shorty: &str) -> Self {
        Self {
            type_handle,
            unique_name: format!("{}:{}", name, shorty),
        }
    }
}

impl fmt::Display for JvmMethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_m[{}]", self.type_handle, self.unique_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JvmFieldHandle {
    pub type_handle: JvmTypeHandle,
    pub unique_name: String,
}

impl JvmFieldHandle {
    pub fn new(type_handle: JvmTypeHandle, name: &str) -> Self {
        Self {
            type_handle,
            unique_name: name.to_string(),
        }
    }
}

impl fmt::Display for JvmFieldHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_f[{}]", self.type_handle, self.unique_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_display_format() {
        let loader = ClassLoaderHandle(0);
        let file = DexFileHandle { loader, idx: 1 };
        let ty = TypeHandle::new(file, 5);
        assert_eq!(ty.to_string(), "0_1_t5");

        let insn = InsnHandle::new(file, 7);
        assert_eq!(RegisterHandle::new(insn, 3).to_string(), "v3");
        assert_eq!(RegisterHandle::new(insn, REG_RESULT).to_string(), "vR");
        assert_eq!(RegisterHandle::new(insn, REG_EXCEPTION).to_string(), "vE");
    }

    #[test]
    fn handle_ordering_is_total() {
        let loader = ClassLoaderHandle(0);
        let file = DexFileHandle { loader, idx: 0 };
        let a = MethodHandle::new(file, 1);
        let b = MethodHandle::new(file, 2);
        assert!(a < b);
    }
}
