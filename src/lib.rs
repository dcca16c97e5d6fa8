//! Static-analysis framework for Android DEX bytecode: a memory-mapped
//! DEX/ODEX reader, per-method CFG builder, a generic monotonic
//! dataflow solver, and an Andersen-style points-to / on-the-fly
//! call-graph engine.
//!
//! Layers, leaves first: handles (`hdl`), the instruction model
//! (`insn_info`, `insn`), the DEX reader (`rawdex`), the CFG builder
//! (`insn_graph`), the class loader (`class_loader`) and virtual
//! machine (`vm`), the dataflow solver (`algorithm`), and the
//! dataflow/call-graph/points-to analyses (`analysis`,
//! `analysis_graph`).
pub mod access_flags;
pub mod error;
pub mod hdl;
pub mod insn;
pub mod insn_info;
pub(crate) mod rawdex;

pub mod insn_graph;

pub mod class_loader;
pub mod vm;

pub mod algorithm;
pub mod analysis;
pub mod analysis_graph;

pub use error::Error;

/// Crate-wide result type, matching spec §7's error kinds.
pub type Result<T> = std::result::Result<T, Error>;

pub use hdl::{
    ClassLoaderHandle, DexFileHandle, DexLocalHandle, FieldHandle, InsnHandle, JvmFieldHandle,
    JvmMethodHandle, JvmTypeHandle, MethodHandle, RegisterHandle, TypeHandle, REG_EXCEPTION,
    REG_RESULT,
};
pub use rawdex::string::DexString;
pub use vm::{VirtualMachine, VmConfig};
