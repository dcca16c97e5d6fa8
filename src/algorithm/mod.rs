//! Generic dataflow machinery shared by the analyses in `analysis`
//! (spec §4.7, SPEC_FULL §2).
pub mod monotonic_dataflow;
pub mod unique_sort;
