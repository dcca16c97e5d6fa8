//! Graph structures owned by the points-to/call-graph analyses rather
//! than the virtual machine itself (spec §4.11, §4.12).
pub mod contextual_call_graph;
pub mod pag;
