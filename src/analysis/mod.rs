//! Dataflow, call-graph, and points-to analyses (spec §4.7-4.13): leaves
//! of the crate, consumed by binaries and tests rather than the virtual
//! machine itself.
pub mod call_graph;
pub mod cha_call_graph;
pub mod data_flow;
pub mod def_use;
pub mod points_to;
pub mod recursive_loader;
