#![forbid(unsafe_code)]

//! Command-line support: workload parsing and replay.

/// Workload files of query registrations, documents and expected results.
pub mod workload;
