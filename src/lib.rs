//! Supervision primitives for driver subprocesses: resource sampling of a
//! process and its descendants, and capture of their output into rotating logs.

pub mod config;
pub mod format;
pub mod logs;
pub mod supervisor;
pub mod system;
pub mod telemetry;

pub use logs::InstanceLogWriter;
pub use system::{
    ProcessInfo, ProcessMonitor, ProcessState, ProcessTreeNode, ProcessTreeSummary,
    summarize_processes, summarize_tree,
};
