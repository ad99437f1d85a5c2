pub mod cpu_samples;
pub mod monitor;
pub mod platform;
pub mod process;

pub use monitor::ProcessMonitor;
pub use process::{
    ProcessInfo, ProcessState, ProcessTreeNode, ProcessTreeSummary, summarize_processes,
    summarize_tree,
};
