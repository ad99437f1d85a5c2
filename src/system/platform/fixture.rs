use std::collections::HashMap;

use super::{ProcessReader, RawProcess};
use crate::system::process::{ProcessInfo, ProcessState};

/// Deterministic in-memory process table.
///
/// Lets supervisors and tests drive a monitor without touching the OS. Parent
/// links come from each entry's `parent_pid`, so cycles and dangling parents can
/// be modelled directly.
#[derive(Debug, Default, Clone)]
pub struct StaticReader {
    processes: HashMap<u32, RawProcess>,
    // explicit child lists override the parent_pid index
    children: HashMap<u32, Vec<u32>>,
}

impl StaticReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a running process named `name`.
    pub fn insert(&mut self, pid: u32, parent_pid: u32, name: &str, cpu_time_ms: u64) -> &mut Self {
        let info = ProcessInfo {
            pid,
            parent_pid,
            name: name.to_string(),
            status: ProcessState::Running,
            thread_count: 1,
            ..Default::default()
        };
        self.insert_raw(RawProcess {
            info,
            cpu_time_ms: Some(cpu_time_ms),
        })
    }

    pub fn insert_raw(&mut self, raw: RawProcess) -> &mut Self {
        self.processes.insert(raw.info.pid, raw);
        self
    }

    pub fn set_cpu_time(&mut self, pid: u32, cpu_time_ms: u64) -> &mut Self {
        if let Some(raw) = self.processes.get_mut(&pid) {
            raw.cpu_time_ms = Some(cpu_time_ms);
        }
        self
    }

    pub fn set_children(&mut self, pid: u32, children: Vec<u32>) -> &mut Self {
        self.children.insert(pid, children);
        self
    }

    pub fn remove(&mut self, pid: u32) -> &mut Self {
        self.processes.remove(&pid);
        self.children.remove(&pid);
        self
    }
}

impl ProcessReader for StaticReader {
    fn read_process(&mut self, pid: u32) -> RawProcess {
        self.processes
            .get(&pid)
            .cloned()
            .unwrap_or_else(|| RawProcess::invalid(pid))
    }

    fn child_pids(&mut self, pid: u32) -> Vec<u32> {
        if let Some(children) = self.children.get(&pid) {
            return children.clone();
        }
        if !self.processes.contains_key(&pid) {
            return Vec::new();
        }
        let mut children: Vec<u32> = self
            .processes
            .values()
            .filter(|raw| raw.info.parent_pid == pid && raw.info.pid != pid)
            .map(|raw| raw.info.pid)
            .collect();
        children.sort_unstable();
        children
    }
}
