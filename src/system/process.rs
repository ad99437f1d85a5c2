use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Running,
    Sleeping,
    Stopped,
    Zombie,
    #[default]
    Unknown,
}

impl ProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Running => "running",
            ProcessState::Sleeping => "sleeping",
            ProcessState::Stopped => "stopped",
            ProcessState::Zombie => "zombie",
            ProcessState::Unknown => "unknown",
        }
    }
}

/// Point-in-time resource snapshot of a single process.
///
/// A snapshot for a process that does not exist (or cannot be inspected) keeps
/// its `pid` but leaves every other field zeroed; see [`ProcessInfo::is_valid`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent_pid: u32,
    pub name: String,
    pub command_line: String,
    pub status: ProcessState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub cpu_percent: f64,
    pub memory_rss_bytes: u64,
    pub memory_vms_bytes: u64,
    pub thread_count: u32,
    pub uptime_seconds: u64,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
}

impl ProcessInfo {
    pub fn invalid(pid: u32) -> Self {
        ProcessInfo {
            pid,
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.pid > 0 && !self.name.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessTreeNode {
    pub info: ProcessInfo,
    pub children: Vec<ProcessTreeNode>,
}

impl ProcessTreeNode {
    pub fn leaf(info: ProcessInfo) -> Self {
        ProcessTreeNode {
            info,
            children: Vec::new(),
        }
    }

    /// Pre-order walk over this node and every descendant.
    pub fn iter(&self) -> TreeIter<'_> {
        TreeIter { stack: vec![self] }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn find(&self, pid: u32) -> Option<&ProcessTreeNode> {
        self.iter().find(|node| node.info.pid == pid)
    }
}

pub struct TreeIter<'a> {
    stack: Vec<&'a ProcessTreeNode>,
}

impl<'a> Iterator for TreeIter<'a> {
    type Item = &'a ProcessTreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

struct NodeResources<'a>(&'a ProcessInfo);

impl Serialize for NodeResources<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let info = self.0;
        let mut s = serializer.serialize_struct("Resources", 5)?;
        s.serialize_field("cpuPercent", &info.cpu_percent)?;
        s.serialize_field("memoryRssBytes", &info.memory_rss_bytes)?;
        s.serialize_field("memoryVmsBytes", &info.memory_vms_bytes)?;
        s.serialize_field("threadCount", &info.thread_count)?;
        s.serialize_field("uptimeSeconds", &info.uptime_seconds)?;
        s.end()
    }
}

impl Serialize for ProcessTreeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let info = &self.info;
        let mut s = serializer.serialize_struct("ProcessTreeNode", 7)?;
        s.serialize_field("pid", &info.pid)?;
        s.serialize_field("name", &info.name)?;
        s.serialize_field("commandLine", &info.command_line)?;
        s.serialize_field("status", &info.status)?;
        match &info.started_at {
            Some(started_at) => s.serialize_field("startedAt", started_at)?,
            None => s.skip_field("startedAt")?,
        }
        s.serialize_field("resources", &NodeResources(info))?;
        s.serialize_field("children", &self.children)?;
        s.end()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTreeSummary {
    pub total_processes: usize,
    pub total_cpu_percent: f64,
    pub total_memory_rss_bytes: u64,
    pub total_threads: u64,
}

impl ProcessTreeSummary {
    fn add(mut self, info: &ProcessInfo) -> Self {
        self.total_processes += 1;
        self.total_cpu_percent += info.cpu_percent;
        self.total_memory_rss_bytes += info.memory_rss_bytes;
        self.total_threads += u64::from(info.thread_count);
        self
    }
}

pub fn summarize_tree(tree: &ProcessTreeNode) -> ProcessTreeSummary {
    tree.iter()
        .fold(ProcessTreeSummary::default(), |acc, node| acc.add(&node.info))
}

pub fn summarize_processes(processes: &[ProcessInfo]) -> ProcessTreeSummary {
    processes
        .iter()
        .fold(ProcessTreeSummary::default(), ProcessTreeSummary::add)
}
