use std::collections::HashSet;
use std::time::Instant;

use super::cpu_samples::CpuSampleCache;
use super::platform::{NativeReader, ProcessReader, native_reader};
use super::process::{
    ProcessInfo, ProcessTreeNode, ProcessTreeSummary, summarize_processes, summarize_tree,
};

/// Samples resource usage of process trees.
///
/// CPU percentages come from the difference between two observations of the same
/// pid, so the first observation of any process reports 0.0. Samples live in a
/// cache owned by this monitor.
///
/// Every [`process_tree`](Self::process_tree) and
/// [`process_family`](Self::process_family) call evicts the samples of every pid
/// it did not visit. A pid polled only through [`process_info`](Self::process_info)
/// therefore loses its sample whenever a tree or family poll that excludes it runs
/// in between, and its next CPU reading restarts at 0.0. Supervisors that mix both
/// polling styles should use separate monitors.
pub struct ProcessMonitor<R: ProcessReader = NativeReader> {
    reader: R,
    samples: CpuSampleCache,
}

impl Default for ProcessMonitor<NativeReader> {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMonitor<NativeReader> {
    pub fn new() -> Self {
        Self::with_reader(native_reader())
    }
}

impl<R: ProcessReader> ProcessMonitor<R> {
    pub fn with_reader(reader: R) -> Self {
        ProcessMonitor {
            reader,
            samples: CpuSampleCache::new(),
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Number of pids currently holding a CPU sample.
    pub fn cached_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn has_sample(&self, pid: u32) -> bool {
        self.samples.contains(pid)
    }

    /// Snapshot of a single process. Does not evict cached samples.
    pub fn process_info(&mut self, pid: u32) -> ProcessInfo {
        self.snapshot(pid)
    }

    /// `root_pid` and all of its descendants, each process at most once.
    ///
    /// A process that cannot be read (the root, or a child that disappeared
    /// between being listed and being read) becomes a leaf carrying its invalid
    /// snapshot and is not expanded.
    pub fn process_tree(&mut self, root_pid: u32) -> ProcessTreeNode {
        let _span = tracing::debug_span!("monitor.process_tree", root_pid).entered();

        let mut visited = HashSet::new();
        // Pre-order arena: a child's index is always greater than its parent's.
        let mut arena: Vec<(ProcessInfo, Vec<usize>)> = Vec::new();
        let mut work: Vec<(u32, Option<usize>)> = vec![(root_pid, None)];

        while let Some((pid, parent)) = work.pop() {
            if !visited.insert(pid) {
                continue;
            }
            let info = self.snapshot(pid);
            let valid = info.is_valid();
            let index = arena.len();
            arena.push((info, Vec::new()));
            if let Some(parent) = parent {
                arena[parent].1.push(index);
            }
            if valid {
                let children = self.reader.child_pids(pid);
                work.extend(children.into_iter().rev().map(|child| (child, Some(index))));
            }
        }

        self.evict_unvisited(&visited);
        tracing::debug!(processes = arena.len(), "process tree sampled");
        assemble(arena)
    }

    /// Flat list with the root first, followed by its descendants in depth-first
    /// order when `include_children` is set. Empty if the root cannot be read.
    pub fn process_family(&mut self, root_pid: u32, include_children: bool) -> Vec<ProcessInfo> {
        let _span =
            tracing::debug_span!("monitor.process_family", root_pid, include_children).entered();

        let root = self.snapshot(root_pid);
        if !root.is_valid() {
            return Vec::new();
        }

        let mut visited = HashSet::from([root_pid]);
        let mut family = vec![root];
        if include_children {
            let mut work: Vec<u32> = self.reader.child_pids(root_pid);
            work.reverse();
            while let Some(pid) = work.pop() {
                if !visited.insert(pid) {
                    continue;
                }
                let info = self.snapshot(pid);
                if !info.is_valid() {
                    continue;
                }
                family.push(info);
                work.extend(self.reader.child_pids(pid).into_iter().rev());
            }
        }

        self.evict_unvisited(&visited);
        family
    }

    pub fn summarize_tree(tree: &ProcessTreeNode) -> ProcessTreeSummary {
        summarize_tree(tree)
    }

    pub fn summarize_processes(processes: &[ProcessInfo]) -> ProcessTreeSummary {
        summarize_processes(processes)
    }

    fn snapshot(&mut self, pid: u32) -> ProcessInfo {
        let raw = self.reader.read_process(pid);
        let mut info = raw.info;
        if info.is_valid()
            && let Some(cpu_time_ms) = raw.cpu_time_ms
        {
            info.cpu_percent = self.samples.record(pid, cpu_time_ms, Instant::now());
        }
        info
    }

    fn evict_unvisited(&mut self, visited: &HashSet<u32>) {
        let removed = self.samples.retain_only(visited);
        if removed > 0 {
            tracing::debug!(removed, remaining = self.samples.len(), "evicted cpu samples");
        }
    }
}

fn assemble(arena: Vec<(ProcessInfo, Vec<usize>)>) -> ProcessTreeNode {
    let mut slots: Vec<Option<ProcessTreeNode>> = (0..arena.len()).map(|_| None).collect();
    for (index, (info, child_indices)) in arena.into_iter().enumerate().rev() {
        let children = child_indices
            .iter()
            .filter_map(|&child| slots[child].take())
            .collect();
        slots[index] = Some(ProcessTreeNode { info, children });
    }
    slots.into_iter().next().flatten().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::system::platform::StaticReader;

    fn family_reader() -> StaticReader {
        // 100 -> (101 -> 103), 102
        let mut reader = StaticReader::new();
        reader
            .insert(100, 1, "supervised", 1_000)
            .insert(101, 100, "worker_a", 500)
            .insert(102, 100, "worker_b", 200)
            .insert(103, 101, "helper", 50);
        reader
    }

    fn pids(tree: &ProcessTreeNode) -> Vec<u32> {
        tree.iter().map(|node| node.info.pid).collect()
    }

    #[test]
    fn tree_preserves_structure_and_order() {
        let mut monitor = ProcessMonitor::with_reader(family_reader());
        let tree = monitor.process_tree(100);
        assert_eq!(pids(&tree), vec![100, 101, 103, 102]);
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].children[0].info.name, "helper");
        assert_eq!(monitor.cached_samples(), 4);
    }

    #[test]
    fn first_poll_reports_zero_cpu() {
        let mut monitor = ProcessMonitor::with_reader(family_reader());
        assert_eq!(monitor.process_info(100).cpu_percent, 0.0);
        let tree = monitor.process_tree(100);
        assert!(tree.iter().skip(1).all(|node| node.info.cpu_percent == 0.0));
    }

    #[test]
    fn second_poll_reports_positive_cpu() {
        let mut monitor = ProcessMonitor::with_reader(family_reader());
        monitor.process_tree(100);
        thread::sleep(Duration::from_millis(20));
        monitor.reader_mut().set_cpu_time(101, 5_500);
        let tree = monitor.process_tree(100);

        let busy = tree.find(101).unwrap();
        assert!(busy.info.cpu_percent > 0.0);
        let idle = tree.find(102).unwrap();
        assert_eq!(idle.info.cpu_percent, 0.0);
    }

    #[test]
    fn cycles_are_visited_once() {
        let mut reader = family_reader();
        // pid reuse race: 103 appears to be the parent of 100
        reader.set_children(103, vec![100, 101]);
        let mut monitor = ProcessMonitor::with_reader(reader);

        let tree = monitor.process_tree(100);
        assert_eq!(pids(&tree), vec![100, 101, 103, 102]);

        let family = monitor.process_family(100, true);
        let family_pids: Vec<u32> = family.iter().map(|p| p.pid).collect();
        assert_eq!(family_pids, vec![100, 101, 103, 102]);
    }

    #[test]
    fn vanished_child_is_zeroed_leaf_in_tree_and_skipped_in_family() {
        let mut reader = family_reader();
        reader.set_children(100, vec![101, 555, 102]);
        // a vanished pid is never expanded, even if children were listed for it
        reader.set_children(555, vec![102]);
        let mut monitor = ProcessMonitor::with_reader(reader);

        let tree = monitor.process_tree(100);
        assert_eq!(pids(&tree), vec![100, 101, 103, 555, 102]);
        let vanished = tree.find(555).unwrap();
        assert!(!vanished.info.is_valid());
        assert!(vanished.children.is_empty());
        assert_eq!(vanished.info.memory_rss_bytes, 0);
        assert_eq!(summarize_tree(&tree).total_processes, 5);
        assert!(!monitor.has_sample(555));

        assert_eq!(monitor.process_family(100, true).len(), 4);
    }

    #[test]
    fn invalid_root_tree_has_no_children() {
        let mut monitor = ProcessMonitor::with_reader(family_reader());
        let tree = monitor.process_tree(4040);
        assert_eq!(tree.info.pid, 4040);
        assert!(!tree.info.is_valid());
        assert!(tree.children.is_empty());
    }

    #[test]
    fn family_root_first_and_root_only() {
        let mut monitor = ProcessMonitor::with_reader(family_reader());
        let family = monitor.process_family(100, true);
        assert_eq!(family[0].pid, 100);
        assert_eq!(family.len(), 4);

        let root_only = monitor.process_family(100, false);
        assert_eq!(root_only.len(), 1);
        assert_eq!(root_only[0].pid, 100);
        // root-only call still prunes descendants' samples
        assert_eq!(monitor.cached_samples(), 1);
    }

    #[test]
    fn family_of_missing_root_is_empty() {
        let mut monitor = ProcessMonitor::with_reader(family_reader());
        monitor.process_tree(100);
        assert!(monitor.process_family(4040, true).is_empty());
        assert_eq!(monitor.cached_samples(), 4);
    }

    #[test]
    fn exited_processes_are_evicted() {
        let mut monitor = ProcessMonitor::with_reader(family_reader());
        monitor.process_tree(100);
        assert!(monitor.has_sample(103));

        monitor.reader_mut().remove(103);
        let mut reader = monitor.reader().clone();
        assert!(!reader.read_process(103).info.is_valid());

        monitor.process_tree(100);
        assert!(!monitor.has_sample(103));
        assert_eq!(monitor.cached_samples(), 3);
    }

    #[test]
    fn single_process_poll_does_not_evict() {
        let mut monitor = ProcessMonitor::with_reader(family_reader());
        monitor.process_tree(100);
        monitor.process_info(102);
        assert_eq!(monitor.cached_samples(), 4);
    }

    #[test]
    fn tree_poll_evicts_unrelated_single_pid_samples() {
        let mut reader = family_reader();
        reader.insert(900, 1, "unrelated", 10);
        let mut monitor = ProcessMonitor::with_reader(reader);

        monitor.process_info(900);
        assert!(monitor.has_sample(900));
        monitor.process_tree(100);
        assert!(!monitor.has_sample(900));
        assert_eq!(monitor.process_info(900).cpu_percent, 0.0);
    }

    #[test]
    fn process_without_cpu_time_is_not_cached() {
        let mut reader = StaticReader::new();
        reader.insert(7, 1, "opaque", 0);
        let mut raw = reader.read_process(7);
        raw.cpu_time_ms = None;
        reader.insert_raw(raw);

        let mut monitor = ProcessMonitor::with_reader(reader);
        assert_eq!(monitor.process_info(7).cpu_percent, 0.0);
        assert_eq!(monitor.cached_samples(), 0);
    }

    #[test]
    fn summaries_agree_between_tree_and_family() {
        let mut reader = family_reader();
        let mut raw = reader.read_process(101);
        raw.info.memory_rss_bytes = 4096;
        raw.info.thread_count = 4;
        reader.insert_raw(raw);

        let mut monitor = ProcessMonitor::with_reader(reader);
        let tree = monitor.process_tree(100);
        let family = monitor.process_family(100, true);
        let from_tree = ProcessMonitor::<StaticReader>::summarize_tree(&tree);
        let from_family = ProcessMonitor::<StaticReader>::summarize_processes(&family);
        assert_eq!(from_tree.total_processes, 4);
        assert_eq!(from_tree.total_memory_rss_bytes, 4096);
        assert_eq!(from_tree.total_threads, 7);
        assert_eq!(from_tree.total_processes, from_family.total_processes);
        assert_eq!(from_tree.total_memory_rss_bytes, from_family.total_memory_rss_bytes);
        assert_eq!(from_tree.total_threads, from_family.total_threads);
    }
}
