use std::collections::{HashMap, HashSet};
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct CpuSample {
    cpu_time_ms: u64,
    observed_at: Instant,
}

/// Last cumulative CPU time seen per pid, used to turn two observations into a rate.
#[derive(Debug, Default)]
pub struct CpuSampleCache {
    entries: HashMap<u32, CpuSample>,
}

impl CpuSampleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `cpu_time_ms` for `pid` at `now` and return the CPU percentage
    /// since the previous sample. The first sample for a pid always yields 0.0.
    pub fn record(&mut self, pid: u32, cpu_time_ms: u64, now: Instant) -> f64 {
        let current = CpuSample {
            cpu_time_ms,
            observed_at: now,
        };
        let Some(previous) = self.entries.insert(pid, current) else {
            return 0.0;
        };

        // Whole milliseconds, matching the resolution of the cumulative counters.
        let wall_ms = now
            .checked_duration_since(previous.observed_at)
            .map_or(0, |elapsed| elapsed.as_millis());
        if wall_ms == 0 {
            return 0.0;
        }

        let cpu_delta_ms = cpu_time_ms.saturating_sub(previous.cpu_time_ms) as f64;
        (cpu_delta_ms / wall_ms as f64) * 100.0
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.entries.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every sample whose pid is not in `alive_pids`. Returns how many were removed.
    pub fn retain_only(&mut self, alive_pids: &HashSet<u32>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|pid, _| alive_pids.contains(pid));
        before - self.entries.len()
    }
}
