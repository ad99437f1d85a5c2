use chrono::{DateTime, Utc};

use crate::system::process::ProcessInfo;

mod fixture;
mod sysinfo_reader;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;

pub use fixture::StaticReader;
pub use sysinfo_reader::SysinfoReader;

#[cfg(target_os = "linux")]
pub use linux::ProcfsReader;
#[cfg(target_os = "macos")]
pub use macos::LibprocReader;

#[cfg(target_os = "linux")]
pub type NativeReader = linux::ProcfsReader;
#[cfg(target_os = "macos")]
pub type NativeReader = macos::LibprocReader;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub type NativeReader = sysinfo_reader::SysinfoReader;

pub fn native_reader() -> NativeReader {
    NativeReader::new()
}

/// Snapshot as read from the OS, before CPU time is turned into a rate.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawProcess {
    /// `cpu_percent` is always 0.0 here; the monitor fills it in.
    pub info: ProcessInfo,
    /// Cumulative user + system CPU time since process start.
    pub cpu_time_ms: Option<u64>,
}

impl RawProcess {
    pub fn invalid(pid: u32) -> Self {
        RawProcess {
            info: ProcessInfo::invalid(pid),
            cpu_time_ms: None,
        }
    }
}

/// OS-specific source of raw process facts.
///
/// Implementations must never panic or error for a missing or inaccessible
/// process: they return [`RawProcess::invalid`] and an empty child list
/// instead, and fill in whatever fields they can when only some queries fail.
pub trait ProcessReader {
    fn read_process(&mut self, pid: u32) -> RawProcess;

    /// Direct children only.
    fn child_pids(&mut self, pid: u32) -> Vec<u32>;
}

impl<R: ProcessReader + ?Sized> ProcessReader for Box<R> {
    fn read_process(&mut self, pid: u32) -> RawProcess {
        (**self).read_process(pid)
    }

    fn child_pids(&mut self, pid: u32) -> Vec<u32> {
        (**self).child_pids(pid)
    }
}

/// Start timestamp and uptime for a process that started `start_epoch_secs`
/// seconds after the Unix epoch.
pub(crate) fn start_and_uptime(start_epoch_secs: u64) -> (Option<DateTime<Utc>>, u64) {
    let Ok(secs) = i64::try_from(start_epoch_secs) else {
        return (None, 0);
    };
    let Some(started_at) = DateTime::<Utc>::from_timestamp(secs, 0) else {
        return (None, 0);
    };
    let uptime = (Utc::now() - started_at).num_seconds().max(0) as u64;
    (Some(started_at), uptime)
}
