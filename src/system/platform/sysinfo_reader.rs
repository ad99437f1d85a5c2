use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};

use super::{ProcessReader, RawProcess, start_and_uptime};
use crate::system::process::ProcessState;

/// Portable reader backed by `sysinfo`, used where no procfs/libproc reader exists.
///
/// On operating systems `sysinfo` does not support, every snapshot is invalid and
/// child lists are empty; a diagnostic is logged on the first read.
pub struct SysinfoReader {
    sys: System,
    warned_unsupported: bool,
}

impl Default for SysinfoReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoReader {
    pub fn new() -> Self {
        SysinfoReader {
            sys: System::new(),
            warned_unsupported: false,
        }
    }

    fn supported(&mut self) -> bool {
        if sysinfo::IS_SUPPORTED_SYSTEM {
            return true;
        }
        if !self.warned_unsupported {
            self.warned_unsupported = true;
            tracing::warn!(
                os = std::env::consts::OS,
                "process monitoring is not implemented on this platform"
            );
        }
        false
    }
}

impl ProcessReader for SysinfoReader {
    fn read_process(&mut self, pid: u32) -> RawProcess {
        let mut raw = RawProcess::invalid(pid);
        if pid == 0 || !self.supported() {
            return raw;
        }

        let sys_pid = Pid::from_u32(pid);
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        let Some(process) = self.sys.process(sys_pid) else {
            return raw;
        };

        let info = &mut raw.info;
        info.name = process.name().to_string_lossy().to_string();
        info.command_line = process
            .cmd()
            .iter()
            .map(|s| s.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        info.parent_pid = process.parent().map(|p| p.as_u32()).unwrap_or(0);
        info.status = state_from_status(process.status());
        info.memory_rss_bytes = process.memory();
        info.memory_vms_bytes = process.virtual_memory();
        info.thread_count = process
            .tasks()
            .map_or(1, |tasks| tasks.len().max(1) as u32);

        let disk = process.disk_usage();
        info.io_read_bytes = disk.total_read_bytes;
        info.io_write_bytes = disk.total_written_bytes;

        if process.start_time() > 0 {
            let (started_at, uptime) = start_and_uptime(process.start_time());
            info.started_at = started_at;
            info.uptime_seconds = uptime;
        }

        raw.cpu_time_ms = Some(process.accumulated_cpu_time());
        raw
    }

    fn child_pids(&mut self, pid: u32) -> Vec<u32> {
        if pid == 0 || !self.supported() {
            return Vec::new();
        }

        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
        let parent = Pid::from_u32(pid);
        if self.sys.process(parent).is_none() {
            return Vec::new();
        }

        let mut children: Vec<u32> = self
            .sys
            .processes()
            .iter()
            // Linux threads show up as tasks; only real processes are children.
            .filter(|(_, process)| process.thread_kind().is_none())
            .filter(|(_, process)| process.parent() == Some(parent))
            .map(|(child, _)| child.as_u32())
            .collect();
        children.sort_unstable();
        children
    }
}

fn state_from_status(status: ProcessStatus) -> ProcessState {
    match status {
        ProcessStatus::Run => ProcessState::Running,
        ProcessStatus::Sleep | ProcessStatus::Idle | ProcessStatus::UninterruptibleDiskSleep => {
            ProcessState::Sleeping
        }
        ProcessStatus::Stop | ProcessStatus::Tracing => ProcessState::Stopped,
        ProcessStatus::Zombie | ProcessStatus::Dead => ProcessState::Zombie,
        _ => ProcessState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(state_from_status(ProcessStatus::Run), ProcessState::Running);
        assert_eq!(state_from_status(ProcessStatus::Sleep), ProcessState::Sleeping);
        assert_eq!(state_from_status(ProcessStatus::Stop), ProcessState::Stopped);
        assert_eq!(state_from_status(ProcessStatus::Zombie), ProcessState::Zombie);
        assert_eq!(state_from_status(ProcessStatus::Unknown(42)), ProcessState::Unknown);
    }

    #[test]
    fn current_process_is_valid_where_supported() {
        let mut reader = SysinfoReader::new();
        let raw = reader.read_process(std::process::id());
        if sysinfo::IS_SUPPORTED_SYSTEM {
            assert!(raw.info.is_valid());
            assert!(raw.info.memory_rss_bytes > 0);
            assert!(raw.cpu_time_ms.is_some());
        } else {
            assert!(!raw.info.is_valid());
        }
    }

    #[test]
    fn nonexistent_pid_is_invalid() {
        let mut reader = SysinfoReader::new();
        let raw = reader.read_process(999_999_999);
        assert!(!raw.info.is_valid());
        assert!(reader.child_pids(999_999_999).is_empty());
    }
}
