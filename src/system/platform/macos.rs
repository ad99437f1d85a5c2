use libproc::libproc::bsd_info::BSDInfo;
use libproc::libproc::pid_rusage::{RUsageInfoV2, pidrusage};
use libproc::libproc::proc_pid::{name, pidinfo};
use libproc::libproc::task_info::TaskInfo;
use libproc::processes::{ProcFilter, pids_by_type};

use super::{ProcessReader, RawProcess, start_and_uptime};
use crate::system::process::ProcessState;

// <sys/proc.h> p_stat values
const SIDL: u32 = 1;
const SRUN: u32 = 2;
const SSLEEP: u32 = 3;
const SSTOP: u32 = 4;
const SZOMB: u32 = 5;

const MAX_PROCARGS_BYTES: usize = 1024 * 1024;

/// Reads process facts through libproc and sysctl.
pub struct LibprocReader {
    // Mach absolute time -> nanoseconds (1/1 on Intel, 125/3 on Apple Silicon)
    timebase_numer: u64,
    timebase_denom: u64,
}

impl Default for LibprocReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LibprocReader {
    pub fn new() -> Self {
        let (timebase_numer, timebase_denom) = mach_timebase();
        LibprocReader {
            timebase_numer,
            timebase_denom,
        }
    }

    fn mach_to_ms(&self, ticks: u64) -> u64 {
        let nanos = u128::from(ticks) * u128::from(self.timebase_numer)
            / u128::from(self.timebase_denom);
        (nanos / 1_000_000) as u64
    }
}

impl ProcessReader for LibprocReader {
    fn read_process(&mut self, pid: u32) -> RawProcess {
        let mut raw = RawProcess::invalid(pid);
        let Ok(c_pid) = i32::try_from(pid) else {
            return raw;
        };
        if c_pid == 0 {
            return raw;
        }

        // Task info fails for missing processes and for other users' processes.
        let Ok(task) = pidinfo::<TaskInfo>(c_pid, 0) else {
            return raw;
        };

        let info = &mut raw.info;
        info.memory_rss_bytes = task.pti_resident_size;
        info.memory_vms_bytes = task.pti_virtual_size;
        info.thread_count = u32::try_from(task.pti_threadnum).unwrap_or(0);
        raw.cpu_time_ms = Some(self.mach_to_ms(task.pti_total_user + task.pti_total_system));

        if let Ok(proc_name) = name(c_pid) {
            info.name = proc_name;
        }
        info.command_line = command_line(c_pid).unwrap_or_default();

        if let Ok(bsd) = pidinfo::<BSDInfo>(c_pid, 0) {
            info.parent_pid = bsd.pbi_ppid;
            info.status = state_from_code(bsd.pbi_status);
            if bsd.pbi_start_tvsec > 0 {
                let (started_at, uptime) = start_and_uptime(bsd.pbi_start_tvsec);
                info.started_at = started_at;
                info.uptime_seconds = uptime;
            }
        }

        if let Ok(usage) = pidrusage::<RUsageInfoV2>(c_pid) {
            info.io_read_bytes = usage.ri_diskio_bytesread;
            info.io_write_bytes = usage.ri_diskio_byteswritten;
        }

        raw
    }

    fn child_pids(&mut self, pid: u32) -> Vec<u32> {
        if pid == 0 {
            return Vec::new();
        }
        // proc_listchildpids under-reports; the ppid filter over the full list does not.
        let mut children = pids_by_type(ProcFilter::ByParentProcess { ppid: pid }).unwrap_or_default();
        children.retain(|&child| child != 0);
        children.sort_unstable();
        children
    }
}

fn state_from_code(code: u32) -> ProcessState {
    match code {
        SRUN => ProcessState::Running,
        SSLEEP | SIDL => ProcessState::Sleeping,
        SSTOP => ProcessState::Stopped,
        SZOMB => ProcessState::Zombie,
        _ => ProcessState::Unknown,
    }
}

#[allow(deprecated)]
fn mach_timebase() -> (u64, u64) {
    let mut info = libc::mach_timebase_info { numer: 0, denom: 0 };
    // SAFETY: `info` is a valid, writable mach_timebase_info.
    let ret = unsafe { libc::mach_timebase_info(&mut info) };
    if ret != 0 || info.numer == 0 || info.denom == 0 {
        return (1, 1);
    }
    (u64::from(info.numer), u64::from(info.denom))
}

/// argv via KERN_PROCARGS2: `argc`, exec path, NUL padding, then argv strings.
fn command_line(pid: i32) -> Option<String> {
    let mut mib = [libc::CTL_KERN, libc::KERN_PROCARGS2, pid];
    let mut size: libc::size_t = 0;
    // SAFETY: a null buffer asks sysctl for the required size only.
    let ret = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            mib.len() as libc::c_uint,
            std::ptr::null_mut(),
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };
    if ret != 0 || size == 0 || size > MAX_PROCARGS_BYTES {
        return None;
    }

    let mut buf = vec![0u8; size];
    // SAFETY: `buf` holds `size` writable bytes and sysctl writes at most that many.
    let ret = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            mib.len() as libc::c_uint,
            buf.as_mut_ptr().cast(),
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };
    if ret != 0 {
        return None;
    }
    buf.truncate(size);
    parse_procargs(&buf)
}

fn parse_procargs(buf: &[u8]) -> Option<String> {
    let argc_bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    let argc = i32::from_ne_bytes(argc_bytes).max(0) as usize;
    let rest = &buf[4..];

    let exec_end = rest.iter().position(|&b| b == 0)?;
    let args_start = rest[exec_end..]
        .iter()
        .position(|&b| b != 0)
        .map_or(rest.len(), |offset| exec_end + offset);

    let args: Vec<String> = rest[args_start..]
        .split(|&b| b == 0)
        .take(argc)
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect();
    Some(args.join(" "))
}
