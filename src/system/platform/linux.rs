use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::{ProcessReader, RawProcess, start_and_uptime};
use crate::system::process::ProcessState;

const DEFAULT_CLOCK_TICKS: u64 = 100;
const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Reads process facts from procfs.
pub struct ProcfsReader {
    root: PathBuf,
    clock_ticks: u64,
    page_size: u64,
    boot_time_secs: Option<u64>,
}

impl Default for ProcfsReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsReader {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Reader over an alternative procfs mount (containers, fixtures).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let boot_time_secs = read_boot_time(&root).or_else(|| {
            let secs = sysinfo::System::boot_time();
            (secs > 0).then_some(secs)
        });
        ProcfsReader {
            root,
            clock_ticks: sysconf_or(libc::_SC_CLK_TCK, DEFAULT_CLOCK_TICKS),
            page_size: sysconf_or(libc::_SC_PAGESIZE, DEFAULT_PAGE_SIZE),
            boot_time_secs,
        }
    }

    fn pid_file(&self, pid: u32, name: &str) -> PathBuf {
        self.root.join(pid.to_string()).join(name)
    }

    fn children_from_tasks(&self, pid: u32) -> Option<Vec<u32>> {
        let task_dir = self.root.join(pid.to_string()).join("task");
        let entries = fs::read_dir(task_dir).ok()?;

        let mut seen = HashSet::new();
        let mut children = Vec::new();
        let mut any_readable = false;
        for entry in entries.flatten() {
            // Each thread lists the children it forked itself.
            let Ok(contents) = fs::read_to_string(entry.path().join("children")) else {
                continue;
            };
            any_readable = true;
            for child in contents.split_whitespace().filter_map(|t| t.parse::<u32>().ok()) {
                if seen.insert(child) {
                    children.push(child);
                }
            }
        }
        any_readable.then_some(children)
    }

    fn children_from_scan(&self, pid: u32) -> Vec<u32> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut children: Vec<u32> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|&candidate| {
                fs::read_to_string(self.pid_file(candidate, "stat"))
                    .ok()
                    .and_then(|stat| parse_stat(&stat))
                    .is_some_and(|fields| fields.ppid == pid)
            })
            .collect();
        children.sort_unstable();
        children
    }
}

impl ProcessReader for ProcfsReader {
    fn read_process(&mut self, pid: u32) -> RawProcess {
        let mut raw = RawProcess::invalid(pid);
        if pid == 0 {
            return raw;
        }

        // stat is the one mandatory source; without it the process is gone.
        let Ok(stat) = fs::read_to_string(self.pid_file(pid, "stat")) else {
            return raw;
        };
        let Some(fields) = parse_stat(&stat) else {
            return raw;
        };

        let info = &mut raw.info;
        info.status = state_from_code(fields.state);
        info.parent_pid = fields.ppid;
        info.thread_count = fields.num_threads;
        info.memory_vms_bytes = fields.vsize;
        info.memory_rss_bytes = fields.rss_pages.saturating_mul(self.page_size);
        raw.cpu_time_ms = Some((fields.utime + fields.stime) * 1000 / self.clock_ticks);

        if let Some(boot) = self.boot_time_secs {
            let (started_at, uptime) = start_and_uptime(boot + fields.start_ticks / self.clock_ticks);
            info.started_at = started_at;
            info.uptime_seconds = uptime;
        }

        info.name = match fs::read_to_string(self.pid_file(pid, "comm")) {
            Ok(comm) => comm.trim_end().to_string(),
            Err(_) => fields.comm,
        };

        if let Ok(cmdline) = fs::read(self.pid_file(pid, "cmdline")) {
            let joined: Vec<u8> = cmdline
                .into_iter()
                .map(|b| if b == 0 { b' ' } else { b })
                .collect();
            info.command_line = String::from_utf8_lossy(&joined).trim().to_string();
        }

        // io needs same-user or root
        if let Ok(io) = fs::read_to_string(self.pid_file(pid, "io")) {
            for line in io.lines() {
                if let Some(val) = line.strip_prefix("read_bytes:") {
                    info.io_read_bytes = val.trim().parse().unwrap_or(0);
                } else if let Some(val) = line.strip_prefix("write_bytes:") {
                    info.io_write_bytes = val.trim().parse().unwrap_or(0);
                }
            }
        }

        raw
    }

    fn child_pids(&mut self, pid: u32) -> Vec<u32> {
        if pid == 0 || !self.root.join(pid.to_string()).exists() {
            return Vec::new();
        }
        // children files need CONFIG_PROC_CHILDREN; scan the table otherwise
        self.children_from_tasks(pid)
            .unwrap_or_else(|| self.children_from_scan(pid))
    }
}

#[derive(Debug, PartialEq)]
struct StatFields {
    comm: String,
    state: char,
    ppid: u32,
    utime: u64,
    stime: u64,
    num_threads: u32,
    start_ticks: u64,
    vsize: u64,
    rss_pages: u64,
}

fn parse_stat(contents: &str) -> Option<StatFields> {
    // comm may contain spaces and parens, so anchor on the last ')'
    let open = contents.find('(')?;
    let close = contents.rfind(')')?;
    let comm = contents.get(open + 1..close)?.to_string();
    let fields: Vec<&str> = contents[close + 1..].split_whitespace().collect();
    // After comm: state(0) ppid(1) pgrp(2) session(3) tty_nr(4) tpgid(5)
    // flags(6) minflt(7) cminflt(8) majflt(9) cmajflt(10) utime(11) stime(12)
    // cutime(13) cstime(14) priority(15) nice(16) num_threads(17)
    // itrealvalue(18) starttime(19) vsize(20) rss(21)
    if fields.len() < 22 {
        return None;
    }
    let num = |i: usize| fields[i].parse::<u64>().unwrap_or(0);
    Some(StatFields {
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        ppid: fields[1].parse().unwrap_or(0),
        utime: num(11),
        stime: num(12),
        num_threads: fields[17].parse().unwrap_or(0),
        start_ticks: num(19),
        vsize: num(20),
        // rss is signed in the kernel's format string
        rss_pages: fields[21].parse::<i64>().unwrap_or(0).max(0) as u64,
    })
}

fn state_from_code(code: char) -> ProcessState {
    match code {
        'R' => ProcessState::Running,
        'S' | 'D' | 'I' => ProcessState::Sleeping,
        'Z' => ProcessState::Zombie,
        'T' | 't' => ProcessState::Stopped,
        _ => ProcessState::Unknown,
    }
}

fn read_boot_time(root: &Path) -> Option<u64> {
    let stat = fs::read_to_string(root.join("stat")).ok()?;
    stat.lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|secs| secs.trim().parse().ok())
}

fn sysconf_or(name: libc::c_int, fallback: u64) -> u64 {
    // SAFETY: sysconf has no preconditions; it returns -1 for unknown names.
    let value = unsafe { libc::sysconf(name) };
    if value > 0 { value as u64 } else { fallback }
}
