use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use instwatch::{ProcessMonitor, ProcessTreeNode};

const NONEXISTENT_PID: u32 = 999_999_999;

fn native_platform() -> bool {
    cfg!(any(target_os = "linux", target_os = "macos"))
}

fn spawn_long_lived_child() -> Child {
    #[cfg(windows)]
    let mut cmd = {
        let mut c = Command::new("powershell");
        c.args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            "Start-Sleep -Seconds 30",
        ]);
        c
    };

    #[cfg(not(windows))]
    let mut cmd = {
        let mut c = Command::new("sleep");
        c.arg("30");
        c
    };

    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn child process")
}

fn reap(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn wait_for_child_in_tree(monitor: &mut ProcessMonitor, pid: u32, timeout: Duration) -> Option<ProcessTreeNode> {
    let deadline = Instant::now() + timeout;
    loop {
        let tree = monitor.process_tree(std::process::id());
        if tree.find(pid).is_some() {
            return Some(tree);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn own_process_is_readable() {
    let mut monitor = ProcessMonitor::new();
    let info = monitor.process_info(std::process::id());

    assert!(info.is_valid());
    assert_eq!(info.pid, std::process::id());
    assert!(!info.name.is_empty());
    if native_platform() {
        assert!(info.memory_rss_bytes > 0, "rss should be reported: {info:?}");
        assert!(info.thread_count >= 1);
        assert!(info.parent_pid > 0);
    }
}

#[test]
fn first_sample_reports_zero_cpu() {
    let mut monitor = ProcessMonitor::new();
    let info = monitor.process_info(std::process::id());
    assert_eq!(info.cpu_percent, 0.0);
    assert!(monitor.has_sample(std::process::id()));
}

#[test]
fn nonexistent_pid_is_invalid() {
    let mut monitor = ProcessMonitor::new();

    let info = monitor.process_info(NONEXISTENT_PID);
    assert!(!info.is_valid());
    assert_eq!(info.pid, NONEXISTENT_PID);
    assert_eq!(info.memory_rss_bytes, 0);

    let tree = monitor.process_tree(NONEXISTENT_PID);
    assert!(!tree.info.is_valid());
    assert!(tree.children.is_empty());

    assert!(monitor.process_family(NONEXISTENT_PID, true).is_empty());
}

#[test]
fn spawned_child_appears_in_tree_and_family() {
    let child = spawn_long_lived_child();
    let pid = child.id();
    let mut monitor = ProcessMonitor::new();

    let Some(tree) = wait_for_child_in_tree(&mut monitor, pid, Duration::from_secs(3)) else {
        reap(child);
        panic!("child process PID {pid} never appeared under PID {}", std::process::id());
    };
    assert_eq!(tree.info.pid, std::process::id());
    let node = tree.find(pid).map(|node| node.info.clone());

    let family = monitor.process_family(std::process::id(), true);
    let root_only = monitor.process_family(std::process::id(), false);
    reap(child);

    let node = node.expect("child node");
    assert!(node.is_valid());
    assert_eq!(node.parent_pid, std::process::id());
    assert_eq!(family[0].pid, std::process::id());
    assert!(family.iter().any(|info| info.pid == pid));
    assert_eq!(root_only.len(), 1);
    assert_eq!(root_only[0].pid, std::process::id());
}

#[test]
fn exited_children_are_evicted_from_cache() {
    let mut monitor = ProcessMonitor::new();
    let mut seen = Vec::new();

    for _ in 0..5 {
        let child = spawn_long_lived_child();
        let pid = child.id();
        let observed = wait_for_child_in_tree(&mut monitor, pid, Duration::from_secs(3)).is_some();
        reap(child);
        assert!(observed, "child process PID {pid} never appeared");
        seen.push(pid);
    }

    monitor.process_tree(std::process::id());
    for pid in seen {
        assert!(!monitor.has_sample(pid), "sample for exited PID {pid} was kept");
    }
    assert!(monitor.has_sample(std::process::id()));
}

#[cfg(unix)]
#[test]
fn busy_child_reports_cpu_usage() {
    let mut child = Command::new("sh")
        .args(["-c", "while :; do :; done"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn busy child");
    let pid = child.id();

    let mut monitor = ProcessMonitor::new();
    let first = monitor.process_info(pid);
    thread::sleep(Duration::from_millis(500));
    let second = monitor.process_info(pid);
    let _ = child.kill();
    let _ = child.wait();

    assert!(first.is_valid());
    assert_eq!(first.cpu_percent, 0.0);
    assert!(second.cpu_percent > 0.0, "busy loop reported {}", second.cpu_percent);
}
