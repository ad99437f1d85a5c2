use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr, eyre};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::logs::{InstanceLogWriter, OutputStream};
use crate::system::{ProcessMonitor, ProcessTreeSummary, summarize_processes};

const READ_CHUNK_BYTES: usize = 8192;
// A grandchild that inherited the pipes can keep them open after the child exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type Chunk = (OutputStream, Vec<u8>);

#[derive(Debug, Clone)]
pub struct SuperviseOptions {
    pub program: String,
    pub args: Vec<String>,
    pub log_path: PathBuf,
    pub max_bytes: u64,
    pub max_files: usize,
    pub poll_interval: Duration,
    pub include_children: bool,
}

#[derive(Debug)]
pub struct SupervisedRun {
    pub pid: u32,
    pub status: ExitStatus,
    pub polls: usize,
    pub last_summary: Option<ProcessTreeSummary>,
}

/// Run one instance to completion: capture its output into a rotating log and
/// sample its process family every poll interval.
///
/// One reader task per pipe forwards chunks to this loop, which is the only
/// caller of the log writer, so appends never overlap.
pub async fn supervise(options: &SuperviseOptions) -> Result<SupervisedRun> {
    let mut child = Command::new(&options.program)
        .args(&options.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .wrap_err_with(|| format!("failed to spawn `{}`", options.program))?;
    let pid = child
        .id()
        .ok_or_else(|| eyre!("`{}` exited before its pid was known", options.program))?;
    tracing::info!(pid, program = %options.program, log = %options.log_path.display(), "instance started");

    let mut writer = InstanceLogWriter::new(&options.log_path, options.max_bytes, options.max_files);
    let mut monitor = ProcessMonitor::new();

    let (tx, mut rx) = mpsc::unbounded_channel::<Chunk>();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(stdout, OutputStream::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(stderr, OutputStream::Stderr, tx.clone()));
    }
    drop(tx);

    let mut ticker = tokio::time::interval(options.poll_interval);
    let mut polls = 0;
    let mut last_summary = None;

    // Appends write and rotate synchronously on this task; ticks and pipe reads
    // wait while a rotation renames files.
    let status = loop {
        tokio::select! {
            Some((stream, chunk)) = rx.recv() => writer.append(stream, &chunk),
            _ = ticker.tick() => {
                let family = monitor.process_family(pid, options.include_children);
                if family.is_empty() {
                    continue;
                }
                let summary = summarize_processes(&family);
                polls += 1;
                tracing::info!(
                    pid,
                    processes = summary.total_processes,
                    cpu_percent = summary.total_cpu_percent,
                    rss_bytes = summary.total_memory_rss_bytes,
                    threads = summary.total_threads,
                    "instance resources"
                );
                last_summary = Some(summary);
            }
            status = child.wait() => break status.wrap_err("failed waiting for instance")?,
        }
    };

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Some((stream, chunk)) = rx.recv().await {
            writer.append(stream, &chunk);
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(pid, "output pipes still open after exit; closing log");
    }
    writer.close();

    tracing::info!(pid, %status, polls, "instance exited");
    Ok(SupervisedRun {
        pid,
        status,
        polls,
        last_summary,
    })
}

async fn pump<R: AsyncRead + Unpin>(mut pipe: R, stream: OutputStream, tx: mpsc::UnboundedSender<Chunk>) {
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send((stream, buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(?stream, error = %err, "pipe read failed");
                break;
            }
        }
    }
}
