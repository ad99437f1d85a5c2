use std::path::{Path, PathBuf};

use chrono::Utc;

use super::line_buffer::LineBuffer;
use super::rotating::RotatingFileSink;

pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_FILES: usize = 3;

pub const STDERR_MARKER: &str = "[stderr]";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Timestamps records and hands them to the rotating file, if one could be opened.
#[derive(Debug)]
struct RecordSink {
    path: PathBuf,
    file: Option<RotatingFileSink>,
    write_failed: bool,
}

impl RecordSink {
    fn emit(&mut self, stream: OutputStream, line: &[u8]) {
        let Some(file) = self.file.as_mut() else {
            return;
        };

        let timestamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let mut record = Vec::with_capacity(timestamp.len() + STDERR_MARKER.len() + line.len() + 5);
        record.extend_from_slice(timestamp.as_bytes());
        record.extend_from_slice(b" | ");
        if stream == OutputStream::Stderr {
            record.extend_from_slice(STDERR_MARKER.as_bytes());
            record.push(b' ');
        }
        record.extend_from_slice(line);
        record.push(b'\n');

        if let Err(err) = file.write_record(&record)
            && !self.write_failed
        {
            self.write_failed = true;
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "failed to write instance log record"
            );
        }
    }
}

/// Captures one supervised subprocess's stdout and stderr into a rotating log.
///
/// Each complete line becomes one record, `<UTC timestamp> | <line>`, with stderr
/// lines marked `[stderr]`. Partial lines wait for the rest of their bytes; one
/// longer than 1 MiB is written as a record on its own. Whatever is still buffered
/// when the writer is dropped is written out as a final record per stream.
///
/// If the log file cannot be opened the writer discards everything and says so
/// once through `tracing`.
#[derive(Debug)]
pub struct InstanceLogWriter {
    sink: RecordSink,
    stdout: LineBuffer,
    stderr: LineBuffer,
}

impl InstanceLogWriter {
    pub fn new(log_path: impl Into<PathBuf>, max_bytes: u64, max_files: usize) -> Self {
        let path = log_path.into();
        let file = match RotatingFileSink::open(&path, max_bytes, max_files) {
            Ok(file) => Some(file),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "cannot open instance log; output will be discarded"
                );
                None
            }
        };
        InstanceLogWriter {
            sink: RecordSink {
                path,
                file,
                write_failed: false,
            },
            stdout: LineBuffer::new(),
            stderr: LineBuffer::new(),
        }
    }

    pub fn with_defaults(log_path: impl Into<PathBuf>) -> Self {
        Self::new(log_path, DEFAULT_MAX_BYTES, DEFAULT_MAX_FILES)
    }

    pub fn log_path(&self) -> &Path {
        &self.sink.path
    }

    /// False when the log file could not be opened and output is being discarded.
    pub fn is_active(&self) -> bool {
        self.sink.file.is_some()
    }

    pub fn append_stdout(&mut self, data: &[u8]) {
        self.append(OutputStream::Stdout, data);
    }

    pub fn append_stderr(&mut self, data: &[u8]) {
        self.append(OutputStream::Stderr, data);
    }

    pub fn append(&mut self, stream: OutputStream, data: &[u8]) {
        if !self.is_active() {
            return;
        }
        let buffer = match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        };
        let sink = &mut self.sink;
        buffer.push(data, |line| sink.emit(stream, line));
    }

    /// Flush partial lines and release the file.
    pub fn close(self) {}

    fn flush_pending(&mut self) {
        if let Some(rest) = self.stdout.take_remaining() {
            self.sink.emit(OutputStream::Stdout, &rest);
        }
        if let Some(rest) = self.stderr.take_remaining() {
            self.sink.emit(OutputStream::Stderr, &rest);
        }
    }
}

impl Drop for InstanceLogWriter {
    fn drop(&mut self) {
        self.flush_pending();
    }
}
