use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Size-bounded log file with numbered archives.
///
/// `app.log` rotates to `app.1.log`, which shifts to `app.2.log`, and so on up to
/// `max_files` archives; the oldest is deleted. Records are written whole: a record
/// that would push the active file past `max_bytes` triggers a rotation first.
#[derive(Debug)]
pub struct RotatingFileSink {
    base_path: PathBuf,
    max_bytes: u64,
    max_files: usize,
    file: Option<File>,
    current_size: u64,
}

impl RotatingFileSink {
    /// Opens (or creates) the active file, appending to existing content.
    pub fn open(base_path: impl Into<PathBuf>, max_bytes: u64, max_files: usize) -> io::Result<Self> {
        let base_path = base_path.into();
        if let Some(parent) = base_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(&base_path)?;
        let current_size = file.metadata()?.len();
        Ok(RotatingFileSink {
            base_path,
            max_bytes,
            max_files,
            file: Some(file),
            current_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// `app.log` -> `app.<index>.log`; `app` -> `app.<index>`.
    pub fn archive_path(&self, index: usize) -> PathBuf {
        archive_path(&self.base_path, index)
    }

    /// Write one record. A failed rotation is reported only after the record has
    /// been written to whichever file is active.
    pub fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        let len = record.len() as u64;
        let rotation = if self.current_size > 0 && self.current_size + len > self.max_bytes {
            self.rotate()
        } else {
            Ok(())
        };

        if self.file.is_none() {
            let file = open_append(&self.base_path)?;
            self.current_size = file.metadata()?.len();
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(record)?;
            file.flush()?;
            self.current_size += len;
        }
        rotation
    }

    fn rotate(&mut self) -> io::Result<()> {
        if self.max_files == 0 {
            if let Some(file) = self.file.as_mut() {
                file.set_len(0)?;
            }
            self.current_size = 0;
            return Ok(());
        }

        // Close before renaming; some platforms refuse to rename open files.
        self.file = None;
        for index in (1..=self.max_files).rev() {
            let source = if index == 1 {
                self.base_path.clone()
            } else {
                self.archive_path(index - 1)
            };
            if !source.exists() {
                continue;
            }
            let target = self.archive_path(index);
            match fs::remove_file(&target) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
            fs::rename(&source, &target)?;
        }

        let file = open_append(&self.base_path)?;
        self.current_size = file.metadata()?.len();
        self.file = Some(file);
        tracing::debug!(path = %self.base_path.display(), "rotated instance log");
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn archive_path(base: &Path, index: usize) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}.{index}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{index}"),
    };
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_names_insert_index_before_extension() {
        assert_eq!(archive_path(Path::new("/tmp/a/test.log"), 1), PathBuf::from("/tmp/a/test.1.log"));
        assert_eq!(archive_path(Path::new("/tmp/a/test"), 2), PathBuf::from("/tmp/a/test.2"));
        assert_eq!(archive_path(Path::new("/tmp/a/.hidden"), 1), PathBuf::from("/tmp/a/.hidden.1"));
    }

    #[test]
    fn rotates_before_record_would_exceed_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("test.log");
        let mut sink = RotatingFileSink::open(&base, 10, 2).unwrap();

        sink.write_record(b"aaaaaa\n").unwrap();
        sink.write_record(b"bbbbbb\n").unwrap();
        assert_eq!(fs::read_to_string(&base).unwrap(), "bbbbbb\n");
        assert_eq!(fs::read_to_string(sink.archive_path(1)).unwrap(), "aaaaaa\n");
    }

    #[test]
    fn keeps_at_most_max_files_archives() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("test.log");
        let mut sink = RotatingFileSink::open(&base, 4, 2).unwrap();

        for record in [b"r1\n", b"r2\n", b"r3\n", b"r4\n", b"r5\n"] {
            sink.write_record(record).unwrap();
        }
        assert_eq!(fs::read_to_string(&base).unwrap(), "r5\n");
        assert_eq!(fs::read_to_string(sink.archive_path(1)).unwrap(), "r4\n");
        assert_eq!(fs::read_to_string(sink.archive_path(2)).unwrap(), "r3\n");
        assert!(!sink.archive_path(3).exists());
    }

    #[test]
    fn oversized_record_lands_whole_in_a_fresh_file() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("big.log");
        let mut sink = RotatingFileSink::open(&base, 8, 1).unwrap();

        sink.write_record(b"x\n").unwrap();
        sink.write_record(b"0123456789abcdef\n").unwrap();
        assert_eq!(fs::read_to_string(&base).unwrap(), "0123456789abcdef\n");
        assert_eq!(fs::read_to_string(sink.archive_path(1)).unwrap(), "x\n");
    }

    #[test]
    fn zero_max_files_truncates_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("solo.log");
        let mut sink = RotatingFileSink::open(&base, 6, 0).unwrap();

        sink.write_record(b"one\n").unwrap();
        sink.write_record(b"two\n").unwrap();
        assert_eq!(fs::read_to_string(&base).unwrap(), "two\n");
        assert!(!sink.archive_path(1).exists());
    }

    #[test]
    fn reopening_appends_and_counts_existing_size() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("nested").join("again.log");
        {
            let mut sink = RotatingFileSink::open(&base, 1024, 1).unwrap();
            sink.write_record(b"first\n").unwrap();
        }
        let mut sink = RotatingFileSink::open(&base, 1024, 1).unwrap();
        assert_eq!(sink.path(), base.as_path());
        assert_eq!(sink.current_size(), 6);
        sink.write_record(b"second\n").unwrap();
        assert_eq!(fs::read_to_string(&base).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn open_fails_when_parent_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        assert!(RotatingFileSink::open(blocker.join("x.log"), 1024, 1).is_err());
    }
}
