//! Locked, append-only log writer.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use fs4::FileExt;

use crate::error::LogError;
use crate::logs::LogRecord;

/// Appends rows of one record type to a CSV log.
///
/// The writer holds an exclusive advisory lock on the file for its whole
/// lifetime, so at most one process appends to a given log at a time. The
/// lock is released when the writer is dropped.
#[derive(Debug)]
pub struct LogWriter<R: LogRecord> {
    path: PathBuf,
    file: File,
    appended: usize,
    _record: PhantomData<fn(&R)>,
}

impl<R: LogRecord> LogWriter<R> {
    /// Open `path` for appending, failing with [`LogError::Locked`] if another
    /// writer holds it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Self::open_inner(path.as_ref(), false)
    }

    /// Open `path` for appending, waiting for any other writer to finish.
    pub fn open_blocking(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Self::open_inner(path.as_ref(), true)
    }

    fn open_inner(path: &Path, wait: bool) -> Result<Self, LogError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| LogError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| LogError::io(path, e))?;

        if wait {
            file.lock_exclusive().map_err(|e| LogError::io(path, e))?;
        } else if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                return Err(LogError::Locked {
                    path: path.to_path_buf(),
                });
            }
            return Err(LogError::io(path, e));
        }

        let mut writer = Self {
            path: path.to_path_buf(),
            file,
            appended: 0,
            _record: PhantomData,
        };
        writer.prepare()?;
        Ok(writer)
    }

    /// Write the header to an empty file, or validate the existing one.
    fn prepare(&mut self) -> Result<(), LogError> {
        let len = self
            .file
            .metadata()
            .map_err(|e| LogError::io(&self.path, e))?
            .len();

        if len == 0 {
            let header = encode_line(R::HEADER.iter().copied())?;
            return self.write_line(&header);
        }

        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| LogError::io(&self.path, e))?;
        let mut first = String::new();
        BufReader::new(&self.file)
            .take(4096)
            .read_line(&mut first)
            .map_err(|e| LogError::io(&self.path, e))?;
        let found = first.trim_start_matches('\u{feff}').trim_end();
        if found != R::HEADER.join(",") {
            return Err(LogError::BadHeader {
                path: self.path.clone(),
                found: found.to_string(),
            });
        }

        // A crash mid-write can leave an unterminated last line. Close it so
        // the next row starts cleanly; readers report it as a corrupt row.
        self.file
            .seek(SeekFrom::End(-1))
            .map_err(|e| LogError::io(&self.path, e))?;
        let mut last = [0u8; 1];
        self.file
            .read_exact(&mut last)
            .map_err(|e| LogError::io(&self.path, e))?;
        if last[0] != b'\n' {
            tracing::warn!(path = %self.path.display(), "Log ends with a partial row, terminating it");
            self.write_line(b"\n")?;
        }
        Ok(())
    }

    /// Append one row and flush it to stable storage.
    pub fn append(&mut self, record: &R) -> Result<(), LogError> {
        let line = encode_line(record.to_fields().iter().map(String::as_str))?;
        self.write_line(&line)?;
        self.appended += 1;
        Ok(())
    }

    fn write_line(&mut self, line: &[u8]) -> Result<(), LogError> {
        self.file
            .write_all(line)
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_data())
            .map_err(|e| LogError::io(&self.path, e))
    }

    /// Rows appended through this writer.
    pub fn appended(&self) -> usize {
        self.appended
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Encode one CSV line, terminator included.
fn encode_line<'a>(fields: impl IntoIterator<Item = &'a str>) -> Result<Vec<u8>, LogError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    wtr.write_record(fields)
        .map_err(|e| LogError::Encode(e.to_string()))?;
    wtr.into_inner()
        .map_err(|e| LogError::Encode(e.to_string()))
}
