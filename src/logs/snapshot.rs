//! Consistent point-in-time reads of a log that may still be growing.
//!
//! A snapshot reads the file once and keeps everything up to the last
//! newline. Anything after it belongs to a row that is still being written
//! (or was cut off by a crash) and is left for the next read. Each complete
//! row either decodes into a record or is reported as a [`CorruptRow`];
//! one bad row never hides the rest of the log.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::LogError;
use crate::logs::LogRecord;

/// A row that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptRow {
    pub log: &'static str,
    /// 1-based line number in the file.
    pub line: u64,
    pub reason: String,
    pub raw: String,
}

/// A decoded record and the line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Positioned<R> {
    pub line: u64,
    pub record: R,
}

#[derive(Debug, Clone)]
pub struct LogSnapshot<R> {
    pub path: PathBuf,
    /// Records in file order.
    pub records: Vec<Positioned<R>>,
    pub corrupt: Vec<CorruptRow>,
    /// Bytes after the last newline that were not read.
    pub partial_tail_bytes: usize,
    /// SHA-256 of the bytes that were read.
    pub digest: String,
    /// False when the log did not exist yet.
    pub exists: bool,
}

impl<R: LogRecord> LogSnapshot<R> {
    /// Take a snapshot of `path`. A missing file yields an empty snapshot.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Log does not exist yet");
                return Ok(Self::empty(path, false));
            }
            Err(e) => return Err(LogError::io(path, e)),
        };
        Self::from_bytes(path, &bytes)
    }

    fn empty(path: &Path, exists: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            records: Vec::new(),
            corrupt: Vec::new(),
            partial_tail_bytes: 0,
            digest: hex::encode(Sha256::digest(b"")),
            exists,
        }
    }

    /// Decode a snapshot from raw file contents.
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self, LogError> {
        let complete_len = bytes
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let complete = &bytes[..complete_len];
        let partial_tail_bytes = bytes.len() - complete_len;
        if partial_tail_bytes > 0 {
            tracing::debug!(
                path = %path.display(),
                bytes = partial_tail_bytes,
                "Ignoring partial trailing row"
            );
        }

        let mut snapshot = Self::empty(path, true);
        snapshot.partial_tail_bytes = partial_tail_bytes;
        snapshot.digest = hex::encode(Sha256::digest(complete));

        let body = complete.strip_prefix(b"\xef\xbb\xbf").unwrap_or(complete);
        if body.is_empty() {
            return Ok(snapshot);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(body);

        let header = reader
            .headers()
            .map_err(|e| LogError::BadHeader {
                path: path.to_path_buf(),
                found: e.to_string(),
            })?
            .clone();
        if header.iter().map(str::trim).ne(R::HEADER.iter().copied()) {
            return Err(LogError::BadHeader {
                path: path.to_path_buf(),
                found: header.iter().collect::<Vec<_>>().join(","),
            });
        }

        // Raw lines, for quoting corrupt rows back to the operator.
        let lines: Vec<&[u8]> = body.split(|&b| b == b'\n').collect();
        let mut record = csv::StringRecord::new();
        loop {
            let line = reader.position().line();
            match reader.read_record(&mut record) {
                Ok(false) => break,
                Ok(true) => {
                    if record.iter().all(|f| f.trim().is_empty()) {
                        continue;
                    }
                    let line = record.position().map(|p| p.line()).unwrap_or(line);
                    match R::from_fields(&record) {
                        Ok(decoded) => snapshot.records.push(Positioned {
                            line,
                            record: decoded,
                        }),
                        Err(reason) => snapshot.corrupt.push(CorruptRow {
                            log: R::LOG_NAME,
                            line,
                            reason,
                            raw: raw_line(&lines, line),
                        }),
                    }
                }
                Err(e) => {
                    let line = e
                        .position()
                        .map(|p| p.line())
                        .unwrap_or(line);
                    snapshot.corrupt.push(CorruptRow {
                        log: R::LOG_NAME,
                        line,
                        reason: e.to_string(),
                        raw: raw_line(&lines, line),
                    });
                }
            }
        }

        if !snapshot.corrupt.is_empty() {
            tracing::warn!(
                log = R::LOG_NAME,
                count = snapshot.corrupt.len(),
                "Log contains rows that could not be decoded"
            );
        }
        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn raw_line(lines: &[&[u8]], line: u64) -> String {
    line.checked_sub(1)
        .and_then(|i| lines.get(i as usize))
        .map(|l| String::from_utf8_lossy(l).trim_end_matches('\r').to_string())
        .unwrap_or_default()
}
