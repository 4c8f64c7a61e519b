// src/monitor/tail.rs

//! Incremental reader over a growing log file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Slack allowed between the recorded start time and a fresh log's mtime
/// (coarse filesystem timestamps, clock skew on shares).
const MTIME_TOLERANCE: Duration = Duration::from_secs(1);

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailRead {
    /// No file at the path yet.
    Missing,
    /// A file exists but predates this run.
    Stale,
    /// The file is current; complete lines appended since the last read.
    Lines(Vec<String>),
}

/// Tracks a byte offset into one log file and yields complete lines.
///
/// Bytes after the last newline are held back until the line is finished or
/// [`LogTail::read_to_end`] flushes them. Invalid UTF-8 is replaced, never
/// rejected.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    not_before: SystemTime,
    offset: u64,
    partial: Vec<u8>,
}

impl LogTail {
    /// `started` is when the job was launched; older files are ignored.
    pub fn new(path: impl Into<PathBuf>, started: SystemTime) -> Self {
        Self {
            path: path.into(),
            not_before: started.checked_sub(MTIME_TOLERANCE).unwrap_or(started),
            offset: 0,
            partial: Vec::new(),
        }
    }

    /// Continue from a previously consumed byte offset.
    pub fn resume_at(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed so far, including any held partial line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read whatever was appended since the previous call.
    pub fn poll(&mut self) -> io::Result<TailRead> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(TailRead::Missing),
            Err(e) => return Err(e),
        };
        let meta = file.metadata()?;
        if let Ok(mtime) = meta.modified() {
            if mtime < self.not_before {
                return Ok(TailRead::Stale);
            }
        }

        let len = meta.len();
        if len < self.offset {
            // Truncated or rewritten; start over.
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(TailRead::Lines(Vec::new()));
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.take(len - self.offset).read_to_end(&mut buf)?;
        self.offset += buf.len() as u64;
        self.partial.extend_from_slice(&buf);

        Ok(TailRead::Lines(self.drain_complete_lines()))
    }

    /// Final read: everything appended plus the unterminated last line.
    pub fn read_to_end(&mut self) -> io::Result<TailRead> {
        let mut lines = match self.poll()? {
            TailRead::Lines(lines) => lines,
            other => return Ok(other),
        };
        if !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            lines.push(decode_line(&rest));
        }
        Ok(TailRead::Lines(lines))
    }

    /// Lines in the already consumed prefix `[0, offset)`, read without
    /// moving the offset. Used to recover marker state on resume.
    pub fn scan_consumed(&self) -> io::Result<Vec<String>> {
        if self.offset == 0 {
            return Ok(Vec::new());
        }
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut buf = Vec::new();
        file.take(self.offset).read_to_end(&mut buf)?;
        Ok(buf.split(|b| *b == b'\n').filter(|l| !l.is_empty()).map(decode_line).collect())
    }

    fn drain_complete_lines(&mut self) -> Vec<String> {
        let Some(last_nl) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(last_nl + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete[..complete.len() - 1]
            .split(|b| *b == b'\n')
            .map(decode_line)
            .collect()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
