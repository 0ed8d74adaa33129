//! Incremental reads of an append-only file.
//!
//! Keeps a byte offset and the trailing partial line between reads. Each
//! call reads at most `max_batch_bytes`; `TailRead::more` asks the caller to
//! come back. A file shorter than the offset was truncated or replaced, and
//! is read again from the start.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::warn;

const MAX_PARTIAL_LINE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TailRead {
    pub lines: Vec<String>,
    pub more: bool,
    pub truncated: bool,
}

#[derive(Debug)]
pub struct FileTail {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
    max_batch_bytes: usize,
}

impl FileTail {
    pub fn from_start(path: impl Into<PathBuf>, max_batch_bytes: usize) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            partial: Vec::new(),
            max_batch_bytes: max_batch_bytes.max(1),
        }
    }

    /// Skips existing content; only bytes appended later are reported.
    pub fn at_end(path: impl Into<PathBuf>, max_batch_bytes: usize) -> io::Result<Self> {
        let mut tail = Self::from_start(path, max_batch_bytes);
        tail.offset = fs_err::metadata(&tail.path)?.len();
        Ok(tail)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn read_batch(&mut self) -> io::Result<TailRead> {
        let mut file = fs_err::File::open(&self.path)?;
        let len = file.metadata()?.len();

        let mut read = TailRead::default();
        if len < self.offset {
            self.offset = 0;
            self.partial.clear();
            read.truncated = true;
        }
        if len == self.offset {
            return Ok(read);
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity(self.max_batch_bytes.min((len - self.offset) as usize));
        let n = file
            .by_ref()
            .take(self.max_batch_bytes as u64)
            .read_to_end(&mut buf)?;
        self.offset += n as u64;
        read.more = self.offset < len;

        self.partial.extend_from_slice(&buf);
        read.lines = self.drain_complete_lines();

        if self.partial.len() > MAX_PARTIAL_LINE_BYTES {
            warn!(
                path = %self.path.display(),
                bytes = self.partial.len(),
                "Dropping oversized transcript line"
            );
            self.partial.clear();
        }

        Ok(read)
    }

    fn drain_complete_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.partial.iter().rposition(|byte| *byte == b'\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);

        complete
            .split(|byte| *byte == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }
}
