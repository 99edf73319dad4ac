//! Chunked random access reader over a trace file.
//!
//! Only a window of the file is held in memory at a time. Seeking inside
//! the current window is free, anything else reloads the window from the
//! underlying reader.

use crate::error::OpenError;
use crate::error::Result;
use crate::error::TraceError;
use byteorder::ByteOrder;
use byteorder::LittleEndian;
use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;

/// Default window size.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Check that `path` names an existing regular file.
pub fn check_file(path: &Path) -> Result<(), OpenError> {
    if !path.exists() {
        return Err(OpenError::FileNotFound(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(OpenError::NotAFile(path.to_path_buf()));
    }
    Ok(())
}

/// A seekable byte reader with a sliding in-memory window.
///
/// Not shareable between threads: each reader thread needs its own
/// instance.
#[derive(Debug)]
pub struct ByteSource<R> {
    inner: R,
    file_len: u64,
    chunk_size: usize,
    window: Vec<u8>,
    window_start: u64,
    cursor: usize,
}

impl ByteSource<File> {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        check_file(path)?;
        Self::new(File::open(path)?, chunk_size)
    }
}

impl<R: Read + Seek> ByteSource<R> {
    pub fn new(mut inner: R, chunk_size: usize) -> Result<Self> {
        let file_len = inner.seek(SeekFrom::End(0))?;
        Ok(Self {
            inner,
            file_len,
            chunk_size: chunk_size.max(1),
            window: Vec::new(),
            window_start: 0,
            cursor: 0,
        })
    }

    /// Total size of the underlying file.
    pub fn len(&self) -> u64 {
        self.file_len
    }

    pub fn is_empty(&self) -> bool {
        self.file_len == 0
    }

    /// Offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.window_start + self.cursor as u64
    }

    /// Number of bytes between `position` and end of file.
    pub fn remaining_in_file(&self, position: u64) -> u64 {
        self.file_len.saturating_sub(position)
    }

    /// Move to `position`, loading a new window if needed.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        let window_end = self.window_start + self.window.len() as u64;
        if position >= self.window_start && position < window_end {
            self.cursor = (position - self.window_start) as usize;
            return Ok(());
        }
        let len = self
            .remaining_in_file(position)
            .min(self.chunk_size as u64) as usize;
        self.window.resize(len, 0);
        if len > 0 {
            let loaded = self
                .inner
                .seek(SeekFrom::Start(position))
                .and_then(|_| self.inner.read_exact(&mut self.window));
            if let Err(err) = loaded {
                // The window no longer matches window_start.
                self.window.clear();
                return Err(err.into());
            }
        }
        self.window_start = position;
        self.cursor = 0;
        Ok(())
    }

    fn refill(&mut self) -> Result<()> {
        if self.cursor < self.window.len() {
            return Ok(());
        }
        let position = self.position();
        if position >= self.file_len {
            return Err(self.truncated(1));
        }
        self.seek(position)
    }

    fn truncated(&self, wanted: u64) -> TraceError {
        let offset = self.position();
        TraceError::TruncatedTrace {
            offset,
            wanted,
            available: self.remaining_in_file(offset),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.refill()?;
        let byte = self.window[self.cursor];
        self.cursor += 1;
        Ok(byte)
    }

    /// Fill `buf` completely, or fail without consuming anything.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.remaining_in_file(self.position()) < buf.len() as u64 {
            return Err(self.truncated(buf.len() as u64));
        }
        let mut filled = 0;
        while filled < buf.len() {
            self.refill()?;
            let available = &self.window[self.cursor..];
            let n = available.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&available[..n]);
            self.cursor += n;
            filled += n;
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, count: u64) -> Result<Vec<u8>> {
        if self.remaining_in_file(self.position()) < count {
            return Err(self.truncated(count));
        }
        let mut buf = vec![0; count as usize];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        let mut buf = [0; 8];
        self.read_exact(&mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }

    /// Read up to the next `\n`, which is consumed but not returned.
    pub fn read_line(&mut self) -> Result<Vec<u8>> {
        let start = self.position();
        let mut line = Vec::new();
        loop {
            if self.cursor == self.window.len() && self.position() >= self.file_len {
                return Err(TraceError::TruncatedTrace {
                    offset: start,
                    wanted: line.len() as u64 + 1,
                    available: line.len() as u64,
                });
            }
            self.refill()?;
            let available = &self.window[self.cursor..];
            match memchr::memchr(b'\n', available) {
                Some(idx) => {
                    line.extend_from_slice(&available[..idx]);
                    self.cursor += idx + 1;
                    return Ok(line);
                }
                None => {
                    line.extend_from_slice(available);
                    self.cursor = self.window.len();
                }
            }
        }
    }
}
