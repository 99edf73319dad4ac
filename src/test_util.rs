//! Builder for synthetic trace files used by the unit tests.

use crate::source::ByteSource;
use std::io::Cursor;

#[derive(Debug, Default)]
pub struct TraceBuilder {
    data: Vec<u8>,
}

impl TraceBuilder {
    /// A single-kernel trace. The first line must be a counters header.
    pub fn single() -> Self {
        Self::default()
    }

    /// A multi-kernel trace, starting with the managed marker.
    pub fn managed() -> Self {
        Self::default().line("hiptrace_managed")
    }

    pub fn line(mut self, line: &str) -> Self {
        self.data.extend_from_slice(line.as_bytes());
        self.data.push(b'\n');
        self
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn u64s(mut self, values: &[u64]) -> Self {
        for value in values {
            self.data.extend_from_slice(&value.to_le_bytes());
        }
        self
    }

    /// Counters header followed by its payload.
    pub fn counters(self, line: &str, payload: &[u8]) -> Self {
        self.line(line).bytes(payload)
    }

    /// Events header, offset table and records.
    pub fn events(self, line: &str, table: &[u64], records: &[u8]) -> Self {
        self.line(line).u64s(table).bytes(records)
    }

    /// Current length of the trace, i.e. the offset of the next segment.
    pub fn offset(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }

    pub fn source(self, chunk_size: usize) -> ByteSource<Cursor<Vec<u8>>> {
        ByteSource::new(Cursor::new(self.data), chunk_size).expect("in-memory source")
    }
}

/// Little-endian wave state record: stamp, exec, hw_id, bb.
pub fn wave_state_record(stamp: u64, exec: u64, hw_id: u32, bb: u32) -> Vec<u8> {
    let mut record = Vec::with_capacity(24);
    record.extend_from_slice(&stamp.to_le_bytes());
    record.extend_from_slice(&exec.to_le_bytes());
    record.extend_from_slice(&hw_id.to_le_bytes());
    record.extend_from_slice(&bb.to_le_bytes());
    record
}
