//! Error types for trace opening, header parsing and event decoding.

use compact_str::CompactString;
use std::path::PathBuf;

/// Failure to open a trace (or auxiliary) file.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("File does not exist: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("Path is not a file: {}", .0.display())]
    NotAFile(PathBuf),
}

/// Failure to parse a textual header line.
#[derive(Debug, thiserror::Error)]
pub enum HeaderParseError {
    /// The first token is not one of the known header markers.
    #[error("Unrecognized header marker: {0:?}")]
    UnrecognizedMarker(CompactString),
    /// A token that should be an unsigned integer is not.
    #[error("Malformed numeric token {token:?} at index {index}")]
    MalformedNumericToken { index: usize, token: CompactString },
    /// The `begin_fields` marker is missing from an events header.
    #[error("Events header is missing the begin_fields marker")]
    MissingFieldMarker,
    /// The field list of an events header has an odd number of tokens.
    #[error("Dangling token {0:?} in events header field list")]
    DanglingFieldToken(CompactString),
    #[error("Wrong token count for {kind} header: {count}")]
    WrongTokenCount { kind: &'static str, count: usize },
    #[error("Header line is not valid UTF-8")]
    NotUtf8,
    #[error(transparent)]
    Config(#[from] ConfigParseError),
}

/// Failure to parse a kernel configuration, either compact or JSON.
#[derive(Debug, thiserror::Error)]
pub enum ConfigParseError {
    #[error("Wrong token count for kernel_info: expected 8, got {0}")]
    WrongTokenCount(usize),
    #[error("Non-numeric token in kernel_info: {0:?}")]
    NonNumericToken(CompactString),
    #[error("Kernel configuration is not a JSON object")]
    NotAnObject,
    #[error("Kernel geometry has a zero dimension")]
    ZeroDimension,
    #[error("Invalid kernel configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Umbrella error for everything that can go wrong with an open trace.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    HeaderParse(#[from] HeaderParseError),
    #[error(transparent)]
    ConfigParse(#[from] ConfigParseError),
    /// Fewer bytes are available than the format requires.
    #[error("Trace truncated at offset {offset}: wanted {wanted} bytes, {available} available")]
    TruncatedTrace {
        offset: u64,
        wanted: u64,
        available: u64,
    },
    /// A managed trace contains a line that is not a counters or events header.
    #[error("Unrecognized header at offset {offset}: {marker:?}")]
    UnrecognizedHeader { offset: u64, marker: CompactString },
    /// Segment sizes add up to more than the file holds.
    #[error("Segment at offset {offset} extends past end of file ({file_size} bytes)")]
    Overshoot { offset: u64, file_size: u64 },
    /// An events offset table that is not sorted ascending.
    #[error("Offset table at offset {offset} is not sorted")]
    UnsortedOffsetTable { offset: u64 },
    #[error("Rank {rank} out of range (trace has {count} events)")]
    RankOutOfRange { rank: u64, count: u64 },
    /// A legacy counters header was found but no configuration was side-loaded.
    #[error("Kernel {0:?} has no configuration")]
    MissingConfiguration(CompactString),
    /// A JSON record file that does not have the expected shape.
    #[error("Invalid JSON record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = TraceError> = std::result::Result<T, E>;
