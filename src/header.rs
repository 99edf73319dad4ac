//! Parser for the textual header lines of a hiptrace file.
//!
//! A trace is a sequence of `\n`-terminated, comma-separated header lines,
//! each followed by a packed little-endian binary payload. Three kinds of
//! lines exist:
//!
//! * `hiptrace_counters,<kernel>,<count>,<stamp>,<begin>,<end>,<width>[,kernel_info,...]`
//!   followed by `count * width` bytes of basic block counters.
//! * `hiptrace_events,<event width>,<table length>,<event name>,begin_fields,(<type>,<width>)+`
//!   followed by the offset table and the event records.
//! * `hiptrace_managed`, alone on the first line of a multi-kernel trace.

use crate::codec::AbiType;
use crate::error::HeaderParseError;
use crate::error::TraceError;
use crate::gcn::memrealtime_to_nanos;
use crate::geometry::KernelConfiguration;
use crate::geometry::ProducerCoordinates;
use crate::geometry::WAVE_SIZE;
use crate::geometry::is_thread_indexed;
use crate::geometry::linear_producer_id;
use crate::geometry::resolve_producer_index;
use bstr::ByteSlice;
use compact_str::CompactString;
use smallvec::SmallVec;
use std::str::FromStr;
use std::sync::Arc;

pub const COUNTERS_MARKER: &str = "hiptrace_counters";
pub const EVENTS_MARKER: &str = "hiptrace_events";
pub const MANAGED_MARKER: &str = "hiptrace_managed";
pub const BEGIN_FIELDS_MARKER: &str = "begin_fields";

/// Token count of a counters header without an embedded configuration.
pub const COUNTERS_LEGACY_TOKENS: usize = 7;
/// Token count of a counters header with an embedded `kernel_info`.
pub const COUNTERS_COMPACT_TOKENS: usize = 15;
/// Minimum token count of an events header (one field).
pub const EVENTS_MIN_TOKENS: usize = 7;

type Tokens<'a> = SmallVec<[&'a str; 16]>;

/// Result of parsing one header line.
#[derive(Debug, Clone)]
pub enum HeaderKind {
    Counters(CountersHeader),
    Events(EventsHeader),
    /// First line of a multi-kernel trace. Carries no payload.
    Managed,
    /// The first token is not a known marker.
    Unrecognized(CompactString),
}

/// Basic block counters dump of one kernel launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountersHeader {
    pub kernel_name: CompactString,
    pub counter_count: u64,
    pub capture_stamp: u64,
    pub interval_begin: u64,
    pub interval_end: u64,
    /// Width of one counter in bytes, 1 to 8.
    pub counter_width: u16,
    /// Launch configuration. Absent for legacy headers until side-loaded.
    pub configuration: Option<KernelConfiguration>,
    /// The header line, without its terminating newline.
    pub raw_header: String,
}

impl CountersHeader {
    /// Byte length of the counters payload following the header line.
    pub fn payload_len(&self) -> u64 {
        self.counter_count.saturating_mul(u64::from(self.counter_width))
    }

    /// Byte length of the header line including its newline.
    pub fn line_len(&self) -> u64 {
        self.raw_header.len() as u64 + 1
    }

    /// Byte length of the whole counters segment.
    pub fn segment_len(&self) -> u64 {
        self.line_len().saturating_add(self.payload_len())
    }
}

/// Description of one field of an event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventField {
    pub tag: CompactString,
    pub abi_type: AbiType,
    pub width: u64,
}

impl EventField {
    pub fn new(tag: &str, width: u64) -> Self {
        Self {
            tag: tag.into(),
            abi_type: AbiType::from_tag(tag),
            width,
        }
    }
}

/// Event records dump of one kernel launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsHeader {
    pub event_name: CompactString,
    /// Stride between consecutive records.
    pub event_width: u64,
    pub fields: Vec<EventField>,
    /// Number of producers. The offset table holds one more entry.
    pub offset_table_length: u64,
    /// Cumulative event counts per producer. Filled in by the index builder.
    pub offset_table: Vec<u64>,
    /// File offset immediately after the header line.
    pub header_offset: u64,
    /// Counters header of the same launch. Resolved by the index builder.
    pub counters: Option<Arc<CountersHeader>>,
    /// Device clock value of the first record, for wave state events.
    pub first_stamp: Option<u64>,
    pub raw_header: String,
}

impl EventsHeader {
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Byte length of the offset table following the header line.
    pub fn offset_table_len(&self) -> u64 {
        self.offset_table_length.saturating_add(1).saturating_mul(8)
    }

    /// File offset of the first event record.
    pub fn data_offset(&self) -> u64 {
        self.header_offset.saturating_add(self.offset_table_len())
    }

    /// Number of producers (threads or waves) that emitted events.
    ///
    /// The table holds cumulative record counts, so `[0, 3]` is one
    /// producer owning three records.
    pub fn parallelism(&self) -> u64 {
        self.offset_table.len().saturating_sub(1) as u64
    }

    /// Total number of event records in this segment.
    pub fn event_count(&self) -> u64 {
        self.offset_table.last().copied().unwrap_or(0)
    }

    /// Producer owning the record at `byte_offset`.
    ///
    /// Producer `p` owns the record slots `offset_table[p]..offset_table[p + 1]`.
    /// Returns `None` when the offset does not fall on a record of this
    /// segment.
    pub fn id_of(&self, byte_offset: u64) -> Option<u64> {
        let data_offset = self.data_offset();
        if byte_offset < data_offset || self.event_width == 0 {
            return None;
        }
        let slot = (byte_offset - data_offset) / self.event_width;
        let upper = self.offset_table.partition_point(|&start| start <= slot);
        if upper == 0 || upper >= self.offset_table.len() {
            return None;
        }
        Some(upper as u64 - 1)
    }

    /// Launch configuration of the associated counters header.
    pub fn configuration(&self) -> Result<&KernelConfiguration, TraceError> {
        let counters = self
            .counters
            .as_deref()
            .ok_or_else(|| TraceError::MissingConfiguration(self.event_name.clone()))?;
        counters
            .configuration
            .as_ref()
            .ok_or_else(|| TraceError::MissingConfiguration(counters.kernel_name.clone()))
    }

    /// Whether there is one producer per thread (as opposed to per wave).
    pub fn is_thread(&self) -> Result<bool, TraceError> {
        let geometry = &self.configuration()?.geometry;
        Ok(is_thread_indexed(self.parallelism(), geometry))
    }

    /// Block and lane of the producer of the record at `byte_offset`.
    pub fn geometry_of(&self, byte_offset: u64) -> Result<Option<ProducerCoordinates>, TraceError> {
        let geometry = &self.configuration()?.geometry;
        let thread_indexed = is_thread_indexed(self.parallelism(), geometry);
        Ok(self
            .id_of(byte_offset)
            .and_then(|id| resolve_producer_index(id, geometry, WAVE_SIZE, thread_indexed)))
    }

    /// Linear producer id from block and lane coordinates.
    pub fn producer_id_from_geometry(&self, coords: &ProducerCoordinates) -> Result<u64, TraceError> {
        let geometry = &self.configuration()?.geometry;
        Ok(linear_producer_id(coords, geometry, WAVE_SIZE))
    }

    /// Host time, in nanoseconds, of a device `s_memrealtime` value.
    ///
    /// Anchored on the end of the counters interval of the same launch.
    pub fn timestamp_of(&self, stamp: u64) -> u64 {
        let base = self.counters.as_ref().map_or(0, |c| c.interval_end);
        match self.first_stamp {
            Some(first) => memrealtime_to_nanos(stamp, first, base),
            None => base,
        }
    }
}

impl HeaderKind {
    /// Parse a header line (without newline). `header_offset` is the file
    /// offset right after that line's newline.
    pub fn parse(line: &[u8], header_offset: u64) -> Result<Self, HeaderParseError> {
        let text = line.to_str().map_err(|_| HeaderParseError::NotUtf8)?;
        let tokens: Tokens<'_> = text.split(',').collect();
        match tokens[0] {
            COUNTERS_MARKER => Ok(Self::Counters(parse_counters(text, &tokens)?)),
            EVENTS_MARKER => Ok(Self::Events(parse_events(text, &tokens, header_offset)?)),
            MANAGED_MARKER => {
                if tokens.len() != 1 {
                    return Err(HeaderParseError::WrongTokenCount {
                        kind: "managed",
                        count: tokens.len(),
                    });
                }
                Ok(Self::Managed)
            }
            other => Ok(Self::Unrecognized(other.into())),
        }
    }

    /// Marker name of this header kind, as found in the file.
    pub fn marker(&self) -> &str {
        match self {
            Self::Counters(_) => COUNTERS_MARKER,
            Self::Events(_) => EVENTS_MARKER,
            Self::Managed => MANAGED_MARKER,
            Self::Unrecognized(marker) => marker,
        }
    }
}

fn parse_number<T: FromStr>(tokens: &[&str], index: usize) -> Result<T, HeaderParseError> {
    tokens[index]
        .parse()
        .map_err(|_| HeaderParseError::MalformedNumericToken {
            index,
            token: tokens[index].into(),
        })
}

fn parse_counters(text: &str, tokens: &[&str]) -> Result<CountersHeader, HeaderParseError> {
    if tokens.len() != COUNTERS_LEGACY_TOKENS && tokens.len() != COUNTERS_COMPACT_TOKENS {
        return Err(HeaderParseError::WrongTokenCount {
            kind: "counters",
            count: tokens.len(),
        });
    }
    let kernel_name = tokens[1];
    let counter_width: u16 = parse_number(tokens, 6)?;
    if !(1..=8).contains(&counter_width) {
        return Err(HeaderParseError::MalformedNumericToken {
            index: 6,
            token: tokens[6].into(),
        });
    }
    let configuration = if tokens.len() == COUNTERS_COMPACT_TOKENS {
        Some(KernelConfiguration::from_tokens(
            kernel_name,
            &tokens[COUNTERS_LEGACY_TOKENS..],
        )?)
    } else {
        None
    };
    Ok(CountersHeader {
        kernel_name: kernel_name.into(),
        counter_count: parse_number(tokens, 2)?,
        capture_stamp: parse_number(tokens, 3)?,
        interval_begin: parse_number(tokens, 4)?,
        interval_end: parse_number(tokens, 5)?,
        counter_width,
        configuration,
        raw_header: text.to_owned(),
    })
}

fn parse_events(
    text: &str,
    tokens: &[&str],
    header_offset: u64,
) -> Result<EventsHeader, HeaderParseError> {
    if tokens.get(4) != Some(&BEGIN_FIELDS_MARKER) {
        return Err(HeaderParseError::MissingFieldMarker);
    }
    if tokens.len() < EVENTS_MIN_TOKENS {
        return Err(HeaderParseError::WrongTokenCount {
            kind: "events",
            count: tokens.len(),
        });
    }
    let field_tokens = &tokens[5..];
    let pairs = field_tokens.chunks_exact(2);
    if let [dangling] = pairs.remainder() {
        return Err(HeaderParseError::DanglingFieldToken((*dangling).into()));
    }
    let fields = pairs
        .enumerate()
        .map(|(i, pair)| {
            parse_number(tokens, 6 + 2 * i).map(|width| EventField::new(pair[0], width))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(EventsHeader {
        event_name: tokens[3].into(),
        event_width: parse_number(tokens, 1)?,
        fields,
        offset_table_length: parse_number(tokens, 2)?,
        offset_table: Vec::new(),
        header_offset,
        counters: None,
        first_stamp: None,
        raw_header: text.to_owned(),
    })
}
