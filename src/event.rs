//! Decoding of a single indexed rank into a [`DecodedEvent`].

use crate::codec;
use crate::codec::PrimitiveValue;
use crate::error::Result;
use crate::gcn::ExecRegister;
use crate::gcn::HardwareIdRegister;
use crate::geometry::KernelConfiguration;
use crate::geometry::ProducerCoordinates;
use crate::header::CountersHeader;
use crate::header::EventsHeader;
use crate::index::TraceHeader;
use crate::index::TraceLocation;
use crate::source::ByteSource;
use compact_str::CompactString;
use serde_derive::Serialize;
use std::io::Read;
use std::io::Seek;

pub const BASIC_EVENT: &str = "hip::Event";
pub const TAGGED_EVENT: &str = "hip::TaggedEvent";
pub const WAVE_STATE_EVENT: &str = "hip::WaveState";

/// Known layouts of event records, selected by the event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Unknown name, or a known name with an unexpected layout.
    Generic,
    /// A basic block was entered.
    Basic { bb: u64 },
    Tagged { bb: u64, tag: u64 },
    /// Wave state snapshot taken when a basic block was entered.
    WaveState {
        stamp: u64,
        exec: ExecRegister,
        hw_id: HardwareIdRegister,
        bb: u64,
    },
}

impl EventKind {
    /// Pick the kind from the event name and the decoded field values.
    pub fn classify(event_name: &str, values: &[&PrimitiveValue]) -> Self {
        let kind = match (event_name, values) {
            (BASIC_EVENT, [bb]) => bb.as_u64().map(|bb| Self::Basic { bb }),
            (TAGGED_EVENT, [bb, tag]) => bb
                .as_u64()
                .zip(tag.as_u64())
                .map(|(bb, tag)| Self::Tagged { bb, tag }),
            (WAVE_STATE_EVENT, [stamp, exec, hw_id, bb]) => wave_state(stamp, exec, hw_id, bb),
            _ => None,
        };
        kind.unwrap_or(Self::Generic)
    }

    pub fn is_known_name(event_name: &str) -> bool {
        matches!(event_name, BASIC_EVENT | TAGGED_EVENT | WAVE_STATE_EVENT)
    }

    /// Whether records of `header` start with a device clock value.
    pub fn has_stamp(header: &EventsHeader) -> bool {
        header.event_name == WAVE_STATE_EVENT
            && header.field_count() == 4
            && header.fields[0].abi_type.is_integer()
    }

    /// Basic block id, for every kind but [`EventKind::Generic`].
    pub fn basic_block(&self) -> Option<u64> {
        match self {
            Self::Generic => None,
            Self::Basic { bb } | Self::Tagged { bb, .. } | Self::WaveState { bb, .. } => Some(*bb),
        }
    }

    pub fn stamp(&self) -> Option<u64> {
        match self {
            Self::WaveState { stamp, .. } => Some(*stamp),
            _ => None,
        }
    }
}

fn wave_state(
    stamp: &PrimitiveValue,
    exec: &PrimitiveValue,
    hw_id: &PrimitiveValue,
    bb: &PrimitiveValue,
) -> Option<EventKind> {
    Some(EventKind::WaveState {
        stamp: stamp.as_u64()?,
        exec: ExecRegister(exec.as_u64()?),
        hw_id: HardwareIdRegister::from(hw_id.as_u64()?),
        bb: bb.as_u64()?,
    })
}

/// One field of an event record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedField {
    /// Demangled C++ type name.
    pub type_name: CompactString,
    pub value: PrimitiveValue,
}

/// The basic block counters of one kernel launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountersEvent {
    pub kernel_name: CompactString,
    pub configuration: Option<KernelConfiguration>,
    pub counters: Vec<u64>,
    pub timestamp_ns: u64,
}

/// One event record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldsEvent {
    pub event_name: CompactString,
    pub fields: Vec<DecodedField>,
    /// Block and lane of the producer, when the launch geometry is known.
    pub producer: Option<ProducerCoordinates>,
    pub producer_id: Option<u64>,
    pub kind: EventKind,
    pub timestamp_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DecodedEvent {
    Counters(CountersEvent),
    Fields(FieldsEvent),
}

impl DecodedEvent {
    /// Decode the rank stored at `location`.
    ///
    /// Only touches `source`, so a failure here does not affect any other
    /// rank.
    pub fn decode<R: Read + Seek>(
        location: &TraceLocation,
        source: &mut ByteSource<R>,
    ) -> Result<Self> {
        match &location.header {
            TraceHeader::Counters(header) => {
                decode_counters(location.byte_offset, header, source).map(Self::Counters)
            }
            TraceHeader::Events(header) => {
                decode_fields(location.byte_offset, header, source).map(Self::Fields)
            }
        }
    }

    pub fn timestamp_ns(&self) -> u64 {
        match self {
            Self::Counters(event) => event.timestamp_ns,
            Self::Fields(event) => event.timestamp_ns,
        }
    }
}

fn decode_counters<R: Read + Seek>(
    offset: u64,
    header: &CountersHeader,
    source: &mut ByteSource<R>,
) -> Result<CountersEvent> {
    source.seek(offset + header.line_len())?;
    let payload = source.read_bytes(header.payload_len())?;
    let width = header.counter_width.max(1);
    let counters = payload
        .chunks_exact(usize::from(width))
        .map(|chunk| codec::accumulate(u64::from(width), chunk))
        .collect();
    Ok(CountersEvent {
        kernel_name: header.kernel_name.clone(),
        configuration: header.configuration.clone(),
        counters,
        timestamp_ns: header.interval_end,
    })
}

fn decode_fields<R: Read + Seek>(
    offset: u64,
    header: &EventsHeader,
    source: &mut ByteSource<R>,
) -> Result<FieldsEvent> {
    source.seek(offset)?;
    let mut fields = Vec::with_capacity(header.field_count());
    for field in &header.fields {
        let bytes = source.read_bytes(field.width)?;
        fields.push(DecodedField {
            type_name: field.abi_type.demangled().into(),
            value: codec::decode_type(&field.abi_type, field.width, &bytes),
        });
    }
    let values: Vec<_> = fields.iter().map(|field| &field.value).collect();
    let kind = EventKind::classify(&header.event_name, &values);

    let producer = match header.geometry_of(offset) {
        Ok(coords) => coords,
        Err(err) => {
            log::debug!("No producer coordinates for record at offset {offset}: {err}");
            None
        }
    };
    let timestamp_ns = match kind.stamp() {
        Some(stamp) => header.timestamp_of(stamp),
        None => header.counters.as_ref().map_or(0, |c| c.interval_end),
    };
    Ok(FieldsEvent {
        event_name: header.event_name.clone(),
        fields,
        producer,
        producer_id: header.id_of(offset),
        kind,
        timestamp_ns,
    })
}
