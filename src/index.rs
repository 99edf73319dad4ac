//! Rank index of a trace: maps every event rank to its file offset and the
//! header needed to decode it.
//!
//! Building the index is a single pass over the file, since the length of a
//! segment is only known once its header has been parsed.

use crate::codec;
use crate::error::HeaderParseError;
use crate::error::Result;
use crate::error::TraceError;
use crate::event::EventKind;
use crate::geometry::KernelConfiguration;
use crate::header::CountersHeader;
use crate::header::EventsHeader;
use crate::header::HeaderKind;
use crate::source::ByteSource;
use std::io::Read;
use std::io::Seek;
use std::sync::Arc;

/// Header a rank is decoded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceHeader {
    Counters(Arc<CountersHeader>),
    Events(Arc<EventsHeader>),
}

/// Where a rank lives in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLocation {
    pub byte_offset: u64,
    pub header: TraceHeader,
}

/// A run of consecutive ranks sharing one header.
#[derive(Debug, Clone)]
struct Segment {
    first_rank: u64,
    offset: u64,
    stride: u64,
    count: u64,
    header: TraceHeader,
}

impl Segment {
    fn location(&self, rank: u64) -> TraceLocation {
        TraceLocation {
            byte_offset: self.offset + (rank - self.first_rank) * self.stride,
            header: self.header.clone(),
        }
    }
}

/// Dense rank index of a trace. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct TraceIndex {
    segments: Vec<Segment>,
    rank_count: u64,
}

impl TraceIndex {
    /// Scan the whole trace from its first line.
    ///
    /// `side_config` is attached to counters headers that do not embed their
    /// own configuration. A failure anywhere discards the partial index.
    pub fn build<R: Read + Seek>(
        source: &mut ByteSource<R>,
        side_config: Option<&KernelConfiguration>,
    ) -> Result<Self> {
        source.seek(0)?;
        let first_line = source.read_line()?;
        let header_offset = source.position();
        let mut index = Self::default();
        match HeaderKind::parse(&first_line, header_offset)? {
            HeaderKind::Counters(header) => {
                let header = with_side_config(header, side_config);
                let end = header.segment_len();
                if end > source.len() {
                    return Err(TraceError::Overshoot {
                        offset: 0,
                        file_size: source.len(),
                    });
                }
                if end < source.len() {
                    log::warn!(
                        "{} trailing bytes after counters of kernel {}",
                        source.len() - end,
                        header.kernel_name
                    );
                }
                index.push(0, 0, 1, TraceHeader::Counters(Arc::new(header)))?;
            }
            HeaderKind::Managed => index.scan_managed(source, side_config, header_offset)?,
            HeaderKind::Events(_) => {
                return Err(TraceError::UnrecognizedHeader {
                    offset: 0,
                    marker: crate::header::EVENTS_MARKER.into(),
                });
            }
            HeaderKind::Unrecognized(marker) => {
                return Err(HeaderParseError::UnrecognizedMarker(marker).into());
            }
        }
        log::debug!(
            "Indexed {} ranks in {} segments",
            index.rank_count,
            index.segments.len()
        );
        Ok(index)
    }

    fn scan_managed<R: Read + Seek>(
        &mut self,
        source: &mut ByteSource<R>,
        side_config: Option<&KernelConfiguration>,
        start: u64,
    ) -> Result<()> {
        let file_size = source.len();
        let mut offset = start;
        let mut last_counters: Option<Arc<CountersHeader>> = None;

        while offset < file_size {
            source.seek(offset)?;
            let line = source.read_line()?;
            let header_offset = source.position();
            let next = match HeaderKind::parse(&line, header_offset)? {
                HeaderKind::Counters(header) => {
                    let header = Arc::new(with_side_config(header, side_config));
                    log::debug!(
                        "Counters of kernel {} at offset {offset}",
                        header.kernel_name
                    );
                    let next = offset.saturating_add(header.segment_len());
                    self.push(offset, 0, 1, TraceHeader::Counters(Arc::clone(&header)))?;
                    last_counters = Some(header);
                    next
                }
                HeaderKind::Events(mut header) => {
                    read_offset_table(source, &mut header)?;
                    header.counters.clone_from(&last_counters);
                    if header.counters.is_none() {
                        log::warn!(
                            "Events {} at offset {offset} have no counters header",
                            header.event_name
                        );
                    }
                    if !EventKind::is_known_name(&header.event_name) {
                        log::warn!(
                            "Unknown event name {}, decoding as generic events",
                            header.event_name
                        );
                    }
                    let data_offset = header.data_offset();
                    let count = header.event_count();
                    // Zero-width records would let the table claim any count.
                    if count > 0 && header.event_width == 0 {
                        return Err(TraceError::Overshoot { offset, file_size });
                    }
                    let end = count
                        .checked_mul(header.event_width)
                        .and_then(|len| len.checked_add(data_offset))
                        .ok_or(TraceError::Overshoot { offset, file_size })?;
                    if end > file_size {
                        return Err(TraceError::Overshoot { offset, file_size });
                    }
                    if count > 0 && EventKind::has_stamp(&header) {
                        source.seek(data_offset)?;
                        let stamp = source.read_bytes(header.fields[0].width)?;
                        header.first_stamp = Some(codec::accumulate(header.fields[0].width, &stamp));
                    }
                    log::debug!(
                        "{count} {} events from {} producers at offset {offset}",
                        header.event_name,
                        header.parallelism()
                    );
                    let stride = header.event_width;
                    self.push(data_offset, stride, count, TraceHeader::Events(Arc::new(header)))?;
                    end
                }
                HeaderKind::Managed => {
                    return Err(TraceError::UnrecognizedHeader {
                        offset,
                        marker: crate::header::MANAGED_MARKER.into(),
                    });
                }
                HeaderKind::Unrecognized(marker) => {
                    return Err(TraceError::UnrecognizedHeader { offset, marker });
                }
            };
            if next > file_size {
                return Err(TraceError::Overshoot { offset, file_size });
            }
            // Every segment spans at least its header line.
            debug_assert!(next > offset);
            offset = next;
        }
        Ok(())
    }

    fn push(&mut self, offset: u64, stride: u64, count: u64, header: TraceHeader) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let rank_count = self
            .rank_count
            .checked_add(count)
            .ok_or(TraceError::Overshoot {
                offset,
                file_size: u64::MAX,
            })?;
        self.segments.push(Segment {
            first_rank: self.rank_count,
            offset,
            stride,
            count,
            header,
        });
        self.rank_count = rank_count;
        Ok(())
    }

    /// Number of ranks. Ranks are `0..rank_count()`.
    pub fn rank_count(&self) -> u64 {
        self.rank_count
    }

    pub fn is_empty(&self) -> bool {
        self.rank_count == 0
    }

    pub fn location(&self, rank: u64) -> Option<TraceLocation> {
        if rank >= self.rank_count {
            return None;
        }
        let idx = self
            .segments
            .partition_point(|segment| segment.first_rank <= rank)
            .checked_sub(1)?;
        Some(self.segments[idx].location(rank))
    }

    /// All locations, in rank order.
    pub fn iter(&self) -> impl Iterator<Item = TraceLocation> + '_ {
        self.segments
            .iter()
            .flat_map(|segment| {
                (segment.first_rank..segment.first_rank + segment.count)
                    .map(move |rank| segment.location(rank))
            })
    }
}

fn with_side_config(
    mut header: CountersHeader,
    side_config: Option<&KernelConfiguration>,
) -> CountersHeader {
    if header.configuration.is_none() {
        header.configuration = side_config.cloned();
    }
    header
}

/// Read the offset table right after an events header line.
fn read_offset_table<R: Read + Seek>(
    source: &mut ByteSource<R>,
    header: &mut EventsHeader,
) -> Result<()> {
    let entries = header.offset_table_length.saturating_add(1);
    let available = source.remaining_in_file(header.header_offset);
    if available / 8 < entries {
        return Err(TraceError::TruncatedTrace {
            offset: header.header_offset,
            wanted: entries.saturating_mul(8),
            available,
        });
    }
    source.seek(header.header_offset)?;
    let mut table = Vec::with_capacity(entries as usize);
    for _ in 0..entries {
        table.push(source.read_u64_le()?);
    }
    if !table.is_sorted() {
        return Err(TraceError::UnsortedOffsetTable {
            offset: header.header_offset,
        });
    }
    header.offset_table = table;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::TraceBuilder;
    use crate::test_util::wave_state_record;

    #[test]
    fn test_single_kernel() {
        let mut src = TraceBuilder::single()
            .counters("hiptrace_counters,k,4,0,0,0,1", &[1, 2, 3, 4])
            .source(8);
        let index = TraceIndex::build(&mut src, None).unwrap();
        assert_eq!(index.rank_count(), 1);
        let location = index.location(0).unwrap();
        assert_eq!(location.byte_offset, 0);
        let TraceHeader::Counters(header) = location.header else {
            panic!("Expected counters");
        };
        assert_eq!(header.counter_count, 4);
        assert!(index.location(1).is_none());
    }

    #[test]
    fn test_single_kernel_short_payload() {
        let mut src = TraceBuilder::single()
            .counters("hiptrace_counters,k,4,0,0,0,2", &[1, 2, 3, 4])
            .source(8);
        assert!(matches!(
            TraceIndex::build(&mut src, None),
            Err(TraceError::Overshoot { offset: 0, .. })
        ));
    }

    #[test]
    fn test_side_config_applies_to_legacy_headers() {
        let config = KernelConfiguration::from_tokens(
            "k",
            &["kernel_info", "2", "1", "1", "1", "64", "1", "1"],
        )
        .unwrap();
        let mut src = TraceBuilder::single()
            .counters("hiptrace_counters,k,2,0,0,0,1", &[1, 2])
            .source(8);
        let index = TraceIndex::build(&mut src, Some(&config)).unwrap();
        let TraceHeader::Counters(header) = index.location(0).unwrap().header else {
            panic!("Expected counters");
        };
        assert_eq!(header.configuration.as_ref(), Some(&config));
    }

    #[test]
    fn test_managed_trace() {
        let builder = TraceBuilder::managed();
        let counters_offset = builder.offset();
        let builder = builder.counters(
            "hiptrace_counters,k,2,0,0,0,4,kernel_info,2,1,1,1,3,1,1",
            &[0; 8],
        );
        let events_offset = builder.offset();
        let events_line = "hiptrace_events,4,3,hip::Event,begin_fields,j,4";
        let records: Vec<u8> = [7u32, 8, 9].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut src = builder
            .events(events_line, &[0, 1, 2, 3], &records)
            .source(16);

        let index = TraceIndex::build(&mut src, None).unwrap();
        assert_eq!(index.rank_count(), 4);

        let counters = index.location(0).unwrap();
        assert_eq!(counters.byte_offset, counters_offset);
        let TraceHeader::Counters(counters_header) = counters.header else {
            panic!("Expected counters");
        };

        let data_offset = events_offset + events_line.len() as u64 + 1 + 4 * 8;
        for producer in 0..3u64 {
            let location = index.location(1 + producer).unwrap();
            assert_eq!(location.byte_offset, data_offset + producer * 4);
            let TraceHeader::Events(header) = location.header else {
                panic!("Expected events");
            };
            assert_eq!(header.offset_table, vec![0, 1, 2, 3]);
            assert_eq!(header.counters.as_ref(), Some(&counters_header));
            assert_eq!(header.id_of(location.byte_offset), Some(producer));
        }
        assert_eq!(index.iter().count(), 4);
    }

    #[test]
    fn test_one_producer_many_records() {
        let records: Vec<u8> = [7u32, 8, 9].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut src = TraceBuilder::managed()
            .counters("hiptrace_counters,k,1,0,0,0,1", &[5])
            .events("hiptrace_events,4,1,hip::Event,begin_fields,j,4", &[0, 3], &records)
            .source(16);
        let index = TraceIndex::build(&mut src, None).unwrap();
        assert_eq!(index.rank_count(), 4);
        for location in index.iter().skip(1) {
            let TraceHeader::Events(header) = &location.header else {
                panic!("Expected events");
            };
            assert_eq!(header.parallelism(), 1);
            assert_eq!(header.id_of(location.byte_offset), Some(0));
        }
    }

    #[test]
    fn test_multiple_launches_share_nothing() {
        let mut src = TraceBuilder::managed()
            .counters("hiptrace_counters,a,1,0,0,0,1", &[1])
            .events("hiptrace_events,4,1,hip::Event,begin_fields,j,4", &[0, 1], &[1, 0, 0, 0])
            .counters("hiptrace_counters,b,1,0,0,0,1", &[2])
            .events("hiptrace_events,4,1,hip::Event,begin_fields,j,4", &[0, 2], &[2, 0, 0, 0, 3, 0, 0, 0])
            .source(5);
        let index = TraceIndex::build(&mut src, None).unwrap();
        assert_eq!(index.rank_count(), 5);
        let names: Vec<_> = index
            .iter()
            .map(|location| match location.header {
                TraceHeader::Counters(h) => h.kernel_name.clone(),
                TraceHeader::Events(h) => h.counters.as_ref().unwrap().kernel_name.clone(),
            })
            .collect();
        assert_eq!(names, vec!["a", "a", "b", "b", "b"]);
    }

    #[test]
    fn test_wave_state_first_stamp() {
        let mut records = wave_state_record(1000, u64::MAX, 0, 1);
        records.extend(wave_state_record(1025, 1, 0, 2));
        let mut src = TraceBuilder::managed()
            .counters("hiptrace_counters,k,1,0,0,500,1,kernel_info,1,1,1,1,64,1,1", &[5])
            .events(
                "hiptrace_events,24,1,hip::WaveState,begin_fields,y,8,y,8,j,4,j,4",
                &[0, 2],
                &records,
            )
            .source(64);
        let index = TraceIndex::build(&mut src, None).unwrap();
        let TraceHeader::Events(header) = index.location(2).unwrap().header else {
            panic!("Expected events");
        };
        assert_eq!(header.first_stamp, Some(1000));
        assert_eq!(header.timestamp_of(1025), 1500);
    }

    #[test]
    fn test_empty_events_segment() {
        let mut src = TraceBuilder::managed()
            .counters("hiptrace_counters,k,1,0,0,0,1", &[5])
            .events("hiptrace_events,4,2,hip::Event,begin_fields,j,4", &[0, 0, 0], &[])
            .source(16);
        let index = TraceIndex::build(&mut src, None).unwrap();
        assert_eq!(index.rank_count(), 1);
    }

    #[test]
    fn test_managed_errors() {
        let mut src = TraceBuilder::managed()
            .counters("hiptrace_counters,k,1,0,0,0,1", &[5])
            .line("garbage,1,2")
            .source(16);
        assert!(matches!(
            TraceIndex::build(&mut src, None),
            Err(TraceError::UnrecognizedHeader { offset: 48, marker }) if marker == "garbage"
        ));

        // Offset table claims more events than the file holds
        let mut src = TraceBuilder::managed()
            .counters("hiptrace_counters,k,1,0,0,0,1", &[5])
            .events("hiptrace_events,4,1,hip::Event,begin_fields,j,4", &[0, 3], &[0; 8])
            .source(16);
        assert!(matches!(
            TraceIndex::build(&mut src, None),
            Err(TraceError::Overshoot { .. })
        ));

        // Offset table itself is cut short
        let mut src = TraceBuilder::managed()
            .line("hiptrace_events,4,4,hip::Event,begin_fields,j,4")
            .u64s(&[0, 1])
            .source(16);
        assert!(matches!(
            TraceIndex::build(&mut src, None),
            Err(TraceError::TruncatedTrace { wanted: 40, .. })
        ));

        let mut src = TraceBuilder::managed()
            .events("hiptrace_events,4,2,hip::Event,begin_fields,j,4", &[0, 2, 1], &[0; 8])
            .source(16);
        assert!(matches!(
            TraceIndex::build(&mut src, None),
            Err(TraceError::UnsortedOffsetTable { .. })
        ));

        let mut src = TraceBuilder::managed()
            .counters("hiptrace_counters,k,9,0,0,0,1", &[5])
            .source(16);
        assert!(matches!(
            TraceIndex::build(&mut src, None),
            Err(TraceError::Overshoot { .. })
        ));
    }

    #[test]
    fn test_zero_width_records() {
        let mut src = TraceBuilder::managed()
            .counters("hiptrace_counters,k,1,0,0,0,1", &[5])
            .events("hiptrace_events,0,1,hip::Event,begin_fields,j,4", &[0, u64::MAX], &[])
            .source(16);
        assert!(matches!(
            TraceIndex::build(&mut src, None),
            Err(TraceError::Overshoot { offset: 48, .. })
        ));

        // An empty table is fine whatever the width
        let mut src = TraceBuilder::managed()
            .counters("hiptrace_counters,k,1,0,0,0,1", &[5])
            .events("hiptrace_events,0,1,hip::Event,begin_fields,j,4", &[0, 0], &[])
            .source(16);
        assert_eq!(TraceIndex::build(&mut src, None).unwrap().rank_count(), 1);
    }

    #[test]
    fn test_rank_count_overflow() {
        let mut index = TraceIndex::default();
        let header = TraceHeader::Counters(Arc::new(CountersHeader {
            kernel_name: "k".into(),
            counter_count: 0,
            capture_stamp: 0,
            interval_begin: 0,
            interval_end: 0,
            counter_width: 1,
            configuration: None,
            raw_header: String::new(),
        }));
        index.push(0, 1, u64::MAX, header.clone()).unwrap();
        assert!(matches!(
            index.push(10, 1, 1, header),
            Err(TraceError::Overshoot { offset: 10, .. })
        ));
        assert_eq!(index.rank_count(), u64::MAX);
    }

    #[test]
    fn test_bad_first_line() {
        let mut src = TraceBuilder::single().line("hello,world").source(16);
        assert!(matches!(
            TraceIndex::build(&mut src, None),
            Err(TraceError::HeaderParse(HeaderParseError::UnrecognizedMarker(m))) if m == "hello"
        ));
        let mut src = TraceBuilder::single()
            .events("hiptrace_events,4,0,hip::Event,begin_fields,j,4", &[0], &[])
            .source(16);
        assert!(matches!(
            TraceIndex::build(&mut src, None),
            Err(TraceError::UnrecognizedHeader { offset: 0, .. })
        ));
        let mut src = TraceBuilder::single().source(16);
        assert!(matches!(
            TraceIndex::build(&mut src, None),
            Err(TraceError::TruncatedTrace { .. })
        ));
    }
}
