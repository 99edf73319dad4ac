//! Opening a trace file and decoding its ranks.

use crate::error::HeaderParseError;
use crate::error::Result;
use crate::error::TraceError;
use crate::event::DecodedEvent;
use crate::geometry::KernelConfiguration;
use crate::header::EVENTS_MARKER;
use crate::header::HeaderKind;
use crate::index::TraceIndex;
use crate::source::ByteSource;
use crate::source::DEFAULT_CHUNK_SIZE;
use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::path::Path;
use std::path::PathBuf;

/// Options for [`HipTrace::open`].
#[derive(Debug, Clone)]
pub struct TraceOptions {
    /// Kernel configuration (JSON) for counters headers that do not embed
    /// their own.
    pub kernel_config: Option<PathBuf>,
    /// Size of the read window in bytes.
    pub chunk_size: usize,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            kernel_config: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// An open, indexed trace.
#[derive(Debug)]
pub struct HipTrace<R = File> {
    index: TraceIndex,
    source: ByteSource<R>,
}

impl HipTrace<File> {
    pub fn open(path: &Path, options: &TraceOptions) -> Result<Self> {
        let source = ByteSource::open(path, options.chunk_size)?;
        let side_config = options
            .kernel_config
            .as_deref()
            .map(KernelConfiguration::from_path)
            .transpose()?;
        let trace = Self::from_source(source, side_config.as_ref())?;
        log::info!("{}: {} ranks", path.display(), trace.rank_count());
        Ok(trace)
    }
}

impl<R: Read + Seek> HipTrace<R> {
    /// Index an already open byte source.
    pub fn from_source(
        mut source: ByteSource<R>,
        side_config: Option<&KernelConfiguration>,
    ) -> Result<Self> {
        let index = TraceIndex::build(&mut source, side_config)?;
        Ok(Self { index, source })
    }

    pub fn rank_count(&self) -> u64 {
        self.index.rank_count()
    }

    pub fn index(&self) -> &TraceIndex {
        &self.index
    }

    pub fn decode_event(&mut self, rank: u64) -> Result<DecodedEvent> {
        let location = self
            .index
            .location(rank)
            .ok_or(TraceError::RankOutOfRange {
                rank,
                count: self.index.rank_count(),
            })?;
        DecodedEvent::decode(&location, &mut self.source)
    }

    /// Decode every rank in order. Errors are per rank.
    pub fn events(&mut self) -> impl Iterator<Item = (u64, Result<DecodedEvent>)> + '_ {
        let Self { index, source } = self;
        index
            .iter()
            .zip(0..)
            .map(move |(location, rank)| (rank, DecodedEvent::decode(&location, source)))
    }

    /// Release the file. Equivalent to dropping the trace.
    pub fn close(self) {}
}

/// Check that `path` looks like a hiptrace file, without indexing it.
pub fn validate(path: &Path) -> Result<()> {
    let mut source = ByteSource::open(path, DEFAULT_CHUNK_SIZE)?;
    source.seek(0)?;
    let line = source.read_line()?;
    match HeaderKind::parse(&line, source.position())? {
        HeaderKind::Counters(_) | HeaderKind::Managed => Ok(()),
        HeaderKind::Events(_) => Err(TraceError::UnrecognizedHeader {
            offset: 0,
            marker: EVENTS_MARKER.into(),
        }),
        HeaderKind::Unrecognized(marker) => Err(HeaderParseError::UnrecognizedMarker(marker).into()),
    }
}
