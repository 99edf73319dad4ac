//! Kernel launch geometry and the per-launch kernel configuration.

use crate::error::ConfigParseError;
use crate::error::TraceError;
use crate::source::check_file;
use compact_str::CompactString;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use std::path::Path;

/// Number of lanes in a GCN wavefront.
pub const WAVE_SIZE: u32 = 64;

/// First token of the compact configuration form.
pub const KERNEL_INFO_MARKER: &str = "kernel_info";

/// Number of tokens in the compact configuration form, marker included.
pub const KERNEL_INFO_TOKENS: usize = 8;

/// A 3D extent, as in HIP's `dim3`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn total(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }

    fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub threads: Dim3,
    pub blocks: Dim3,
}

impl Geometry {
    /// Number of waves needed to run one block.
    pub fn waves_per_block(&self, wave_size: u32) -> u64 {
        self.threads.total().div_ceil(u64::from(wave_size.max(1)))
    }

    /// Total number of threads in the launch.
    pub fn total_threads(&self) -> u64 {
        self.threads.total() * self.blocks.total()
    }

    fn validate(self) -> Result<Self, ConfigParseError> {
        if self.threads.is_empty() || self.blocks.is_empty() {
            return Err(ConfigParseError::ZeroDimension);
        }
        Ok(self)
    }
}

/// Where a producer sits in the launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProducerCoordinates {
    /// One producer per thread. `thread` is the thread id within the block.
    Thread { block: u64, thread: u64 },
    /// One producer per wave. `wave` is the wave id within the block.
    Wave { block: u64, wave: u64 },
}

impl ProducerCoordinates {
    pub fn block(&self) -> u64 {
        match self {
            Self::Thread { block, .. } | Self::Wave { block, .. } => *block,
        }
    }

    /// Thread or wave id within the block.
    pub fn lane(&self) -> u64 {
        match self {
            Self::Thread { thread: lane, .. } | Self::Wave { wave: lane, .. } => *lane,
        }
    }

    pub fn is_thread(&self) -> bool {
        matches!(self, Self::Thread { .. })
    }
}

/// Whether `producer_count` producers means one producer per thread.
pub fn is_thread_indexed(producer_count: u64, geometry: &Geometry) -> bool {
    producer_count == geometry.total_threads()
}

/// Split a linear producer id into block and lane coordinates.
///
/// Returns `None` for a degenerate geometry (no threads in a block).
pub fn resolve_producer_index(
    linear_id: u64,
    geometry: &Geometry,
    wave_size: u32,
    thread_indexed: bool,
) -> Option<ProducerCoordinates> {
    if thread_indexed {
        let per_block = geometry.threads.total();
        (per_block != 0).then(|| ProducerCoordinates::Thread {
            block: linear_id / per_block,
            thread: linear_id % per_block,
        })
    } else {
        let per_block = geometry.waves_per_block(wave_size);
        (per_block != 0).then(|| ProducerCoordinates::Wave {
            block: linear_id / per_block,
            wave: linear_id % per_block,
        })
    }
}

/// Inverse of [`resolve_producer_index`].
pub fn linear_producer_id(coords: &ProducerCoordinates, geometry: &Geometry, wave_size: u32) -> u64 {
    let per_block = match coords {
        ProducerCoordinates::Thread { .. } => geometry.threads.total(),
        ProducerCoordinates::Wave { .. } => geometry.waves_per_block(wave_size),
    };
    coords.block() * per_block + coords.lane()
}

/// Configuration of one kernel launch.
///
/// Serializes to the same JSON shape the instrumentation runtime writes
/// next to the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfiguration {
    pub name: CompactString,
    #[serde(rename = "bblocks")]
    pub basic_block_count: u32,
    pub geometry: Geometry,
}

impl KernelConfiguration {
    pub fn from_json(json: &str) -> Result<Self, ConfigParseError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(ConfigParseError::NotAnObject);
        }
        let config: Self = serde_json::from_value(value)?;
        config.geometry.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigParseError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Load a configuration file written by the runtime.
    pub fn from_path(path: &Path) -> Result<Self, TraceError> {
        check_file(path)?;
        let json = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// Parse the compact form
    /// `kernel_info, bblocks, bx, by, bz, tx, ty, tz` embedded in counters
    /// headers.
    pub fn from_tokens(name: &str, tokens: &[&str]) -> Result<Self, ConfigParseError> {
        if tokens.len() != KERNEL_INFO_TOKENS || tokens[0] != KERNEL_INFO_MARKER {
            return Err(ConfigParseError::WrongTokenCount(tokens.len()));
        }
        let mut numbers = [0u32; KERNEL_INFO_TOKENS - 1];
        for (slot, token) in numbers.iter_mut().zip(&tokens[1..]) {
            *slot = token
                .trim()
                .parse()
                .map_err(|_| ConfigParseError::NonNumericToken((*token).into()))?;
        }
        let [bblocks, bx, by, bz, tx, ty, tz] = numbers;
        let geometry = Geometry {
            threads: Dim3::new(tx, ty, tz),
            blocks: Dim3::new(bx, by, bz),
        }
        .validate()?;
        Ok(Self {
            name: name.into(),
            basic_block_count: bblocks,
            geometry,
        })
    }
}
