//! Decoder for hiptrace files, the binary traces written by instrumented
//! HIP kernels.
//!
//! A trace holds, per kernel launch, a dump of basic block counters and
//! optionally a dump of fixed-size event records. Opening a trace builds a
//! dense index of *ranks*, one per counters dump and one per event record,
//! after which any rank can be decoded independently:
//!
//! ```no_run
//! use hiptrace::HipTrace;
//! use hiptrace::TraceOptions;
//! use std::path::Path;
//!
//! let mut trace = HipTrace::open(Path::new("run.hiptrace"), &TraceOptions::default())?;
//! for rank in 0..trace.rank_count() {
//!     println!("{:?}", trace.decode_event(rank)?);
//! }
//! # Ok::<(), hiptrace::TraceError>(())
//! ```

pub mod codec;
pub mod error;
pub mod event;
pub mod gcn;
pub mod geometry;
pub mod header;
pub mod index;
pub mod report;
pub mod source;
pub mod trace;

#[cfg(test)]
mod test_util;

pub use crate::error::Result;
pub use crate::error::TraceError;
pub use crate::event::DecodedEvent;
pub use crate::event::EventKind;
pub use crate::trace::HipTrace;
pub use crate::trace::TraceOptions;
pub use crate::trace::validate;
