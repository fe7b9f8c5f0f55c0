//! Trim and synchronize multi-camera recordings for calibration.
//!
//! The core is [`sync::synchronizer::synchronize`], which intersects
//! per-camera frame ranges once each camera's frame offset is removed.
//! [`sync::offset`] and [`sync::calibration`] produce those ranges from a
//! fixed end cutoff or from scanning for a calibration board.

pub mod cli;
pub mod error;
pub mod report;
pub mod sources;
pub mod sync;
pub mod video;

pub use error::SyncError;
pub use sync::types::{FrameRange, SyncResult, TimeRange};
