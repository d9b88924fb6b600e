//! High-level facade crate for the `calib-frames-*` workspace.
//!
//! This crate provides:
//! - re-exports of the underlying crates
//! - [`StartupConfig`], the JSON startup configuration, and its validation
//! - [`CalibrationService`], which wires detection intake, pose selection,
//!   offset composition and the transform registry together
//! - the line-oriented [`protocol`] spoken by the `calib-frames` binary
//!
//! ## Quickstart
//!
//! ```
//! use calib_frames::{CalibrationService, RawDetection, StartupConfig};
//! use calib_frames::core::{ManualClock, Timestamp};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StartupConfig::default().validate()?;
//! let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
//! let service = CalibrationService::new(config, clock)?;
//!
//! service.ingest_detection(RawDetection {
//!     target_id: Some("object".into()),
//!     position: [0.0, 0.0, 1.2],
//!     orientation: [0.0, 0.0, 0.0, 1.0],
//!     frame_id: "camera".into(),
//!     stamp: Timestamp::from_millis(990),
//!     valid: true,
//! })?;
//!
//! let batch = service.snapshot();
//! assert_eq!(batch.transforms.len(), 1);
//! assert_eq!(batch.transforms[0].child_frame(), "WAIST");
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `calib_frames::core`: transforms, timestamps, clocks, logging.
//! - `calib_frames::pose`: detection listener, selector, mounting offsets.
//! - `calib_frames::registry`: transform registry, frame lookups, broadcaster.

pub use calib_frames_core as core;
pub use calib_frames_pose as pose;
pub use calib_frames_registry as registry;

pub use calib_frames_core::{FrameTransform, Timestamp};
pub use calib_frames_pose::{Mounting, RawDetection, SelectionPolicy};
pub use calib_frames_registry::{TransformBatch, TransformRegistry};

mod config;
pub mod protocol;
mod service;

pub use config::{
    ConfigError, ConfigIoError, SelectionMode, StartupConfig, StaticTransformConfig,
    ValidatedConfig,
};
pub use service::{CalibrationService, JsonLinesWriter};
