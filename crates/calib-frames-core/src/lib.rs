//! Core types for calibration frame broadcasting.
//!
//! This crate is intentionally small and purely algebraic. It knows about
//! rigid transforms between named frames, timestamps and clocks, and the
//! [`EdgeSource`] seam through which computed edges are merged into a
//! transform registry. It does *not* know about detectors or publishers.

mod clock;
mod edge;
mod logger;
mod time;
mod transform;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use edge::EdgeSource;
pub use time::Timestamp;
pub use transform::{
    compose, invert, FrameTransform, TransformError, TransformMsg, ROTATION_NORM_TOLERANCE,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
