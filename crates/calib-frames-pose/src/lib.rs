//! Calibration-target pose handling.
//!
//! Raw detector output flows through three stages:
//! 1. [`DetectionListener`] validates a [`RawDetection`] and tags it with its
//!    arrival time, producing a [`DetectionCandidate`].
//! 2. [`LatestPoseSelector`] keeps, per target id, only the most recent valid
//!    candidate and hands it out while it is fresh.
//! 3. [`OffsetComposer`] chains the live `camera → target` pose with the fixed
//!    mounting offset `target → robot` into the `camera → robot` edge.
//!
//! ```
//! use std::sync::Arc;
//! use calib_frames_core::{Clock, ManualClock, Timestamp};
//! use calib_frames_pose::{
//!     DetectionListener, LatestPoseSelector, Mounting, OffsetComposer, OffsetConfig,
//!     RawDetection, SelectionPolicy,
//! };
//!
//! let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
//! let listener = DetectionListener::new(clock.clone());
//! let selector = Arc::new(LatestPoseSelector::new(SelectionPolicy::default()));
//! let offset = OffsetConfig::new(&Mounting::Horizontal, "object", "WAIST").unwrap();
//! let composer = OffsetComposer::new(selector.clone(), offset, "camera");
//!
//! let raw = RawDetection {
//!     target_id: Some("object".into()),
//!     position: [0.0, 0.0, 1.0],
//!     orientation: [0.0, 0.0, 0.0, 1.0],
//!     frame_id: "camera".into(),
//!     stamp: Timestamp::from_millis(990),
//!     valid: true,
//! };
//! let candidate = listener.on_detection(raw).unwrap();
//! selector.submit(candidate);
//!
//! let robot = composer.compute(clock.now()).unwrap();
//! assert_eq!(robot.parent_frame(), "camera");
//! assert_eq!(robot.child_frame(), "WAIST");
//! assert_eq!(robot.stamp(), Timestamp::from_millis(990));
//! ```

mod composer;
mod listener;
mod offset;
mod selector;

pub use composer::{OffsetComposer, TargetEdge, CALIBRATION_EDGE, TARGET_EDGE};
pub use listener::{
    DetectionCandidate, DetectionListener, ListenerStats, ListenerStatsSnapshot, RawDetection,
    RejectReason,
};
pub use offset::{Mounting, OffsetConfig, OffsetError};
pub use selector::{
    LatestPoseSelector, SelectionPolicy, SubmitOutcome, DEFAULT_FRESHNESS_WINDOW,
    DEFAULT_MAX_TARGETS,
};
