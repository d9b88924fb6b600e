//! Intake of raw detector output.

use calib_frames_core::{Clock, FrameTransform, Timestamp, TransformError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "tracing")]
use tracing::instrument;

fn default_valid() -> bool {
    true
}

/// A pose estimate as emitted by the external checkerboard detector.
///
/// `position`/`orientation` describe the target in the camera frame
/// `frame_id`; `orientation` is a quaternion in `[x, y, z, w]` order and
/// `stamp` is the detector's own capture time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub target_id: Option<String>,
    pub position: [f64; 3],
    pub orientation: [f64; 4],
    #[serde(default)]
    pub frame_id: String,
    #[serde(default)]
    pub stamp: Timestamp,
    #[serde(default = "default_valid")]
    pub valid: bool,
}

/// A validated detection, tagged with the time it reached us.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionCandidate {
    pub target_id: String,
    /// `camera_frame → target_frame`, stamped with the detector's stamp.
    pub pose: FrameTransform,
    pub arrival_time: Timestamp,
    pub valid: bool,
}

/// Why a raw detection was not forwarded.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("detection has no target id")]
    MissingTargetId,
    #[error("detection frame id is empty, equals the target id, or is not the expected camera frame")]
    BadFrame,
    #[error("detection contains a non-finite component")]
    NonFinite,
    #[error("detection rotation is not a unit quaternion")]
    NonUnitRotation,
    #[error("detection could not be decoded")]
    Malformed,
}

impl From<TransformError> for RejectReason {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::NonFinite(_) => RejectReason::NonFinite,
            TransformError::NonUnitRotation { .. } => RejectReason::NonUnitRotation,
            TransformError::SameFrame(_)
            | TransformError::EmptyFrame
            | TransformError::FrameMismatch { .. } => RejectReason::BadFrame,
        }
    }
}

/// Diagnostic counters for the listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    accepted: AtomicU64,
    missing_target_id: AtomicU64,
    bad_frame: AtomicU64,
    non_finite: AtomicU64,
    non_unit_rotation: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`ListenerStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerStatsSnapshot {
    pub accepted: u64,
    pub missing_target_id: u64,
    pub bad_frame: u64,
    pub non_finite: u64,
    pub non_unit_rotation: u64,
    pub malformed: u64,
}

impl ListenerStatsSnapshot {
    pub fn rejected(&self) -> u64 {
        self.missing_target_id
            + self.bad_frame
            + self.non_finite
            + self.non_unit_rotation
            + self.malformed
    }
}

impl ListenerStats {
    fn record(&self, outcome: Result<(), RejectReason>) {
        let counter = match outcome {
            Ok(()) => &self.accepted,
            Err(RejectReason::MissingTargetId) => &self.missing_target_id,
            Err(RejectReason::BadFrame) => &self.bad_frame,
            Err(RejectReason::NonFinite) => &self.non_finite,
            Err(RejectReason::NonUnitRotation) => &self.non_unit_rotation,
            Err(RejectReason::Malformed) => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ListenerStatsSnapshot {
        ListenerStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            missing_target_id: self.missing_target_id.load(Ordering::Relaxed),
            bad_frame: self.bad_frame.load(Ordering::Relaxed),
            non_finite: self.non_finite.load(Ordering::Relaxed),
            non_unit_rotation: self.non_unit_rotation.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Validates raw detections and stamps them with their arrival time.
///
/// The listener keeps no history; rejected detections only bump a counter.
pub struct DetectionListener<C> {
    clock: C,
    camera_frame: Option<String>,
    stats: ListenerStats,
}

impl<C: Clock> DetectionListener<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            camera_frame: None,
            stats: ListenerStats::default(),
        }
    }

    /// Only accept detections expressed in `camera_frame`.
    pub fn with_camera_frame(mut self, camera_frame: impl Into<String>) -> Self {
        self.camera_frame = Some(camera_frame.into());
        self
    }

    pub fn stats(&self) -> ListenerStatsSnapshot {
        self.stats.snapshot()
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, raw), fields(target = ?raw.target_id))
    )]
    pub fn on_detection(&self, raw: RawDetection) -> Result<DetectionCandidate, RejectReason> {
        let arrival_time = self.clock.now();
        let outcome = self.validate(raw, arrival_time);
        self.stats.record(outcome.as_ref().map(|_| ()).map_err(|r| *r));
        if let Err(reason) = &outcome {
            debug!("dropping detection: {reason}");
        }
        outcome
    }

    /// Count a detection message that could not be decoded at all.
    pub fn on_malformed(&self, err: &dyn std::fmt::Display) {
        self.stats.record(Err(RejectReason::Malformed));
        debug!("dropping malformed detection: {err}");
    }

    fn validate(
        &self,
        raw: RawDetection,
        arrival_time: Timestamp,
    ) -> Result<DetectionCandidate, RejectReason> {
        let target_id = match raw.target_id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(RejectReason::MissingTargetId),
        };
        if let Some(expected) = &self.camera_frame {
            if &raw.frame_id != expected {
                return Err(RejectReason::BadFrame);
            }
        }
        let pose = FrameTransform::from_components(
            raw.frame_id,
            target_id.clone(),
            raw.position,
            raw.orientation,
            raw.stamp,
        )?;
        Ok(DetectionCandidate {
            target_id,
            pose,
            arrival_time,
            valid: raw.valid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calib_frames_core::ManualClock;

    fn raw(target: Option<&str>) -> RawDetection {
        RawDetection {
            target_id: target.map(str::to_string),
            position: [0.1, 0.2, 1.5],
            orientation: [0.0, 0.0, 0.0, 1.0],
            frame_id: "camera".to_string(),
            stamp: Timestamp::from_millis(40),
            valid: true,
        }
    }

    fn listener() -> DetectionListener<ManualClock> {
        DetectionListener::new(ManualClock::new(Timestamp::from_millis(50)))
    }

    #[test]
    fn accepted_detection_is_tagged_with_arrival_time() {
        let listener = listener();
        let c = listener.on_detection(raw(Some("object"))).expect("accepted");
        assert_eq!(c.target_id, "object");
        assert_eq!(c.arrival_time, Timestamp::from_millis(50));
        assert_eq!(c.pose.stamp(), Timestamp::from_millis(40));
        assert_eq!(c.pose.parent_frame(), "camera");
        assert_eq!(c.pose.child_frame(), "object");
        assert_eq!(listener.stats().accepted, 1);
    }

    #[test]
    fn missing_or_empty_target_id_is_rejected() {
        let listener = listener();
        assert_eq!(
            listener.on_detection(raw(None)).unwrap_err(),
            RejectReason::MissingTargetId
        );
        assert_eq!(
            listener.on_detection(raw(Some(""))).unwrap_err(),
            RejectReason::MissingTargetId
        );
        assert_eq!(listener.stats().missing_target_id, 2);
    }

    #[test]
    fn non_finite_and_non_unit_components_are_rejected() {
        let listener = listener();

        let mut r = raw(Some("object"));
        r.position[1] = f64::INFINITY;
        assert_eq!(listener.on_detection(r).unwrap_err(), RejectReason::NonFinite);

        let mut r = raw(Some("object"));
        r.orientation[0] = f64::NAN;
        assert_eq!(listener.on_detection(r).unwrap_err(), RejectReason::NonFinite);

        let mut r = raw(Some("object"));
        r.orientation = [0.0, 0.0, 0.0, 0.9];
        assert_eq!(
            listener.on_detection(r).unwrap_err(),
            RejectReason::NonUnitRotation
        );

        let stats = listener.stats();
        assert_eq!(stats.non_finite, 2);
        assert_eq!(stats.non_unit_rotation, 1);
        assert_eq!(stats.rejected(), 3);
        assert_eq!(stats.accepted, 0);
    }

    #[test]
    fn frame_checks() {
        let listener = listener().with_camera_frame("camera");

        let mut r = raw(Some("object"));
        r.frame_id = "other_camera".into();
        assert_eq!(listener.on_detection(r).unwrap_err(), RejectReason::BadFrame);

        let r = raw(Some("camera"));
        assert_eq!(listener.on_detection(r).unwrap_err(), RejectReason::BadFrame);
    }

    #[test]
    fn malformed_detections_are_counted_as_rejected() {
        let listener = listener();
        let err = serde_json::from_str::<RawDetection>(r#"{"target_id":"object"}"#)
            .expect_err("position is required");
        listener.on_malformed(&err);
        let stats = listener.stats();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.rejected(), 1);
        assert_eq!(stats.accepted, 0);
    }

    #[test]
    fn invalid_flag_is_forwarded() {
        let listener = listener();
        let mut r = raw(Some("object"));
        r.valid = false;
        let c = listener.on_detection(r).expect("structurally fine");
        assert!(!c.valid);
    }

    #[test]
    fn wire_defaults() {
        let json = r#"{"target_id":"object","position":[0,0,1],"orientation":[0,0,0,1],"frame_id":"camera"}"#;
        let r: RawDetection = serde_json::from_str(json).expect("parse");
        assert!(r.valid);
        assert_eq!(r.stamp, Timestamp::ZERO);
    }
}
