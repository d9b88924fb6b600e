//! Composition of the live target pose with the mounting offset.

use crate::{LatestPoseSelector, OffsetConfig};
use calib_frames_core::{compose, EdgeSource, FrameTransform, Timestamp};
use log::warn;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Reserved registry name of the composed `camera → robot` edge.
pub const CALIBRATION_EDGE: &str = "calibration";

/// Reserved registry name of the raw `camera → target` edge.
pub const TARGET_EDGE: &str = "calibration_target";

/// Produces the `camera → robot` pose from the latest fresh detection.
pub struct OffsetComposer {
    selector: Arc<LatestPoseSelector>,
    offset: OffsetConfig,
    camera_frame: String,
}

impl OffsetComposer {
    pub fn new(
        selector: Arc<LatestPoseSelector>,
        offset: OffsetConfig,
        camera_frame: impl Into<String>,
    ) -> Self {
        Self {
            selector,
            offset,
            camera_frame: camera_frame.into(),
        }
    }

    pub fn offset(&self) -> &OffsetConfig {
        &self.offset
    }

    pub fn camera_frame(&self) -> &str {
        &self.camera_frame
    }

    /// `camera → robot` as of `now`, or `None` without a fresh detection.
    ///
    /// The result carries the detection's stamp, never `now`, so consumers
    /// can see how old the underlying observation is.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn compute(&self, now: Timestamp) -> Option<FrameTransform> {
        let detection = self.selector.current(self.offset.target_frame(), now)?;
        match compose(&detection, self.offset.offset()) {
            Ok(robot) => Some(robot.with_stamp(detection.stamp())),
            Err(err) => {
                warn!("cannot compose calibration edge: {err}");
                None
            }
        }
    }
}

impl EdgeSource for OffsetComposer {
    fn name(&self) -> &str {
        CALIBRATION_EDGE
    }

    fn parent_frame(&self) -> &str {
        &self.camera_frame
    }

    fn child_frame(&self) -> &str {
        self.offset.robot_frame()
    }

    fn current(&self, now: Timestamp) -> Option<FrameTransform> {
        self.compute(now)
            .filter(|tf| tf.parent_frame() == self.camera_frame)
    }
}

/// Publishes the selected `camera → target` detection itself.
pub struct TargetEdge {
    selector: Arc<LatestPoseSelector>,
    camera_frame: String,
    target_frame: String,
}

impl TargetEdge {
    pub fn new(
        selector: Arc<LatestPoseSelector>,
        camera_frame: impl Into<String>,
        target_frame: impl Into<String>,
    ) -> Self {
        Self {
            selector,
            camera_frame: camera_frame.into(),
            target_frame: target_frame.into(),
        }
    }
}

impl EdgeSource for TargetEdge {
    fn name(&self) -> &str {
        TARGET_EDGE
    }

    fn parent_frame(&self) -> &str {
        &self.camera_frame
    }

    fn child_frame(&self) -> &str {
        &self.target_frame
    }

    fn current(&self, now: Timestamp) -> Option<FrameTransform> {
        self.selector
            .current(&self.target_frame, now)
            .filter(|tf| tf.parent_frame() == self.camera_frame)
    }
}
