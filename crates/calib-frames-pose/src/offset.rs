//! Mechanical offset between the calibration target and the robot body.

use calib_frames_core::{FrameTransform, Timestamp, TransformError};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Board position relative to the waist, shared by the built-in mountings.
const MOUNT_TRANSLATION: [f64; 3] = [0.060, -0.1105, 0.335];

/// How the checkerboard is mounted on the robot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mounting {
    /// Board lying flat: half a turn about the target x axis.
    #[default]
    Horizontal,
    /// Board standing up: the horizontal rotation followed by a quarter turn
    /// about the target y axis.
    Vertical,
    /// Explicit offset for rigs the built-in variants don't cover.
    /// `rotation` is a quaternion in `[x, y, z, w]` order.
    Custom {
        translation: [f64; 3],
        rotation: [f64; 4],
    },
}

#[derive(thiserror::Error, Debug)]
pub enum OffsetError {
    #[error("invalid mounting offset: {0}")]
    Transform(#[from] TransformError),
}

/// The fixed `target_frame → robot_frame` offset, chosen once at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct OffsetConfig {
    offset: FrameTransform,
}

fn builtin_offset(
    target_frame: impl Into<String>,
    robot_frame: impl Into<String>,
    rotation: UnitQuaternion<f64>,
) -> Result<FrameTransform, TransformError> {
    let translation = Translation3::from(Vector3::from(MOUNT_TRANSLATION));
    let iso = Isometry3::from_parts(translation, rotation);
    FrameTransform::new(target_frame, robot_frame, iso, Timestamp::ZERO)
}

impl OffsetConfig {
    pub fn new(
        mounting: &Mounting,
        target_frame: impl Into<String>,
        robot_frame: impl Into<String>,
    ) -> Result<Self, OffsetError> {
        let half_turn_x = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI);
        let offset = match mounting {
            Mounting::Horizontal => builtin_offset(target_frame, robot_frame, half_turn_x)?,
            Mounting::Vertical => {
                let quarter_turn_y =
                    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -FRAC_PI_2);
                builtin_offset(target_frame, robot_frame, half_turn_x * quarter_turn_y)?
            }
            Mounting::Custom {
                translation,
                rotation,
            } => FrameTransform::from_components(
                target_frame,
                robot_frame,
                *translation,
                *rotation,
                Timestamp::ZERO,
            )?,
        };
        Ok(Self { offset })
    }

    pub fn target_frame(&self) -> &str {
        self.offset.parent_frame()
    }

    pub fn robot_frame(&self) -> &str {
        self.offset.child_frame()
    }

    pub fn offset(&self) -> &FrameTransform {
        &self.offset
    }
}
