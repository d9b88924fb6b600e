//! Rigid transforms between named frames.
//!
//! A [`FrameTransform`] `X→Y` is the pose of frame `Y` expressed in frame `X`
//! (it maps coordinates in `Y` into `X`). Composition chains
//! `X→Y` with `Y→Z` into `X→Z`; inversion flips the direction. Values are
//! immutable once built: every operation returns a new transform.

use crate::Timestamp;
use nalgebra::{Isometry3, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Maximum deviation of a raw quaternion's norm from 1 that is still
/// accepted (and then renormalized).
pub const ROTATION_NORM_TOLERANCE: f64 = 1e-3;

/// Errors produced when building or combining transforms.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error(
        "frame mismatch: cannot chain a transform ending in '{left_child}' \
         with one starting at '{right_parent}'"
    )]
    FrameMismatch {
        left_child: String,
        right_parent: String,
    },
    #[error("parent and child frame are both '{0}'")]
    SameFrame(String),
    #[error("frame names must not be empty")]
    EmptyFrame,
    #[error("non-finite {0} component")]
    NonFinite(&'static str),
    #[error("rotation quaternion has norm {norm:.6}, expected 1 within {tol}", tol = ROTATION_NORM_TOLERANCE)]
    NonUnitRotation { norm: f64 },
}

/// Stamped rigid transform `parent_frame → child_frame`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransformMsg", into = "TransformMsg")]
pub struct FrameTransform {
    parent_frame: String,
    child_frame: String,
    isometry: Isometry3<f64>,
    stamp: Timestamp,
}

/// Wire representation of a [`FrameTransform`].
///
/// `rotation` is a quaternion in `[x, y, z, w]` order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformMsg {
    pub parent_frame: String,
    pub child_frame: String,
    pub translation: [f64; 3],
    pub rotation: [f64; 4],
    #[serde(default)]
    pub stamp: Timestamp,
}

impl FrameTransform {
    /// Build a transform from an isometry, validating the frame names and
    /// that every component is finite.
    pub fn new(
        parent_frame: impl Into<String>,
        child_frame: impl Into<String>,
        isometry: Isometry3<f64>,
        stamp: Timestamp,
    ) -> Result<Self, TransformError> {
        let parent_frame = parent_frame.into();
        let child_frame = child_frame.into();
        check_frames(&parent_frame, &child_frame)?;
        if !isometry.translation.vector.iter().all(|v| v.is_finite()) {
            return Err(TransformError::NonFinite("translation"));
        }
        if !isometry.rotation.coords.iter().all(|v| v.is_finite()) {
            return Err(TransformError::NonFinite("rotation"));
        }
        Ok(Self {
            parent_frame,
            child_frame,
            isometry,
            stamp,
        })
    }

    /// Build a transform from raw translation and `[x, y, z, w]` quaternion
    /// components, as they arrive from detectors and configuration.
    ///
    /// The quaternion must be unit length within [`ROTATION_NORM_TOLERANCE`];
    /// it is renormalized before being stored.
    pub fn from_components(
        parent_frame: impl Into<String>,
        child_frame: impl Into<String>,
        translation: [f64; 3],
        rotation: [f64; 4],
        stamp: Timestamp,
    ) -> Result<Self, TransformError> {
        let rotation = unit_rotation_from_xyzw(rotation)?;
        if !translation.iter().all(|v| v.is_finite()) {
            return Err(TransformError::NonFinite("translation"));
        }
        let isometry =
            Isometry3::from_parts(Translation3::from(Vector3::from(translation)), rotation);
        Self::new(parent_frame, child_frame, isometry, stamp)
    }

    pub fn identity(
        parent_frame: impl Into<String>,
        child_frame: impl Into<String>,
        stamp: Timestamp,
    ) -> Result<Self, TransformError> {
        Self::new(parent_frame, child_frame, Isometry3::identity(), stamp)
    }

    #[inline]
    pub fn parent_frame(&self) -> &str {
        &self.parent_frame
    }

    #[inline]
    pub fn child_frame(&self) -> &str {
        &self.child_frame
    }

    #[inline]
    pub fn isometry(&self) -> &Isometry3<f64> {
        &self.isometry
    }

    #[inline]
    pub fn translation(&self) -> Vector3<f64> {
        self.isometry.translation.vector
    }

    #[inline]
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.isometry.rotation
    }

    #[inline]
    pub fn stamp(&self) -> Timestamp {
        self.stamp
    }

    /// Quaternion components in `[x, y, z, w]` order.
    pub fn rotation_xyzw(&self) -> [f64; 4] {
        let q = self.isometry.rotation.quaternion();
        [q.i, q.j, q.k, q.w]
    }

    /// Same transform, different stamp.
    pub fn with_stamp(mut self, stamp: Timestamp) -> Self {
        self.stamp = stamp;
        self
    }

    /// Map a point expressed in the child frame into the parent frame.
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.isometry.transform_point(p)
    }

    /// `self: X→Y` followed by `next: Y→Z` gives `X→Z`, stamped like `self`.
    pub fn then(&self, next: &FrameTransform) -> Result<FrameTransform, TransformError> {
        if self.child_frame != next.parent_frame {
            return Err(TransformError::FrameMismatch {
                left_child: self.child_frame.clone(),
                right_parent: next.parent_frame.clone(),
            });
        }
        FrameTransform::new(
            self.parent_frame.clone(),
            next.child_frame.clone(),
            self.isometry * next.isometry,
            self.stamp,
        )
    }

    /// `X→Y` becomes `Y→X`, same stamp.
    pub fn inverse(&self) -> FrameTransform {
        FrameTransform {
            parent_frame: self.child_frame.clone(),
            child_frame: self.parent_frame.clone(),
            isometry: self.isometry.inverse(),
            stamp: self.stamp,
        }
    }
}

/// Compose `a: X→Y` with `b: Y→Z` into `X→Z`.
///
/// Fails with [`TransformError::FrameMismatch`] when `a.child_frame` is not
/// `b.parent_frame`. The result carries `a`'s stamp.
pub fn compose(a: &FrameTransform, b: &FrameTransform) -> Result<FrameTransform, TransformError> {
    a.then(b)
}

/// Invert `a: X→Y` into `Y→X`.
pub fn invert(a: &FrameTransform) -> FrameTransform {
    a.inverse()
}

fn check_frames(parent: &str, child: &str) -> Result<(), TransformError> {
    if parent.is_empty() || child.is_empty() {
        return Err(TransformError::EmptyFrame);
    }
    if parent == child {
        return Err(TransformError::SameFrame(parent.to_string()));
    }
    Ok(())
}

fn unit_rotation_from_xyzw(q: [f64; 4]) -> Result<UnitQuaternion<f64>, TransformError> {
    if !q.iter().all(|v| v.is_finite()) {
        return Err(TransformError::NonFinite("rotation"));
    }
    let quat = Quaternion::new(q[3], q[0], q[1], q[2]);
    let norm = quat.norm();
    if (norm - 1.0).abs() > ROTATION_NORM_TOLERANCE {
        return Err(TransformError::NonUnitRotation { norm });
    }
    Ok(UnitQuaternion::from_quaternion(quat))
}

impl TryFrom<TransformMsg> for FrameTransform {
    type Error = TransformError;

    fn try_from(msg: TransformMsg) -> Result<Self, Self::Error> {
        FrameTransform::from_components(
            msg.parent_frame,
            msg.child_frame,
            msg.translation,
            msg.rotation,
            msg.stamp,
        )
    }
}

impl From<FrameTransform> for TransformMsg {
    fn from(tf: FrameTransform) -> Self {
        let translation = tf.translation().into();
        let rotation = tf.rotation_xyzw();
        TransformMsg {
            parent_frame: tf.parent_frame,
            child_frame: tf.child_frame,
            translation,
            rotation,
            stamp: tf.stamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn tf(parent: &str, child: &str, t: [f64; 3], rpy: [f64; 3]) -> FrameTransform {
        let iso = Isometry3::from_parts(
            Translation3::from(Vector3::from(t)),
            UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
        );
        FrameTransform::new(parent, child, iso, Timestamp::from_millis(7)).expect("valid")
    }

    #[test]
    fn compose_chains_frames_and_keeps_left_stamp() {
        let a = tf("camera", "object", [1.0, 0.0, 0.0], [0.0, 0.0, FRAC_PI_2]);
        let b = tf("object", "WAIST", [1.0, 0.0, 0.0], [0.0, 0.0, 0.0])
            .with_stamp(Timestamp::from_millis(99));

        let c = compose(&a, &b).expect("compose");
        assert_eq!(c.parent_frame(), "camera");
        assert_eq!(c.child_frame(), "WAIST");
        assert_eq!(c.stamp(), Timestamp::from_millis(7));
        // b's offset along object-x lands on camera-y after the 90° yaw.
        assert_relative_eq!(c.translation(), Vector3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn compose_rejects_mismatched_frames() {
        let a = tf("camera", "object", [0.0; 3], [0.0; 3]);
        let b = tf("board", "WAIST", [0.0; 3], [0.0; 3]);
        let err = compose(&a, &b).unwrap_err();
        assert_eq!(
            err,
            TransformError::FrameMismatch {
                left_child: "object".into(),
                right_parent: "board".into()
            }
        );
    }

    #[test]
    fn compose_then_inverse_round_trips() {
        let detection = tf("camera", "object", [0.3, -0.2, 1.4], [0.1, -0.4, 2.0]);
        let offset = tf("object", "WAIST", [0.060, -0.1105, 0.335], [PI, 0.0, 0.0]);

        let forward = compose(&detection, &offset).expect("forward");
        let backward = compose(&invert(&offset), &invert(&detection)).expect("backward");

        assert_eq!(backward.parent_frame(), "WAIST");
        assert_eq!(backward.child_frame(), "camera");
        let round_trip = forward.isometry() * backward.isometry();
        assert_relative_eq!(round_trip, Isometry3::identity(), epsilon = 1e-9);
        assert_relative_eq!(
            *backward.isometry(),
            *invert(&forward).isometry(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn rejects_same_and_empty_frames() {
        assert_eq!(
            FrameTransform::identity("a", "a", Timestamp::ZERO).unwrap_err(),
            TransformError::SameFrame("a".into())
        );
        assert_eq!(
            FrameTransform::identity("", "a", Timestamp::ZERO).unwrap_err(),
            TransformError::EmptyFrame
        );
    }

    #[test]
    fn from_components_checks_rotation_norm() {
        let ok = FrameTransform::from_components(
            "a",
            "b",
            [0.0; 3],
            [0.0, 0.0, 0.0, 1.0005],
            Timestamp::ZERO,
        )
        .expect("within tolerance");
        assert_relative_eq!(ok.rotation().quaternion().norm(), 1.0, epsilon = 1e-12);

        let err = FrameTransform::from_components(
            "a",
            "b",
            [0.0; 3],
            [0.0, 0.0, 0.0, 1.1],
            Timestamp::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, TransformError::NonUnitRotation { .. }));

        let err = FrameTransform::from_components(
            "a",
            "b",
            [f64::NAN, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
            Timestamp::ZERO,
        )
        .unwrap_err();
        assert_eq!(err, TransformError::NonFinite("translation"));
    }

    #[test]
    fn json_wire_shape_uses_xyzw_quaternion() {
        let t = FrameTransform::from_components(
            "object",
            "WAIST",
            [0.060, -0.1105, 0.335],
            [1.0, 0.0, 0.0, 0.0],
            Timestamp::from_nanos(5),
        )
        .expect("valid");
        let json = serde_json::to_value(&t).expect("serialize");
        assert_eq!(json["parent_frame"], "object");
        assert_eq!(json["rotation"][0], 1.0);
        assert_eq!(json["rotation"][3], 0.0);
        assert_eq!(json["stamp"], 5);

        let back: FrameTransform = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, t);
    }

    #[test]
    fn deserializing_invalid_transform_fails() {
        let raw = r#"{"parent_frame":"a","child_frame":"a","translation":[0,0,0],"rotation":[0,0,0,1]}"#;
        assert!(serde_json::from_str::<FrameTransform>(raw).is_err());
    }

    #[test]
    fn transform_point_maps_child_into_parent() {
        let t = tf("camera", "object", [0.0, 0.0, 1.0], [0.0, 0.0, FRAC_PI_2]);
        let p = t.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Point3::new(0.0, 1.0, 1.0), epsilon = 1e-12);
    }
}
