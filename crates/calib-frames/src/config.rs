//! JSON startup configuration.

use calib_frames_core::{FrameTransform, Timestamp, TransformError};
use calib_frames_pose::{Mounting, OffsetConfig, OffsetError, SelectionPolicy};
use calib_frames_registry::{BroadcastConfig, RegistryError};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

#[derive(thiserror::Error, Debug)]
pub enum ConfigIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    EmptyFrame(&'static str),
    #[error("{first} and {second} are both '{frame}'")]
    FrameCollision {
        first: &'static str,
        second: &'static str,
        frame: String,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error(transparent)]
    Offset(#[from] OffsetError),
    #[error("static transform '{name}' is invalid: {source}")]
    StaticTransform {
        name: String,
        #[source]
        source: TransformError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn default_camera_frame() -> String {
    "camera".to_string()
}

fn default_target_frame() -> String {
    "object".to_string()
}

fn default_robot_frame() -> String {
    "WAIST".to_string()
}

fn default_freshness_ms() -> u64 {
    300
}

fn default_broadcast_period_ms() -> u64 {
    100
}

fn default_queue_capacity() -> usize {
    8
}

/// How long a detection may be republished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Only detections younger than `freshness_ms`.
    #[default]
    Fresh,
    /// The latest valid detection, however old.
    HoldLast,
}

/// A named transform installed at startup and never changed afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticTransformConfig {
    pub name: String,
    pub parent_frame: String,
    pub child_frame: String,
    pub translation: [f64; 3],
    /// Quaternion in `[x, y, z, w]` order.
    #[serde(default = "identity_rotation")]
    pub rotation: [f64; 4],
}

fn identity_rotation() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

/// Startup configuration, as read from disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartupConfig {
    #[serde(default)]
    pub mounting: Mounting,
    #[serde(default = "default_camera_frame")]
    pub camera_frame: String,
    #[serde(default = "default_target_frame")]
    pub target_frame: String,
    #[serde(default = "default_robot_frame")]
    pub robot_frame: String,
    #[serde(default = "default_freshness_ms")]
    pub freshness_ms: u64,
    #[serde(default = "default_broadcast_period_ms")]
    pub broadcast_period_ms: u64,
    #[serde(default)]
    pub selection: SelectionMode,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub publish_target_edge: bool,
    #[serde(default)]
    pub static_transforms: Vec<StaticTransformConfig>,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            mounting: Mounting::default(),
            camera_frame: default_camera_frame(),
            target_frame: default_target_frame(),
            robot_frame: default_robot_frame(),
            freshness_ms: default_freshness_ms(),
            broadcast_period_ms: default_broadcast_period_ms(),
            selection: SelectionMode::default(),
            queue_capacity: default_queue_capacity(),
            publish_target_edge: false,
            static_transforms: Vec::new(),
        }
    }
}

/// Everything the service needs, checked and converted to runtime types.
#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub camera_frame: String,
    pub offset: OffsetConfig,
    pub policy: SelectionPolicy,
    pub broadcast: BroadcastConfig,
    pub publish_target_edge: bool,
    pub static_transforms: Vec<(String, FrameTransform)>,
}

impl StartupConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Check field-level constraints and build the runtime configuration.
    ///
    /// Graph constraints between static transforms and the reserved edges are
    /// checked later, when the registry is assembled.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let frames = [
            ("camera_frame", &self.camera_frame),
            ("target_frame", &self.target_frame),
            ("robot_frame", &self.robot_frame),
        ];
        for (field, frame) in frames {
            if frame.is_empty() {
                return Err(ConfigError::EmptyFrame(field));
            }
        }
        for (i, (first, a)) in frames.iter().enumerate() {
            if let Some((second, _)) = frames[i + 1..].iter().find(|(_, b)| b == a) {
                return Err(ConfigError::FrameCollision {
                    first: *first,
                    second: *second,
                    frame: a.to_string(),
                });
            }
        }

        if self.broadcast_period_ms == 0 {
            return Err(ConfigError::Zero("broadcast_period_ms"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue_capacity"));
        }
        let policy = match self.selection {
            SelectionMode::Fresh if self.freshness_ms == 0 => {
                return Err(ConfigError::Zero("freshness_ms"));
            }
            SelectionMode::Fresh => SelectionPolicy::Fresh {
                window: Duration::from_millis(self.freshness_ms),
            },
            SelectionMode::HoldLast => SelectionPolicy::HoldLast,
        };

        let offset = OffsetConfig::new(&self.mounting, &self.target_frame, &self.robot_frame)?;

        let static_transforms = self
            .static_transforms
            .iter()
            .map(|s| {
                FrameTransform::from_components(
                    &s.parent_frame,
                    &s.child_frame,
                    s.translation,
                    s.rotation,
                    Timestamp::ZERO,
                )
                .map(|tf| (s.name.clone(), tf))
                .map_err(|source| ConfigError::StaticTransform {
                    name: s.name.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ValidatedConfig {
            camera_frame: self.camera_frame.clone(),
            offset,
            policy,
            broadcast: BroadcastConfig {
                period: Duration::from_millis(self.broadcast_period_ms),
                queue_capacity: self.queue_capacity,
            },
            publish_target_edge: self.publish_target_edge,
            static_transforms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg: StartupConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(cfg, StartupConfig::default());

        let v = cfg.validate().expect("valid");
        assert_eq!(v.camera_frame, "camera");
        assert_eq!(v.offset.target_frame(), "object");
        assert_eq!(v.offset.robot_frame(), "WAIST");
        assert_eq!(
            v.policy,
            SelectionPolicy::Fresh {
                window: Duration::from_millis(300)
            }
        );
        assert_eq!(v.broadcast, BroadcastConfig::default());
        assert!(!v.publish_target_edge);
    }

    #[test]
    fn parses_full_config() {
        let raw = r#"{
            "mounting": "vertical",
            "camera_frame": "head_cam",
            "target_frame": "board",
            "robot_frame": "base_link",
            "freshness_ms": 150,
            "broadcast_period_ms": 50,
            "selection": "hold_last",
            "queue_capacity": 2,
            "publish_target_edge": true,
            "static_transforms": [
                {"name": "lidar", "parent_frame": "base_link", "child_frame": "lidar",
                 "translation": [0.0, 0.0, 0.4]}
            ]
        }"#;
        let cfg: StartupConfig = serde_json::from_str(raw).expect("parse");
        assert_eq!(cfg.mounting, Mounting::Vertical);
        let v = cfg.validate().expect("valid");
        assert_eq!(v.policy, SelectionPolicy::HoldLast);
        assert_eq!(v.broadcast.period, Duration::from_millis(50));
        assert_eq!(v.broadcast.queue_capacity, 2);
        assert_eq!(v.static_transforms.len(), 1);
        let (name, lidar) = &v.static_transforms[0];
        assert_eq!(name, "lidar");
        assert_relative_eq!(lidar.translation().z, 0.4);
        assert_eq!(lidar.stamp(), Timestamp::ZERO);
    }

    #[test]
    fn custom_mounting_from_json() {
        let raw = r#"{"mounting": {"custom": {"translation": [0.1, 0.0, 0.0],
                                              "rotation": [0.0, 0.0, 0.0, 1.0]}}}"#;
        let v = serde_json::from_str::<StartupConfig>(raw)
            .expect("parse")
            .validate()
            .expect("valid");
        assert_relative_eq!(v.offset.offset().translation().x, 0.1);
    }

    #[test]
    fn rejects_bad_frames() {
        let cfg = StartupConfig {
            robot_frame: String::new(),
            ..StartupConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::EmptyFrame("robot_frame"))
        ));

        let cfg = StartupConfig {
            target_frame: "camera".into(),
            ..StartupConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::FrameCollision {
                first: "camera_frame",
                second: "target_frame",
                ..
            })
        ));
    }

    #[test]
    fn rejects_zero_rates() {
        for cfg in [
            StartupConfig {
                broadcast_period_ms: 0,
                ..StartupConfig::default()
            },
            StartupConfig {
                queue_capacity: 0,
                ..StartupConfig::default()
            },
            StartupConfig {
                freshness_ms: 0,
                ..StartupConfig::default()
            },
        ] {
            assert!(matches!(cfg.validate(), Err(ConfigError::Zero(_))));
        }

        // The window is irrelevant when detections are held indefinitely.
        let hold = StartupConfig {
            freshness_ms: 0,
            selection: SelectionMode::HoldLast,
            ..StartupConfig::default()
        };
        assert!(hold.validate().is_ok());
    }

    #[test]
    fn rejects_malformed_transforms() {
        let cfg = StartupConfig {
            mounting: Mounting::Custom {
                translation: [0.0; 3],
                rotation: [0.0, 0.0, 0.0, 2.0],
            },
            ..StartupConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Offset(_))));

        let cfg = StartupConfig {
            static_transforms: vec![StaticTransformConfig {
                name: "loop".into(),
                parent_frame: "a".into(),
                child_frame: "a".into(),
                translation: [0.0; 3],
                rotation: identity_rotation(),
            }],
            ..StartupConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::StaticTransform { ref name, .. }) if name == "loop"
        ));
    }

    #[test]
    fn json_round_trip_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calib.json");
        let cfg = StartupConfig {
            mounting: Mounting::Vertical,
            publish_target_edge: true,
            ..StartupConfig::default()
        };
        cfg.write_json(&path).expect("write");
        assert_eq!(StartupConfig::load_json(&path).expect("load"), cfg);

        assert!(matches!(
            StartupConfig::load_json(dir.path().join("missing.json")),
            Err(ConfigIoError::Io(_))
        ));
    }
}
