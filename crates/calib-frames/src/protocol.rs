//! Messages exchanged with the `calib-frames` process.
//!
//! Input is one JSON object per line: either `{"detection": {...}}` or a
//! registry request tagged by `"op"`. Output lines are `{"response": {...}}`
//! or `{"broadcast": {...}}`.

use calib_frames_core::TransformError;
use calib_frames_pose::RawDetection;
use calib_frames_registry::{RegistryEntry, RegistryError, TransformBatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Runtime mutation and query of the transform registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Upsert {
        name: String,
        parent_frame: String,
        child_frame: String,
        translation: [f64; 3],
        /// Quaternion in `[x, y, z, w]` order.
        rotation: [f64; 4],
    },
    Remove {
        name: String,
    },
    Get {
        name: String,
    },
    List,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CycleRejected,
    DuplicateChild,
    NotFound,
    ReservedName,
    StaticEntry,
    InvalidTransform,
    InvalidName,
    InvalidRequest,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Entry { entry: RegistryEntry },
    Entries { entries: Vec<RegistryEntry> },
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Response::Error { .. })
    }
}

impl From<RegistryError> for Response {
    fn from(err: RegistryError) -> Self {
        let kind = match &err {
            RegistryError::CycleRejected { .. } => ErrorKind::CycleRejected,
            RegistryError::DuplicateChild { .. } => ErrorKind::DuplicateChild,
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::ReservedName(_) => ErrorKind::ReservedName,
            RegistryError::StaticEntry(_) => ErrorKind::StaticEntry,
            RegistryError::EmptyName => ErrorKind::InvalidName,
        };
        Response::error(kind, err.to_string())
    }
}

impl From<TransformError> for Response {
    fn from(err: TransformError) -> Self {
        Response::error(ErrorKind::InvalidTransform, err.to_string())
    }
}

/// One decoded input line.
#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    Detection(RawDetection),
    Request(Request),
}

/// Why an input line could not be decoded.
#[derive(thiserror::Error, Debug)]
pub enum InputError {
    /// The line carried a `detection` key whose payload is not a detection.
    #[error("malformed detection: {0}")]
    Detection(serde_json::Error),
    /// The line is not JSON, or not a known request.
    #[error("{0}")]
    Request(serde_json::Error),
}

impl Input {
    /// Decode one line. Lines need not be valid UTF-8 to be rejected cleanly.
    pub fn from_line(line: &[u8]) -> Result<Self, InputError> {
        let mut value: Value = serde_json::from_slice(line).map_err(InputError::Request)?;
        if let Some(detection) = value.get_mut("detection") {
            return serde_json::from_value(detection.take())
                .map(Input::Detection)
                .map_err(InputError::Detection);
        }
        serde_json::from_value(value)
            .map(Input::Request)
            .map_err(InputError::Request)
    }
}

/// One output line.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Output<'a> {
    Response(&'a Response),
    Broadcast(&'a TransformBatch),
}
