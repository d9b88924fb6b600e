//! Dynamic transform registry and fixed-rate broadcasting.
//!
//! The [`TransformRegistry`] owns every named transform that is published:
//! static entries installed from configuration, dynamic entries added and
//! removed at runtime, and reserved edges computed on demand by
//! [`EdgeSource`](calib_frames_core::EdgeSource)s such as the calibration
//! composer. Every mutation keeps the frame graph a forest: no cycles and at
//! most one parent per frame.
//!
//! The [`Broadcaster`] snapshots the registry on a timer and hands batches
//! to a [`TransformSink`] through a bounded drop-oldest queue, so a slow
//! consumer never stalls the timer. [`FrameGraph`] answers frame-to-frame
//! lookups over a snapshot.

mod broadcaster;
mod graph;
mod registry;

pub use broadcaster::{
    BroadcastConfig, BroadcastStats, Broadcaster, SinkError, TransformBatch, TransformSink,
    DEFAULT_BROADCAST_PERIOD, DEFAULT_QUEUE_CAPACITY,
};
pub use graph::{FrameGraph, LookupError};
pub use registry::{
    EntrySource, RegistryBuilder, RegistryEntry, RegistryError, TransformRegistry,
};
