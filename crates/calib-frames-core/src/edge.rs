use crate::{FrameTransform, Timestamp};

/// A computed edge merged into every registry snapshot under a reserved name.
///
/// The frames an edge source claims are fixed for its lifetime, so the
/// registry can keep them out of reach of runtime mutations even while the
/// source currently has nothing to publish.
pub trait EdgeSource: Send + Sync {
    /// Reserved entry name, e.g. `"calibration"`.
    fn name(&self) -> &str;

    fn parent_frame(&self) -> &str;

    fn child_frame(&self) -> &str;

    /// The edge as of `now`, or `None` when it is currently unavailable.
    ///
    /// A returned transform must go from [`parent_frame`](Self::parent_frame)
    /// to [`child_frame`](Self::child_frame).
    fn current(&self, now: Timestamp) -> Option<FrameTransform>;
}
