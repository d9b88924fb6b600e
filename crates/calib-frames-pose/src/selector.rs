//! Latest-detection-wins selection with bounded staleness.

use crate::DetectionCandidate;
use calib_frames_core::{FrameTransform, Timestamp};
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Default freshness window: a few nominal detection periods.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_millis(300);

/// Default bound on distinct target ids held at once.
pub const DEFAULT_MAX_TARGETS: usize = 16;

/// How long a stored detection may be handed out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Serve a detection only while `now - arrival_time <= window`.
    Fresh { window: Duration },
    /// Serve the latest valid detection regardless of its age.
    HoldLast,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy::Fresh {
            window: DEFAULT_FRESHNESS_WINDOW,
        }
    }
}

impl SelectionPolicy {
    fn is_fresh(&self, arrival_time: Timestamp, now: Timestamp) -> bool {
        match *self {
            SelectionPolicy::Fresh { window } => {
                now.saturating_duration_since(arrival_time) <= window
            }
            SelectionPolicy::HoldLast => true,
        }
    }
}

/// Result of [`LatestPoseSelector::submit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The candidate is now the stored detection for its target.
    Stored,
    /// The candidate arrived earlier than the stored one and was dropped.
    OutOfOrder,
    /// The detector flagged the candidate as invalid; nothing changed.
    Invalid,
}

/// Per-target store of the most recent valid detection.
///
/// At most `max_targets` ids are held. A new id beyond that evicts the one
/// that arrived longest ago.
#[derive(Debug)]
pub struct LatestPoseSelector {
    policy: SelectionPolicy,
    max_targets: usize,
    latest: Mutex<HashMap<String, DetectionCandidate>>,
}

impl LatestPoseSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            max_targets: DEFAULT_MAX_TARGETS,
            latest: Mutex::new(HashMap::new()),
        }
    }

    /// Bound the number of distinct targets. Clamped to at least one.
    pub fn with_max_targets(mut self, max_targets: usize) -> Self {
        self.max_targets = max_targets.max(1);
        self
    }

    pub fn submit(&self, candidate: DetectionCandidate) -> SubmitOutcome {
        if !candidate.valid {
            trace!("ignoring invalid detection of '{}'", candidate.target_id);
            return SubmitOutcome::Invalid;
        }
        let mut latest = self.latest.lock();
        if let Some(stored) = latest.get(&candidate.target_id) {
            if candidate.arrival_time < stored.arrival_time {
                debug!(
                    "dropping out-of-order detection of '{}' ({} < {})",
                    candidate.target_id, candidate.arrival_time, stored.arrival_time
                );
                return SubmitOutcome::OutOfOrder;
            }
        } else if latest.len() >= self.max_targets {
            let oldest = latest
                .iter()
                .min_by_key(|(_, c)| c.arrival_time)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                debug!("target limit reached, evicting '{id}'");
                latest.remove(&id);
            }
        }
        latest.insert(candidate.target_id.clone(), candidate);
        SubmitOutcome::Stored
    }

    /// The stored pose for `target_id` if it is still fresh at `now`.
    pub fn current(&self, target_id: &str, now: Timestamp) -> Option<FrameTransform> {
        let latest = self.latest.lock();
        let stored = latest.get(target_id)?;
        self.policy
            .is_fresh(stored.arrival_time, now)
            .then(|| stored.pose.clone())
    }

    /// The stored candidate for `target_id`, fresh or not.
    pub fn latest(&self, target_id: &str) -> Option<DetectionCandidate> {
        self.latest.lock().get(target_id).cloned()
    }

    /// Drop every candidate that is no longer fresh. Returns how many went.
    pub fn evict_stale(&self, now: Timestamp) -> usize {
        let mut latest = self.latest.lock();
        let before = latest.len();
        latest.retain(|_, c| self.policy.is_fresh(c.arrival_time, now));
        before - latest.len()
    }

    pub fn len(&self) -> usize {
        self.latest.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.lock().is_empty()
    }
}

impl Default for LatestPoseSelector {
    fn default() -> Self {
        Self::new(SelectionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(target: &str, x: f64, arrival_ms: u64) -> DetectionCandidate {
        DetectionCandidate {
            target_id: target.to_string(),
            pose: FrameTransform::from_components(
                "camera",
                target,
                [x, 0.0, 1.0],
                [0.0, 0.0, 0.0, 1.0],
                Timestamp::from_millis(arrival_ms.saturating_sub(5)),
            )
            .expect("pose"),
            arrival_time: Timestamp::from_millis(arrival_ms),
            valid: true,
        }
    }

    fn window(ms: u64) -> SelectionPolicy {
        SelectionPolicy::Fresh {
            window: Duration::from_millis(ms),
        }
    }

    #[test]
    fn increasing_arrivals_always_expose_the_newest_until_it_goes_stale() {
        let selector = LatestPoseSelector::new(window(100));
        for (i, arrival) in [10u64, 20, 35, 80, 81].into_iter().enumerate() {
            let c = candidate("object", i as f64, arrival);
            let expected = c.pose.clone();
            assert_eq!(selector.submit(c), SubmitOutcome::Stored);
            let now = Timestamp::from_millis(arrival);
            assert_eq!(selector.current("object", now), Some(expected));
        }
        let last = selector.latest("object").expect("stored").pose;
        assert_eq!(
            selector.current("object", Timestamp::from_millis(181)),
            Some(last)
        );
        assert_eq!(selector.current("object", Timestamp::from_millis(182)), None);
    }

    #[test]
    fn out_of_order_candidate_is_dropped() {
        let selector = LatestPoseSelector::new(window(100));
        selector.submit(candidate("object", 1.0, 50));
        assert_eq!(
            selector.submit(candidate("object", 2.0, 40)),
            SubmitOutcome::OutOfOrder
        );
        let pose = selector
            .current("object", Timestamp::from_millis(60))
            .expect("fresh");
        assert_eq!(pose.translation().x, 1.0);

        // Equal arrival times are not "older".
        assert_eq!(
            selector.submit(candidate("object", 3.0, 50)),
            SubmitOutcome::Stored
        );
    }

    #[test]
    fn invalid_candidate_never_replaces() {
        let selector = LatestPoseSelector::new(window(100));
        selector.submit(candidate("object", 1.0, 10));
        let mut bad = candidate("object", 9.0, 20);
        bad.valid = false;
        assert_eq!(selector.submit(bad), SubmitOutcome::Invalid);
        let pose = selector
            .current("object", Timestamp::from_millis(20))
            .expect("fresh");
        assert_eq!(pose.translation().x, 1.0);
    }

    #[test]
    fn targets_are_independent() {
        let selector = LatestPoseSelector::new(window(100));
        selector.submit(candidate("left", 1.0, 10));
        selector.submit(candidate("right", 2.0, 90));
        let now = Timestamp::from_millis(150);
        assert!(selector.current("left", now).is_none());
        assert!(selector.current("right", now).is_some());
        assert!(selector.current("missing", now).is_none());
    }

    #[test]
    fn evict_stale_drops_only_expired() {
        let selector = LatestPoseSelector::new(window(100));
        selector.submit(candidate("left", 1.0, 10));
        selector.submit(candidate("right", 2.0, 90));
        assert_eq!(selector.evict_stale(Timestamp::from_millis(150)), 1);
        assert_eq!(selector.len(), 1);
        assert!(selector.latest("left").is_none());
    }

    #[test]
    fn target_limit_evicts_the_oldest_arrival() {
        let selector = LatestPoseSelector::new(SelectionPolicy::HoldLast).with_max_targets(2);
        selector.submit(candidate("a", 1.0, 10));
        selector.submit(candidate("b", 2.0, 20));
        // Refreshing a known id never evicts.
        selector.submit(candidate("a", 1.5, 30));
        assert_eq!(selector.len(), 2);

        for (i, id) in ["c", "d", "e", "f"].into_iter().enumerate() {
            selector.submit(candidate(id, 0.0, 40 + i as u64));
        }
        assert_eq!(selector.len(), 2);
        assert!(selector.latest("a").is_none());
        assert!(selector.latest("e").is_some());
        assert!(selector.latest("f").is_some());
    }

    #[test]
    fn hold_last_ignores_age() {
        let selector = LatestPoseSelector::new(SelectionPolicy::HoldLast);
        selector.submit(candidate("object", 1.0, 10));
        let much_later = Timestamp::from_millis(10_000_000);
        assert!(selector.current("object", much_later).is_some());
        assert_eq!(selector.evict_stale(much_later), 0);
    }
}
