//! Frame-to-frame lookups over a published snapshot.

use calib_frames_core::{FrameTransform, Timestamp, TransformError};
use nalgebra::Isometry3;
use std::collections::{HashMap, HashSet};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("frame '{0}' does not exist")]
    FrameNotFound(String),
    #[error("frames '{from}' and '{to}' are not connected")]
    Disconnected { from: String, to: String },
    #[error("frame '{0}' has more than one parent")]
    DuplicateChild(String),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Read-only forest of transforms, indexed by child frame.
#[derive(Clone, Debug, Default)]
pub struct FrameGraph {
    by_child: HashMap<String, FrameTransform>,
    frames: HashSet<String>,
}

impl FrameGraph {
    /// Index a set of transforms, e.g. a registry snapshot.
    pub fn from_transforms<I>(transforms: I) -> Result<Self, LookupError>
    where
        I: IntoIterator<Item = FrameTransform>,
    {
        let mut graph = FrameGraph::default();
        for tf in transforms {
            let child = tf.child_frame().to_string();
            if graph.by_child.contains_key(&child) {
                return Err(LookupError::DuplicateChild(child));
            }
            graph.frames.insert(tf.parent_frame().to_string());
            graph.frames.insert(child.clone());
            graph.by_child.insert(child, tf);
        }
        Ok(graph)
    }

    pub fn contains(&self, frame: &str) -> bool {
        self.frames.contains(frame)
    }

    pub fn parent_of(&self, frame: &str) -> Option<&str> {
        self.by_child.get(frame).map(|tf| tf.parent_frame())
    }

    /// Frames without a parent, sorted.
    pub fn roots(&self) -> Vec<&str> {
        let mut roots: Vec<&str> = self
            .frames
            .iter()
            .map(String::as_str)
            .filter(|f| !self.by_child.contains_key(*f))
            .collect();
        roots.sort_unstable();
        roots
    }

    /// Edges from `frame` up to its root, nearest first.
    fn chain_to_root(&self, frame: &str) -> Vec<&FrameTransform> {
        let mut chain = Vec::new();
        let mut current = frame;
        while let Some(tf) = self.by_child.get(current) {
            if chain.len() > self.by_child.len() {
                break;
            }
            chain.push(tf);
            current = tf.parent_frame();
        }
        chain
    }

    /// Pose of `source` expressed in `target`, i.e. the transform
    /// `target → source`.
    ///
    /// The result is stamped with the oldest stamp among the edges used.
    pub fn lookup(&self, target: &str, source: &str) -> Result<FrameTransform, LookupError> {
        for frame in [target, source] {
            if !self.contains(frame) {
                return Err(LookupError::FrameNotFound(frame.to_string()));
            }
        }
        if target == source {
            return Err(TransformError::SameFrame(target.to_string()).into());
        }

        let mut up_target = self.chain_to_root(target);
        let mut up_source = self.chain_to_root(source);
        let root_of = |chain: &[&FrameTransform], start: &str| {
            chain
                .last()
                .map(|tf| tf.parent_frame().to_string())
                .unwrap_or_else(|| start.to_string())
        };
        if root_of(&up_target, target) != root_of(&up_source, source) {
            return Err(LookupError::Disconnected {
                from: target.to_string(),
                to: source.to_string(),
            });
        }

        // Strip the shared part above the common ancestor.
        while let (Some(a), Some(b)) = (up_target.last(), up_source.last()) {
            if a.child_frame() != b.child_frame() {
                break;
            }
            up_target.pop();
            up_source.pop();
        }

        let stamp = up_target
            .iter()
            .chain(up_source.iter())
            .map(|tf| tf.stamp())
            .min()
            .unwrap_or(Timestamp::ZERO);

        // ancestor → frame, composed root-side first.
        let from_ancestor = |chain: &[&FrameTransform]| {
            chain
                .iter()
                .rev()
                .fold(Isometry3::<f64>::identity(), |acc, tf| acc * tf.isometry())
        };
        let iso = from_ancestor(&up_target).inverse() * from_ancestor(&up_source);
        Ok(FrameTransform::new(target, source, iso, stamp)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use calib_frames_core::{compose, invert};
    use nalgebra::Vector3;

    fn tf(parent: &str, child: &str, t: [f64; 3], stamp_ms: u64) -> FrameTransform {
        FrameTransform::from_components(
            parent,
            child,
            t,
            [0.0, 0.0, 0.7071068, 0.7071068],
            Timestamp::from_millis(stamp_ms),
        )
        .expect("valid")
    }

    fn robot_graph() -> (FrameGraph, Vec<FrameTransform>) {
        let edges = vec![
            tf("camera", "WAIST", [0.1, 0.2, 1.0], 50),
            tf("camera", "object", [0.0, 0.0, 0.8], 50),
            tf("WAIST", "CHEST", [0.0, 0.0, 0.3], 10),
            tf("CHEST", "HEAD", [0.0, 0.0, 0.2], 20),
            tf("world", "table", [1.0, 0.0, 0.0], 5),
        ];
        (
            FrameGraph::from_transforms(edges.clone()).expect("forest"),
            edges,
        )
    }

    #[test]
    fn direct_edge_and_its_inverse() {
        let (graph, edges) = robot_graph();
        let direct = graph.lookup("camera", "WAIST").expect("direct");
        assert_relative_eq!(*direct.isometry(), *edges[0].isometry(), epsilon = 1e-12);

        let back = graph.lookup("WAIST", "camera").expect("inverse");
        assert_relative_eq!(
            *back.isometry(),
            *invert(&edges[0]).isometry(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn lookup_through_common_ancestor() {
        let (graph, edges) = robot_graph();
        let head_in_object = graph.lookup("object", "HEAD").expect("connected");
        assert_eq!(head_in_object.parent_frame(), "object");
        assert_eq!(head_in_object.child_frame(), "HEAD");
        assert_eq!(head_in_object.stamp(), Timestamp::from_millis(10));

        let expected = compose(&invert(&edges[1]), &edges[0])
            .and_then(|t| compose(&t, &edges[2]))
            .and_then(|t| compose(&t, &edges[3]))
            .expect("chain");
        assert_relative_eq!(
            *head_in_object.isometry(),
            *expected.isometry(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn lookup_along_a_single_branch() {
        let (graph, _) = robot_graph();
        let head_in_waist = graph.lookup("WAIST", "HEAD").expect("connected");
        // Rotations about z leave the stacked z offsets untouched.
        assert_relative_eq!(
            head_in_waist.translation(),
            Vector3::new(0.0, 0.0, 0.5),
            epsilon = 1e-6
        );
    }

    #[test]
    fn disconnected_and_missing_frames() {
        let (graph, _) = robot_graph();
        assert!(matches!(
            graph.lookup("camera", "table"),
            Err(LookupError::Disconnected { .. })
        ));
        assert_eq!(
            graph.lookup("camera", "nowhere").unwrap_err(),
            LookupError::FrameNotFound("nowhere".into())
        );
        assert!(graph.lookup("camera", "camera").is_err());
    }

    #[test]
    fn roots_and_parents() {
        let (graph, _) = robot_graph();
        assert_eq!(graph.roots(), vec!["camera", "world"]);
        assert_eq!(graph.parent_of("HEAD"), Some("CHEST"));
        assert_eq!(graph.parent_of("camera"), None);
    }

    #[test]
    fn rejects_two_parents_for_one_frame() {
        let err = FrameGraph::from_transforms(vec![
            tf("a", "c", [0.0; 3], 0),
            tf("b", "c", [0.0; 3], 0),
        ])
        .unwrap_err();
        assert_eq!(err, LookupError::DuplicateChild("c".into()));
    }
}
