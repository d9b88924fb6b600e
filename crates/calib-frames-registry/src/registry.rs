//! Named transforms with forest invariants.

use calib_frames_core::{EdgeSource, FrameTransform, Timestamp};
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Where a registry entry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// Installed from configuration at startup; immutable afterwards.
    Static,
    /// Added through the runtime mutation interface.
    Dynamic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub transform: FrameTransform,
    pub source: EntrySource,
}

/// Rejected registry mutations. A rejected call leaves the registry untouched.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("'{name}' would close a cycle: '{parent}' is reachable from '{child}'")]
    CycleRejected {
        name: String,
        parent: String,
        child: String,
    },
    #[error("'{name}' claims child frame '{child}', already owned by '{owner}'")]
    DuplicateChild {
        name: String,
        child: String,
        owner: String,
    },
    #[error("no entry named '{0}'")]
    NotFound(String),
    #[error("'{0}' is a reserved entry name")]
    ReservedName(String),
    #[error("'{0}' is a static entry and cannot be changed at runtime")]
    StaticEntry(String),
    #[error("entry names must not be empty")]
    EmptyName,
}

/// The entry that gives a frame its parent.
#[derive(Clone, Debug)]
struct ParentLink {
    owner: String,
    parent: String,
}

#[derive(Default)]
struct RegistryState {
    entries: BTreeMap<String, RegistryEntry>,
    /// child frame -> owning entry and its parent frame, reserved edges included.
    parents: HashMap<String, ParentLink>,
}

impl RegistryState {
    /// Check that `name: parent → child` can be installed, treating any
    /// existing edge owned by `name` as already gone.
    fn check(&self, name: &str, parent: &str, child: &str) -> Result<(), RegistryError> {
        if let Some(link) = self.parents.get(child) {
            if link.owner != name {
                return Err(RegistryError::DuplicateChild {
                    name: name.to_string(),
                    child: child.to_string(),
                    owner: link.owner.clone(),
                });
            }
        }

        // Walk up from the new parent; meeting the new child means the edge
        // would close a loop.
        let mut frame = parent;
        for _ in 0..=self.parents.len() {
            if frame == child {
                return Err(RegistryError::CycleRejected {
                    name: name.to_string(),
                    parent: parent.to_string(),
                    child: child.to_string(),
                });
            }
            match self.parents.get(frame) {
                Some(link) if link.owner != name => frame = link.parent.as_str(),
                _ => break,
            }
        }
        Ok(())
    }

    fn link(&mut self, name: &str, parent: &str, child: &str) {
        self.parents.insert(
            child.to_string(),
            ParentLink {
                owner: name.to_string(),
                parent: parent.to_string(),
            },
        );
    }

    fn unlink(&mut self, entry: &RegistryEntry) {
        let child = entry.transform.child_frame();
        if self.parents.get(child).is_some_and(|l| l.owner == entry.name) {
            self.parents.remove(child);
        }
    }

    fn insert(&mut self, entry: RegistryEntry) -> Result<Option<RegistryEntry>, RegistryError> {
        let tf = &entry.transform;
        self.check(&entry.name, tf.parent_frame(), tf.child_frame())?;
        let previous = self.entries.remove(&entry.name);
        if let Some(prev) = &previous {
            self.unlink(prev);
        }
        self.link(&entry.name, tf.parent_frame(), tf.child_frame());
        self.entries.insert(entry.name.clone(), entry);
        Ok(previous)
    }
}

/// Startup assembly of a [`TransformRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    sources: Vec<Arc<dyn EdgeSource>>,
    statics: Vec<(String, FrameTransform)>,
}

impl RegistryBuilder {
    /// Reserve `source.name()` and its frames for a computed edge.
    pub fn edge_source(mut self, source: Arc<dyn EdgeSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn static_entry(mut self, name: impl Into<String>, transform: FrameTransform) -> Self {
        self.statics.push((name.into(), transform));
        self
    }

    pub fn build(self) -> Result<TransformRegistry, RegistryError> {
        let mut state = RegistryState::default();

        for source in &self.sources {
            let name = source.name();
            if name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if self.sources.iter().filter(|s| s.name() == name).count() > 1 {
                return Err(RegistryError::ReservedName(name.to_string()));
            }
            state.check(name, source.parent_frame(), source.child_frame())?;
            state.link(name, source.parent_frame(), source.child_frame());
        }

        let registry = TransformRegistry {
            sources: self.sources,
            state: Mutex::new(state),
        };

        for (name, transform) in self.statics {
            registry.validate_name(&name)?;
            let mut state = registry.state.lock();
            if state.entries.contains_key(&name) {
                return Err(RegistryError::StaticEntry(name));
            }
            state.insert(RegistryEntry {
                name,
                transform,
                source: EntrySource::Static,
            })?;
        }

        Ok(registry)
    }
}

/// Process-wide set of published transforms.
///
/// All mutations and snapshot copies go through a single lock; edge sources
/// are evaluated after the copy, outside of it.
pub struct TransformRegistry {
    sources: Vec<Arc<dyn EdgeSource>>,
    state: Mutex<RegistryState>,
}

impl TransformRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    fn validate_name(&self, name: &str) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.sources.iter().any(|s| s.name() == name) {
            return Err(RegistryError::ReservedName(name.to_string()));
        }
        Ok(())
    }

    /// Insert a dynamic entry or replace the one with the same name.
    ///
    /// Returns the replaced entry, if any.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, transform)))]
    pub fn upsert(
        &self,
        name: &str,
        transform: FrameTransform,
    ) -> Result<Option<RegistryEntry>, RegistryError> {
        self.validate_name(name)?;
        let (parent, child) = (
            transform.parent_frame().to_string(),
            transform.child_frame().to_string(),
        );

        let result = {
            let mut state = self.state.lock();
            if state
                .entries
                .get(name)
                .is_some_and(|e| e.source == EntrySource::Static)
            {
                Err(RegistryError::StaticEntry(name.to_string()))
            } else {
                state.insert(RegistryEntry {
                    name: name.to_string(),
                    transform,
                    source: EntrySource::Dynamic,
                })
            }
        };

        match &result {
            Ok(Some(_)) => info!("replaced '{name}': {parent} -> {child}"),
            Ok(None) => info!("added '{name}': {parent} -> {child}"),
            Err(err) => warn!("rejected upsert: {err}"),
        }
        result
    }

    /// Remove a dynamic entry. Removing an absent name is a no-op.
    pub fn remove(&self, name: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        self.validate_name(name)?;
        let removed = {
            let mut state = self.state.lock();
            match state.entries.get(name).map(|e| e.source) {
                None => None,
                Some(EntrySource::Static) => {
                    return Err(RegistryError::StaticEntry(name.to_string()));
                }
                Some(EntrySource::Dynamic) => {
                    let entry = state.entries.remove(name);
                    if let Some(entry) = &entry {
                        state.unlink(entry);
                    }
                    entry
                }
            }
        };
        if removed.is_some() {
            info!("removed '{name}'");
        }
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Result<RegistryEntry, RegistryError> {
        self.state
            .lock()
            .entries
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// All stored entries, ordered by name. Reserved edges are not included.
    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.state.lock().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Everything to publish at `now`: stored entries ordered by name, then
    /// each reserved edge that currently has a value, in registration order.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn snapshot(&self, now: Timestamp) -> Vec<FrameTransform> {
        let mut out: Vec<FrameTransform> = {
            let state = self.state.lock();
            state.entries.values().map(|e| e.transform.clone()).collect()
        };
        for source in &self.sources {
            let Some(tf) = source.current(now) else {
                continue;
            };
            if tf.parent_frame() != source.parent_frame() || tf.child_frame() != source.child_frame()
            {
                warn!(
                    "edge source '{}' produced {} -> {}, expected {} -> {}; skipping",
                    source.name(),
                    tf.parent_frame(),
                    tf.child_frame(),
                    source.parent_frame(),
                    source.child_frame()
                );
                continue;
            }
            out.push(tf);
        }
        out
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        TransformRegistry {
            sources: Vec::new(),
            state: Mutex::new(RegistryState::default()),
        }
    }
}
