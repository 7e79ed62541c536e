//! Recursive map CRDT with add-wins removal.
//!
//! Every node carries `dots`, a version vector of every write that touched
//! its subtree, so diff generation can skip subtrees a peer has already
//! seen. Removed keys leave a tombstone: the version vector the remover had
//! witnessed. A write survives a remove unless the tombstone covers its dot.

use crate::counter::{Contribution, Counter, CounterError};
use crate::hlc::{Hlc, NodeId};
use crate::path::Path;
use crate::register::Register;
use crate::version_vector::VersionVector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The top-level map of a replica's document.
pub type DocumentRoot = MapNode;

/// An entry in a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entry {
    /// Nested map
    Map(MapNode),
    /// Last-writer-wins value
    Register(Register),
    /// PN-counter
    Counter(Counter),
}

impl Entry {
    /// Get the nested map, if this entry is one.
    #[must_use]
    pub fn as_map(&self) -> Option<&MapNode> {
        match self {
            Entry::Map(node) => Some(node),
            Entry::Register(_) | Entry::Counter(_) => None,
        }
    }

    /// Get the register, if this entry is one.
    #[must_use]
    pub fn as_register(&self) -> Option<&Register> {
        match self {
            Entry::Register(register) => Some(register),
            Entry::Map(_) | Entry::Counter(_) => None,
        }
    }

    /// Get the counter, if this entry is one.
    #[must_use]
    pub fn as_counter(&self) -> Option<&Counter> {
        match self {
            Entry::Counter(counter) => Some(counter),
            Entry::Map(_) | Entry::Register(_) => None,
        }
    }

    /// Drop everything covered by `tombstone`; `false` if nothing is left.
    fn prune(&mut self, tombstone: &VersionVector) -> bool {
        match self {
            Entry::Map(node) => node.prune(tombstone),
            Entry::Register(register) => register.prune(tombstone),
            Entry::Counter(counter) => counter.prune(tombstone),
        }
    }

    fn collect_dots(&self, vv: &mut VersionVector) {
        match self {
            Entry::Map(node) => node.collect_dots(vv),
            Entry::Register(register) => {
                for write in register.writes() {
                    vv.absorb(&write.dot);
                }
            }
            Entry::Counter(counter) => {
                vv.absorb_all(counter.dots());
                vv.absorb_all(counter.actor_dots());
            }
        }
    }
}

/// A map node holding named entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapNode {
    /// Live entries
    entries: BTreeMap<String, Entry>,
    /// Every dot that touched this subtree
    dots: VersionVector,
    /// Per-key tombstones: what the remover had seen at removal time
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    removed: BTreeMap<String, VersionVector>,
}

impl MapNode {
    /// Create an empty map with no dots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty document root stamped with the replica's first dot.
    #[must_use]
    pub fn root(dot: &Hlc) -> DocumentRoot {
        Self {
            dots: VersionVector::from(dot.clone()),
            ..Self::default()
        }
    }

    /// Live entries by key.
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, Entry> {
        &self.entries
    }

    /// Get a live entry by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Dots of every write that touched this subtree.
    #[must_use]
    pub fn dots(&self) -> &VersionVector {
        &self.dots
    }

    /// Tombstones by key.
    #[must_use]
    pub fn tombstones(&self) -> &BTreeMap<String, VersionVector> {
        &self.removed
    }

    /// Get the entry at `path`. The root path names no entry.
    #[must_use]
    pub fn entry_at(&self, path: &Path) -> Option<&Entry> {
        let (key, parents) = path.split_last()?;
        let mut node = self;
        for segment in parents {
            match node.entries.get(segment.as_str())? {
                Entry::Map(child) => node = child,
                Entry::Register(_) | Entry::Counter(_) => return None,
            }
        }
        node.entries.get(key)
    }

    /// Write `value` to the register at `path`, creating missing maps.
    ///
    /// A local write always takes effect; tombstones are consulted only when
    /// applying remote diffs. Returns `true` if the visible value changed.
    ///
    /// # Errors
    ///
    /// Returns error if `path` is the root.
    pub fn set_at_path(&mut self, path: &Path, value: Value, dot: &Hlc) -> Result<bool, MapError> {
        let (key, parents) = path.split_last().ok_or(MapError::EmptyPath)?;
        let changed = self.ensure_path(parents, &VersionVector::from(dot.clone()), |parent| {
            match parent.entries.get_mut(key) {
                Some(Entry::Register(register)) => register.set(value, dot.clone()),
                _ => {
                    let register = Register::new(value, dot.clone());
                    parent.entries.insert(key.to_string(), Entry::Register(register));
                    true
                }
            }
        });
        Ok(changed)
    }

    /// Remove the entry at `path`, recording `summary` as its tombstone.
    ///
    /// Only what `summary` covers is removed: writes it has not witnessed
    /// stay visible (add-wins).
    ///
    /// # Errors
    ///
    /// Returns error if `path` is the root.
    pub fn remove_at_path(&mut self, path: &Path, summary: &VersionVector) -> Result<(), MapError> {
        let (key, parents) = path.split_last().ok_or(MapError::EmptyPath)?;
        self.remove_key(parents, key, summary);
        Ok(())
    }

    /// Record a tombstone for `key` under the map at `parents`.
    ///
    /// Every ancestor's dots absorb `summary` so diff pruning reaches the
    /// tombstone. Missing ancestors are created so the tombstone is kept. A
    /// register or counter on the way is left alone: whatever it holds was
    /// written over the removed key's map, and no tombstone is recorded.
    pub fn remove_key(&mut self, parents: &[String], key: &str, summary: &VersionVector) {
        let Some(parent) = self.locate_for_remove(parents, summary) else {
            return;
        };

        let tombstone = parent.removed.entry(key.to_string()).or_default();
        tombstone.absorb_all(summary);

        let alive = match parent.entries.get_mut(key) {
            Some(entry) => entry.prune(tombstone),
            None => return,
        };
        if !alive {
            parent.entries.remove(key);
        }
    }

    /// Create a counter at `path` holding `initial`, contributed by the
    /// dot's node.
    ///
    /// An existing counter keeps its contributions and only records the dot.
    ///
    /// # Errors
    ///
    /// Returns error if `path` is the root.
    pub fn init_counter_at_path(
        &mut self,
        path: &Path,
        initial: i64,
        dot: &Hlc,
    ) -> Result<(), MapError> {
        let (key, parents) = path.split_last().ok_or(MapError::EmptyPath)?;
        self.ensure_path(parents, &VersionVector::from(dot.clone()), |parent| {
            match parent.entries.get_mut(key) {
                Some(Entry::Counter(counter)) => counter.touch(dot),
                _ => {
                    let counter = Counter::new(initial, &dot.node_id, dot)?;
                    parent.entries.insert(key.to_string(), Entry::Counter(counter));
                }
            }
            Ok(())
        })
    }

    /// Add `amount` to the dot node's bucket of the counter at `path`,
    /// creating the counter if needed.
    ///
    /// # Errors
    ///
    /// Returns error if `path` is the root.
    pub fn add_to_counter_at_path(
        &mut self,
        path: &Path,
        amount: i64,
        dot: &Hlc,
    ) -> Result<(), MapError> {
        let (key, parents) = path.split_last().ok_or(MapError::EmptyPath)?;
        self.ensure_path(parents, &VersionVector::from(dot.clone()), |parent| {
            match parent.entries.get_mut(key) {
                Some(Entry::Counter(counter)) => counter.add(&dot.node_id, amount, dot)?,
                _ => {
                    let counter = Counter::new(amount, &dot.node_id, dot)?;
                    parent.entries.insert(key.to_string(), Entry::Counter(counter));
                }
            }
            Ok(())
        })
    }

    /// Merge a replicated counter contribution at `path`.
    ///
    /// Returns `true` if the counter changed.
    ///
    /// # Errors
    ///
    /// Returns error if `path` is the root.
    pub fn merge_counter_at_path(
        &mut self,
        path: &Path,
        actor: &NodeId,
        contribution: Contribution,
        dot: &Hlc,
    ) -> Result<bool, MapError> {
        let (key, parents) = path.split_last().ok_or(MapError::EmptyPath)?;
        let changed = self.ensure_path(parents, &VersionVector::from(dot.clone()), |parent| {
            match parent.entries.get_mut(key) {
                Some(Entry::Counter(counter)) => counter.merge_contribution(actor, contribution, dot),
                _ => {
                    let counter = Counter::from_contribution(actor, contribution, dot);
                    parent.entries.insert(key.to_string(), Entry::Counter(counter));
                    true
                }
            }
        });
        Ok(changed)
    }

    /// Everything this replica has seen: node dots, leaf dots, counter
    /// actor dots, and tombstones, merged into one vector.
    #[must_use]
    pub fn derive_version_vector(&self) -> VersionVector {
        let mut vv = VersionVector::new();
        self.collect_dots(&mut vv);
        vv
    }

    /// Check whether the tombstone of `key` already witnessed `dot`.
    #[must_use]
    pub fn should_suppress_by_remove(&self, key: &str, dot: &Hlc) -> bool {
        self.removed
            .get(key)
            .is_some_and(|tombstone| tombstone.contains(dot))
    }

    /// Check whether a write at `path` stamped `dot` was witnessed by the
    /// tombstone of any key along the path.
    #[must_use]
    pub fn is_suppressed(&self, path: &Path, dot: &Hlc) -> bool {
        let mut node = self;
        for key in path.segments() {
            if node.should_suppress_by_remove(key, dot) {
                return true;
            }
            match node.entries.get(key.as_str()) {
                Some(Entry::Map(child)) => node = child,
                _ => return false,
            }
        }
        false
    }

    /// Plain JSON view of the live content.
    ///
    /// Maps without any live value are left out, since no diff operation
    /// carries an empty map to other replicas.
    #[must_use]
    pub fn materialize(&self) -> Value {
        let mut object = serde_json::Map::new();
        for (key, entry) in &self.entries {
            let value = match entry {
                Entry::Register(register) => register.value().clone(),
                Entry::Counter(counter) => Value::from(counter.value()),
                Entry::Map(node) => match node.materialize() {
                    Value::Object(child) if child.is_empty() => continue,
                    child => child,
                },
            };
            object.insert(key.clone(), value);
        }
        Value::Object(object)
    }

    /// Merge `vv` into this node's dots.
    pub(crate) fn absorb_dots(&mut self, vv: &VersionVector) {
        self.dots.absorb_all(vv);
    }

    /// Run `visit` on the map at `keys`, creating missing maps and merging
    /// `seen` into the dots of `self` and every node on the way.
    fn ensure_path<R>(
        &mut self,
        keys: &[String],
        seen: &VersionVector,
        visit: impl FnOnce(&mut MapNode) -> R,
    ) -> R {
        self.dots.absorb_all(seen);
        let Some((key, rest)) = keys.split_first() else {
            return visit(self);
        };

        let slot = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Entry::Map(MapNode::new()));
        match slot {
            Entry::Map(child) => child.ensure_path(rest, seen, visit),
            leaf => {
                // No schema: a path through a leaf replaces the leaf.
                tracing::debug!(key = %key, "replacing leaf with map");
                let mut child = MapNode::new();
                let out = child.ensure_path(rest, seen, visit);
                *leaf = Entry::Map(child);
                out
            }
        }
    }

    /// Walk to the map at `keys` for a removal, merging `summary` into the
    /// dots of `self` and every map on the way. Missing maps are created;
    /// `None` if a register or counter sits on the path.
    fn locate_for_remove(
        &mut self,
        keys: &[String],
        summary: &VersionVector,
    ) -> Option<&mut MapNode> {
        self.dots.absorb_all(summary);
        let mut node = self;
        for key in keys {
            let slot = node
                .entries
                .entry(key.clone())
                .or_insert_with(|| Entry::Map(MapNode::new()));
            match slot {
                Entry::Map(child) => {
                    child.dots.absorb_all(summary);
                    node = child;
                }
                Entry::Register(_) | Entry::Counter(_) => {
                    tracing::trace!(key = %key, "Remove under a leaf ignored");
                    return None;
                }
            }
        }
        Some(node)
    }

    /// Drop everything covered by `tombstone`; `false` if the whole subtree
    /// was witnessed.
    fn prune(&mut self, tombstone: &VersionVector) -> bool {
        if tombstone.covers(&self.dots) {
            return false;
        }
        self.entries.retain(|_, entry| entry.prune(tombstone));
        true
    }

    fn collect_dots(&self, vv: &mut VersionVector) {
        vv.absorb_all(&self.dots);
        for tombstone in self.removed.values() {
            vv.absorb_all(tombstone);
        }
        for entry in self.entries.values() {
            entry.collect_dots(vv);
        }
    }
}

/// Errors for map operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// Operation needs at least one key
    #[error("path must name at least one key")]
    EmptyPath,
    /// Counter invariant violated
    #[error(transparent)]
    Counter(#[from] CounterError),
}
