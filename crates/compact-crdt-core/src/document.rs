//! Replica-owned document.
//!
//! A [`Document`] pairs a [`DocumentRoot`] with the replica's [`HlcClock`],
//! so every local mutation is stamped with a fresh dot and every applied
//! diff advances the clock past the sender's dots.

use crate::diff::{apply_diff, make_diff, ApplyReport, DiffEnvelope, DiffError};
use crate::hlc::{Hlc, HlcClock, NodeId, SystemClock, WallClock};
use crate::map::{DocumentRoot, Entry, MapError, MapNode};
use crate::path::Path;
use crate::version_vector::VersionVector;
use serde_json::Value;

/// A CRDT document owned by one replica.
#[derive(Debug)]
pub struct Document<C = SystemClock> {
    root: DocumentRoot,
    clock: HlcClock<C>,
}

impl Document<SystemClock> {
    /// Create a new empty document for `node_id` driven by the system time.
    #[must_use]
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self::with_clock(node_id, SystemClock)
    }
}

impl<C: WallClock> Document<C> {
    /// Create a new empty document for `node_id` driven by `wall`.
    #[must_use]
    pub fn with_clock(node_id: impl Into<NodeId>, wall: C) -> Self {
        let mut clock = HlcClock::with_wall_clock(node_id, wall);
        let root = MapNode::root(&clock.tick());
        Self { root, clock }
    }

    /// Resume a persisted root as `node_id`.
    ///
    /// The clock continues after every dot the root has seen, so new writes
    /// never reuse one of this node's earlier dots.
    #[must_use]
    pub fn from_root(root: DocumentRoot, node_id: impl Into<NodeId>, wall: C) -> Self {
        let node_id = node_id.into();
        let seen = root.derive_version_vector();
        let last = seen
            .get(node_id.as_str())
            .cloned()
            .unwrap_or_else(|| Hlc::new(node_id, 0));
        let mut clock = HlcClock::resume(last, wall);
        if let Some(max) = seen.max_dot() {
            clock.observe(max);
        }
        Self { root, clock }
    }

    /// The replica's node ID.
    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        self.clock.node_id()
    }

    /// The underlying CRDT tree.
    #[must_use]
    pub fn root(&self) -> &DocumentRoot {
        &self.root
    }

    /// Consume the document, returning its CRDT tree.
    #[must_use]
    pub fn into_root(self) -> DocumentRoot {
        self.root
    }

    /// Last dot issued or observed.
    #[must_use]
    pub fn clock(&self) -> &Hlc {
        self.clock.current()
    }

    /// Set a value at the given path.
    ///
    /// Returns the dot stamped on the write.
    ///
    /// # Errors
    ///
    /// Returns error if `path` is the root.
    pub fn set(&mut self, path: &Path, value: Value) -> Result<Hlc, MapError> {
        let dot = self.clock.tick();
        self.root.set_at_path(path, value, &dot)?;
        tracing::debug!(node_id = %self.node_id(), path = %path, dot = %dot, "Set register");
        Ok(dot)
    }

    /// Remove the entry at the given path.
    ///
    /// The tombstone records everything this replica has seen plus a fresh
    /// dot, so only writes it has not witnessed can bring the key back.
    ///
    /// # Errors
    ///
    /// Returns error if `path` is the root.
    pub fn remove(&mut self, path: &Path) -> Result<Hlc, MapError> {
        let dot = self.clock.tick();
        let summary = self
            .root
            .derive_version_vector()
            .merge_dot(&dot)
            .into_owned();
        self.root.remove_at_path(path, &summary)?;
        tracing::debug!(node_id = %self.node_id(), path = %path, dot = %dot, "Removed key");
        Ok(dot)
    }

    /// Create a counter at the given path.
    ///
    /// # Errors
    ///
    /// Returns error if `path` is the root.
    pub fn init_counter(&mut self, path: &Path, initial: i64) -> Result<Hlc, MapError> {
        let dot = self.clock.tick();
        self.root.init_counter_at_path(path, initial, &dot)?;
        tracing::debug!(node_id = %self.node_id(), path = %path, initial, "Initialized counter");
        Ok(dot)
    }

    /// Add `amount` to the counter at the given path, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns error if `path` is the root.
    pub fn increment(&mut self, path: &Path, amount: i64) -> Result<Hlc, MapError> {
        let dot = self.clock.tick();
        self.root.add_to_counter_at_path(path, amount, &dot)?;
        tracing::debug!(node_id = %self.node_id(), path = %path, amount, "Incremented counter");
        Ok(dot)
    }

    /// Get the visible value at the given path.
    ///
    /// Maps come back as JSON objects and counters as numbers.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Value> {
        if path.is_root() {
            return Some(self.root.materialize());
        }
        match self.root.entry_at(path)? {
            Entry::Register(register) => Some(register.value().clone()),
            Entry::Counter(counter) => Some(Value::from(counter.value())),
            Entry::Map(node) => Some(node.materialize()),
        }
    }

    /// Plain JSON view of the whole document.
    #[must_use]
    pub fn materialize(&self) -> Value {
        self.root.materialize()
    }

    /// Everything this replica has seen.
    #[must_use]
    pub fn version_vector(&self) -> VersionVector {
        self.root.derive_version_vector()
    }

    /// Diff of this document against a peer's version vector.
    #[must_use]
    pub fn diff_for(&self, remote: &VersionVector) -> DiffEnvelope {
        let diff = make_diff(&self.root, remote);
        tracing::debug!(node_id = %self.node_id(), ops = diff.len(), "Created diff");
        diff
    }

    /// Apply a diff from another replica.
    ///
    /// # Errors
    ///
    /// Returns error if the diff is invalid or was made against state this
    /// replica has not seen; the document is left unchanged.
    pub fn apply(&mut self, diff: &DiffEnvelope) -> Result<ApplyReport, DiffError> {
        let report = apply_diff(&mut self.root, diff)?;
        if let Some(max) = diff.vv.max_dot() {
            self.clock.observe(max);
        }
        Ok(report)
    }

    /// Pull everything unseen from another replica.
    ///
    /// # Errors
    ///
    /// Returns error if the generated diff is invalid.
    pub fn merge<D: WallClock>(&mut self, other: &Document<D>) -> Result<ApplyReport, DiffError> {
        let diff = other.diff_for(&self.version_vector());
        self.apply(&diff)
    }
}
