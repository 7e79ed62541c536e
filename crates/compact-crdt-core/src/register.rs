//! Last-Writer-Wins register leaf.
//!
//! The visible value is the write with the greatest dot. Writes that lost to
//! it are kept per writer, so that when a remove covers the winner but not
//! a concurrent older write, every replica resolves to that same older write.

use crate::hlc::{Hlc, NodeId};
use crate::version_vector::VersionVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single write to a register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Write<T> {
    /// The written value
    pub value: T,
    /// Dot of the write
    pub dot: Hlc,
}

/// A Last-Writer-Wins register holding a value with its dot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register<T = serde_json::Value> {
    /// The visible value
    value: T,
    /// Dot of the visible value
    dot: Hlc,
    /// Latest losing write per other writer; every dot here is below `dot`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    shadowed: BTreeMap<NodeId, Write<T>>,
}

impl<T> Register<T> {
    /// Create a new register with an initial value.
    #[must_use]
    pub fn new(value: T, dot: Hlc) -> Self {
        Self {
            value,
            dot,
            shadowed: BTreeMap::new(),
        }
    }

    /// The visible value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Dot of the visible value.
    #[must_use]
    pub fn dot(&self) -> &Hlc {
        &self.dot
    }

    /// Update the register if `dot` is at least the current dot.
    ///
    /// Returns `true` if the visible value was replaced. Older writes never
    /// change the visible value.
    pub fn set(&mut self, value: T, dot: Hlc) -> bool {
        if dot >= self.dot {
            let previous = Write {
                value: std::mem::replace(&mut self.value, value),
                dot: std::mem::replace(&mut self.dot, dot),
            };
            self.shadowed.remove(&self.dot.node_id);
            if previous.dot.node_id != self.dot.node_id {
                self.shadowed.insert(previous.dot.node_id.clone(), previous);
            }
            return true;
        }

        if dot.node_id != self.dot.node_id {
            let newer = self
                .shadowed
                .get(&dot.node_id)
                .map_or(true, |existing| dot > existing.dot);
            if newer {
                self.shadowed.insert(dot.node_id.clone(), Write { value, dot });
            }
        }
        false
    }

    /// Summary of every writer that touched this register.
    #[must_use]
    pub fn version_vector(&self) -> VersionVector {
        self.writes().map(|write| write.dot.clone()).collect()
    }

    /// Iterate over the visible write followed by the shadowed ones.
    pub fn writes(&self) -> impl Iterator<Item = Write<&T>> + '_ {
        std::iter::once(Write {
            value: &self.value,
            dot: self.dot.clone(),
        })
        .chain(self.shadowed.values().map(|write| Write {
            value: &write.value,
            dot: write.dot.clone(),
        }))
    }

    /// Drop every write covered by `tombstone`.
    ///
    /// Returns `false` when no write survives.
    pub fn prune(&mut self, tombstone: &VersionVector) -> bool {
        self.shadowed.retain(|_, write| !tombstone.contains(&write.dot));
        if !tombstone.contains(&self.dot) {
            return true;
        }

        let best = self
            .shadowed
            .values()
            .max_by(|a, b| a.dot.cmp(&b.dot))
            .map(|write| write.dot.node_id.clone());
        match best.and_then(|node_id| self.shadowed.remove(&node_id)) {
            Some(write) => {
                self.value = write.value;
                self.dot = write.dot;
                true
            }
            None => false,
        }
    }
}
