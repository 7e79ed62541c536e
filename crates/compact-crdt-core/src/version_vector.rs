//! Version vectors: the latest dot seen from each node.
//!
//! A version vector is a per-node watermark. Containing a dot from node `A`
//! means having seen every write `A` issued up to and including that dot.

use crate::hlc::{Hlc, NodeId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::btree_map::{self, BTreeMap};

/// Mapping from node ID to the latest dot known for that node.
///
/// Ordered by node ID so iteration and encoding are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionVector(BTreeMap<NodeId, Hlc>);

impl VersionVector {
    /// Create an empty version vector.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Latest dot known for `node_id`.
    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<&Hlc> {
        self.0.get(node_id)
    }

    /// Number of nodes tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if no node is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the stored dots in node ID order.
    pub fn dots(&self) -> btree_map::Values<'_, NodeId, Hlc> {
        self.0.values()
    }

    /// Check whether `dot` has been seen.
    #[must_use]
    pub fn contains(&self, dot: &Hlc) -> bool {
        self.0.get(&dot.node_id).is_some_and(|seen| seen >= dot)
    }

    /// Check whether every dot of `other` has been seen.
    #[must_use]
    pub fn covers(&self, other: &VersionVector) -> bool {
        other.dots().all(|dot| self.contains(dot))
    }

    /// Compare causal coverage of two vectors.
    ///
    /// Returns `None` when the vectors are concurrent, i.e. each is ahead
    /// of the other on at least one node.
    #[must_use]
    pub fn compare(&self, other: &VersionVector) -> Option<Ordering> {
        let mut self_ahead = false;
        let mut other_ahead = false;

        // Union of both key sets
        for node_id in self.0.keys().chain(other.0.keys()) {
            match (self.0.get(node_id), other.0.get(node_id)) {
                (Some(_), None) => self_ahead = true,
                (None, Some(_)) => other_ahead = true,
                (Some(a), Some(b)) => match a.cmp(b) {
                    Ordering::Greater => self_ahead = true,
                    Ordering::Less => other_ahead = true,
                    Ordering::Equal => {}
                },
                (None, None) => {}
            }
            if self_ahead && other_ahead {
                return None;
            }
        }

        Some(match (self_ahead, other_ahead) {
            (true, _) => Ordering::Greater,
            (_, true) => Ordering::Less,
            _ => Ordering::Equal,
        })
    }

    /// Per-node maximum of two vectors.
    #[must_use]
    pub fn merge(&self, other: &VersionVector) -> VersionVector {
        let mut out = self.clone();
        out.absorb_all(other);
        out
    }

    /// Merge a single dot.
    ///
    /// Returns `Cow::Borrowed(self)` when the dot does not advance the vector.
    #[must_use]
    pub fn merge_dot(&self, dot: &Hlc) -> Cow<'_, VersionVector> {
        if self.contains(dot) {
            Cow::Borrowed(self)
        } else {
            let mut out = self.clone();
            out.0.insert(dot.node_id.clone(), dot.clone());
            Cow::Owned(out)
        }
    }

    /// Merge a single dot in place.
    ///
    /// Returns `true` if the vector advanced.
    pub fn absorb(&mut self, dot: &Hlc) -> bool {
        match self.0.get_mut(&dot.node_id) {
            Some(seen) if *seen >= *dot => false,
            Some(seen) => {
                *seen = dot.clone();
                true
            }
            None => {
                self.0.insert(dot.node_id.clone(), dot.clone());
                true
            }
        }
    }

    /// Merge another vector in place.
    pub fn absorb_all(&mut self, other: &VersionVector) {
        for dot in other.dots() {
            self.absorb(dot);
        }
    }

    /// The greatest dot in the vector.
    #[must_use]
    pub fn max_dot(&self) -> Option<&Hlc> {
        self.dots().max()
    }
}

impl PartialOrd for VersionVector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other)
    }
}

impl From<Hlc> for VersionVector {
    fn from(dot: Hlc) -> Self {
        let mut vv = Self::new();
        vv.0.insert(dot.node_id.clone(), dot);
        vv
    }
}

impl FromIterator<Hlc> for VersionVector {
    fn from_iter<I: IntoIterator<Item = Hlc>>(iter: I) -> Self {
        let mut vv = Self::new();
        for dot in iter {
            vv.absorb(&dot);
        }
        vv
    }
}

impl<'a> IntoIterator for &'a VersionVector {
    type Item = &'a Hlc;
    type IntoIter = btree_map::Values<'a, NodeId, Hlc>;

    fn into_iter(self) -> Self::IntoIter {
        self.dots()
    }
}

// Wire form: a sequence of (node_id, timestamp, counter) triples.
impl Serialize for VersionVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            self.dots()
                .map(|dot| (&dot.node_id, dot.timestamp, dot.counter)),
        )
    }
}

impl<'de> Deserialize<'de> for VersionVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let triples = Vec::<(NodeId, u64, u32)>::deserialize(deserializer)?;
        Ok(triples
            .into_iter()
            .map(|(node_id, timestamp, counter)| Hlc {
                timestamp,
                counter,
                node_id,
            })
            .collect())
    }
}
