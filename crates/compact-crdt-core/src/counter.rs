//! PN-counter leaf.
//!
//! Each actor owns a positive and a negative bucket. Only the actor itself
//! may grow its buckets, so replicas merge by keeping each actor's newest
//! contribution instead of adding contributions together.

use crate::hlc::{Hlc, NodeId};
use crate::version_vector::VersionVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One actor's share of a counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    /// Total added by the actor
    pub p: u64,
    /// Total subtracted by the actor
    pub n: u64,
}

/// A positive-negative counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Positive totals per actor (zero totals are not stored)
    p: BTreeMap<NodeId, u64>,
    /// Negative totals per actor (zero totals are not stored)
    n: BTreeMap<NodeId, u64>,
    /// Dot of each actor's latest contribution
    actor_dots: VersionVector,
    /// Node-level dots for diff pruning
    dots: VersionVector,
}

impl Counter {
    /// Create a counter holding `initial` contributed by `actor`.
    ///
    /// # Errors
    ///
    /// Returns error if `dot` was not issued by `actor`.
    pub fn new(initial: i64, actor: &NodeId, dot: &Hlc) -> Result<Self, CounterError> {
        let mut counter = Self::default();
        counter.add(actor, initial, dot)?;
        Ok(counter)
    }

    /// Create a counter from a single replicated contribution.
    #[must_use]
    pub fn from_contribution(actor: &NodeId, contribution: Contribution, dot: &Hlc) -> Self {
        let mut counter = Self::default();
        counter.merge_contribution(actor, contribution, dot);
        counter
    }

    /// Add `amount` (which may be negative) to `actor`'s own bucket.
    ///
    /// # Errors
    ///
    /// Returns error if `dot` was not issued by `actor`, since an actor may
    /// only write its own bucket.
    pub fn add(&mut self, actor: &NodeId, amount: i64, dot: &Hlc) -> Result<(), CounterError> {
        if *actor != dot.node_id {
            return Err(CounterError::ForeignActor {
                actor: actor.clone(),
                dot_node: dot.node_id.clone(),
            });
        }

        let bucket = if amount >= 0 { &mut self.p } else { &mut self.n };
        let total = bucket
            .get(actor)
            .copied()
            .unwrap_or(0)
            .saturating_add(amount.unsigned_abs());
        set_bucket(bucket, actor, total);

        self.actor_dots.absorb(dot);
        self.dots.absorb(dot);
        Ok(())
    }

    /// Current value: sum of positive totals minus sum of negative totals.
    #[must_use]
    pub fn value(&self) -> i64 {
        let pos: i128 = self.p.values().map(|v| i128::from(*v)).sum();
        let neg: i128 = self.n.values().map(|v| i128::from(*v)).sum();
        let value = pos - neg;
        i64::try_from(value).unwrap_or(if value > 0 { i64::MAX } else { i64::MIN })
    }

    /// `actor`'s current contribution.
    #[must_use]
    pub fn contribution(&self, actor: &NodeId) -> Contribution {
        Contribution {
            p: self.p.get(actor).copied().unwrap_or(0),
            n: self.n.get(actor).copied().unwrap_or(0),
        }
    }

    /// Dot of each actor's latest contribution.
    #[must_use]
    pub fn actor_dots(&self) -> &VersionVector {
        &self.actor_dots
    }

    /// Node-level dots.
    #[must_use]
    pub fn dots(&self) -> &VersionVector {
        &self.dots
    }

    /// Record that `dot` touched this counter without changing any bucket.
    pub fn touch(&mut self, dot: &Hlc) {
        self.dots.absorb(dot);
    }

    /// Merge a replicated contribution of `actor` stamped with `dot`.
    ///
    /// The contribution with the newer actor dot wins; equal dots take the
    /// per-sign maximum, so redelivery is a no-op. Returns `true` if a
    /// bucket changed.
    pub fn merge_contribution(
        &mut self,
        actor: &NodeId,
        contribution: Contribution,
        dot: &Hlc,
    ) -> bool {
        self.dots.absorb(dot);

        let current = self.contribution(actor);
        let next = match self.actor_dots.get(actor.as_str()) {
            Some(seen) if seen > dot => return false,
            Some(seen) if seen == dot => Contribution {
                p: current.p.max(contribution.p),
                n: current.n.max(contribution.n),
            },
            _ => contribution,
        };

        self.actor_dots.absorb(dot);
        set_bucket(&mut self.p, actor, next.p);
        set_bucket(&mut self.n, actor, next.n);
        next != current
    }

    /// Drop every contribution whose actor dot is covered by `tombstone`.
    ///
    /// Returns `false` when no contribution survives.
    pub fn prune(&mut self, tombstone: &VersionVector) -> bool {
        let covered: Vec<NodeId> = self
            .actor_dots
            .dots()
            .filter(|dot| tombstone.contains(dot))
            .map(|dot| dot.node_id.clone())
            .collect();
        if covered.is_empty() {
            return !self.actor_dots.is_empty();
        }

        for actor in &covered {
            self.p.remove(actor);
            self.n.remove(actor);
        }
        self.actor_dots = self
            .actor_dots
            .dots()
            .filter(|dot| !covered.contains(&dot.node_id))
            .cloned()
            .collect();
        !self.actor_dots.is_empty()
    }
}

fn set_bucket(bucket: &mut BTreeMap<NodeId, u64>, actor: &NodeId, total: u64) {
    if total == 0 {
        bucket.remove(actor);
    } else {
        bucket.insert(actor.clone(), total);
    }
}

/// Errors for counter operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CounterError {
    /// An actor tried to write with another node's dot
    #[error("actor {actor} cannot write with a dot issued by {dot_node}")]
    ForeignActor {
        /// Actor whose bucket was targeted
        actor: NodeId,
        /// Node that issued the dot
        dot_node: NodeId,
    },
}
