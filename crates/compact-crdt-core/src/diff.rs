//! Delta generation and application.
//!
//! [`make_diff`] walks a document against a peer's version vector and emits
//! only the operations the peer has not seen. [`apply_diff`] folds such a
//! diff into a local document; applying the same diff twice, or two diffs in
//! either order, yields the same tree.

use crate::counter::Contribution;
use crate::hlc::{Hlc, NodeId};
use crate::map::{Entry, MapError, MapNode};
use crate::path::Path;
use crate::version_vector::VersionVector;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single replicated operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOp {
    /// Register write
    SetRegister {
        /// Path of the register
        path: Path,
        /// Written value
        value: Value,
        /// Dot of the write
        write: Hlc,
    },
    /// Key removal
    RemoveKey {
        /// Path of the parent map
        path: Path,
        /// Removed key
        key: String,
        /// What the remover had witnessed
        remove_vv: VersionVector,
    },
    /// One actor's counter contribution
    CounterUpdate {
        /// Path of the counter
        path: Path,
        /// Contributing actor
        actor: NodeId,
        /// Actor's positive total
        p: u64,
        /// Actor's negative total
        n: u64,
        /// Dot of the actor's latest contribution
        dot: Hlc,
    },
}

impl DiffOp {
    fn validate(&self) -> Result<(), &'static str> {
        match self {
            DiffOp::SetRegister { path, .. } if path.is_root() => {
                Err("set_register needs a non-empty path")
            }
            DiffOp::CounterUpdate { path, .. } if path.is_root() => {
                Err("counter_update needs a non-empty path")
            }
            DiffOp::CounterUpdate { actor, dot, .. } if *actor != dot.node_id => {
                Err("counter_update dot was not issued by its actor")
            }
            _ => Ok(()),
        }
    }
}

/// A batch of operations plus the sender's version vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffEnvelope {
    /// Everything the sender had seen when the diff was made
    pub vv: VersionVector,
    /// Version vector the diff was made against; the receiver must cover it
    #[serde(default)]
    pub basis: VersionVector,
    /// Operations the receiver has not seen
    pub ops: Vec<DiffOp>,
}

impl DiffEnvelope {
    /// Check every op before anything is applied.
    ///
    /// # Errors
    ///
    /// Returns error naming the first invalid op.
    pub fn validate(&self) -> Result<(), DiffError> {
        for (index, op) in self.ops.iter().enumerate() {
            op.validate()
                .map_err(|reason| DiffError::InvalidOp { index, reason })?;
        }
        Ok(())
    }

    /// Check if the diff carries no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Outcome of applying a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Ops folded into the document (including stale writes)
    pub applied: usize,
    /// Writes dropped because a tombstone had witnessed them
    pub suppressed: usize,
}

/// Produce the operations in `local` that `remote` has not seen.
///
/// Subtrees whose dots are all covered by `remote` are skipped.
#[must_use]
pub fn make_diff(local: &MapNode, remote: &VersionVector) -> DiffEnvelope {
    let mut ops = Vec::new();
    collect_ops(local, remote, &Path::root(), &mut ops);
    DiffEnvelope {
        vv: local.derive_version_vector(),
        basis: remote.clone(),
        ops,
    }
}

fn collect_ops(node: &MapNode, remote: &VersionVector, path: &Path, ops: &mut Vec<DiffOp>) {
    if remote.covers(node.dots()) {
        return;
    }

    for (key, tombstone) in node.tombstones() {
        if !remote.covers(tombstone) {
            ops.push(DiffOp::RemoveKey {
                path: path.clone(),
                key: key.clone(),
                remove_vv: tombstone.clone(),
            });
        }
    }

    for (key, entry) in node.entries() {
        let child = path.child(key.as_str());
        match entry {
            Entry::Map(map) => collect_ops(map, remote, &child, ops),
            Entry::Register(register) => {
                for write in register.writes() {
                    if !remote.contains(&write.dot) {
                        ops.push(DiffOp::SetRegister {
                            path: child.clone(),
                            value: write.value.clone(),
                            write: write.dot,
                        });
                    }
                }
            }
            Entry::Counter(counter) => {
                for dot in counter.actor_dots() {
                    if !remote.contains(dot) {
                        let Contribution { p, n } = counter.contribution(&dot.node_id);
                        ops.push(DiffOp::CounterUpdate {
                            path: child.clone(),
                            actor: dot.node_id.clone(),
                            p,
                            n,
                            dot: dot.clone(),
                        });
                    }
                }
            }
        }
    }
}

/// Fold `diff` into `doc`.
///
/// The envelope is validated first; an invalid envelope is rejected without
/// touching `doc`. A version vector keeps only the latest dot per node, so a
/// diff made against state `doc` has not seen would leave holes behind dots
/// it advertises; such a diff is rejected too. Once every op is in, the
/// sender's version vector is absorbed into the root dots.
///
/// # Errors
///
/// Returns error if the envelope contains an invalid op or its basis is not
/// covered by `doc`.
pub fn apply_diff(doc: &mut MapNode, diff: &DiffEnvelope) -> Result<ApplyReport, DiffError> {
    diff.validate()?;
    if !doc.derive_version_vector().covers(&diff.basis) {
        tracing::debug!(basis = diff.basis.len(), "Diff made against unseen state");
        return Err(DiffError::UnseenBasis);
    }

    // Writes go first so removes land on the shape the sender had.
    let (removes, writes): (Vec<&DiffOp>, Vec<&DiffOp>) = diff
        .ops
        .iter()
        .partition(|op| matches!(op, DiffOp::RemoveKey { .. }));

    let mut report = ApplyReport::default();
    for op in writes.into_iter().chain(removes) {
        if apply_op(doc, op)? {
            report.applied += 1;
        } else {
            report.suppressed += 1;
        }
    }
    doc.absorb_dots(&diff.vv);

    tracing::debug!(
        ops = diff.ops.len(),
        applied = report.applied,
        suppressed = report.suppressed,
        "Applied diff"
    );
    Ok(report)
}

/// Returns `false` if the op was suppressed by a tombstone.
fn apply_op(doc: &mut MapNode, op: &DiffOp) -> Result<bool, DiffError> {
    match op {
        DiffOp::SetRegister { path, value, write } => {
            if doc.is_suppressed(path, write) {
                tracing::trace!(path = %path, dot = %write, "Suppressed register write");
                return Ok(false);
            }
            if !doc.set_at_path(path, value.clone(), write)? {
                tracing::trace!(path = %path, dot = %write, "Stale register write");
            }
        }
        DiffOp::RemoveKey {
            path,
            key,
            remove_vv,
        } => doc.remove_key(path.segments(), key, remove_vv),
        DiffOp::CounterUpdate {
            path,
            actor,
            p,
            n,
            dot,
        } => {
            if doc.is_suppressed(path, dot) {
                tracing::trace!(path = %path, dot = %dot, "Suppressed counter update");
                return Ok(false);
            }
            let contribution = Contribution { p: *p, n: *n };
            doc.merge_counter_at_path(path, actor, contribution, dot)?;
        }
    }
    Ok(true)
}

/// Errors for diff application.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    /// An op in the envelope is malformed
    #[error("invalid diff op #{index}: {reason}")]
    InvalidOp {
        /// Position of the op in the envelope
        index: usize,
        /// What is wrong with it
        reason: &'static str,
    },
    /// The diff was made against state this replica has not seen
    #[error("diff basis is not covered by this replica")]
    UnseenBasis,
    /// Map operation failed
    #[error(transparent)]
    Map(#[from] MapError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dot(node: &str, timestamp: u64) -> Hlc {
        Hlc::new(node, timestamp)
    }

    fn sync(from: &MapNode, to: &mut MapNode) -> ApplyReport {
        let diff = make_diff(from, &to.derive_version_vector());
        apply_diff(to, &diff).unwrap()
    }

    #[test]
    fn diff_of_empty_remote_carries_everything() {
        let mut doc = MapNode::root(&dot("A", 0));
        doc.set_at_path(&Path::parse("user.name"), json!("Alice"), &dot("A", 1))
            .unwrap();
        doc.add_to_counter_at_path(&Path::parse("visits"), 2, &dot("A", 2))
            .unwrap();

        let diff = make_diff(&doc, &VersionVector::new());

        assert_eq!(diff.len(), 2);
        assert_eq!(diff.vv, doc.derive_version_vector());

        let mut other = MapNode::root(&dot("B", 0));
        let report = apply_diff(&mut other, &diff).unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(other.materialize(), doc.materialize());
    }

    #[test]
    fn scenario_later_write_survives_remove() {
        let mut doc_a = MapNode::root(&dot("A", 1));
        let mut doc_b = MapNode::root(&dot("B", 1));
        let path = Path::parse("user.name");

        doc_a.set_at_path(&path, json!("Alice"), &dot("A", 2)).unwrap();
        sync(&doc_a, &mut doc_b);
        assert_eq!(doc_b.materialize(), json!({"user": {"name": "Alice"}}));

        let summary = doc_b
            .derive_version_vector()
            .merge_dot(&dot("B", 3))
            .into_owned();
        doc_b.remove_at_path(&path, &summary).unwrap();
        assert_eq!(doc_b.materialize(), json!({}));

        doc_a.set_at_path(&path, json!("Alice Cooper"), &dot("A", 3))
            .unwrap();
        sync(&doc_a, &mut doc_b);

        assert_eq!(doc_b.materialize(), json!({"user": {"name": "Alice Cooper"}}));

        sync(&doc_b, &mut doc_a);
        assert_eq!(doc_a.materialize(), doc_b.materialize());
    }

    #[test]
    fn add_wins_over_concurrent_remove() {
        let mut doc_a = MapNode::root(&dot("A", 0));
        let mut doc_b = MapNode::root(&dot("B", 0));
        doc_a.set_at_path(&Path::parse("k"), json!(1), &dot("A", 1)).unwrap();
        sync(&doc_a, &mut doc_b);

        // B removes having seen A1; A concurrently writes A2.
        let summary: VersionVector = [dot("A", 1), dot("B", 2)].into_iter().collect();
        doc_b.remove_at_path(&Path::parse("k"), &summary).unwrap();
        doc_a.set_at_path(&Path::parse("k"), json!(2), &dot("A", 2)).unwrap();

        sync(&doc_a, &mut doc_b);
        sync(&doc_b, &mut doc_a);

        assert_eq!(doc_a.materialize(), json!({"k": 2}));
        assert_eq!(doc_b.materialize(), json!({"k": 2}));
    }

    #[test]
    fn covered_write_stays_removed() {
        let mut doc = MapNode::root(&dot("B", 0));
        let summary: VersionVector = [dot("A", 1), dot("B", 2)].into_iter().collect();
        doc.remove_at_path(&Path::parse("k"), &summary).unwrap();

        let diff = DiffEnvelope {
            vv: VersionVector::from(dot("A", 1)),
            basis: VersionVector::new(),
            ops: vec![DiffOp::SetRegister {
                path: Path::parse("k"),
                value: json!("late"),
                write: dot("A", 1),
            }],
        };
        let report = apply_diff(&mut doc, &diff).unwrap();

        assert_eq!(report, ApplyReport { applied: 0, suppressed: 1 });
        assert_eq!(doc.materialize(), json!({}));
    }

    #[test]
    fn apply_is_idempotent() {
        let mut source = MapNode::root(&dot("A", 0));
        source
            .set_at_path(&Path::parse("a.b"), json!("x"), &dot("A", 1))
            .unwrap();
        source
            .add_to_counter_at_path(&Path::parse("n"), 3, &dot("A", 2))
            .unwrap();
        source
            .remove_at_path(&Path::parse("gone"), &VersionVector::from(dot("A", 3)))
            .unwrap();
        let diff = make_diff(&source, &VersionVector::new());

        let mut once = MapNode::root(&dot("B", 0));
        apply_diff(&mut once, &diff).unwrap();
        let mut twice = once.clone();
        apply_diff(&mut twice, &diff).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn apply_commutes() {
        let mut doc_a = MapNode::root(&dot("A", 0));
        doc_a.set_at_path(&Path::parse("x"), json!("a"), &dot("A", 5)).unwrap();
        doc_a
            .remove_at_path(&Path::parse("y"), &VersionVector::from(dot("C", 1)))
            .unwrap();
        let mut doc_b = MapNode::root(&dot("B", 0));
        doc_b.set_at_path(&Path::parse("x"), json!("b"), &dot("B", 5)).unwrap();
        doc_b.set_at_path(&Path::parse("y"), json!("c"), &dot("C", 1)).unwrap();

        let d1 = make_diff(&doc_a, &VersionVector::new());
        let d2 = make_diff(&doc_b, &VersionVector::new());

        let mut left = MapNode::root(&dot("Z", 0));
        apply_diff(&mut left, &d1).unwrap();
        apply_diff(&mut left, &d2).unwrap();
        let mut right = MapNode::root(&dot("Z", 0));
        apply_diff(&mut right, &d2).unwrap();
        apply_diff(&mut right, &d1).unwrap();

        assert_eq!(left.materialize(), json!({"x": "b"}));
        assert_eq!(left, right);
    }

    #[test]
    fn counters_converge() {
        let path = Path::parse("score");
        let mut doc_a = MapNode::root(&dot("A", 0));
        let mut doc_b = MapNode::root(&dot("B", 0));
        doc_a.add_to_counter_at_path(&path, 5, &dot("A", 1)).unwrap();
        doc_b.add_to_counter_at_path(&path, -2, &dot("B", 1)).unwrap();

        sync(&doc_a, &mut doc_b);
        sync(&doc_b, &mut doc_a);
        // Redelivery does not double count.
        apply_diff(&mut doc_a, &make_diff(&doc_b, &VersionVector::new())).unwrap();

        assert_eq!(doc_a.materialize(), json!({"score": 3}));
        assert_eq!(doc_b.materialize(), json!({"score": 3}));
    }

    #[test]
    fn caught_up_peer_gets_empty_diff() {
        let mut doc_a = MapNode::root(&dot("A", 0));
        let mut doc_b = MapNode::root(&dot("B", 0));
        doc_a.set_at_path(&Path::parse("a"), json!(1), &dot("A", 1)).unwrap();
        doc_b.set_at_path(&Path::parse("b"), json!(2), &dot("B", 1)).unwrap();
        doc_b
            .remove_at_path(&Path::parse("a"), &VersionVector::from(dot("B", 2)))
            .unwrap();

        sync(&doc_a, &mut doc_b);
        sync(&doc_b, &mut doc_a);

        let vv_b = doc_b.derive_version_vector();
        assert!(vv_b.covers(&doc_a.derive_version_vector()));
        assert!(make_diff(&doc_a, &vv_b).is_empty());
        assert!(make_diff(&doc_b, &doc_a.derive_version_vector()).is_empty());
    }

    #[test]
    fn invalid_envelope_is_rejected_whole() {
        let mut doc = MapNode::root(&dot("B", 0));
        let before = doc.clone();
        let diff = DiffEnvelope {
            vv: VersionVector::from(dot("A", 2)),
            basis: VersionVector::new(),
            ops: vec![
                DiffOp::SetRegister {
                    path: Path::parse("ok"),
                    value: json!(1),
                    write: dot("A", 1),
                },
                DiffOp::CounterUpdate {
                    path: Path::parse("n"),
                    actor: NodeId::new("A"),
                    p: 1,
                    n: 0,
                    dot: dot("C", 2),
                },
            ],
        };

        let err = apply_diff(&mut doc, &diff).unwrap_err();

        assert!(matches!(err, DiffError::InvalidOp { index: 1, .. }));
        assert_eq!(doc, before);
    }

    #[test]
    fn diff_for_another_replica_is_rejected() {
        let mut doc_a = MapNode::root(&dot("A", 0));
        let mut doc_c = MapNode::root(&dot("C", 0));
        doc_a.set_at_path(&Path::parse("x"), json!(1), &dot("A", 1)).unwrap();
        sync(&doc_a, &mut doc_c);
        doc_a.set_at_path(&Path::parse("z"), json!(2), &dot("A", 2)).unwrap();
        let for_c = make_diff(&doc_a, &doc_c.derive_version_vector());

        // B never saw x, so taking z alone would hide x behind A2.
        let mut doc_b = MapNode::root(&dot("B", 0));
        let before = doc_b.clone();
        let err = apply_diff(&mut doc_b, &for_c).unwrap_err();
        assert_eq!(err, DiffError::UnseenBasis);
        assert_eq!(doc_b, before);

        sync(&doc_a, &mut doc_b);
        assert_eq!(doc_b.materialize(), json!({"x": 1, "z": 2}));
        assert!(make_diff(&doc_a, &doc_b.derive_version_vector()).is_empty());
    }

    #[test]
    fn diff_applies_to_replica_ahead_of_its_basis() {
        let mut doc_a = MapNode::root(&dot("A", 0));
        let mut doc_c = MapNode::root(&dot("C", 0));
        doc_a.set_at_path(&Path::parse("x"), json!(1), &dot("A", 1)).unwrap();
        let for_c = make_diff(&doc_a, &doc_c.derive_version_vector());

        // D has seen everything C has, plus its own write.
        let mut doc_d = doc_c.clone();
        doc_d.set_at_path(&Path::parse("y"), json!(3), &dot("D", 1)).unwrap();

        apply_diff(&mut doc_c, &for_c).unwrap();
        apply_diff(&mut doc_d, &for_c).unwrap();

        assert_eq!(doc_c.materialize(), json!({"x": 1}));
        assert_eq!(doc_d.materialize(), json!({"x": 1, "y": 3}));
    }

    #[test]
    fn leaf_written_over_removed_child_survives_sync() {
        let mut doc_a = MapNode::root(&dot("A", 0));
        let mut doc_b = MapNode::root(&dot("B", 0));
        doc_a.set_at_path(&Path::parse("user.name"), json!("Alice"), &dot("A", 1))
            .unwrap();
        sync(&doc_a, &mut doc_b);

        let summary = doc_b
            .derive_version_vector()
            .merge_dot(&dot("B", 2))
            .into_owned();
        doc_b.remove_at_path(&Path::parse("user.name"), &summary).unwrap();
        doc_a.set_at_path(&Path::parse("user"), json!("flat"), &dot("A", 2))
            .unwrap();

        sync(&doc_b, &mut doc_a);
        sync(&doc_a, &mut doc_b);
        sync(&doc_b, &mut doc_a);

        assert_eq!(doc_a.materialize(), json!({"user": "flat"}));
        assert_eq!(doc_b.materialize(), json!({"user": "flat"}));
        assert!(make_diff(&doc_a, &doc_b.derive_version_vector()).is_empty());
        assert!(make_diff(&doc_b, &doc_a.derive_version_vector()).is_empty());
    }

    #[test]
    fn shadowed_write_resolves_after_remove_of_winner() {
        // A5 beats B4; a remove that saw only A5 must leave B4 everywhere.
        let mut doc_a = MapNode::root(&dot("A", 0));
        let mut doc_b = MapNode::root(&dot("B", 0));
        doc_a.set_at_path(&Path::parse("k"), json!("a5"), &dot("A", 5)).unwrap();
        doc_b.set_at_path(&Path::parse("k"), json!("b4"), &dot("B", 4)).unwrap();
        sync(&doc_b, &mut doc_a);
        doc_a
            .remove_at_path(&Path::parse("k"), &VersionVector::from(dot("A", 6)))
            .unwrap();

        sync(&doc_a, &mut doc_b);

        assert_eq!(doc_a.materialize(), json!({"k": "b4"}));
        assert_eq!(doc_b.materialize(), json!({"k": "b4"}));
    }
}
