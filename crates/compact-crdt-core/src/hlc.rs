//! Hybrid Logical Clock (HLC) dots for distributed writes.
//!
//! A dot combines:
//! - Physical wall-clock time (milliseconds)
//! - Logical counter for events at the same physical time
//! - Node ID for deterministic tiebreaking
//!
//! # References
//!
//! Kulkarni, Demirbas, et al. "Logical Physical Clocks and Consistent Snapshots
//! in Globally Distributed Databases" (2014)

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use uuid::Uuid;

/// Width of the zero-padded timestamp in the text form of a dot.
const TIMESTAMP_WIDTH: usize = 15;
/// Minimum width of the base-36 counter in the text form of a dot.
const COUNTER_WIDTH: usize = 5;

/// Identifier of a replica.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node ID from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random node ID (UUID v4).
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Source of physical time in milliseconds.
///
/// Must be non-decreasing for a single node for the HLC guarantees to hold.
pub trait WallClock {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;
}

impl<F> WallClock for F
where
    F: Fn() -> u64,
{
    fn now_ms(&self) -> u64 {
        self()
    }
}

/// Wall clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Manually driven wall clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    /// Create a clock reading `start_ms`.
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self(AtomicU64::new(start_ms))
    }

    /// Jump to `ms`.
    pub fn set(&self, ms: u64) {
        self.0.store(ms, AtomicOrdering::SeqCst);
    }

    /// Move forward by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.0.fetch_add(delta_ms, AtomicOrdering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// A globally unique dot combining physical time, logical counter, and node ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hlc {
    /// Physical wall-clock time in milliseconds
    pub timestamp: u64,
    /// Logical counter for events at the same physical time
    pub counter: u32,
    /// Node that issued this dot
    pub node_id: NodeId,
}

impl Hlc {
    /// Create a dot for `node_id` at `timestamp` with a zero counter.
    #[must_use]
    pub fn new(node_id: impl Into<NodeId>, timestamp: u64) -> Self {
        Self {
            timestamp,
            counter: 0,
            node_id: node_id.into(),
        }
    }

    /// Produce the next dot for a local event.
    ///
    /// The result is strictly greater than `self` even when the wall clock
    /// stalls or moves backwards.
    #[must_use]
    pub fn tick(&self, clock: &impl WallClock) -> Self {
        let now_ms = clock.now_ms();

        if now_ms > self.timestamp {
            // Wall clock advanced, reset logical counter
            Self::at(self.node_id.clone(), now_ms, 0)
        } else {
            let (timestamp, counter) = successor(self.timestamp, self.counter);
            Self::at(self.node_id.clone(), timestamp, counter)
        }
    }

    /// Produce the next dot after receiving `remote`.
    ///
    /// The result strictly dominates both `self` and `remote`'s time component
    /// and keeps this node's ID.
    #[must_use]
    pub fn merge(&self, remote: &Hlc, clock: &impl WallClock) -> Self {
        let now_ms = clock.now_ms();

        let (timestamp, counter) = if now_ms > self.timestamp && now_ms > remote.timestamp {
            // Wall clock is ahead of both, use it
            (now_ms, 0)
        } else {
            match self.timestamp.cmp(&remote.timestamp) {
                Ordering::Equal => {
                    successor(self.timestamp, self.counter.max(remote.counter))
                }
                Ordering::Greater => successor(self.timestamp, self.counter),
                Ordering::Less => successor(remote.timestamp, remote.counter),
            }
        };

        Self::at(self.node_id.clone(), timestamp, counter)
    }

    fn at(node_id: NodeId, timestamp: u64, counter: u32) -> Self {
        Self {
            timestamp,
            counter,
            node_id,
        }
    }
}

impl Ord for Hlc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.counter.cmp(&other.counter))
            // Node ID breaks ties deterministically
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for Hlc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:0tw$}:{:0>cw$}:{}",
            self.timestamp,
            to_base36(self.counter),
            self.node_id,
            tw = TIMESTAMP_WIDTH,
            cw = COUNTER_WIDTH,
        )
    }
}

impl FromStr for Hlc {
    type Err = HlcParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        // Node IDs may contain ':', so only the first two separators count.
        let mut parts = raw.splitn(3, ':');
        let (Some(timestamp), Some(counter), Some(node_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(HlcParseError::Malformed(raw.to_string()));
        };
        if timestamp.is_empty() || counter.is_empty() || node_id.is_empty() {
            return Err(HlcParseError::Malformed(raw.to_string()));
        }

        let timestamp = timestamp
            .parse()
            .map_err(|_| HlcParseError::InvalidTimestamp(timestamp.to_string()))?;
        let counter = u32::from_str_radix(counter, 36)
            .map_err(|_| HlcParseError::InvalidCounter(counter.to_string()))?;

        Ok(Self::at(NodeId::new(node_id), timestamp, counter))
    }
}

/// Next (timestamp, counter) pair; an exhausted counter carries into the
/// timestamp.
fn successor(timestamp: u64, counter: u32) -> (u64, u32) {
    match counter.checked_add(1) {
        Some(counter) => (timestamp, counter),
        None => (timestamp.saturating_add(1), 0),
    }
}

fn to_base36(mut n: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(char::from_digit(n % 36, 36).unwrap_or('0'));
        n /= 36;
    }
    digits.iter().rev().collect()
}

/// Hybrid Logical Clock state machine owned by one replica.
#[derive(Debug)]
pub struct HlcClock<C = SystemClock> {
    /// Last dot issued or observed
    last: Hlc,
    wall: C,
}

impl HlcClock<SystemClock> {
    /// Create a new clock for `node_id` driven by the system time.
    #[must_use]
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self::with_wall_clock(node_id, SystemClock)
    }
}

impl<C: WallClock> HlcClock<C> {
    /// Create a new clock for `node_id` driven by `wall`.
    #[must_use]
    pub fn with_wall_clock(node_id: impl Into<NodeId>, wall: C) -> Self {
        let last = Hlc::new(node_id, wall.now_ms());
        Self { last, wall }
    }

    /// Resume a clock from the last dot it issued.
    #[must_use]
    pub fn resume(last: Hlc, wall: C) -> Self {
        Self { last, wall }
    }

    /// Get the node ID for this clock.
    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.last.node_id
    }

    /// Generate a new dot for a local event.
    ///
    /// Guarantees the returned dot is greater than any previously
    /// generated or observed dot.
    pub fn tick(&mut self) -> Hlc {
        self.last = self.last.tick(&self.wall);
        self.last.clone()
    }

    /// Update the clock upon receiving a remote dot.
    pub fn observe(&mut self, remote: &Hlc) {
        self.last = self.last.merge(remote, &self.wall);
    }

    /// Get the current dot without advancing the clock.
    #[must_use]
    pub fn current(&self) -> &Hlc {
        &self.last
    }
}

/// Errors that can occur when parsing the text form of a dot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HlcParseError {
    /// Input lacks one of the three colon-delimited parts
    #[error("invalid HLC string: {0:?}")]
    Malformed(String),
    /// Timestamp part is not a decimal integer
    #[error("invalid HLC timestamp: {0:?}")]
    InvalidTimestamp(String),
    /// Counter part is not a base-36 integer
    #[error("invalid HLC counter: {0:?}")]
    InvalidCounter(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> impl WallClock {
        move || ms
    }

    fn dot(node: &str, timestamp: u64, counter: u32) -> Hlc {
        Hlc {
            timestamp,
            counter,
            node_id: NodeId::new(node),
        }
    }

    #[test]
    fn tick_increments_counter_within_same_timestamp() {
        let state = Hlc::new("nodeA", 0);

        let t1 = state.tick(&at(1_000));
        assert_eq!(t1.timestamp, 1_000);
        assert_eq!(t1.counter, 0);

        let t2 = t1.tick(&at(1_000));
        assert_eq!(t2.timestamp, 1_000);
        assert_eq!(t2.counter, 1);

        let t3 = t2.tick(&at(1_001));
        assert_eq!(t3.timestamp, 1_001);
        assert_eq!(t3.counter, 0);
    }

    #[test]
    fn tick_survives_backward_clock() {
        let t1 = Hlc::new("A", 0).tick(&at(5_000));
        let t2 = t1.tick(&at(4_000));

        assert!(t2 > t1);
        assert_eq!(t2.timestamp, 5_000);
    }

    #[test]
    fn exhausted_counter_carries_into_timestamp() {
        let last = dot("A", 5_000, u32::MAX);

        let next = last.tick(&at(4_000));
        assert_eq!((next.timestamp, next.counter), (5_001, 0));
        assert!(next > last);

        let merged = dot("B", 10, 0).merge(&last, &at(0));
        assert_eq!((merged.timestamp, merged.counter), (5_001, 0));
        assert!(merged > last);
    }

    #[test]
    fn merge_with_remote_ahead_takes_remote_time() {
        let state = Hlc::new("nodeB", 0).tick(&at(100));
        let remote = dot("remote", 200, 3);

        let merged = state.merge(&remote, &at(150));

        assert_eq!(merged.timestamp, 200);
        assert_eq!(merged.counter, 4);
        assert_eq!(merged.node_id.as_str(), "nodeB");
        assert!(merged.timestamp > state.timestamp);
    }

    #[test]
    fn merge_with_stale_remote_at_same_timestamp() {
        let state = Hlc::new("nodeC", 0).tick(&at(500)).tick(&at(500));
        let remote = dot("r", 500, 0);

        let merged = state.merge(&remote, &at(500));

        assert_eq!(merged.timestamp, 500);
        assert_eq!(merged.counter, 2);
    }

    #[test]
    fn merge_prefers_wall_clock_ahead_of_both() {
        let state = dot("A", 100, 7);
        let remote = dot("B", 120, 9);

        let merged = state.merge(&remote, &at(300));

        assert_eq!((merged.timestamp, merged.counter), (300, 0));
    }

    #[test]
    fn ordering_tiebreaker_on_node_id() {
        let a = dot("A", 10, 0);
        let b = dot("B", 10, 0);

        assert!(a < b);
        assert!(b > a);
        assert_eq!(a.cmp(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn text_roundtrip_with_separator_in_node_id() {
        let ts = dot("node:id/with?chars-α", 123, 4);

        let encoded = ts.to_string();
        assert_eq!(encoded, "000000000000123:00004:node:id/with?chars-α");

        let decoded: Hlc = encoded.parse().unwrap();
        assert_eq!(decoded, ts);
    }

    #[test]
    fn text_counter_is_base36() {
        let ts = dot("A", 1, 36 * 36 + 35);
        assert_eq!(ts.to_string(), "000000000000001:0010z:A");
        assert_eq!(ts.to_string().parse::<Hlc>().unwrap(), ts);
    }

    #[test]
    fn parse_rejects_missing_parts() {
        assert!(matches!(
            "000000000000001:00000".parse::<Hlc>(),
            Err(HlcParseError::Malformed(_))
        ));
        assert!(matches!(
            "000000000000001:00000:".parse::<Hlc>(),
            Err(HlcParseError::Malformed(_))
        ));
        assert!(matches!(
            "abc:00000:A".parse::<Hlc>(),
            Err(HlcParseError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            "1:!!:A".parse::<Hlc>(),
            Err(HlcParseError::InvalidCounter(_))
        ));
    }

    #[test]
    fn clock_monotonic_under_stalled_wall_clock() {
        let wall = ManualClock::new(42);
        let mut clock = HlcClock::with_wall_clock("A", wall);

        let t1 = clock.tick();
        let t2 = clock.tick();
        let t3 = clock.tick();

        assert!(t1 < t2);
        assert!(t2 < t3);
    }

    #[test]
    fn clock_observe_advances_past_remote() {
        let mut clock_a = HlcClock::with_wall_clock("A", ManualClock::new(1_000));
        let mut clock_b = HlcClock::with_wall_clock("B", ManualClock::new(10));

        let t_a = clock_a.tick();
        clock_b.observe(&t_a);
        let t_b = clock_b.tick();

        assert!(t_b > t_a);
    }
}
