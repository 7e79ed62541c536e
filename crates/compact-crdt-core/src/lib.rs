//! # Compact CRDT Core
//!
//! Delta-state CRDT document engine.
//!
//! This crate provides:
//! - Hybrid Logical Clock (HLC) dots with a lossless text form
//! - Version vectors for causal coverage checks
//! - Register (LWW) and PN-counter leaves
//! - A recursive map with add-wins removal
//! - Diff generation and idempotent, commutative diff application

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod counter;
pub mod diff;
pub mod document;
pub mod hlc;
pub mod map;
pub mod path;
pub mod register;
pub mod version_vector;

pub use counter::{Contribution, Counter, CounterError};
pub use diff::{apply_diff, make_diff, ApplyReport, DiffEnvelope, DiffError, DiffOp};
pub use document::Document;
pub use hlc::{Hlc, HlcClock, HlcParseError, ManualClock, NodeId, SystemClock, WallClock};
pub use map::{DocumentRoot, Entry, MapError, MapNode};
pub use path::Path;
pub use register::{Register, Write};
pub use version_vector::VersionVector;
