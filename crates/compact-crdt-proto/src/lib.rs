//! # Compact CRDT Protocol
//!
//! Wire encoding for delta replication.
//!
//! ## Codec
//!
//! Deterministic CBOR for `VersionVector`, `DocumentRoot`, and `DiffEnvelope`.
//!
//! ## Messages
//!
//! - `SyncRequest`: a replica's version vector
//! - `SyncResponse`: the diff the requester is missing

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod messages;

pub use codec::{
    decode_diff, decode_document, decode_version_vector, encode_diff, encode_document,
    encode_version_vector, CodecError,
};
pub use messages::{SyncRequest, SyncResponse, WIRE_VERSION};
