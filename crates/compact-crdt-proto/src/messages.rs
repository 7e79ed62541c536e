//! Sync messages exchanged between replicas.
//!
//! A replica asks a peer for what it is missing with a [`SyncRequest`]
//! carrying its version vector; the peer answers with a [`SyncResponse`]
//! holding the diff. Transport is left to the caller.

use crate::codec::{from_cbor, to_cbor, CodecError};
use compact_crdt_core::{DiffEnvelope, Document, NodeId, VersionVector, WallClock};
use serde::{Deserialize, Serialize};

/// Wire version written into every message.
pub const WIRE_VERSION: u8 = 1;

/// Request for everything the sender has not seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Wire version
    pub version: u8,
    /// Requesting replica
    pub node_id: NodeId,
    /// Everything the requester has seen
    pub have: VersionVector,
}

impl SyncRequest {
    /// Create a request advertising `doc`'s version vector.
    #[must_use]
    pub fn for_document<C: WallClock>(doc: &Document<C>) -> Self {
        Self {
            version: WIRE_VERSION,
            node_id: doc.node_id().clone(),
            have: doc.version_vector(),
        }
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, CodecError> {
        to_cbor(self)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails or the wire version differs.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CodecError> {
        let request: Self = from_cbor(bytes)?;
        check_version(request.version)?;
        Ok(request)
    }
}

/// Diff answering a [`SyncRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Wire version
    pub version: u8,
    /// Responding replica
    pub node_id: NodeId,
    /// Operations the requester is missing
    pub diff: DiffEnvelope,
}

impl SyncResponse {
    /// Answer `request` from `doc`.
    #[must_use]
    pub fn answer<C: WallClock>(doc: &Document<C>, request: &SyncRequest) -> Self {
        Self {
            version: WIRE_VERSION,
            node_id: doc.node_id().clone(),
            diff: doc.diff_for(&request.have),
        }
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, CodecError> {
        to_cbor(self)
    }

    /// Deserialize from CBOR bytes, validating the carried diff.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails, the wire version differs, or
    /// the diff contains an invalid op.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CodecError> {
        let response: Self = from_cbor(bytes)?;
        check_version(response.version)?;
        response.diff.validate()?;
        Ok(response)
    }
}

fn check_version(found: u8) -> Result<(), CodecError> {
    if found == WIRE_VERSION {
        Ok(())
    } else {
        Err(CodecError::UnsupportedVersion {
            found,
            expected: WIRE_VERSION,
        })
    }
}
