//! CBOR encoding of version vectors, documents, and diffs.
//!
//! Every map in the data model is ordered, so equal values always encode to
//! the same bytes.

use compact_crdt_core::{DiffEnvelope, DiffError, DocumentRoot, VersionVector};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a version vector.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn encode_version_vector(vv: &VersionVector) -> Result<Vec<u8>, CodecError> {
    to_cbor(vv)
}

/// Decode a version vector.
///
/// # Errors
///
/// Returns error if `bytes` is not a valid encoding.
pub fn decode_version_vector(bytes: &[u8]) -> Result<VersionVector, CodecError> {
    from_cbor(bytes)
}

/// Encode a full document tree.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn encode_document(root: &DocumentRoot) -> Result<Vec<u8>, CodecError> {
    to_cbor(root)
}

/// Decode a full document tree.
///
/// # Errors
///
/// Returns error if `bytes` is not a valid encoding.
pub fn decode_document(bytes: &[u8]) -> Result<DocumentRoot, CodecError> {
    from_cbor(bytes)
}

/// Encode a diff.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn encode_diff(diff: &DiffEnvelope) -> Result<Vec<u8>, CodecError> {
    to_cbor(diff)
}

/// Decode and validate a diff.
///
/// # Errors
///
/// Returns error if `bytes` is not a valid encoding or the diff contains an
/// invalid op.
pub fn decode_diff(bytes: &[u8]) -> Result<DiffEnvelope, CodecError> {
    let diff: DiffEnvelope = from_cbor(bytes)?;
    diff.validate()?;
    Ok(diff)
}

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| CodecError::Serialize(e.to_string()))?;
    Ok(bytes)
}

pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::Deserialize(e.to_string()))
}

/// Errors for encoding and decoding.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
    /// Decoded diff is malformed
    #[error("invalid diff: {0}")]
    Invalid(#[from] DiffError),
    /// Message was produced by an incompatible wire version
    #[error("unsupported wire version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the message
        found: u8,
        /// Version this build speaks
        expected: u8,
    },
}
