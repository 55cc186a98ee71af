//! Request fingerprinting
//!
//! The hash covers the semantic payload only. Payloads go through
//! `serde_json::Value` first, whose maps are key-ordered, so two payloads that
//! differ only in field order hash the same.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::transaction::error::{Result, TransactionError};

/// Hex SHA-256 of the canonical JSON form of `payload`
///
/// # Errors
/// * `Storage` - payload cannot be serialized to JSON (e.g. non-string map keys)
pub fn request_hash<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
    let canonical = serde_json::to_value(payload).map_err(serialization_error)?;
    let bytes = serde_json::to_vec(&canonical).map_err(serialization_error)?;
    Ok(hash_bytes(&bytes))
}

fn serialization_error(e: serde_json::Error) -> TransactionError {
    TransactionError::Storage(format!("request serialization failed: {}", e))
}

/// Hex SHA-256 of raw bytes (for callers that already hold a canonical body)
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
