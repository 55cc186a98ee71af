//! Validated Identifiers
//!
//! A `TransactionId` or `IdempotencyKey` that exists has passed validation;
//! there is no unchecked constructor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::TransactionError;

/// Transaction identifier: `TXN-` followed by an 8-character alphanumeric token
///
/// Example: `TXN-a1b2c3d4`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(String);

impl TransactionId {
    /// Domain prefix
    pub const PREFIX: &'static str = "TXN";

    /// Length of the random token after `TXN-`
    pub const TOKEN_LEN: usize = 8;

    /// Parse and validate
    ///
    /// # Errors
    /// * `InvalidTransactionIdFormat` - if `value` is not `TXN-` + 8 alphanumerics
    pub fn of(value: impl Into<String>) -> Result<Self, TransactionError> {
        let value = value.into();
        if !Self::is_valid(&value) {
            return Err(TransactionError::InvalidTransactionIdFormat(value));
        }
        Ok(Self(value))
    }

    /// Generate a fresh identifier from a UUIDv4
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", Self::PREFIX, &uuid[..Self::TOKEN_LEN]))
    }

    /// Format check without constructing
    pub fn is_valid(value: &str) -> bool {
        value
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|token| {
                token.len() == Self::TOKEN_LEN && token.chars().all(|c| c.is_ascii_alphanumeric())
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionId::of(s)
    }
}

impl TryFrom<String> for TransactionId {
    type Error = TransactionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TransactionId::of(value)
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> String {
        id.0
    }
}

/// Client-supplied idempotency key
///
/// # Format
/// - 8 to 128 characters
/// - ASCII letters, digits, `-` and `_` only
///
/// A UUID string is the recommended client choice. The server never generates keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub const MIN_LENGTH: usize = 8;
    pub const MAX_LENGTH: usize = 128;

    /// Default record lifetime (24h)
    pub const DEFAULT_TTL_SECONDS: u64 = 86_400;

    /// Header carrying the key on the transport
    pub const HEADER: &'static str = "X-Idempotency-Key";

    /// Validate without normalizing
    ///
    /// # Errors
    /// * `IdempotencyKeyRequired` - blank input
    /// * `InvalidIdempotencyKeyFormat` - length or character set violation
    pub fn of(value: impl Into<String>) -> Result<Self, TransactionError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(TransactionError::IdempotencyKeyRequired);
        }
        if !Self::is_valid(&value) {
            return Err(TransactionError::InvalidIdempotencyKeyFormat(value));
        }
        Ok(Self(value))
    }

    /// Read from a transport header value
    ///
    /// Absent or blank headers yield `Ok(None)`; otherwise the value is trimmed
    /// and validated.
    pub fn from_header(header: Option<&str>) -> Result<Option<Self>, TransactionError> {
        match header.map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => Self::of(value).map(Some),
        }
    }

    /// Format check without constructing
    pub fn is_valid(value: &str) -> bool {
        (Self::MIN_LENGTH..=Self::MAX_LENGTH).contains(&value.len())
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IdempotencyKey {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IdempotencyKey::of(s)
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = TransactionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        IdempotencyKey::of(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> String {
        key.0
    }
}
