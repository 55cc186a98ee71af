//! Idempotency Record
//!
//! One record per client key. Supplies every predicate the admission
//! protocol needs; the ordering of those checks belongs to
//! [`IdempotencyGuard`](super::guard::IdempotencyGuard).

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transaction::error::{Result, TransactionError};
use crate::transaction::ids::{IdempotencyKey, TransactionId};

/// Processing status of a keyed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    /// Being processed, no response yet
    InProgress,
    /// Succeeded; response stored for replay
    Completed,
    /// Failed; error response stored
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::InProgress => "IN_PROGRESS",
            IdempotencyStatus::Completed => "COMPLETED",
            IdempotencyStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Flat, storage-facing view of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecordSnapshot {
    pub key: IdempotencyKey,
    pub request_hash: String,
    pub response_body: Option<String>,
    pub http_status: Option<u16>,
    pub transaction_id: Option<TransactionId>,
    pub status: IdempotencyStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default = "first_fence")]
    pub fence: u64,
}

fn first_fence() -> u64 {
    1
}

/// Deduplication record keyed by [`IdempotencyKey`]
///
/// # Invariants (ENFORCED by private fields):
/// - `request_hash` never changes after creation
/// - status leaves IN_PROGRESS exactly once and never returns to it
/// - `fence` identifies this generation of the key; a record that replaces an
///   expired or failed one carries `previous.fence + 1`
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    key: IdempotencyKey,
    request_hash: String,
    response_body: Option<String>,
    http_status: Option<u16>,
    transaction_id: Option<TransactionId>,
    status: IdempotencyStatus,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    fence: u64,
}

impl IdempotencyRecord {
    /// Start processing a new key
    pub fn create_in_progress(
        key: IdempotencyKey,
        request_hash: impl Into<String>,
        ttl_seconds: u64,
    ) -> Self {
        Self::create_in_progress_at(key, request_hash, ttl_seconds, Utc::now())
    }

    pub fn create_in_progress_at(
        key: IdempotencyKey,
        request_hash: impl Into<String>,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new_generation(key, request_hash.into(), ttl_seconds, now, first_fence())
    }

    /// Next generation for the same key, replacing an expired or failed record
    pub fn replacing(
        previous: &IdempotencyRecord,
        request_hash: impl Into<String>,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new_generation(
            previous.key.clone(),
            request_hash.into(),
            ttl_seconds,
            now,
            previous.fence.saturating_add(1),
        )
    }

    fn new_generation(
        key: IdempotencyKey,
        request_hash: String,
        ttl_seconds: u64,
        now: DateTime<Utc>,
        fence: u64,
    ) -> Self {
        let ttl = i64::try_from(ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let expires_at = now
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key,
            request_hash,
            response_body: None,
            http_status: None,
            transaction_id: None,
            status: IdempotencyStatus::InProgress,
            created_at: now,
            expires_at,
            fence,
        }
    }

    /// Rebuild from storage
    pub fn restore(snapshot: IdempotencyRecordSnapshot) -> Self {
        Self {
            key: snapshot.key,
            request_hash: snapshot.request_hash,
            response_body: snapshot.response_body,
            http_status: snapshot.http_status,
            transaction_id: snapshot.transaction_id,
            status: snapshot.status,
            created_at: snapshot.created_at,
            expires_at: snapshot.expires_at,
            fence: snapshot.fence,
        }
    }

    pub fn snapshot(&self) -> IdempotencyRecordSnapshot {
        IdempotencyRecordSnapshot {
            key: self.key.clone(),
            request_hash: self.request_hash.clone(),
            response_body: self.response_body.clone(),
            http_status: self.http_status,
            transaction_id: self.transaction_id.clone(),
            status: self.status,
            created_at: self.created_at,
            expires_at: self.expires_at,
            fence: self.fence,
        }
    }

    // ============================================================
    // READ-ONLY GETTERS
    // ============================================================

    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }

    pub fn request_hash(&self) -> &str {
        &self.request_hash
    }

    pub fn response_body(&self) -> Option<&str> {
        self.response_body.as_deref()
    }

    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    pub fn status(&self) -> IdempotencyStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn fence(&self) -> u64 {
        self.fence
    }

    // ============================================================
    // PREDICATES
    // ============================================================

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// `now > expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == IdempotencyStatus::InProgress
    }

    pub fn is_completed(&self) -> bool {
        self.status == IdempotencyStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == IdempotencyStatus::Failed
    }

    /// Replayable: COMPLETED and not expired
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_completed() && !self.is_expired_at(now)
    }

    pub fn matches_request(&self, request_hash: &str) -> bool {
        self.request_hash == request_hash
    }

    // ============================================================
    // VALIDATIONS
    // ============================================================

    /// # Errors
    /// * `IdempotencyKeyConflict` - a different request already owns this key
    pub fn validate_request_match(&self, request_hash: &str) -> Result<()> {
        if !self.matches_request(request_hash) {
            return Err(TransactionError::IdempotencyKeyConflict(self.key.to_string()));
        }
        Ok(())
    }

    /// # Errors
    /// * `IdempotencyKeyExpired` - past TTL; the caller should start a fresh record
    pub fn validate_not_expired(&self) -> Result<()> {
        self.validate_not_expired_at(Utc::now())
    }

    pub fn validate_not_expired_at(&self, now: DateTime<Utc>) -> Result<()> {
        if self.is_expired_at(now) {
            return Err(TransactionError::IdempotencyKeyExpired(self.key.to_string()));
        }
        Ok(())
    }

    /// An expired IN_PROGRESS record is presumed abandoned and passes.
    ///
    /// # Errors
    /// * `IdempotencyKeyInProgress` - IN_PROGRESS and not expired
    pub fn validate_not_in_progress(&self) -> Result<()> {
        self.validate_not_in_progress_at(Utc::now())
    }

    pub fn validate_not_in_progress_at(&self, now: DateTime<Utc>) -> Result<()> {
        if self.is_in_progress() && !self.is_expired_at(now) {
            return Err(TransactionError::IdempotencyKeyInProgress(self.key.to_string()));
        }
        Ok(())
    }

    // ============================================================
    // STATE TRANSITIONS
    // ============================================================

    /// Materialize the success response. Call only after the guarded
    /// operation has actually succeeded.
    ///
    /// # Errors
    /// * `IdempotencyRecordFinished` - record is already COMPLETED or FAILED
    pub fn complete(
        &mut self,
        response_body: impl Into<String>,
        http_status: u16,
        transaction_id: Option<TransactionId>,
    ) -> Result<()> {
        self.ensure_in_progress()?;
        self.response_body = Some(response_body.into());
        self.http_status = Some(http_status);
        self.transaction_id = transaction_id;
        self.status = IdempotencyStatus::Completed;
        debug!(
            key = %self.key,
            fence = self.fence,
            http_status = http_status,
            "Idempotency record completed"
        );
        Ok(())
    }

    /// Materialize the error response
    ///
    /// # Errors
    /// * `IdempotencyRecordFinished` - record is already COMPLETED or FAILED
    pub fn fail(&mut self, response_body: impl Into<String>, http_status: u16) -> Result<()> {
        self.ensure_in_progress()?;
        self.response_body = Some(response_body.into());
        self.http_status = Some(http_status);
        self.status = IdempotencyStatus::Failed;
        debug!(
            key = %self.key,
            fence = self.fence,
            http_status = http_status,
            "Idempotency record failed"
        );
        Ok(())
    }

    /// A record finishes exactly once.
    fn ensure_in_progress(&self) -> Result<()> {
        if !self.is_in_progress() {
            return Err(TransactionError::IdempotencyRecordFinished {
                key: self.key.to_string(),
                status: self.status,
            });
        }
        Ok(())
    }
}
