//! Transaction Error Types
//!
//! Every violation detected by the transaction core, with the diagnostic
//! payload captured at the point of detection.

use thiserror::Error;

use crate::idempotency::record::IdempotencyStatus;
use crate::money::Money;

use super::state::TransactionStatus;

/// Result alias for transaction core operations
pub type Result<T> = std::result::Result<T, TransactionError>;

/// Transaction core error types
///
/// Error codes are stable and intended for API responses.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    // === Validation Errors ===
    #[error("Invalid transaction id format: {0}")]
    InvalidTransactionIdFormat(String),

    #[error("Invalid amount: {}", amount.as_deref().unwrap_or("null"))]
    InvalidAmount { amount: Option<String> },

    #[error("Transaction type is required")]
    TypeRequired,

    #[error("Account id is required")]
    AccountRequired,

    #[error("Idempotency key is required")]
    IdempotencyKeyRequired,

    #[error("Invalid idempotency key format: {0}")]
    InvalidIdempotencyKeyFormat(String),

    #[error("Description exceeds {max} characters (got {len})")]
    DescriptionTooLong { len: usize, max: usize },

    // === Lookup Errors ===
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    // === Balance Errors ===
    #[error("Insufficient funds: balance={balance}, requested={requested}")]
    InsufficientFunds { balance: Money, requested: Money },

    // === State Errors ===
    #[error("Transaction already processed: transactionId={transaction_id}, status={status}")]
    AlreadyProcessed {
        transaction_id: String,
        status: TransactionStatus,
    },

    #[error("Transaction already cancelled: transactionId={0}")]
    AlreadyCancelled(String),

    #[error("Transaction already failed: transactionId={0}")]
    AlreadyFailed(String),

    #[error("Transaction cannot be cancelled: transactionId={transaction_id}, status={status}")]
    CannotCancel {
        transaction_id: String,
        status: TransactionStatus,
    },

    #[error("Invalid status transition: from={from}, to={to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Transaction id already assigned: {0}")]
    IdAlreadyAssigned(String),

    // === Idempotency Errors ===
    #[error("Idempotency key conflict (different request already uses it): key={0}")]
    IdempotencyKeyConflict(String),

    #[error("Idempotency key expired: key={0}")]
    IdempotencyKeyExpired(String),

    #[error("Request with the same idempotency key is in progress: key={0}")]
    IdempotencyKeyInProgress(String),

    #[error("Stale completion for idempotency key {key}: fence={fence}, current={current}")]
    StaleCompletion { key: String, fence: u64, current: u64 },

    #[error("Idempotency record already finished: key={key}, status={status}")]
    IdempotencyRecordFinished {
        key: String,
        status: IdempotencyStatus,
    },

    // === System Errors ===
    #[error("Storage error: {0}")]
    Storage(String),
}

impl TransactionError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransactionError::InvalidTransactionIdFormat(_) => "TXN_001",
            TransactionError::InvalidAmount { .. } => "TXN_002",
            TransactionError::TypeRequired => "TXN_003",
            TransactionError::IdempotencyKeyRequired => "TXN_004",
            TransactionError::InvalidIdempotencyKeyFormat(_) => "TXN_005",
            TransactionError::DescriptionTooLong { .. } => "TXN_006",
            TransactionError::TransactionNotFound(_) => "TXN_010",
            TransactionError::InsufficientFunds { .. } => "TXN_020",
            TransactionError::AlreadyProcessed { .. } => "TXN_030",
            TransactionError::AlreadyCancelled(_) => "TXN_031",
            TransactionError::AlreadyFailed(_) => "TXN_032",
            TransactionError::CannotCancel { .. } => "TXN_033",
            TransactionError::InvalidTransition { .. } => "TXN_034",
            TransactionError::IdAlreadyAssigned(_) => "TXN_036",
            TransactionError::IdempotencyKeyConflict(_) => "TXN_040",
            TransactionError::IdempotencyKeyExpired(_) => "TXN_041",
            TransactionError::IdempotencyKeyInProgress(_) => "TXN_042",
            TransactionError::StaleCompletion { .. } => "TXN_043",
            TransactionError::IdempotencyRecordFinished { .. } => "TXN_044",
            TransactionError::AccountRequired => "TXN_050",
            TransactionError::Storage(_) => "TXN_099",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransactionError::InvalidTransactionIdFormat(_)
            | TransactionError::InvalidAmount { .. }
            | TransactionError::TypeRequired
            | TransactionError::AccountRequired
            | TransactionError::IdempotencyKeyRequired
            | TransactionError::InvalidIdempotencyKeyFormat(_)
            | TransactionError::DescriptionTooLong { .. }
            | TransactionError::InsufficientFunds { .. } => 400,
            TransactionError::TransactionNotFound(_) => 404,
            TransactionError::IdempotencyKeyConflict(_)
            | TransactionError::IdempotencyKeyExpired(_)
            | TransactionError::IdempotencyKeyInProgress(_)
            | TransactionError::StaleCompletion { .. }
            | TransactionError::IdempotencyRecordFinished { .. } => 409,
            TransactionError::AlreadyProcessed { .. }
            | TransactionError::AlreadyCancelled(_)
            | TransactionError::AlreadyFailed(_)
            | TransactionError::CannotCancel { .. }
            | TransactionError::InvalidTransition { .. } => 422,
            TransactionError::IdAlreadyAssigned(_) | TransactionError::Storage(_) => 500,
        }
    }

    /// Whether the caller may retry the same request later with the same key
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransactionError::IdempotencyKeyInProgress(_) | TransactionError::Storage(_)
        )
    }
}
