//! txn_core - Transaction Domain Core
//!
//! Money, identifiers, the transaction aggregate and the idempotency
//! protocol for a payments backend.
//!
//! # Modules
//!
//! - [`money`] - Non-negative, whole-unit monetary amount
//! - [`transaction`] - Transaction aggregate, status machine, type policy, ids
//! - [`idempotency`] - Idempotency records, storage contract and guard
//! - [`clock`] - Injectable time source
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber set-up

pub mod clock;
pub mod config;
pub mod idempotency;
pub mod logging;
pub mod money;
pub mod transaction;

// Convenient re-exports at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, IdempotencyConfig};
pub use idempotency::{
    Admission, GuardOutcome, IdempotencyGuard, IdempotencyRecord, IdempotencyStatus,
    IdempotencyStore, InsertOutcome, MemoryIdempotencyStore, StoredResponse, request_hash,
};
pub use money::Money;
pub use transaction::{
    IdempotencyKey, MemoryTransactionRepository, NewTransaction, Result, Transaction,
    TransactionError, TransactionId, TransactionRepository, TransactionStatus, TransactionType,
};
