//! Transaction Aggregate
//!
//! Lifecycle, cancellation policy and monetary invariants for a single
//! money-movement transaction (deposit, withdrawal, transfer leg, payment,
//! refund, fee, interest).
//!
//! # State Machine
//!
//! ```text
//! PENDING → SUCCESS
//!    ↓  ↘
//! CANCELLED FAILED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Single Transition Table**: every mutator consults `TransactionStatus::can_transition_to`
//! 2. **No Partial Application**: a rejected mutation leaves the aggregate unchanged
//! 3. **Type Policy**: cancellability comes from `TransactionType`, never from special cases
//! 4. **Single Owner**: an instance is mutated by one operation at a time (`&mut self`)

pub mod error;
pub mod ids;
pub mod model;
pub mod repository;
pub mod state;
pub mod types;

// Re-exports for convenience
pub use error::{Result, TransactionError};
pub use ids::{IdempotencyKey, TransactionId};
pub use model::{AuditInfo, MAX_DESCRIPTION_LEN, NewTransaction, Transaction, TransactionSnapshot};
pub use repository::{MemoryTransactionRepository, TransactionRepository};
pub use state::TransactionStatus;
pub use types::TransactionType;
