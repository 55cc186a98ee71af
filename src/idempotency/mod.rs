//! Idempotency Module
//!
//! At-most-once execution for client-keyed requests.
//!
//! # Record lifecycle
//!
//! ```text
//! IN_PROGRESS ──complete──→ COMPLETED   (replayed until expires_at)
//!      │
//!      └──────fail───────→ FAILED       (same request may retry)
//! ```
//!
//! Each record generation under a key carries a `fence`. Superseding an
//! expired or failed record bumps it, and finishing writes from an older
//! generation are rejected by the store.

pub mod guard;
pub mod hash;
pub mod record;
pub mod store;

pub use guard::{Admission, GuardOutcome, IdempotencyGuard, StoredResponse};
pub use hash::{hash_bytes, request_hash};
pub use record::{IdempotencyRecord, IdempotencyRecordSnapshot, IdempotencyStatus};
pub use store::{IdempotencyStore, InsertOutcome, MemoryIdempotencyStore};
