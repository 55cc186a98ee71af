//! Idempotency Guard
//!
//! Drives the admission protocol over an [`IdempotencyStore`]:
//!
//! ```text
//! lookup(key)
//!   ├─ absent ──────────────────────→ insert_if_absent ─→ EXECUTE
//!   │                                     └─ lost race → evaluate stored record
//!   ├─ expired ─────────────────────→ supersede (fence+1) ─→ EXECUTE
//!   ├─ hash differs ────────────────→ IdempotencyKeyConflict
//!   ├─ IN_PROGRESS ─────────────────→ IdempotencyKeyInProgress
//!   ├─ COMPLETED ───────────────────→ REPLAY
//!   └─ FAILED ──────────────────────→ supersede (fence+1) ─→ EXECUTE
//! ```
//!
//! Finishing writes are fenced and one-shot: a completion from a generation
//! that has since been superseded fails with `StaleCompletion`, and a record
//! that already finished fails with `IdempotencyRecordFinished`.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::IdempotencyConfig;
use crate::transaction::error::{Result, TransactionError};
use crate::transaction::ids::{IdempotencyKey, TransactionId};

use super::record::IdempotencyRecord;
use super::store::{IdempotencyStore, InsertOutcome};

/// Store round-trips before giving up under contention
const MAX_ATTEMPTS: usize = 8;

/// Admission decision for a keyed request
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Caller owns this record: run the operation, then `complete` or `fail`
    Execute(IdempotencyRecord),
    /// Already completed: return the stored response without re-executing
    Replay(IdempotencyRecord),
}

/// Materialized response of a guarded operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub body: String,
    pub http_status: u16,
    pub transaction_id: Option<TransactionId>,
}

/// Result of [`IdempotencyGuard::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOutcome {
    pub response: StoredResponse,
    /// `true` when served from a previous execution
    pub replayed: bool,
}

enum Decision {
    Replay,
    Supersede,
}

/// At-most-once execution per idempotency key
pub struct IdempotencyGuard<S> {
    store: S,
    clock: Arc<dyn Clock>,
    ttl_seconds: u64,
}

impl<S: IdempotencyStore> IdempotencyGuard<S> {
    pub fn new(store: S, config: &IdempotencyConfig) -> Self {
        Self::with_clock(store, config.ttl_seconds, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, ttl_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl_seconds,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Admit a request carrying `key` with content fingerprint `request_hash`
    ///
    /// # Errors
    /// * `IdempotencyKeyConflict` - same key, different content
    /// * `IdempotencyKeyInProgress` - same key still being processed (retry later)
    pub async fn begin(&self, key: &IdempotencyKey, request_hash: &str) -> Result<Admission> {
        let mut current = self.store.get(key).await?;

        for attempt in 0..MAX_ATTEMPTS {
            let now = self.clock.now();
            let existing = match current.take() {
                Some(existing) => existing,
                None => {
                    let record = IdempotencyRecord::create_in_progress_at(
                        key.clone(),
                        request_hash,
                        self.ttl_seconds,
                        now,
                    );
                    match self.store.insert_if_absent(record.clone()).await? {
                        InsertOutcome::Inserted => {
                            info!(key = %key, fence = record.fence(), "Idempotency record created");
                            return Ok(Admission::Execute(record));
                        }
                        // Treated exactly like finding the record on lookup.
                        InsertOutcome::Exists(existing) => existing,
                    }
                }
            };

            match self.decide(&existing, request_hash, now)? {
                Decision::Replay => {
                    debug!(key = %key, "Replaying stored response");
                    return Ok(Admission::Replay(existing));
                }
                Decision::Supersede => {
                    let next = IdempotencyRecord::replacing(
                        &existing,
                        request_hash,
                        self.ttl_seconds,
                        now,
                    );
                    if self.store.supersede(existing.fence(), next.clone()).await? {
                        info!(
                            key = %key,
                            previous_status = %existing.status(),
                            fence = next.fence(),
                            "Idempotency record superseded"
                        );
                        return Ok(Admission::Execute(next));
                    }
                    debug!(key = %key, attempt, "Lost supersede race, re-reading");
                }
            }

            current = self.store.get(key).await?;
        }

        warn!(key = %key, "Idempotency admission contended, giving up");
        Err(TransactionError::IdempotencyKeyInProgress(key.to_string()))
    }

    fn decide(
        &self,
        existing: &IdempotencyRecord,
        request_hash: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Decision> {
        if existing.is_expired_at(now) {
            return Ok(Decision::Supersede);
        }
        if let Err(e) = existing.validate_request_match(request_hash) {
            warn!(key = %existing.key(), "Idempotency key reused with different request");
            return Err(e);
        }
        existing.validate_not_in_progress_at(now)?;
        if existing.is_valid_at(now) {
            return Ok(Decision::Replay);
        }
        // FAILED within TTL: the same request may be retried.
        Ok(Decision::Supersede)
    }

    /// Record success for an admitted request
    ///
    /// `record` is updated only once the store has accepted the write.
    ///
    /// # Errors
    /// * `IdempotencyRecordFinished` - record (or its stored copy) already finished
    /// * `StaleCompletion` - record generation was superseded
    pub async fn complete(
        &self,
        record: &mut IdempotencyRecord,
        response_body: impl Into<String>,
        http_status: u16,
        transaction_id: Option<TransactionId>,
    ) -> Result<()> {
        let mut finished = record.clone();
        finished.complete(response_body, http_status, transaction_id)?;
        self.store.finish(&finished).await?;
        *record = finished;
        Ok(())
    }

    /// Record failure for an admitted request
    ///
    /// # Errors
    /// Same as [`IdempotencyGuard::complete`].
    pub async fn fail(
        &self,
        record: &mut IdempotencyRecord,
        response_body: impl Into<String>,
        http_status: u16,
    ) -> Result<()> {
        let mut finished = record.clone();
        finished.fail(response_body, http_status)?;
        self.store.finish(&finished).await?;
        *record = finished;
        Ok(())
    }

    /// Run `operation` at most once per key and remember its response
    ///
    /// `operation` returns `Ok` with the success response or `Err` with the
    /// error response to store. A replay returns the stored response with
    /// `replayed = true` and does not call `operation`.
    pub async fn run<F, Fut>(
        &self,
        key: &IdempotencyKey,
        request_hash: &str,
        operation: F,
    ) -> Result<GuardOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<StoredResponse, StoredResponse>>,
    {
        match self.begin(key, request_hash).await? {
            Admission::Replay(record) => Ok(GuardOutcome {
                response: StoredResponse {
                    body: record.response_body().unwrap_or_default().to_string(),
                    http_status: record.http_status().unwrap_or(200),
                    transaction_id: record.transaction_id().cloned(),
                },
                replayed: true,
            }),
            Admission::Execute(mut record) => {
                let response = match operation().await {
                    Ok(response) => {
                        self.complete(
                            &mut record,
                            response.body.clone(),
                            response.http_status,
                            response.transaction_id.clone(),
                        )
                        .await?;
                        response
                    }
                    Err(response) => {
                        self.fail(&mut record, response.body.clone(), response.http_status)
                            .await?;
                        response
                    }
                };
                Ok(GuardOutcome {
                    response,
                    replayed: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::idempotency::store::MemoryIdempotencyStore;
    use chrono::{DateTime, Duration};

    const TTL: u64 = 3_600;

    fn setup() -> (IdempotencyGuard<MemoryIdempotencyStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let guard = IdempotencyGuard::with_clock(MemoryIdempotencyStore::new(), TTL, clock.clone());
        (guard, clock)
    }

    fn key() -> IdempotencyKey {
        IdempotencyKey::of("order-7f3a-0001").unwrap()
    }

    #[test]
    fn test_ttl_from_config() {
        let config = crate::config::AppConfig::default();
        let guard = IdempotencyGuard::new(MemoryIdempotencyStore::new(), &config.idempotency);
        assert_eq!(guard.ttl_seconds(), 86_400);
        assert!(guard.store().is_empty());
    }

    #[tokio::test]
    async fn test_new_key_executes() {
        let (guard, _) = setup();
        let admission = guard.begin(&key(), "h1").await.unwrap();
        assert!(matches!(admission, Admission::Execute(ref r) if r.is_in_progress()));
        assert_eq!(guard.store().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_replays() {
        let (guard, clock) = setup();
        let Admission::Execute(mut record) = guard.begin(&key(), "h1").await.unwrap() else {
            panic!("expected execute");
        };
        let txn = TransactionId::of("TXN-00c0ffee").unwrap();
        guard
            .complete(&mut record, "{\"id\":\"TXN-00c0ffee\"}", 201, Some(txn.clone()))
            .await
            .unwrap();

        clock.advance(Duration::minutes(10));
        match guard.begin(&key(), "h1").await.unwrap() {
            Admission::Replay(stored) => {
                assert_eq!(stored.http_status(), Some(201));
                assert_eq!(stored.transaction_id(), Some(&txn));
            }
            other => panic!("expected replay, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_conflicting_content_rejected() {
        let (guard, _) = setup();
        guard.begin(&key(), "h1").await.unwrap();
        assert_eq!(
            guard.begin(&key(), "h2").await.unwrap_err(),
            TransactionError::IdempotencyKeyConflict("order-7f3a-0001".into())
        );
        // First request's record untouched.
        let stored = guard.store().get(&key()).await.unwrap().unwrap();
        assert_eq!(stored.request_hash(), "h1");
    }

    #[tokio::test]
    async fn test_in_progress_rejected_until_expiry() {
        let (guard, clock) = setup();
        guard.begin(&key(), "h1").await.unwrap();

        assert!(matches!(
            guard.begin(&key(), "h1").await,
            Err(TransactionError::IdempotencyKeyInProgress(_))
        ));

        clock.advance(Duration::seconds(TTL as i64 + 1));
        match guard.begin(&key(), "h1").await.unwrap() {
            Admission::Execute(record) => assert_eq!(record.fence(), 2),
            other => panic!("expected execute, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_key_reusable_for_new_content() {
        let (guard, clock) = setup();
        let Admission::Execute(mut record) = guard.begin(&key(), "h1").await.unwrap() else {
            panic!("expected execute");
        };
        guard.complete(&mut record, "{}", 200, None).await.unwrap();

        clock.advance(Duration::seconds(TTL as i64 + 1));
        let admission = guard.begin(&key(), "h2").await.unwrap();
        assert!(matches!(admission, Admission::Execute(ref r) if r.request_hash() == "h2"));
    }

    #[tokio::test]
    async fn test_failed_same_request_retries() {
        let (guard, _) = setup();
        let Admission::Execute(mut record) = guard.begin(&key(), "h1").await.unwrap() else {
            panic!("expected execute");
        };
        guard.fail(&mut record, "{\"error\":\"timeout\"}", 503).await.unwrap();

        match guard.begin(&key(), "h1").await.unwrap() {
            Admission::Execute(retry) => assert_eq!(retry.fence(), 2),
            other => panic!("expected execute, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_late_completion_is_fenced() {
        let (guard, clock) = setup();
        let Admission::Execute(mut stale) = guard.begin(&key(), "h1").await.unwrap() else {
            panic!("expected execute");
        };

        clock.advance(Duration::seconds(TTL as i64 + 1));
        let Admission::Execute(mut fresh) = guard.begin(&key(), "h1").await.unwrap() else {
            panic!("expected execute");
        };

        assert!(matches!(
            guard.complete(&mut stale, "{}", 200, None).await,
            Err(TransactionError::StaleCompletion { fence: 1, current: 2, .. })
        ));
        guard.complete(&mut fresh, "{}", 200, None).await.unwrap();
        let stored = guard.store().get(&key()).await.unwrap().unwrap();
        assert_eq!(stored.fence(), 2);
        assert!(stored.is_completed());
    }

    #[tokio::test]
    async fn test_second_finish_rejected() {
        let (guard, _) = setup();
        let Admission::Execute(mut record) = guard.begin(&key(), "h1").await.unwrap() else {
            panic!("expected execute");
        };
        let mut copy = record.clone();
        guard.complete(&mut record, "{\"ok\":true}", 201, None).await.unwrap();

        assert!(matches!(
            guard.fail(&mut record, "{\"error\":\"late\"}", 500).await,
            Err(TransactionError::IdempotencyRecordFinished { .. })
        ));
        // A copy taken while IN_PROGRESS is rejected by the store.
        assert!(matches!(
            guard.fail(&mut copy, "{\"error\":\"late\"}", 500).await,
            Err(TransactionError::IdempotencyRecordFinished { .. })
        ));
        assert!(copy.is_in_progress());

        let stored = guard.store().get(&key()).await.unwrap().unwrap();
        assert!(stored.is_completed());
        assert_eq!(stored.http_status(), Some(201));
        assert!(matches!(
            guard.begin(&key(), "h1").await.unwrap(),
            Admission::Replay(_)
        ));
    }

    #[tokio::test]
    async fn test_replay_record_cannot_be_finished() {
        let (guard, _) = setup();
        let Admission::Execute(mut record) = guard.begin(&key(), "h1").await.unwrap() else {
            panic!("expected execute");
        };
        guard.complete(&mut record, "{}", 200, None).await.unwrap();

        let Admission::Replay(mut replay) = guard.begin(&key(), "h1").await.unwrap() else {
            panic!("expected replay");
        };
        assert!(guard.fail(&mut replay, "{}", 500).await.is_err());
        assert!(guard.complete(&mut replay, "{}", 201, None).await.is_err());

        let stored = guard.store().get(&key()).await.unwrap().unwrap();
        assert!(stored.is_completed());
        assert_eq!(stored.http_status(), Some(200));
    }

    #[tokio::test]
    async fn test_run_executes_once() {
        let (guard, _) = setup();
        let counter = std::sync::atomic::AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..3 {
            let outcome = guard
                .run(&key(), "h1", move || async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(StoredResponse {
                        body: "{\"ok\":true}".into(),
                        http_status: 201,
                        transaction_id: None,
                    })
                })
                .await
                .unwrap();
            assert_eq!(outcome.response.http_status, 201);
        }
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_stores_failure() {
        let (guard, _) = setup();
        let outcome = guard
            .run(&key(), "h1", || async {
                Err(StoredResponse {
                    body: "{\"error\":\"insufficient funds\"}".into(),
                    http_status: 400,
                    transaction_id: None,
                })
            })
            .await
            .unwrap();
        assert!(!outcome.replayed);
        assert_eq!(outcome.response.http_status, 400);

        let stored = guard.store().get(&key()).await.unwrap().unwrap();
        assert!(stored.is_failed());
    }
}
