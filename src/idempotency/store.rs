//! Idempotency Record Storage
//!
//! The store owns the only race that matters: two requests with the same key
//! both seeing "absent". `insert_if_absent` must be a single atomic
//! create-unique-or-fail, and every later write is compare-and-swap on the
//! record's fence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use crate::transaction::error::{Result, TransactionError};
use crate::transaction::ids::IdempotencyKey;

use super::record::IdempotencyRecord;

/// Result of an atomic create-if-absent
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// Uniqueness violation: the record that was already stored
    Exists(IdempotencyRecord),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>>;

    /// Atomic create-unique-or-fail keyed on the record's key
    async fn insert_if_absent(&self, record: IdempotencyRecord) -> Result<InsertOutcome>;

    /// Replace the stored record only if its fence is still `expected_fence`.
    /// Returns `false` when another writer got there first.
    async fn supersede(&self, expected_fence: u64, record: IdempotencyRecord) -> Result<bool>;

    /// Persist a finished (COMPLETED/FAILED) record. Only an IN_PROGRESS stored
    /// record of the same generation may be finished.
    ///
    /// # Errors
    /// * `StaleCompletion` - the stored generation is no longer `record.fence()`
    /// * `IdempotencyRecordFinished` - the stored generation already finished
    async fn finish(&self, record: &IdempotencyRecord) -> Result<()>;
}

#[async_trait]
impl<S: IdempotencyStore + ?Sized> IdempotencyStore for Arc<S> {
    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>> {
        (**self).get(key).await
    }

    async fn insert_if_absent(&self, record: IdempotencyRecord) -> Result<InsertOutcome> {
        (**self).insert_if_absent(record).await
    }

    async fn supersede(&self, expected_fence: u64, record: IdempotencyRecord) -> Result<bool> {
        (**self).supersede(expected_fence, record).await
    }

    async fn finish(&self, record: &IdempotencyRecord) -> Result<()> {
        (**self).finish(record).await
    }
}

/// In-memory store backed by `DashMap` (shard-locked entry API gives atomicity)
#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    records: DashMap<IdempotencyKey, IdempotencyRecord>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop records expired at `now`; returns how many were removed.
    ///
    /// Expiry is otherwise lazy (checked on lookup), so long-running
    /// processes call this periodically to bound memory.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired_at(now));
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            debug!(purged, "Purged expired idempotency records");
        }
        purged
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn insert_if_absent(&self, record: IdempotencyRecord) -> Result<InsertOutcome> {
        match self.records.entry(record.key().clone()) {
            Entry::Occupied(existing) => {
                debug!(key = %record.key(), "Idempotency key already present");
                Ok(InsertOutcome::Exists(existing.get().clone()))
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn supersede(&self, expected_fence: u64, record: IdempotencyRecord) -> Result<bool> {
        match self.records.get_mut(record.key()) {
            Some(mut stored) if stored.fence() == expected_fence => {
                *stored = record;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish(&self, record: &IdempotencyRecord) -> Result<()> {
        let mut stored = self
            .records
            .get_mut(record.key())
            .ok_or_else(|| TransactionError::StaleCompletion {
                key: record.key().to_string(),
                fence: record.fence(),
                current: 0,
            })?;

        if stored.fence() != record.fence() {
            warn!(
                key = %record.key(),
                fence = record.fence(),
                current = stored.fence(),
                "Rejecting completion from superseded generation"
            );
            return Err(TransactionError::StaleCompletion {
                key: record.key().to_string(),
                fence: record.fence(),
                current: stored.fence(),
            });
        }
        if !stored.is_in_progress() {
            warn!(
                key = %record.key(),
                fence = record.fence(),
                status = %stored.status(),
                "Rejecting second finish of idempotency record"
            );
            return Err(TransactionError::IdempotencyRecordFinished {
                key: record.key().to_string(),
                status: stored.status(),
            });
        }
        *stored = record.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> IdempotencyKey {
        IdempotencyKey::of(s).unwrap()
    }

    #[tokio::test]
    async fn test_insert_if_absent_is_unique() {
        let store = MemoryIdempotencyStore::new();
        let first = IdempotencyRecord::create_in_progress(key("key-00000001"), "a", 60);
        let second = IdempotencyRecord::create_in_progress(key("key-00000001"), "b", 60);

        assert_eq!(store.insert_if_absent(first.clone()).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            store.insert_if_absent(second).await.unwrap(),
            InsertOutcome::Exists(first.clone())
        );
        assert_eq!(store.get(first.key()).await.unwrap(), Some(first));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_single_winner() {
        let store = Arc::new(MemoryIdempotencyStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let record = IdempotencyRecord::create_in_progress(
                    key("race-key-0001"),
                    format!("hash-{}", i),
                    60,
                );
                store.insert_if_absent(record).await.unwrap()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn test_supersede_cas() {
        let store = MemoryIdempotencyStore::new();
        let first = IdempotencyRecord::create_in_progress(key("key-00000002"), "a", 60);
        store.insert_if_absent(first.clone()).await.unwrap();

        let next = IdempotencyRecord::replacing(&first, "a", 60, chrono::Utc::now());
        assert!(store.supersede(1, next.clone()).await.unwrap());
        // Second writer with the old fence loses.
        let other = IdempotencyRecord::replacing(&first, "a", 60, chrono::Utc::now());
        assert!(!store.supersede(1, other).await.unwrap());

        assert_eq!(store.get(first.key()).await.unwrap().unwrap().fence(), 2);
    }

    #[tokio::test]
    async fn test_finish_rejects_stale_generation() {
        let store = MemoryIdempotencyStore::new();
        let mut first = IdempotencyRecord::create_in_progress(key("key-00000003"), "a", 60);
        store.insert_if_absent(first.clone()).await.unwrap();

        let next = IdempotencyRecord::replacing(&first, "a", 60, chrono::Utc::now());
        store.supersede(first.fence(), next).await.unwrap();

        first.complete("{}", 200, None).unwrap();
        assert_eq!(
            store.finish(&first).await,
            Err(TransactionError::StaleCompletion {
                key: "key-00000003".into(),
                fence: 1,
                current: 2,
            })
        );
        assert!(store.get(first.key()).await.unwrap().unwrap().is_in_progress());
    }

    #[tokio::test]
    async fn test_finish_is_one_shot() {
        let store = MemoryIdempotencyStore::new();
        let record = IdempotencyRecord::create_in_progress(key("key-00000004"), "a", 60);
        store.insert_if_absent(record.clone()).await.unwrap();

        let mut ok = record.clone();
        ok.complete("{\"ok\":true}", 201, None).unwrap();
        store.finish(&ok).await.unwrap();

        let mut late = record.clone();
        late.fail("{\"error\":\"late\"}", 500).unwrap();
        assert!(matches!(
            store.finish(&late).await,
            Err(TransactionError::IdempotencyRecordFinished { .. })
        ));
        assert_eq!(store.get(record.key()).await.unwrap(), Some(ok));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let store = MemoryIdempotencyStore::new();
        let short = IdempotencyRecord::create_in_progress_at(key("short-lived-1"), "a", 60, t0);
        let long = IdempotencyRecord::create_in_progress_at(key("long-lived-01"), "b", 3_600, t0);
        store.insert_if_absent(short.clone()).await.unwrap();
        store.insert_if_absent(long.clone()).await.unwrap();

        assert_eq!(store.purge_expired(t0 + chrono::Duration::seconds(60)), 0);
        assert_eq!(store.purge_expired(t0 + chrono::Duration::seconds(61)), 1);
        assert_eq!(store.get(short.key()).await.unwrap(), None);
        assert_eq!(store.get(long.key()).await.unwrap(), Some(long));
    }
}
