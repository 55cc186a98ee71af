//! Transaction Persistence Contract
//!
//! The repository assigns identifiers on first insert; the aggregate never
//! generates its own.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::error::{Result, TransactionError};
use super::ids::TransactionId;
use super::model::Transaction;

/// Persist/load contract for [`Transaction`]
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Persist a new transaction, assigning its identifier
    ///
    /// # Errors
    /// * `IdAlreadyAssigned` - the transaction is not new
    async fn insert(&self, tx: &mut Transaction) -> Result<TransactionId>;

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>>;

    /// Overwrite the stored state of an existing transaction
    ///
    /// # Errors
    /// * `TransactionNotFound` - no row for this id (or the transaction is new)
    async fn update(&self, tx: &Transaction) -> Result<()>;
}

/// In-memory repository for tests and single-process deployments
#[derive(Debug, Default)]
pub struct MemoryTransactionRepository {
    rows: DashMap<TransactionId, Transaction>,
}

impl MemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Load an existing transaction, failing if absent
    pub async fn load(&self, id: &TransactionId) -> Result<Transaction> {
        self.get(id)
            .await?
            .ok_or_else(|| TransactionError::TransactionNotFound(id.to_string()))
    }
}

#[async_trait]
impl TransactionRepository for MemoryTransactionRepository {
    async fn insert(&self, tx: &mut Transaction) -> Result<TransactionId> {
        if let Some(existing) = tx.id() {
            return Err(TransactionError::IdAlreadyAssigned(existing.to_string()));
        }

        // Regenerate on the (unlikely) token collision.
        loop {
            let id = TransactionId::generate();
            if let Entry::Vacant(slot) = self.rows.entry(id.clone()) {
                tx.assign_id(id.clone())?;
                let now = Utc::now();
                let audit = tx.audit_mut();
                audit.created_at = Some(now);
                audit.updated_at = Some(now);
                slot.insert(tx.clone());
                info!(
                    transaction_id = %id,
                    transaction_type = %tx.transaction_type(),
                    amount = %tx.amount(),
                    "Transaction created"
                );
                return Ok(id);
            }
            debug!(transaction_id = %id, "Transaction id collision, regenerating");
        }
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        Ok(self.rows.get(id).map(|row| row.value().clone()))
    }

    async fn update(&self, tx: &Transaction) -> Result<()> {
        let id = tx
            .id()
            .ok_or_else(|| TransactionError::TransactionNotFound("NEW".to_string()))?;
        match self.rows.get_mut(id) {
            Some(mut row) => {
                let mut stored = tx.clone();
                stored.audit_mut().updated_at = Some(Utc::now());
                *row = stored;
                debug!(transaction_id = %id, status = %tx.status(), "Transaction updated");
                Ok(())
            }
            None => Err(TransactionError::TransactionNotFound(id.to_string())),
        }
    }
}
