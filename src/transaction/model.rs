//! Transaction Aggregate
//!
//! ```text
//! PENDING ──complete──→ SUCCESS
//!    │ ────fail──────→ FAILED
//!    └─────cancel────→ CANCELLED   (cancellable types only)
//! ```
//!
//! # Invariants (ENFORCED by private fields):
//! - `amount` is strictly positive
//! - status only moves along `TransactionStatus::can_transition_to`
//! - `processed_at` is set exactly once, on the terminal transition
//! - `balance_after` is set only on SUCCESS
//! - a rejected mutation leaves every field unchanged

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::money::Money;

use super::error::{Result, TransactionError};
use super::ids::{IdempotencyKey, TransactionId};
use super::state::TransactionStatus;
use super::types::TransactionType;

/// Longest accepted free-text description, in characters
pub const MAX_DESCRIPTION_LEN: usize = 200;

/// Input for [`Transaction::create`]
///
/// `transaction_type` and `amount` are optional so that a request missing them
/// can be represented and rejected with a specific error.
#[derive(Debug, Clone, Default)]
pub struct NewTransaction {
    pub account_id: String,
    pub transaction_type: Option<TransactionType>,
    pub amount: Option<Money>,
    pub description: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
    /// Original transaction for refund/cancel lineage
    pub reference_transaction_id: Option<String>,
}

impl NewTransaction {
    pub fn new(
        account_id: impl Into<String>,
        transaction_type: TransactionType,
        amount: Money,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            transaction_type: Some(transaction_type),
            amount: Some(amount),
            ..Default::default()
        }
    }
}

/// Audit metadata owned by the persistence layer
///
/// Carried through unchanged by the aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub is_deleted: bool,
}

/// Flat, storage-facing view of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub id: Option<TransactionId>,
    pub account_id: String,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub balance_after: Option<Money>,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub reference_transaction_id: Option<String>,
    pub fail_reason: Option<String>,
    pub cancel_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub audit: AuditInfo,
}

/// Money-movement transaction (aggregate root)
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    id: Option<TransactionId>,
    account_id: String,
    transaction_type: TransactionType,
    amount: Money,
    balance_after: Option<Money>,
    status: TransactionStatus,
    description: Option<String>,
    idempotency_key: Option<IdempotencyKey>,
    reference_transaction_id: Option<String>,
    fail_reason: Option<String>,
    cancel_reason: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    audit: AuditInfo,
}

impl Transaction {
    /// Create a new PENDING transaction with no identifier yet
    ///
    /// # Errors
    /// * `AccountRequired` - blank account id
    /// * `TypeRequired` - no transaction type
    /// * `InvalidAmount` - missing or non-positive amount
    /// * `DescriptionTooLong` - description over [`MAX_DESCRIPTION_LEN`] characters
    pub fn create(new: NewTransaction) -> Result<Self> {
        if new.account_id.trim().is_empty() {
            return Err(TransactionError::AccountRequired);
        }
        let transaction_type = new.transaction_type.ok_or(TransactionError::TypeRequired)?;
        let amount = match new.amount {
            Some(amount) if amount.is_positive() => amount,
            other => {
                return Err(TransactionError::InvalidAmount {
                    amount: other.map(|m| m.to_string()),
                });
            }
        };
        if let Some(description) = &new.description {
            let len = description.chars().count();
            if len > MAX_DESCRIPTION_LEN {
                return Err(TransactionError::DescriptionTooLong {
                    len,
                    max: MAX_DESCRIPTION_LEN,
                });
            }
        }

        Ok(Self {
            id: None,
            account_id: new.account_id,
            transaction_type,
            amount,
            balance_after: None,
            status: TransactionStatus::Pending,
            description: new.description,
            idempotency_key: new.idempotency_key,
            reference_transaction_id: new.reference_transaction_id,
            fail_reason: None,
            cancel_reason: None,
            processed_at: None,
            audit: AuditInfo::default(),
        })
    }

    /// Rebuild from storage. Stored state is trusted and not re-validated.
    pub fn restore(snapshot: TransactionSnapshot) -> Self {
        Self {
            id: snapshot.id,
            account_id: snapshot.account_id,
            transaction_type: snapshot.transaction_type,
            amount: snapshot.amount,
            balance_after: snapshot.balance_after,
            status: snapshot.status,
            description: snapshot.description,
            idempotency_key: snapshot.idempotency_key,
            reference_transaction_id: snapshot.reference_transaction_id,
            fail_reason: snapshot.fail_reason,
            cancel_reason: snapshot.cancel_reason,
            processed_at: snapshot.processed_at,
            audit: snapshot.audit,
        }
    }

    pub fn snapshot(&self) -> TransactionSnapshot {
        TransactionSnapshot {
            id: self.id.clone(),
            account_id: self.account_id.clone(),
            transaction_type: self.transaction_type,
            amount: self.amount,
            balance_after: self.balance_after,
            status: self.status,
            description: self.description.clone(),
            idempotency_key: self.idempotency_key.clone(),
            reference_transaction_id: self.reference_transaction_id.clone(),
            fail_reason: self.fail_reason.clone(),
            cancel_reason: self.cancel_reason.clone(),
            processed_at: self.processed_at,
            audit: self.audit.clone(),
        }
    }

    /// Attach the identifier chosen by the persistence layer
    ///
    /// # Errors
    /// * `IdAlreadyAssigned` - the transaction already has an identifier
    pub fn assign_id(&mut self, id: TransactionId) -> Result<()> {
        if let Some(existing) = &self.id {
            return Err(TransactionError::IdAlreadyAssigned(existing.to_string()));
        }
        self.id = Some(id);
        Ok(())
    }

    // ============================================================
    // READ-ONLY GETTERS
    // ============================================================

    pub fn id(&self) -> Option<&TransactionId> {
        self.id.as_ref()
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn balance_after(&self) -> Option<Money> {
        self.balance_after
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn idempotency_key(&self) -> Option<&IdempotencyKey> {
        self.idempotency_key.as_ref()
    }

    pub fn reference_transaction_id(&self) -> Option<&str> {
        self.reference_transaction_id.as_deref()
    }

    pub fn fail_reason(&self) -> Option<&str> {
        self.fail_reason.as_deref()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn audit(&self) -> &AuditInfo {
        &self.audit
    }

    /// Audit fields are maintained by the persistence layer
    pub fn audit_mut(&mut self) -> &mut AuditInfo {
        &mut self.audit
    }

    // ============================================================
    // DERIVED VIEWS
    // ============================================================

    /// Not yet persisted (no identifier)
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_failed(&self) -> bool {
        self.status.is_failed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.is_cancelled()
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    /// Status allows it and the type policy allows it
    pub fn can_cancel(&self) -> bool {
        self.status.is_cancellable() && self.transaction_type.is_cancellable()
    }

    pub fn is_credit(&self) -> bool {
        self.transaction_type.is_credit()
    }

    pub fn is_debit(&self) -> bool {
        self.transaction_type.is_debit()
    }

    // ============================================================
    // STATE TRANSITIONS
    // ============================================================

    /// Mark as applied, recording the resulting account balance
    ///
    /// # Errors
    /// * `AlreadyProcessed` / `AlreadyCancelled` / `AlreadyFailed` - already final
    /// * `InvalidTransition` - transition table disallows SUCCESS
    pub fn complete(&mut self, balance_after: Money) -> Result<()> {
        self.complete_at(balance_after, Utc::now())
    }

    pub fn complete_at(&mut self, balance_after: Money, now: DateTime<Utc>) -> Result<()> {
        self.ensure_not_final()?;
        self.ensure_transition(TransactionStatus::Success)?;

        self.status = TransactionStatus::Success;
        self.balance_after = Some(balance_after);
        self.processed_at = Some(now);
        debug!(
            transaction_id = %self.display_id(),
            balance_after = %balance_after,
            "Transaction completed"
        );
        Ok(())
    }

    /// Mark as failed with a reason
    ///
    /// # Errors
    /// Same final-state and transition checks as [`Transaction::complete`].
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.fail_at(reason, Utc::now())
    }

    pub fn fail_at(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.ensure_not_final()?;
        self.ensure_transition(TransactionStatus::Failed)?;

        let reason = reason.into();
        debug!(transaction_id = %self.display_id(), reason = %reason, "Transaction failed");
        self.status = TransactionStatus::Failed;
        self.fail_reason = Some(reason);
        self.processed_at = Some(now);
        Ok(())
    }

    /// Cancel a pending transaction of a cancellable type
    ///
    /// Final states report their specific `Already*` error first; a pending
    /// transaction of a non-cancellable type fails with `CannotCancel`.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        self.cancel_at(reason, Utc::now())
    }

    pub fn cancel_at(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.ensure_not_final()?;
        if !self.can_cancel() {
            return Err(TransactionError::CannotCancel {
                transaction_id: self.display_id(),
                status: self.status,
            });
        }
        self.ensure_transition(TransactionStatus::Cancelled)?;

        let reason = reason.into();
        debug!(transaction_id = %self.display_id(), reason = %reason, "Transaction cancelled");
        self.status = TransactionStatus::Cancelled;
        self.cancel_reason = Some(reason);
        self.processed_at = Some(now);
        Ok(())
    }

    // Checked in order processed → cancelled → failed for the most specific error.
    fn ensure_not_final(&self) -> Result<()> {
        match self.status {
            TransactionStatus::Success => Err(TransactionError::AlreadyProcessed {
                transaction_id: self.display_id(),
                status: self.status,
            }),
            TransactionStatus::Cancelled => {
                Err(TransactionError::AlreadyCancelled(self.display_id()))
            }
            TransactionStatus::Failed => Err(TransactionError::AlreadyFailed(self.display_id())),
            TransactionStatus::Pending => Ok(()),
        }
    }

    fn ensure_transition(&self, target: TransactionStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(TransactionError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        Ok(())
    }

    fn display_id(&self) -> String {
        self.id
            .as_ref()
            .map_or_else(|| "NEW".to_string(), ToString::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(v: i64) -> Money {
        Money::of(v).unwrap()
    }

    fn pending(transaction_type: TransactionType) -> Transaction {
        Transaction::create(NewTransaction::new(
            "ACC-12345678",
            transaction_type,
            money(100_000),
        ))
        .unwrap()
    }

    #[test]
    fn test_create_pending() {
        let tx = pending(TransactionType::Deposit);
        assert!(tx.is_pending());
        assert!(tx.is_new());
        assert!(tx.id().is_none());
        assert!(tx.processed_at().is_none());
        assert!(tx.balance_after().is_none());
        assert_eq!(tx.amount(), money(100_000));
        assert!(tx.is_credit());
        assert!(!tx.audit().is_deleted);
    }

    #[test]
    fn test_create_validation() {
        let err = Transaction::create(NewTransaction::new("  ", TransactionType::Deposit, money(1)))
            .unwrap_err();
        assert_eq!(err, TransactionError::AccountRequired);

        let err = Transaction::create(NewTransaction {
            account_id: "ACC-1".into(),
            amount: Some(money(1)),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err, TransactionError::TypeRequired);

        let err = Transaction::create(NewTransaction {
            account_id: "ACC-1".into(),
            transaction_type: Some(TransactionType::Fee),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err, TransactionError::InvalidAmount { amount: None });

        let err = Transaction::create(NewTransaction::new(
            "ACC-1",
            TransactionType::Fee,
            Money::ZERO,
        ))
        .unwrap_err();
        assert_eq!(
            err,
            TransactionError::InvalidAmount {
                amount: Some("0".into())
            }
        );
    }

    #[test]
    fn test_create_description_limit() {
        let mut new = NewTransaction::new("ACC-1", TransactionType::Payment, money(10));
        new.description = Some("x".repeat(MAX_DESCRIPTION_LEN));
        assert!(Transaction::create(new.clone()).is_ok());

        new.description = Some("x".repeat(MAX_DESCRIPTION_LEN + 1));
        assert!(matches!(
            Transaction::create(new),
            Err(TransactionError::DescriptionTooLong { len: 201, max: 200 })
        ));
    }

    #[test]
    fn test_complete_then_cancel_rejected() {
        let mut tx = pending(TransactionType::Deposit);
        tx.assign_id(TransactionId::of("TXN-a1b2c3d4").unwrap()).unwrap();

        tx.complete(money(250_000)).unwrap();
        assert!(tx.is_success());
        assert_eq!(tx.balance_after(), Some(money(250_000)));
        let processed_at = tx.processed_at();
        assert!(processed_at.is_some());

        let err = tx.cancel("x").unwrap_err();
        assert_eq!(
            err,
            TransactionError::AlreadyProcessed {
                transaction_id: "TXN-a1b2c3d4".into(),
                status: TransactionStatus::Success,
            }
        );
        assert!(tx.is_success());
        assert_eq!(tx.processed_at(), processed_at);
        assert!(tx.cancel_reason().is_none());
    }

    #[test]
    fn test_fail_records_reason() {
        let mut tx = pending(TransactionType::Withdrawal);
        tx.fail("balance authority rejected").unwrap();
        assert!(tx.is_failed());
        assert_eq!(tx.fail_reason(), Some("balance authority rejected"));
        assert!(tx.balance_after().is_none());
        assert!(tx.processed_at().is_some());

        assert_eq!(
            tx.complete(money(1)).unwrap_err(),
            TransactionError::AlreadyFailed("NEW".into())
        );
        assert!(tx.balance_after().is_none());
    }

    #[test]
    fn test_cancel_cancellable_types() {
        for t in [
            TransactionType::Deposit,
            TransactionType::Payment,
            TransactionType::Refund,
        ] {
            let mut tx = pending(t);
            assert!(tx.can_cancel());
            tx.cancel("customer request").unwrap();
            assert!(tx.is_cancelled());
            assert_eq!(tx.cancel_reason(), Some("customer request"));

            assert_eq!(
                tx.fail("late").unwrap_err(),
                TransactionError::AlreadyCancelled("NEW".into())
            );
        }
    }

    #[test]
    fn test_cancel_non_cancellable_types() {
        for t in [
            TransactionType::Withdrawal,
            TransactionType::TransferIn,
            TransactionType::TransferOut,
            TransactionType::Interest,
            TransactionType::Fee,
        ] {
            let mut tx = pending(t);
            assert!(!tx.can_cancel());
            let err = tx.cancel("nope").unwrap_err();
            assert!(matches!(err, TransactionError::CannotCancel { .. }), "{:?}", t);
            assert!(tx.is_pending());
            assert!(tx.processed_at().is_none());
        }
    }

    #[test]
    fn test_explicit_time() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut tx = pending(TransactionType::Refund);
        tx.complete_at(money(5), now).unwrap();
        assert_eq!(tx.processed_at(), Some(now));
    }

    #[test]
    fn test_assign_id_once() {
        let mut tx = pending(TransactionType::Deposit);
        let id = TransactionId::generate();
        tx.assign_id(id.clone()).unwrap();
        assert!(!tx.is_new());
        assert_eq!(tx.id(), Some(&id));

        assert!(matches!(
            tx.assign_id(TransactionId::generate()),
            Err(TransactionError::IdAlreadyAssigned(_))
        ));
        assert_eq!(tx.id(), Some(&id));
    }

    #[test]
    fn test_snapshot_restore() {
        let mut tx = pending(TransactionType::Payment);
        tx.assign_id(TransactionId::generate()).unwrap();
        tx.audit_mut().created_by = Some("teller-7".into());
        tx.complete(money(900)).unwrap();

        let json = serde_json::to_string(&tx.snapshot()).unwrap();
        let restored = Transaction::restore(serde_json::from_str(&json).unwrap());
        assert_eq!(restored, tx);
        assert_eq!(restored.audit().created_by.as_deref(), Some("teller-7"));
    }
}
