//! Transaction Status Definitions
//!
//! Lifecycle states and the transition table. `can_transition_to` is the
//! only place legality is decided; mutators on `Transaction` consult it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transaction lifecycle status
///
/// Terminal states: SUCCESS, FAILED, CANCELLED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum TransactionStatus {
    /// Initial state - created, not yet applied
    Pending = 0,
    /// Terminal: applied to the account
    Success = 1,
    /// Terminal: rejected by the balance authority or processing error
    Failed = 2,
    /// Terminal: cancelled before being applied
    Cancelled = 3,
}

struct StatusAttrs {
    name: &'static str,
    description: &'static str,
    is_final: bool,
    cancellable: bool,
    retryable: bool,
    transitions: &'static [TransactionStatus],
}

/// Attribute table, indexed by discriminant.
static STATUS_TABLE: [StatusAttrs; 4] = [
    StatusAttrs {
        name: "PENDING",
        description: "Processing",
        is_final: false,
        cancellable: true,
        retryable: true,
        transitions: &[
            TransactionStatus::Success,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
        ],
    },
    StatusAttrs {
        name: "SUCCESS",
        description: "Succeeded",
        is_final: true,
        cancellable: false,
        retryable: false,
        transitions: &[],
    },
    StatusAttrs {
        name: "FAILED",
        description: "Failed",
        is_final: true,
        cancellable: false,
        retryable: false,
        transitions: &[],
    },
    StatusAttrs {
        name: "CANCELLED",
        description: "Cancelled",
        is_final: true,
        cancellable: false,
        retryable: false,
        transitions: &[],
    },
];

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 4] = [
        TransactionStatus::Pending,
        TransactionStatus::Success,
        TransactionStatus::Failed,
        TransactionStatus::Cancelled,
    ];

    #[inline]
    fn attrs(&self) -> &'static StatusAttrs {
        &STATUS_TABLE[*self as usize]
    }

    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_final(&self) -> bool {
        self.attrs().is_final
    }

    #[inline]
    pub fn is_cancellable(&self) -> bool {
        self.attrs().cancellable
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.attrs().retryable
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        *self == TransactionStatus::Pending
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        *self == TransactionStatus::Success
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        *self == TransactionStatus::Failed
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        *self == TransactionStatus::Cancelled
    }

    /// Processed to an outcome (SUCCESS or FAILED), as opposed to cancelled
    #[inline]
    pub fn is_completed(&self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Failed)
    }

    /// Legal target states from this state
    pub fn allowed_transitions(&self) -> &'static [TransactionStatus] {
        self.attrs().transitions
    }

    /// Whether moving to `target` is legal. Self-transitions never are.
    pub fn can_transition_to(&self, target: TransactionStatus) -> bool {
        *self != target && self.allowed_transitions().contains(&target)
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        self.attrs().name
    }

    pub fn description(&self) -> &'static str {
        self.attrs().description
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid transaction status: {}", s))
    }
}
