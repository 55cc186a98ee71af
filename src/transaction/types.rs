//! Transaction Type Catalog
//!
//! Fixed set of transaction kinds. Direction and cancellability live in a
//! static table rather than in branches at call sites.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum TransactionType {
    Deposit = 0,
    Withdrawal = 1,
    TransferIn = 2,
    TransferOut = 3,
    Payment = 4,
    Refund = 5,
    /// System-initiated credit
    Interest = 6,
    /// System-initiated debit
    Fee = 7,
}

struct TypeAttrs {
    name: &'static str,
    code: &'static str,
    description: &'static str,
    credit: bool,
    /// Transfers are excluded: they need a two-sided reversal instead.
    cancellable: bool,
}

static TYPE_TABLE: [TypeAttrs; 8] = [
    TypeAttrs { name: "DEPOSIT", code: "DEP", description: "Deposit", credit: true, cancellable: true },
    TypeAttrs { name: "WITHDRAWAL", code: "WDR", description: "Withdrawal", credit: false, cancellable: false },
    TypeAttrs { name: "TRANSFER_IN", code: "TRI", description: "Incoming transfer", credit: true, cancellable: false },
    TypeAttrs { name: "TRANSFER_OUT", code: "TRO", description: "Outgoing transfer", credit: false, cancellable: false },
    TypeAttrs { name: "PAYMENT", code: "PAY", description: "Payment", credit: false, cancellable: true },
    TypeAttrs { name: "REFUND", code: "RFD", description: "Refund", credit: true, cancellable: true },
    TypeAttrs { name: "INTEREST", code: "INT", description: "Interest", credit: true, cancellable: false },
    TypeAttrs { name: "FEE", code: "FEE", description: "Fee", credit: false, cancellable: false },
];

impl TransactionType {
    pub const ALL: [TransactionType; 8] = [
        TransactionType::Deposit,
        TransactionType::Withdrawal,
        TransactionType::TransferIn,
        TransactionType::TransferOut,
        TransactionType::Payment,
        TransactionType::Refund,
        TransactionType::Interest,
        TransactionType::Fee,
    ];

    #[inline]
    fn attrs(&self) -> &'static TypeAttrs {
        &TYPE_TABLE[*self as usize]
    }

    /// Increases the account balance
    #[inline]
    pub fn is_credit(&self) -> bool {
        self.attrs().credit
    }

    /// Decreases the account balance
    #[inline]
    pub fn is_debit(&self) -> bool {
        !self.attrs().credit
    }

    #[inline]
    pub fn is_cancellable(&self) -> bool {
        self.attrs().cancellable
    }

    /// Three-letter short code (DEP, WDR, ...)
    pub fn code(&self) -> &'static str {
        self.attrs().code
    }

    pub fn description(&self) -> &'static str {
        self.attrs().description
    }

    pub fn as_str(&self) -> &'static str {
        self.attrs().name
    }

    pub fn is_deposit(&self) -> bool {
        *self == TransactionType::Deposit
    }

    pub fn is_withdrawal(&self) -> bool {
        *self == TransactionType::Withdrawal
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, TransactionType::TransferIn | TransactionType::TransferOut)
    }

    pub fn is_payment_related(&self) -> bool {
        matches!(self, TransactionType::Payment | TransactionType::Refund)
    }

    /// False for INTEREST and FEE, which the system books on its own
    pub fn is_user_initiated(&self) -> bool {
        !matches!(self, TransactionType::Interest | TransactionType::Fee)
    }

    /// Look up by short code
    pub fn from_code(code: &str) -> Option<Self> {
        TransactionType::ALL
            .into_iter()
            .find(|t| t.code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid transaction type: {}", s))
    }
}
