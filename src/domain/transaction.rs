//! Transaction types
//!
//! The queue message and the ledger record. A `TransactionRequest` is created
//! by ingress, immutable, and consumed exactly once semantically even though
//! the queue may deliver it more than once. A `LedgerEntry` is created only by
//! the worker after a successful balance update and is never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Amount;

/// Kind of balance mutation a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Deposit => write!(f, "deposit"),
            TransactionKind::Withdrawal => write!(f, "withdrawal"),
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            other => Err(format!("Invalid transaction type: {}", other)),
        }
    }
}

/// A deposit/withdrawal request as carried by the transaction queue.
///
/// `request_id` is the idempotency key: redeliveries of the same request must
/// produce at most one ledger entry and one balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub request_id: Uuid,
    pub account_id: i64,
    pub amount: Amount,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
}

impl TransactionRequest {
    pub fn new(account_id: i64, amount: Amount, kind: TransactionKind) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            account_id,
            amount,
            kind,
        }
    }

    /// Rebuild a request with an explicit idempotency key (client retries)
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

/// One applied transaction in the append-only ledger.
///
/// Exactly one entry exists per applied `request_id`; the unique index on
/// `request_id` is what makes the worker's ledger append idempotent. The
/// amount was validated when the request was parsed, so the entry carries a
/// plain decimal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub account_id: i64,
    pub amount: rust_decimal::Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub applied_at: DateTime<Utc>,
    pub request_id: Uuid,
}

impl LedgerEntry {
    /// Build the ledger record for a request that was just applied
    pub fn from_request(request: &TransactionRequest) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            account_id: request.account_id,
            amount: request.amount.value(),
            kind: request.kind,
            applied_at: Utc::now(),
            request_id: request.request_id,
        }
    }

    /// Signed delta this entry contributed to the account balance
    pub fn signed_amount(&self) -> rust_decimal::Decimal {
        match self.kind {
            TransactionKind::Deposit => self.amount,
            TransactionKind::Withdrawal => -self.amount,
        }
    }
}
