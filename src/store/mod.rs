//! Store contracts
//!
//! The two persistence seams of the pipeline. The balance store owns the
//! authoritative `(balance, version)` row per account and is the sole
//! enforcement point against lost updates (single-row compare-and-swap). The
//! ledger store owns the append-only history; its unique `request_id` index
//! is what makes the worker's append idempotent under redelivery.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::LedgerEntry;

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryBalanceStore, InMemoryLedgerStore};
pub use postgres::{PgBalanceStore, PgLedgerStore};

/// Authoritative balance row: `version` is the optimistic-concurrency token,
/// incremented on every successful conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountRecord {
    pub id: i64,
    pub balance: Decimal,
    pub version: i64,
}

/// Errors raised by the balance and ledger stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Account does not exist
    #[error("Account not found: {0}")]
    NotFound(i64),

    /// Conditional update lost the race: the row's version moved past
    /// `expected` since it was read
    #[error("Version conflict for account {account_id}: expected version {expected}")]
    VersionConflict { account_id: i64, expected: i64 },

    /// A ledger entry with this request_id already exists
    #[error("Duplicate ledger entry for request {0}")]
    DuplicateEntry(Uuid),

    /// Transient infrastructure failure (connection loss, timeout)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if this error is a concurrency conflict
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }

    /// Check if retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Database(_))
    }
}

/// Authoritative current balance per account, with atomic conditional updates.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Create a new account with the given starting balance; the balance is
    /// fixed here and only ever mutated by the worker afterwards.
    async fn create_account(&self, initial_balance: Decimal) -> Result<AccountRecord, StoreError>;

    /// Read `(balance, version)` for an account
    async fn get(&self, account_id: i64) -> Result<AccountRecord, StoreError>;

    /// Compare-and-swap: write `new_balance` and bump the version, but only
    /// if the row's version still equals `expected_version`. Atomic at the
    /// storage layer.
    async fn conditional_update(
        &self,
        account_id: i64,
        expected_version: i64,
        new_balance: Decimal,
    ) -> Result<AccountRecord, StoreError>;
}

/// Append-only, immutable history of applied transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert the entry; `DuplicateEntry` if an entry with the same
    /// `request_id` already exists.
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError>;

    /// Dedup probe for redelivered messages
    async fn exists(&self, request_id: Uuid) -> Result<bool, StoreError>;

    /// All entries for an account, ordered by `applied_at` ascending
    async fn history(&self, account_id: i64) -> Result<Vec<LedgerEntry>, StoreError>;
}
