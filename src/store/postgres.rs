//! Postgres-backed stores
//!
//! Production implementations of the store contracts. The conditional update
//! is a single `UPDATE ... WHERE id = $1 AND version = $2`, so the
//! compare-and-swap is atomic at the row level; the ledger append relies on
//! the unique index on `request_id` for idempotency.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{LedgerEntry, TransactionKind};

use super::{AccountRecord, BalanceStore, LedgerStore, StoreError};

/// Balance store on the `accounts` table
#[derive(Debug, Clone)]
pub struct PgBalanceStore {
    pool: PgPool,
}

impl PgBalanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    async fn create_account(&self, initial_balance: Decimal) -> Result<AccountRecord, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO accounts (balance, version)
            VALUES ($1, 1)
            RETURNING id
            "#,
        )
        .bind(initial_balance)
        .fetch_one(&self.pool)
        .await?;

        Ok(AccountRecord {
            id,
            balance: initial_balance,
            version: 1,
        })
    }

    async fn get(&self, account_id: i64) -> Result<AccountRecord, StoreError> {
        let row: Option<(Decimal, i64)> = sqlx::query_as(
            r#"
            SELECT balance, version FROM accounts WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((balance, version)) => Ok(AccountRecord {
                id: account_id,
                balance,
                version,
            }),
            None => Err(StoreError::NotFound(account_id)),
        }
    }

    async fn conditional_update(
        &self,
        account_id: i64,
        expected_version: i64,
        new_balance: Decimal,
    ) -> Result<AccountRecord, StoreError> {
        let row: Option<(Decimal, i64)> = sqlx::query_as(
            r#"
            UPDATE accounts
            SET balance = $3, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING balance, version
            "#,
        )
        .bind(account_id)
        .bind(expected_version)
        .bind(new_balance)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((balance, version)) = row {
            return Ok(AccountRecord {
                id: account_id,
                balance,
                version,
            });
        }

        // No row updated: the account is gone or another writer won the race
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE id = $1)")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;

        if exists {
            Err(StoreError::VersionConflict {
                account_id,
                expected: expected_version,
            })
        } else {
            Err(StoreError::NotFound(account_id))
        }
    }
}

/// Ledger store on the `ledger_entries` table
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let rows = sqlx::query(
            r#"
            INSERT INTO ledger_entries (entry_id, account_id, amount, kind, applied_at, request_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(entry.entry_id)
        .bind(entry.account_id)
        .bind(entry.amount)
        .bind(entry.kind.to_string())
        .bind(entry.applied_at)
        .bind(entry.request_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::DuplicateEntry(entry.request_id));
        }

        Ok(())
    }

    async fn exists(&self, request_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM ledger_entries WHERE request_id = $1)",
        )
        .bind(request_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn history(&self, account_id: i64) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows: Vec<(Uuid, i64, Decimal, String, DateTime<Utc>, Uuid)> = sqlx::query_as(
            r#"
            SELECT entry_id, account_id, amount, kind, applied_at, request_id
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY applied_at ASC, entry_id ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (entry_id, account_id, amount, kind, applied_at, request_id) in rows {
            let kind: TransactionKind = kind
                .parse()
                .map_err(|e: String| StoreError::Unavailable(e))?;
            entries.push(LedgerEntry {
                entry_id,
                account_id,
                amount,
                kind,
                applied_at,
                request_id,
            });
        }

        Ok(entries)
    }
}
