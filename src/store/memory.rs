//! In-memory stores
//!
//! Mutex-guarded map implementations of the store contracts, used by the
//! test suite and for running the service without a database. They keep the
//! same semantics as the Postgres stores: atomic compare-and-swap on the
//! account row, idempotent ledger append keyed on `request_id`.
//!
//! Both stores support injecting transient failures so tests can exercise
//! the worker's retry and dead-letter paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::LedgerEntry;

use super::{AccountRecord, BalanceStore, LedgerStore, StoreError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct BalanceState {
    accounts: HashMap<i64, (Decimal, i64)>,
    next_id: i64,
    fail_ops: u32,
}

/// In-memory balance store
#[derive(Debug, Default)]
pub struct InMemoryBalanceStore {
    state: Mutex<BalanceState>,
}

impl InMemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` reads/updates fail with a transient error
    pub fn fail_next_ops(&self, n: u32) {
        lock(&self.state).fail_ops = n;
    }

    fn check_fault(state: &mut BalanceState) -> Result<(), StoreError> {
        if state.fail_ops > 0 {
            state.fail_ops -= 1;
            return Err(StoreError::Unavailable(
                "injected balance store failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalanceStore {
    async fn create_account(&self, initial_balance: Decimal) -> Result<AccountRecord, StoreError> {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = state.next_id;
        state.accounts.insert(id, (initial_balance, 1));

        Ok(AccountRecord {
            id,
            balance: initial_balance,
            version: 1,
        })
    }

    async fn get(&self, account_id: i64) -> Result<AccountRecord, StoreError> {
        let mut state = lock(&self.state);
        Self::check_fault(&mut state)?;

        match state.accounts.get(&account_id) {
            Some(&(balance, version)) => Ok(AccountRecord {
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
        let mut state = lock(&self.state);
        Self::check_fault(&mut state)?;

        let (balance, version) = state
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::NotFound(account_id))?;

        if *version != expected_version {
            return Err(StoreError::VersionConflict {
                account_id,
                expected: expected_version,
            });
        }

        *balance = new_balance;
        *version += 1;

        Ok(AccountRecord {
            id: account_id,
            balance: new_balance,
            version: *version,
        })
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    request_ids: HashSet<Uuid>,
    fail_appends: u32,
}

/// In-memory ledger store
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` appends fail with a transient error
    pub fn fail_next_appends(&self, n: u32) {
        lock(&self.state).fail_appends = n;
    }

    /// Total number of entries across all accounts
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let mut state = lock(&self.state);

        if state.fail_appends > 0 {
            state.fail_appends -= 1;
            return Err(StoreError::Unavailable(
                "injected ledger store failure".to_string(),
            ));
        }

        if !state.request_ids.insert(entry.request_id) {
            return Err(StoreError::DuplicateEntry(entry.request_id));
        }

        state.entries.push(entry.clone());
        Ok(())
    }

    async fn exists(&self, request_id: Uuid) -> Result<bool, StoreError> {
        Ok(lock(&self.state).request_ids.contains(&request_id))
    }

    async fn history(&self, account_id: i64) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = lock(&self.state);
        let mut entries: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.applied_at
                .cmp(&b.applied_at)
                .then(a.entry_id.cmp(&b.entry_id))
        });
        Ok(entries)
    }
}
