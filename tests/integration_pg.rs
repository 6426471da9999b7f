//! Postgres-backed integration tests
//!
//! These run against a real database and are ignored by default; set
//! DATABASE_URL and run with `cargo test -- --ignored` to include them.

use std::time::Duration;

use rust_decimal_macros::dec;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use banking_ledger::db;
use banking_ledger::domain::{TransactionKind, TransactionRequest};
use banking_ledger::queue::{PgTransactionQueue, TransactionQueue};
use banking_ledger::store::{BalanceStore, LedgerStore, PgBalanceStore, PgLedgerStore, StoreError};

async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    db::init_schema(&pool).await.expect("Failed to init schema");

    sqlx::query("TRUNCATE TABLE accounts, ledger_entries, queue_messages, dead_letters")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}

#[tokio::test]
#[ignore] // Requires a Postgres server
async fn test_conditional_update_detects_conflict() {
    let pool = setup_test_db().await;
    let store = PgBalanceStore::new(pool);

    let account = store.create_account(dec!(100.00)).await.unwrap();
    assert_eq!(account.version, 1);

    let updated = store
        .conditional_update(account.id, 1, dec!(130.00))
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.balance, dec!(130.00));

    // A writer holding the stale version must lose
    let result = store.conditional_update(account.id, 1, dec!(80.00)).await;
    assert!(matches!(result, Err(StoreError::VersionConflict { .. })));

    let current = store.get(account.id).await.unwrap();
    assert_eq!(current.balance, dec!(130.00));
}

#[tokio::test]
#[ignore] // Requires a Postgres server
async fn test_ledger_append_is_idempotent() {
    let pool = setup_test_db().await;
    let store = PgLedgerStore::new(pool);

    let request = TransactionRequest::new(1, "25.00".parse().unwrap(), TransactionKind::Deposit);
    let entry = banking_ledger::domain::LedgerEntry::from_request(&request);

    store.append(&entry).await.unwrap();
    assert!(store.exists(request.request_id).await.unwrap());

    let replay = banking_ledger::domain::LedgerEntry::from_request(&request);
    let result = store.append(&replay).await;
    assert!(matches!(result, Err(StoreError::DuplicateEntry(_))));

    let history = store.history(1).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
#[ignore] // Requires a Postgres server
async fn test_queue_roundtrip_and_dead_letter() {
    let pool = setup_test_db().await;
    let queue = PgTransactionQueue::with_lease(pool, Duration::from_secs(30));

    let request = TransactionRequest::new(1, "10.00".parse().unwrap(), TransactionKind::Deposit);
    let id = queue.enqueue(&request).await.unwrap();

    let message = queue.deliver().await.unwrap().expect("message delivered");
    assert_eq!(message.id, id);
    assert_eq!(message.attempt, 1);

    // Leased: no second delivery while in flight
    assert!(queue.deliver().await.unwrap().is_none());

    // Immediate retry makes it deliverable again with a bumped attempt
    queue.retry(message.id, Duration::ZERO).await.unwrap();
    let redelivered = queue.deliver().await.unwrap().expect("redelivered");
    assert_eq!(redelivered.attempt, 2);

    queue
        .dead_letter(redelivered.id, "test reason")
        .await
        .unwrap();
    assert!(queue.deliver().await.unwrap().is_none());

    let dead = queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, "test reason");

    // Acking a dead-lettered message is an error, it no longer exists
    assert!(queue.ack(Uuid::new_v4()).await.is_err());
}
