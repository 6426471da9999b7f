//! Database module
//!
//! Schema bootstrap and connectivity checks. The schema is small enough to
//! create in place on startup; `check_schema` verifies it afterwards so a
//! partially provisioned database fails fast instead of at first use.

use sqlx::PgPool;

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Create the tables and indexes the service needs, if they don't exist
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id BIGSERIAL PRIMARY KEY,
            balance DECIMAL(15,2) NOT NULL,
            version BIGINT NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ledger_entries (
            entry_id UUID PRIMARY KEY,
            account_id BIGINT NOT NULL,
            amount DECIMAL(15,2) NOT NULL,
            kind TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL,
            request_id UUID NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_ledger_entries_account
        ON ledger_entries (account_id, applied_at)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_messages (
            id UUID PRIMARY KEY,
            payload BYTEA NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            visible_at TIMESTAMPTZ NOT NULL,
            enqueued_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_queue_messages_visible
        ON queue_messages (visible_at, enqueued_at)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dead_letters (
            id UUID PRIMARY KEY,
            payload BYTEA NOT NULL,
            reason TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            enqueued_at TIMESTAMPTZ NOT NULL,
            dead_lettered_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database schema ready");
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let required_tables = vec![
        "accounts",
        "ledger_entries",
        "queue_messages",
        "dead_letters",
    ];

    for table in required_tables {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}
