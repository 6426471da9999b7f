//! Postgres-backed queue
//!
//! Durable queue on the `queue_messages` table. Delivery claims the oldest
//! visible message with `FOR UPDATE SKIP LOCKED`, so concurrent workers never
//! lease the same message twice; the claim starts a visibility lease, and a
//! message whose lease expires without an ack becomes deliverable again
//! (at-least-once). Dead letters move to their own table inside the same
//! transaction that removes the live row.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::TransactionRequest;

use super::{DeadLetter, QueueError, QueueMessage, TransactionQueue};

const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Transaction queue on `queue_messages` / `dead_letters`
#[derive(Debug, Clone)]
pub struct PgTransactionQueue {
    pool: PgPool,
    lease: Duration,
}

impl PgTransactionQueue {
    pub fn new(pool: PgPool) -> Self {
        Self::with_lease(pool, DEFAULT_LEASE)
    }

    pub fn with_lease(pool: PgPool, lease: Duration) -> Self {
        Self { pool, lease }
    }
}

#[async_trait]
impl TransactionQueue for PgTransactionQueue {
    async fn enqueue(&self, request: &TransactionRequest) -> Result<Uuid, QueueError> {
        let payload = serde_json::to_vec(request)?;
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO queue_messages (id, payload, attempts, visible_at, enqueued_at)
            VALUES ($1, $2, 0, now(), now())
            "#,
        )
        .bind(id)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn deliver(&self) -> Result<Option<QueueMessage>, QueueError> {
        let row: Option<(Uuid, Vec<u8>, i32)> = sqlx::query_as(
            r#"
            UPDATE queue_messages
            SET attempts = attempts + 1,
                visible_at = now() + make_interval(secs => $1)
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE visible_at <= now()
                ORDER BY enqueued_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload, attempts
            "#,
        )
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, payload, attempts)| QueueMessage {
            id,
            payload,
            attempt: attempts.max(0) as u32,
        }))
    }

    async fn ack(&self, message_id: Uuid) -> Result<(), QueueError> {
        let rows = sqlx::query("DELETE FROM queue_messages WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(QueueError::NotFound(message_id));
        }
        Ok(())
    }

    async fn retry(&self, message_id: Uuid, delay: Duration) -> Result<(), QueueError> {
        let rows = sqlx::query(
            r#"
            UPDATE queue_messages
            SET visible_at = now() + make_interval(secs => $2)
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(QueueError::NotFound(message_id));
        }
        Ok(())
    }

    async fn dead_letter(&self, message_id: Uuid, reason: &str) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Vec<u8>, i32, DateTime<Utc>)> = sqlx::query_as(
            r#"
            DELETE FROM queue_messages
            WHERE id = $1
            RETURNING payload, attempts, enqueued_at
            "#,
        )
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((payload, attempts, enqueued_at)) = row else {
            return Err(QueueError::NotFound(message_id));
        };

        sqlx::query(
            r#"
            INSERT INTO dead_letters (id, payload, reason, attempts, enqueued_at, dead_lettered_at)
            VALUES ($1, $2, $3, $4, $5, now())
            "#,
        )
        .bind(message_id)
        .bind(payload)
        .bind(reason)
        .bind(attempts)
        .bind(enqueued_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError> {
        let rows: Vec<(Uuid, Vec<u8>, String, i32, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, payload, reason, attempts, enqueued_at, dead_lettered_at
            FROM dead_letters
            ORDER BY dead_lettered_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, payload, reason, attempts, enqueued_at, dead_lettered_at)| DeadLetter {
                    id,
                    payload,
                    reason,
                    attempts: attempts.max(0) as u32,
                    enqueued_at,
                    dead_lettered_at,
                },
            )
            .collect())
    }
}
