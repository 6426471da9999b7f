//! Transaction queue contract
//!
//! Durable, at-least-once delivery channel between ingress and the workers.
//! `enqueue` persists the request before returning; a delivered message is
//! leased to exactly one consumer and reappears if the lease expires without
//! an acknowledgement (crash, stall), so consumers must tolerate duplicates.
//! Acknowledgement is explicit and worker-controlled. Messages that exhaust
//! their retries or cannot be parsed are moved to a dead-letter set that is
//! preserved for operator inspection, never silently dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::TransactionRequest;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryQueue;
pub use postgres::PgTransactionQueue;

/// A leased delivery. `attempt` counts deliveries of this message, starting
/// at 1; the payload is raw bytes because a message is not known to be
/// well-formed until the worker has validated it.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: Uuid,
    pub payload: Vec<u8>,
    pub attempt: u32,
}

/// Terminal record of a message that could not be processed
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: Uuid,
    #[serde(serialize_with = "serialize_payload")]
    pub payload: Vec<u8>,
    pub reason: String,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

fn serialize_payload<S: serde::Serializer>(payload: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(payload))
}

/// Errors raised by the transaction queue
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Message is not currently leased (already acked, or lease expired)
    #[error("Message not found: {0}")]
    NotFound(Uuid),

    /// Transient infrastructure failure
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable at-least-once delivery channel for transaction requests.
#[async_trait]
pub trait TransactionQueue: Send + Sync {
    /// Durably persist a request; returns the message id. Success here is
    /// the only outcome ingress ever reports to the client.
    async fn enqueue(&self, request: &TransactionRequest) -> Result<Uuid, QueueError>;

    /// Lease the next deliverable message to this consumer, if any.
    /// Non-blocking; consumers poll.
    async fn deliver(&self) -> Result<Option<QueueMessage>, QueueError>;

    /// Remove an acknowledged message permanently
    async fn ack(&self, message_id: Uuid) -> Result<(), QueueError>;

    /// Return a leased message to the queue, deliverable again after `delay`
    async fn retry(&self, message_id: Uuid, delay: Duration) -> Result<(), QueueError>;

    /// Move a leased message to the dead-letter set
    async fn dead_letter(&self, message_id: Uuid, reason: &str) -> Result<(), QueueError>;

    /// Operator inspection surface: most recent dead letters first
    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError>;
}
