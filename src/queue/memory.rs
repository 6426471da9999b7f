//! In-memory queue
//!
//! Keeps the same delivery semantics as the Postgres queue: leased delivery
//! with visibility timeout, explicit ack, delayed retry, dead-letter set.
//! Used by the test suite and for running the service without a broker.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::TransactionRequest;

use super::{DeadLetter, QueueError, QueueMessage, TransactionQueue};

const DEFAULT_LEASE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct StoredMessage {
    id: Uuid,
    payload: Vec<u8>,
    attempts: u32,
    enqueued_at: DateTime<Utc>,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: Vec<StoredMessage>,
    in_flight: HashMap<Uuid, (StoredMessage, Instant)>,
    dead: Vec<DeadLetter>,
}

/// In-memory transaction queue
#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    lease: Duration,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_lease(DEFAULT_LEASE)
    }

    /// Build a queue with a custom visibility lease (tests shorten it to
    /// exercise redelivery of unacknowledged messages)
    pub fn with_lease(lease: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            lease,
        }
    }

    /// Enqueue raw bytes, bypassing serialization. Lets tests inject
    /// malformed payloads the way a buggy producer would.
    pub fn enqueue_raw(&self, payload: Vec<u8>) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).ready.push(StoredMessage {
            id,
            payload,
            attempts: 0,
            enqueued_at: Utc::now(),
            visible_at: Instant::now(),
        });
        id
    }

    /// True when nothing is waiting or leased (the dead-letter set does not
    /// count; it is terminal)
    pub fn is_idle(&self) -> bool {
        let state = lock(&self.state);
        state.ready.is_empty() && state.in_flight.is_empty()
    }

    /// Move expired leases back into the ready set
    fn reap_expired(state: &mut QueueState, now: Instant) {
        let expired: Vec<Uuid> = state
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some((mut message, _)) = state.in_flight.remove(&id) {
                message.visible_at = now;
                state.ready.push(message);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl TransactionQueue for InMemoryQueue {
    async fn enqueue(&self, request: &TransactionRequest) -> Result<Uuid, QueueError> {
        let payload = serde_json::to_vec(request)?;
        Ok(self.enqueue_raw(payload))
    }

    async fn deliver(&self) -> Result<Option<QueueMessage>, QueueError> {
        let now = Instant::now();
        let mut state = lock(&self.state);

        Self::reap_expired(&mut state, now);

        let position = state.ready.iter().position(|m| m.visible_at <= now);
        let Some(position) = position else {
            return Ok(None);
        };

        let mut message = state.ready.remove(position);
        message.attempts += 1;

        let delivery = QueueMessage {
            id: message.id,
            payload: message.payload.clone(),
            attempt: message.attempts,
        };

        state
            .in_flight
            .insert(message.id, (message, now + self.lease));

        Ok(Some(delivery))
    }

    async fn ack(&self, message_id: Uuid) -> Result<(), QueueError> {
        let mut state = lock(&self.state);
        state
            .in_flight
            .remove(&message_id)
            .map(|_| ())
            .ok_or(QueueError::NotFound(message_id))
    }

    async fn retry(&self, message_id: Uuid, delay: Duration) -> Result<(), QueueError> {
        let mut state = lock(&self.state);
        let (mut message, _) = state
            .in_flight
            .remove(&message_id)
            .ok_or(QueueError::NotFound(message_id))?;

        message.visible_at = Instant::now() + delay;
        state.ready.push(message);
        Ok(())
    }

    async fn dead_letter(&self, message_id: Uuid, reason: &str) -> Result<(), QueueError> {
        let mut state = lock(&self.state);
        let (message, _) = state
            .in_flight
            .remove(&message_id)
            .ok_or(QueueError::NotFound(message_id))?;

        state.dead.push(DeadLetter {
            id: message.id,
            payload: message.payload,
            reason: reason.to_string(),
            attempts: message.attempts,
            enqueued_at: message.enqueued_at,
            dead_lettered_at: Utc::now(),
        });
        Ok(())
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError> {
        let state = lock(&self.state);
        Ok(state
            .dead
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionKind;

    fn request() -> TransactionRequest {
        TransactionRequest::new(1, "10.00".parse().unwrap(), TransactionKind::Deposit)
    }

    #[tokio::test]
    async fn test_enqueue_deliver_ack() {
        let queue = InMemoryQueue::new();
        let id = queue.enqueue(&request()).await.unwrap();

        let message = queue.deliver().await.unwrap().expect("message delivered");
        assert_eq!(message.id, id);
        assert_eq!(message.attempt, 1);

        // Leased message is invisible to other consumers
        assert!(queue.deliver().await.unwrap().is_none());

        queue.ack(message.id).await.unwrap();
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_retry_redelivers_with_bumped_attempt() {
        let queue = InMemoryQueue::new();
        queue.enqueue(&request()).await.unwrap();

        let message = queue.deliver().await.unwrap().unwrap();
        queue.retry(message.id, Duration::ZERO).await.unwrap();

        let redelivered = queue.deliver().await.unwrap().unwrap();
        assert_eq!(redelivered.id, message.id);
        assert_eq!(redelivered.attempt, 2);
        assert_eq!(redelivered.payload, message.payload);
    }

    #[tokio::test]
    async fn test_retry_delay_defers_visibility() {
        let queue = InMemoryQueue::new();
        queue.enqueue(&request()).await.unwrap();

        let message = queue.deliver().await.unwrap().unwrap();
        queue
            .retry(message.id, Duration::from_secs(60))
            .await
            .unwrap();

        // Not deliverable until the backoff elapses
        assert!(queue.deliver().await.unwrap().is_none());
        assert!(!queue.is_idle());
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = InMemoryQueue::with_lease(Duration::ZERO);
        queue.enqueue(&request()).await.unwrap();

        // Deliver without acking: the consumer "crashed"
        let first = queue.deliver().await.unwrap().unwrap();

        let second = queue.deliver().await.unwrap().expect("redelivered");
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn test_dead_letter_preserves_message() {
        let queue = InMemoryQueue::new();
        let id = queue.enqueue_raw(b"not json".to_vec());

        let message = queue.deliver().await.unwrap().unwrap();
        queue
            .dead_letter(message.id, "unparseable payload")
            .await
            .unwrap();

        assert!(queue.is_idle());

        let dead = queue.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, id);
        assert_eq!(dead[0].payload, b"not json");
        assert_eq!(dead[0].reason, "unparseable payload");
    }

    #[tokio::test]
    async fn test_ack_unknown_message() {
        let queue = InMemoryQueue::new();
        let result = queue.ack(Uuid::new_v4()).await;
        assert!(matches!(result, Err(QueueError::NotFound(_))));
    }
}
