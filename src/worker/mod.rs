//! Transaction Worker
//!
//! Consumes transaction requests from the queue and drives each one through
//! the processing pipeline: validate, dedup against the ledger, apply the
//! balance delta through a bounded compare-and-swap loop, append the ledger
//! record, and acknowledge only once both effects are durable.
//!
//! Business rejections (insufficient funds, unknown account, out-of-range
//! amounts) are terminal outcomes: the message is acknowledged and never
//! retried. Transient store failures are retried with exponential backoff up
//! to a delivery ceiling, then dead-lettered. A malformed payload is
//! dead-lettered immediately, because redelivery cannot fix it.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Balance, DomainError, LedgerEntry, TransactionKind, TransactionRequest};
use crate::queue::{QueueError, QueueMessage, TransactionQueue};
use crate::store::{BalanceStore, LedgerStore, StoreError};

pub mod pool;

pub use pool::WorkerPool;

/// Worker tunables
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Deliveries of one message before it is dead-lettered
    pub max_delivery_attempts: u32,

    /// Iterations of the compare-and-swap loop before the delivery is
    /// treated as a transient failure
    pub cas_max_retries: u32,

    /// In-place retries of the ledger append after the balance update
    /// already committed
    pub ledger_append_retries: u32,

    /// Base delay for both retry schedules
    pub retry_backoff_base: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 5,
            cas_max_retries: 5,
            ledger_append_retries: 3,
            retry_backoff_base: Duration::from_millis(50),
        }
    }
}

impl WorkerConfig {
    /// Linear backoff between compare-and-swap attempts; contention on one
    /// account resolves in milliseconds, so short waits keep latency bounded
    pub fn cas_backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff_base * attempt
    }

    /// Exponential backoff between redeliveries, capped at 30s
    pub fn delivery_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.retry_backoff_base * 2u32.saturating_pow(exp);
        delay.min(Duration::from_secs(30))
    }
}

/// Terminal result of processing one request
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Balance updated and ledger entry written
    Applied {
        account_id: i64,
        new_balance: Decimal,
    },

    /// A ledger entry for this request_id already exists; the request was
    /// fully applied by an earlier delivery
    AlreadyApplied,

    /// Business rejection; acknowledged, no balance change, no ledger entry
    Rejected(DomainError),
}

/// Failures that abort processing of a delivery
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The compare-and-swap loop kept losing to concurrent writers
    #[error("Compare-and-swap retries exhausted for account {0}")]
    CasRetriesExhausted(i64),

    /// Transient store failure; the message will be redelivered
    #[error(transparent)]
    Store(StoreError),

    /// The balance update committed but the ledger append could not be
    /// completed. The message must not be reprocessed from scratch (that
    /// would re-apply the delta), so the delivery is dead-lettered with
    /// this reason for operator reconciliation.
    #[error("Ledger append failed after balance update committed (request {request_id}): {detail}")]
    LedgerOutOfSync { request_id: Uuid, detail: String },
}

impl WorkerError {
    /// True when redelivering the message may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::CasRetriesExhausted(_) => true,
            WorkerError::Store(e) => e.is_transient(),
            WorkerError::LedgerOutOfSync { .. } => false,
        }
    }
}

/// The per-message state machine
pub struct TransactionWorker {
    queue: Arc<dyn TransactionQueue>,
    balances: Arc<dyn BalanceStore>,
    ledger: Arc<dyn LedgerStore>,
    config: WorkerConfig,
}

impl TransactionWorker {
    pub fn new(
        queue: Arc<dyn TransactionQueue>,
        balances: Arc<dyn BalanceStore>,
        ledger: Arc<dyn LedgerStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            balances,
            ledger,
            config,
        }
    }

    /// Lease and handle the next message, if any. Returns `true` when a
    /// message was handled, `false` when the queue was empty.
    pub async fn poll_once(&self) -> Result<bool, QueueError> {
        match self.queue.deliver().await? {
            Some(message) => {
                self.handle_delivery(message).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Handle one leased message end to end, including the queue verdict
    /// (ack, delayed retry, or dead-letter).
    pub async fn handle_delivery(&self, message: QueueMessage) -> Result<(), QueueError> {
        let request: TransactionRequest = match serde_json::from_slice(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(
                    message_id = %message.id,
                    error = %e,
                    "Poison message, dead-lettering"
                );
                return self
                    .queue
                    .dead_letter(message.id, &format!("unparseable payload: {}", e))
                    .await;
            }
        };

        match self.process(&request).await {
            Ok(outcome) => {
                match &outcome {
                    Outcome::Applied {
                        account_id,
                        new_balance,
                    } => {
                        tracing::info!(
                            request_id = %request.request_id,
                            account_id,
                            kind = %request.kind,
                            amount = %request.amount,
                            balance = %new_balance,
                            "Transaction applied"
                        );
                    }
                    Outcome::AlreadyApplied => {
                        tracing::info!(
                            request_id = %request.request_id,
                            "Duplicate delivery, already applied"
                        );
                    }
                    Outcome::Rejected(reason) => {
                        tracing::warn!(
                            request_id = %request.request_id,
                            account_id = request.account_id,
                            reason = %reason,
                            "Transaction rejected"
                        );
                    }
                }
                self.queue.ack(message.id).await
            }
            Err(e @ WorkerError::LedgerOutOfSync { .. }) => {
                tracing::error!(
                    request_id = %request.request_id,
                    error = %e,
                    "Dead-lettering for reconciliation"
                );
                self.queue.dead_letter(message.id, &e.to_string()).await
            }
            Err(e) => {
                if message.attempt >= self.config.max_delivery_attempts {
                    tracing::error!(
                        request_id = %request.request_id,
                        attempts = message.attempt,
                        error = %e,
                        "Delivery attempts exhausted, dead-lettering"
                    );
                    self.queue
                        .dead_letter(
                            message.id,
                            &format!("retries exhausted after {} attempts: {}", message.attempt, e),
                        )
                        .await
                } else {
                    let delay = self.config.delivery_backoff(message.attempt);
                    tracing::warn!(
                        request_id = %request.request_id,
                        attempt = message.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, scheduling redelivery"
                    );
                    self.queue.retry(message.id, delay).await
                }
            }
        }
    }

    /// Run one validated request through dedup, the compare-and-swap loop
    /// and the ledger append.
    pub async fn process(&self, request: &TransactionRequest) -> Result<Outcome, WorkerError> {
        // A ledger entry for this request_id means a previous delivery
        // completed both effects; acknowledge without reapplying.
        if self
            .ledger
            .exists(request.request_id)
            .await
            .map_err(WorkerError::Store)?
        {
            return Ok(Outcome::AlreadyApplied);
        }

        let updated = match self.apply_with_cas(request).await? {
            Ok(record) => record,
            Err(rejection) => return Ok(Outcome::Rejected(rejection)),
        };

        self.append_ledger_entry(request).await?;

        Ok(Outcome::Applied {
            account_id: updated.id,
            new_balance: updated.balance,
        })
    }

    /// The read-compute-CAS cycle of the balance update. A version conflict
    /// means a concurrent writer won the race; re-read and recompute against
    /// the fresh balance, bounded by the retry ceiling.
    async fn apply_with_cas(
        &self,
        request: &TransactionRequest,
    ) -> Result<Result<crate::store::AccountRecord, DomainError>, WorkerError> {
        let mut attempt: u32 = 0;

        loop {
            let account = match self.balances.get(request.account_id).await {
                Ok(account) => account,
                Err(StoreError::NotFound(id)) => {
                    return Ok(Err(DomainError::AccountNotFound(id)));
                }
                Err(e) => return Err(WorkerError::Store(e)),
            };

            let candidate = match request.kind {
                TransactionKind::Deposit => account.balance + request.amount.value(),
                TransactionKind::Withdrawal => {
                    if request.amount.value() > account.balance {
                        return Ok(Err(DomainError::insufficient_funds(
                            request.amount.value(),
                            account.balance,
                        )));
                    }
                    account.balance - request.amount.value()
                }
            };

            // The invariant gate: never submit a negative or out-of-range
            // balance, under any retry path.
            let new_balance = match Balance::new(candidate) {
                Ok(balance) => balance,
                Err(e) => return Ok(Err(DomainError::BalanceOutOfRange(e.to_string()))),
            };

            match self
                .balances
                .conditional_update(account.id, account.version, new_balance.value())
                .await
            {
                Ok(updated) => return Ok(Ok(updated)),
                Err(e) if e.is_version_conflict() => {
                    attempt += 1;
                    if attempt >= self.config.cas_max_retries {
                        return Err(WorkerError::CasRetriesExhausted(account.id));
                    }
                    tracing::debug!(
                        account_id = account.id,
                        attempt,
                        "Version conflict, retrying compare-and-swap"
                    );
                    tokio::time::sleep(self.config.cas_backoff(attempt)).await;
                }
                Err(StoreError::NotFound(id)) => {
                    return Ok(Err(DomainError::AccountNotFound(id)));
                }
                Err(e) => return Err(WorkerError::Store(e)),
            }
        }
    }

    /// Append the ledger record for an applied request. The balance update
    /// has already committed, so a failure here may not requeue the message:
    /// it is retried in place with the same request_id (the unique index
    /// makes that idempotent) and dead-lettered if the retries run out.
    async fn append_ledger_entry(&self, request: &TransactionRequest) -> Result<(), WorkerError> {
        let entry = LedgerEntry::from_request(request);
        let mut attempt: u32 = 0;

        loop {
            match self.ledger.append(&entry).await {
                Ok(()) => return Ok(()),
                Err(StoreError::DuplicateEntry(request_id)) => {
                    // A parallel delivery of the same request got there
                    // first; both effects are durable.
                    tracing::warn!(%request_id, "Ledger entry already present");
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.config.ledger_append_retries => {
                    attempt += 1;
                    tracing::warn!(
                        request_id = %request.request_id,
                        attempt,
                        error = %e,
                        "Ledger append failed, retrying in place"
                    );
                    tokio::time::sleep(self.config.delivery_backoff(attempt)).await;
                }
                Err(e) => {
                    return Err(WorkerError::LedgerOutOfSync {
                        request_id: request.request_id,
                        detail: e.to_string(),
                    });
                }
            }
        }
    }
}
