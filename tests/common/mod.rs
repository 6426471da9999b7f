//! Common test utilities
//!
//! In-memory harness wiring the queue, stores and worker together the same
//! way the binary wires their Postgres counterparts.

use std::sync::Arc;
use std::time::Duration;

use banking_ledger::api::AppState;
use banking_ledger::domain::{TransactionKind, TransactionRequest};
use banking_ledger::queue::{InMemoryQueue, TransactionQueue};
use banking_ledger::store::{InMemoryBalanceStore, InMemoryLedgerStore};
use banking_ledger::worker::{TransactionWorker, WorkerConfig};

pub struct TestHarness {
    pub queue: Arc<InMemoryQueue>,
    pub balances: Arc<InMemoryBalanceStore>,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub worker: Arc<TransactionWorker>,
}

/// Worker tunables with millisecond backoffs so retry paths run fast
pub fn fast_config() -> WorkerConfig {
    WorkerConfig {
        max_delivery_attempts: 5,
        cas_max_retries: 5,
        ledger_append_retries: 2,
        retry_backoff_base: Duration::from_millis(1),
    }
}

pub fn harness() -> TestHarness {
    harness_with_config(fast_config())
}

pub fn harness_with_config(config: WorkerConfig) -> TestHarness {
    let queue = Arc::new(InMemoryQueue::new());
    let balances = Arc::new(InMemoryBalanceStore::new());
    let ledger = Arc::new(InMemoryLedgerStore::new());

    let worker = Arc::new(TransactionWorker::new(
        queue.clone(),
        balances.clone(),
        ledger.clone(),
        config,
    ));

    TestHarness {
        queue,
        balances,
        ledger,
        worker,
    }
}

impl TestHarness {
    /// Ingress-style submit: build a request and enqueue it
    pub async fn submit(&self, account_id: i64, amount: &str, kind: TransactionKind) -> TransactionRequest {
        let request = TransactionRequest::new(account_id, amount.parse().unwrap(), kind);
        self.queue.enqueue(&request).await.unwrap();
        request
    }

    /// App state over the in-memory backends, for router tests
    pub fn app_state(&self) -> AppState {
        AppState::new(self.queue.clone(), self.balances.clone(), self.ledger.clone())
    }

    /// Run the worker until the queue is fully drained (nothing ready,
    /// nothing leased). Panics if it does not settle within 5 seconds.
    pub async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

        while !self.queue.is_idle() {
            if tokio::time::Instant::now() > deadline {
                panic!("queue did not drain within 5s");
            }
            match self.worker.poll_once().await.expect("queue failure") {
                true => {}
                // Nothing deliverable yet; a retried message may still be
                // waiting out its backoff
                false => tokio::time::sleep(Duration::from_millis(2)).await,
            }
        }
    }

    /// Wait for the queue to go idle without driving the worker (used with
    /// a running WorkerPool)
    pub async fn wait_idle(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

        while !self.queue.is_idle() {
            if tokio::time::Instant::now() > deadline {
                panic!("queue did not drain within 5s");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
