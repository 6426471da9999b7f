//! Worker pool
//!
//! Supervises N consumer tasks, each polling the shared queue and running
//! the per-message state machine. Shutdown is graceful: consumers finish the
//! message they hold before stopping, so no delivery is abandoned mid-lease.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::TransactionWorker;

/// A running pool of transaction consumers
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `size` consumer tasks over the shared worker
    pub fn start(worker: Arc<TransactionWorker>, size: usize, poll_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = (0..size)
            .map(|index| {
                let worker = worker.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    run_consumer(index, worker, poll_interval, shutdown).await;
                })
            })
            .collect();

        tracing::info!(consumers = size, "Worker pool started");

        Self {
            handles,
            shutdown: shutdown_tx,
        }
    }

    /// Signal all consumers to stop and wait for in-flight messages to drain
    pub async fn shutdown(self) {
        tracing::info!("Worker pool shutting down, draining in-flight messages");
        let _ = self.shutdown.send(true);

        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Consumer task panicked");
            }
        }

        tracing::info!("Worker pool stopped");
    }
}

async fn run_consumer(
    index: usize,
    worker: Arc<TransactionWorker>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(consumer = index, "Transaction consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match worker.poll_once().await {
            // A message was handled; poll again immediately, more may be
            // waiting.
            Ok(true) => continue,
            Ok(false) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                tracing::error!(consumer = index, error = %e, "Queue error, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    tracing::debug!(consumer = index, "Transaction consumer stopped");
}
