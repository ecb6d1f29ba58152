//! Background worker retrying ledger proofs that are still missing.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use super::service::AppService;

/// Configuration for the reconciliation worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between reconciliation passes
    pub poll_interval: Duration,
    /// Trades and ratings claimed per pass, each
    pub batch_size: i64,
    /// Whether the worker is enabled
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_size: 10,
            enabled: true,
        }
    }
}

/// Periodically claims due proofs and retries them until confirmed or
/// abandoned.
pub struct ProofReconciliationWorker {
    service: Arc<AppService>,
    config: WorkerConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProofReconciliationWorker {
    pub fn new(
        service: Arc<AppService>,
        config: WorkerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            config,
            shutdown_rx,
        }
    }

    /// Run the worker loop until shutdown is signalled
    pub async fn run(mut self) {
        if !self.config.enabled {
            info!("Proof reconciliation worker is disabled");
            return;
        }

        info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            "Starting proof reconciliation worker"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.process_batch().await;
                }
                result = self.shutdown_rx.changed() => {
                    if result.is_err() || *self.shutdown_rx.borrow() {
                        info!("Proof reconciliation worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn process_batch(&self) {
        match self
            .service
            .process_pending_proofs(self.config.batch_size)
            .await
        {
            Ok(0) => {}
            Ok(count) => {
                info!(count, "Processed pending ledger proofs");
            }
            Err(e) => {
                error!(error = ?e, "Error processing pending ledger proofs");
            }
        }
    }
}

/// Spawn the reconciliation worker as a tokio task
pub fn spawn_worker(
    service: Arc<AppService>,
    config: WorkerConfig,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ProofReconciliationWorker::new(service, config, shutdown_rx);
    let handle = tokio::spawn(worker.run());
    (handle, shutdown_tx)
}
