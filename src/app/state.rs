//! Shared state handed to every request handler through Axum's `State`.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::domain::{DatabaseClient, LedgerClient};

use super::notary::NotaryConfig;
use super::service::AppService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AppService>,
    /// Renders `/metrics`; absent when no recorder is installed.
    pub metrics: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    /// Builds the service from the two clients with the default proof policy.
    #[must_use]
    pub fn new(db_client: Arc<dyn DatabaseClient>, ledger_client: Arc<dyn LedgerClient>) -> Self {
        Self::with_config(db_client, ledger_client, NotaryConfig::default())
    }

    #[must_use]
    pub fn with_config(
        db_client: Arc<dyn DatabaseClient>,
        ledger_client: Arc<dyn LedgerClient>,
        config: NotaryConfig,
    ) -> Self {
        Self::with_service(Arc::new(AppService::with_config(
            db_client,
            ledger_client,
            config,
        )))
    }

    /// Wraps a pre-built service, e.g. one shared with the reconciliation worker.
    #[must_use]
    pub fn with_service(service: Arc<AppService>) -> Self {
        Self {
            service,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, handle: Arc<PrometheusHandle>) -> Self {
        self.metrics = Some(handle);
        self
    }
}
