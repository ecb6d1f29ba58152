use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::signal;
use tracing::{info, warn};

use barter_notary::api::create_router_with_rate_limit;
use barter_notary::app::{AppService, AppState, spawn_worker};
use barter_notary::config::AppConfig;
use barter_notary::domain::LedgerClient;
use barter_notary::infra::observability::{init_metrics_handle, init_tracing};
use barter_notary::infra::{DisabledLedgerClient, EvmLedgerClient, LocalSigner, PostgresClient};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;
    init_tracing(config.log_format).context("failed to install tracing subscriber")?;
    let metrics = init_metrics_handle();

    let postgres = PostgresClient::new(&config.database_url, Default::default()).await?;
    postgres.run_migrations().await?;
    let db_client = Arc::new(postgres);

    let ledger_client: Arc<dyn LedgerClient> = match config.ledger {
        Some(settings) => {
            let signer = Arc::new(LocalSigner::new(settings.private_key)?);
            let client = EvmLedgerClient::new(
                &settings.rpc_url,
                &settings.contract_address,
                signer,
                settings.client,
            )?;
            info!(
                contract = %settings.contract_address,
                funding_address = %client.funding_address(),
                "Ledger client configured"
            );
            Arc::new(client)
        }
        None => {
            warn!("LEDGER_RPC_URL not set; trades and ratings will be stored without ledger proofs");
            Arc::new(DisabledLedgerClient::new())
        }
    };

    let service = Arc::new(AppService::with_config(
        db_client,
        ledger_client,
        config.notary,
    ));
    let (worker_handle, worker_shutdown) = spawn_worker(Arc::clone(&service), config.worker);

    let mut state = AppState::with_service(service);
    if let Some(handle) = metrics {
        state = state.with_metrics(handle);
    }
    let router = create_router_with_rate_limit(Arc::new(state), config.rate_limit);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    info!(addr = %config.server_addr, "Server starting");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let _ = worker_shutdown.send(true);
    if let Err(e) = worker_handle.await {
        warn!(error = ?e, "Proof reconciliation worker ended abnormally");
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = ?e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = ?e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
