//! Application service layer.
//!
//! Facade over the trade and rating orchestrators, the proof reconciler and
//! the read-side queries used by the HTTP handlers.

use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::notary::{Notary, NotaryConfig};
use super::ratings::RatingSubmissionService;
use super::trades::TradeCompletionService;
use crate::domain::{
    AppError, DatabaseClient, HealthResponse, HealthStatus, LedgerClient, ProofRecord, Rating,
    RatingSubmission, SubmitRatingRequest, TradeCompletion,
};

/// Application service containing core business logic.
///
/// Holds the trait abstractions of the relational store and the ledger so
/// tests can inject mocks.
///
/// # Example
///
/// ```ignore
/// let db = Arc::new(PostgresClient::new(&config).await?);
/// let ledger = Arc::new(EvmLedgerClient::with_defaults(&rpc_url, &contract, signer)?);
/// let service = AppService::new(db, ledger);
///
/// let completion = service.complete_trade("T1").await?;
/// ```
pub struct AppService {
    db_client: Arc<dyn DatabaseClient>,
    ledger_client: Arc<dyn LedgerClient>,
    notary: Notary,
    trades: TradeCompletionService,
    ratings: RatingSubmissionService,
}

impl AppService {
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
        let notary = Notary::new(Arc::clone(&db_client), Arc::clone(&ledger_client), config);
        Self {
            trades: TradeCompletionService::new(Arc::clone(&db_client), notary.clone()),
            ratings: RatingSubmissionService::new(Arc::clone(&db_client), notary.clone()),
            db_client,
            ledger_client,
            notary,
        }
    }

    #[must_use]
    pub fn notary_config(&self) -> &NotaryConfig {
        self.notary.config()
    }

    /// Marks a trade completed and notarizes it.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown trade and database errors from the store.
    /// A ledger failure still completes the trade.
    pub async fn complete_trade(&self, trade_id: &str) -> Result<TradeCompletion, AppError> {
        self.trades.complete_trade(trade_id).await
    }

    /// Stores a rating and notarizes it.
    ///
    /// # Errors
    ///
    /// `Validation`, `NotFound` or `Conflict` when the rating is rejected.
    pub async fn submit_rating(
        &self,
        request: &SubmitRatingRequest,
    ) -> Result<RatingSubmission, AppError> {
        self.ratings.submit_rating(request).await
    }

    /// The proof columns of a trade.
    #[instrument(skip(self))]
    pub async fn get_trade_proof(&self, trade_id: &str) -> Result<ProofRecord, AppError> {
        self.db_client
            .get_trade(trade_id)
            .await?
            .map(|trade| trade.proof)
            .ok_or_else(|| AppError::not_found(format!("trade {}", trade_id)))
    }

    /// The proof columns of a rating.
    #[instrument(skip(self))]
    pub async fn get_rating_proof(&self, rating_id: &str) -> Result<ProofRecord, AppError> {
        self.db_client
            .get_rating(rating_id)
            .await?
            .map(|rating| rating.proof)
            .ok_or_else(|| AppError::not_found(format!("rating {}", rating_id)))
    }

    pub async fn list_trade_ratings(&self, trade_id: &str) -> Result<Vec<Rating>, AppError> {
        self.ratings.ratings_for_trade(trade_id).await
    }

    pub async fn list_user_ratings(&self, user_id: &str) -> Result<Vec<Rating>, AppError> {
        self.ratings.ratings_for_user(user_id).await
    }

    /// Performs a health check on all dependencies.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.db_client.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };

        let ledger_health = match self.ledger_client.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Ledger health check failed");
                HealthStatus::Unhealthy
            }
        };

        HealthResponse::new(db_health, ledger_health)
    }

    /// Claims up to `batch_size` due trade proofs and as many due rating
    /// proofs, then retries each one.
    ///
    /// Returns how many rows were processed. A row whose retry fails to
    /// persist is logged and left for its lease to expire.
    #[instrument(skip(self))]
    pub async fn process_pending_proofs(&self, batch_size: i64) -> Result<usize, AppError> {
        let config = self.notary.config();

        let trades = self
            .db_client
            .claim_due_trade_proofs(batch_size, config.max_attempts, config.lease_until())
            .await?;
        let ratings = self
            .db_client
            .claim_due_rating_proofs(batch_size, config.max_attempts, config.lease_until())
            .await?;

        let total = trades.len() + ratings.len();
        if total > 0 {
            info!(
                trades = trades.len(),
                ratings = ratings.len(),
                "Reconciling pending ledger proofs"
            );
        }

        for parties in &trades {
            if let Err(e) = self.notary.reconcile_trade(parties).await {
                error!(trade_id = %parties.trade.id, error = ?e, "Failed to reconcile trade proof");
            }
        }
        for task in &ratings {
            if let Err(e) = self.notary.reconcile_rating(task).await {
                error!(rating_id = %task.rating.id, error = ?e, "Failed to reconcile rating proof");
            }
        }

        Ok(total)
    }
}
