//! Trade completion orchestration.

use std::sync::Arc;

use tracing::{error, info, instrument};

use super::notary::{Notary, detached};
use crate::domain::{AppError, ConfirmationMode, DatabaseClient, ProofStatus, TradeCompletion};

/// Completes trades and notarizes them on the ledger.
///
/// The relational completion is committed before the ledger call and is
/// never rolled back; a missing proof is left to the reconciler.
#[derive(Clone)]
pub struct TradeCompletionService {
    db_client: Arc<dyn DatabaseClient>,
    notary: Notary,
}

impl TradeCompletionService {
    #[must_use]
    pub fn new(db_client: Arc<dyn DatabaseClient>, notary: Notary) -> Self {
        Self { db_client, notary }
    }

    /// Marks a trade completed and records it on the ledger.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the trade does not exist (nothing is written
    /// and the ledger is not called) and a database error when the store
    /// fails. Ledger failures are reported through `proof_status`.
    #[instrument(skip(self))]
    pub async fn complete_trade(&self, trade_id: &str) -> Result<TradeCompletion, AppError> {
        let parties = self
            .db_client
            .get_trade_with_parties(trade_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("trade {}", trade_id)))?;

        let lease_until = self.notary.config().lease_until();
        let claimed = self
            .db_client
            .mark_trade_completed(trade_id, lease_until)
            .await?;
        info!(trade_id = %trade_id, claimed, "Trade completed");

        if !claimed {
            // Already notarized, or another request or the reconciler holds the write.
            let trade = self
                .db_client
                .get_trade(trade_id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("trade {}", trade_id)))?;
            return Ok(TradeCompletion {
                success: true,
                trade_id: trade.id,
                transaction_hash: trade.proof.transaction_hash,
                proof_status: trade.proof.status,
            });
        }

        match self.notary.config().mode {
            ConfirmationMode::Wait => {
                let notary = self.notary.clone();
                let update =
                    detached(async move { notary.notarize_trade(&parties, 0).await }).await?;
                Ok(TradeCompletion {
                    success: true,
                    trade_id: trade_id.to_string(),
                    transaction_hash: update.transaction_hash,
                    proof_status: update.status,
                })
            }
            ConfirmationMode::Background => {
                let notary = self.notary.clone();
                tokio::spawn(async move {
                    if let Err(e) = notary.notarize_trade(&parties, 0).await {
                        error!(trade_id = %parties.trade.id, error = ?e, "Background notarization failed");
                    }
                });
                Ok(TradeCompletion {
                    success: true,
                    trade_id: trade_id.to_string(),
                    transaction_hash: None,
                    proof_status: ProofStatus::Pending,
                })
            }
        }
    }
}
