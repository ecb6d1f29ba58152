//! Ledger write and proof attach shared by both orchestrators and the
//! reconciliation worker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::domain::{
    AppError, BroadcastObserver, ConfirmationMode, DatabaseClient, LedgerClient, LedgerOutcome,
    ProofStatus, ProofUpdate, RatingProofTask, ReceiptStatus, TradeParties,
};

/// Timing and retry policy of the proof saga.
#[derive(Debug, Clone)]
pub struct NotaryConfig {
    pub mode: ConfirmationMode,
    /// How long a claimed row is hidden from the reconciler. Must exceed the
    /// ledger client's confirmation timeout.
    pub lease: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub max_attempts: i32,
}

impl Default for NotaryConfig {
    fn default() -> Self {
        Self {
            mode: ConfirmationMode::Wait,
            lease: Duration::from_secs(300),
            retry_base_delay: Duration::from_secs(30),
            retry_max_delay: Duration::from_secs(3600),
            max_attempts: 10,
        }
    }
}

impl NotaryConfig {
    #[must_use]
    pub fn lease_until(&self) -> DateTime<Utc> {
        Utc::now() + to_chrono(self.lease)
    }

    /// `base * 2^attempt`, capped at `retry_max_delay`.
    #[must_use]
    pub fn backoff(&self, attempt: i32) -> Duration {
        let exponent = attempt.clamp(0, 20) as u32;
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.retry_max_delay)
    }

    #[must_use]
    pub fn next_retry_at(&self, attempt: i32) -> DateTime<Utc> {
        Utc::now() + to_chrono(self.backoff(attempt))
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Maps a ledger outcome onto the proof columns.
#[must_use]
pub fn proof_update(outcome: &LedgerOutcome, next_retry_at: DateTime<Utc>) -> ProofUpdate {
    match outcome {
        LedgerOutcome::Confirmed(hash) => ProofUpdate::confirmed(hash.clone()),
        LedgerOutcome::Unconfirmed(hash) => ProofUpdate::unconfirmed(hash.clone(), next_retry_at),
        LedgerOutcome::Failed(reason) => ProofUpdate::failed(reason.clone(), next_retry_at),
    }
}

fn report_attach(
    kind: &'static str,
    id: &str,
    outcome: &LedgerOutcome,
    attached: Result<(), AppError>,
) -> Result<(), AppError> {
    match outcome {
        LedgerOutcome::Confirmed(hash) => info!(kind, id, tx_hash = %hash, "Ledger proof obtained"),
        LedgerOutcome::Unconfirmed(hash) => {
            warn!(kind, id, tx_hash = %hash, "Ledger write unconfirmed, proof pending")
        }
        LedgerOutcome::Failed(reason) => {
            warn!(kind, id, reason = %reason, "Ledger write failed, proof unavailable")
        }
    }

    attached.inspect_err(|e| {
        // The ledger entry exists even though the row does not say so yet.
        error!(
            kind,
            id,
            outcome = outcome.label(),
            tx_hash = outcome.confirmed_hash().unwrap_or_default(),
            error = ?e,
            "Failed to attach ledger proof"
        );
    })
}

#[derive(Debug, Clone, Copy)]
enum ProofTarget<'a> {
    Trade(&'a str),
    Rating(&'a str),
}

/// Stores the hash of a signed write as the row's pending hash before it is
/// broadcast, so a write interrupted after the broadcast is resolved by a
/// receipt check instead of a second write.
struct PendingHashRecorder<'a> {
    db_client: &'a dyn DatabaseClient,
    target: ProofTarget<'a>,
    lease_until: DateTime<Utc>,
}

#[async_trait]
impl<'a> BroadcastObserver for PendingHashRecorder<'a> {
    async fn before_broadcast(&self, tx_hash: &str) -> Result<(), AppError> {
        let update = ProofUpdate::unconfirmed(tx_hash, self.lease_until);
        match self.target {
            ProofTarget::Trade(id) => self.db_client.update_trade_proof(id, &update).await,
            ProofTarget::Rating(id) => self.db_client.update_rating_proof(id, &update).await,
        }
    }
}

/// Runs a notarization on its own task and waits for it. Dropping the caller
/// does not cancel a ledger write in flight.
pub async fn detached<F>(notarization: F) -> Result<ProofUpdate, AppError>
where
    F: Future<Output = Result<ProofUpdate, AppError>> + Send + 'static,
{
    tokio::spawn(notarization)
        .await
        .map_err(|e| AppError::Internal(format!("notarization task failed: {}", e)))?
}

/// Writes proofs to the ledger and attaches them to their relational rows.
#[derive(Clone)]
pub struct Notary {
    db_client: Arc<dyn DatabaseClient>,
    ledger_client: Arc<dyn LedgerClient>,
    config: NotaryConfig,
}

impl Notary {
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        ledger_client: Arc<dyn LedgerClient>,
        config: NotaryConfig,
    ) -> Self {
        Self {
            db_client,
            ledger_client,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &NotaryConfig {
        &self.config
    }

    fn recorder<'a>(&'a self, target: ProofTarget<'a>) -> PendingHashRecorder<'a> {
        PendingHashRecorder {
            db_client: self.db_client.as_ref(),
            target,
            lease_until: self.config.lease_until(),
        }
    }

    /// Records a completed trade on the ledger and attaches the outcome.
    ///
    /// A ledger failure is not an error; the returned update carries it. An
    /// error means the proof could not be written back to the store.
    #[instrument(skip(self, parties), fields(trade_id = %parties.trade.id))]
    pub async fn notarize_trade(
        &self,
        parties: &TradeParties,
        attempt: i32,
    ) -> Result<ProofUpdate, AppError> {
        let outcome = self
            .ledger_client
            .record_trade(
                &parties.to_ledger_record(),
                &self.recorder(ProofTarget::Trade(&parties.trade.id)),
            )
            .await;
        let update = proof_update(&outcome, self.config.next_retry_at(attempt));

        let attached = self
            .db_client
            .update_trade_proof(&parties.trade.id, &update)
            .await;
        report_attach("trade", &parties.trade.id, &outcome, attached)?;
        Ok(update)
    }

    /// Records a rating on the ledger under the ratee's identity and attaches
    /// the outcome.
    #[instrument(skip(self, task), fields(rating_id = %task.rating.id))]
    pub async fn notarize_rating(
        &self,
        task: &RatingProofTask,
        attempt: i32,
    ) -> Result<ProofUpdate, AppError> {
        let outcome = self
            .ledger_client
            .record_rating(
                &task.to_ledger_record(),
                &self.recorder(ProofTarget::Rating(&task.rating.id)),
            )
            .await;
        let update = proof_update(&outcome, self.config.next_retry_at(attempt));

        let attached = self
            .db_client
            .update_rating_proof(&task.rating.id, &update)
            .await;
        report_attach("rating", &task.rating.id, &outcome, attached)?;
        Ok(update)
    }

    /// Resolves the receipt of a previously broadcast write.
    async fn check_receipt(&self, tx_hash: &str, attempt: i32) -> ProofUpdate {
        let next = self.config.next_retry_at(attempt);
        match self.ledger_client.receipt_status(tx_hash).await {
            Ok(ReceiptStatus::Confirmed) => ProofUpdate::confirmed(tx_hash),
            Ok(ReceiptStatus::Reverted) => {
                ProofUpdate::failed(format!("Transaction reverted: {}", tx_hash), next)
            }
            Ok(ReceiptStatus::Pending) => ProofUpdate::unconfirmed(tx_hash, next),
            // Clearing the pending hash lets the next pass write again.
            Ok(ReceiptStatus::Dropped) => {
                ProofUpdate::failed(format!("Transaction dropped: {}", tx_hash), next)
            }
            Err(e) => {
                warn!(tx_hash = %tx_hash, error = ?e, "Receipt lookup failed");
                ProofUpdate::unconfirmed(tx_hash, next)
            }
        }
    }

    /// Marks a row that used its last attempt as permanently failed.
    fn finalize(&self, attempt: i32, mut update: ProofUpdate) -> ProofUpdate {
        if update.status != ProofStatus::Confirmed && attempt >= self.config.max_attempts {
            let reason = update
                .last_error
                .take()
                .or_else(|| {
                    update
                        .pending_transaction_hash
                        .as_ref()
                        .map(|h| format!("transaction {} never confirmed", h))
                })
                .unwrap_or_else(|| "ledger write never confirmed".to_string());
            update.status = ProofStatus::Failed;
            update.pending_transaction_hash = None;
            update.last_error = Some(format!("gave up after {} attempts: {}", attempt, reason));
            update.next_retry_at = None;
        }
        update
    }

    /// Retries the proof of a trade claimed by the reconciler.
    #[instrument(skip(self, parties), fields(trade_id = %parties.trade.id))]
    pub async fn reconcile_trade(&self, parties: &TradeParties) -> Result<ProofStatus, AppError> {
        let attempt = parties.trade.proof.retry_count;
        let update = match &parties.trade.proof.pending_transaction_hash {
            Some(hash) => self.check_receipt(hash, attempt).await,
            None => {
                let outcome = self
                    .ledger_client
                    .record_trade(
                        &parties.to_ledger_record(),
                        &self.recorder(ProofTarget::Trade(&parties.trade.id)),
                    )
                    .await;
                proof_update(&outcome, self.config.next_retry_at(attempt))
            }
        };
        let update = self.finalize(attempt, update);

        self.db_client
            .update_trade_proof(&parties.trade.id, &update)
            .await?;
        self.log_reconciled("trade", &parties.trade.id, attempt, &update);
        Ok(update.status)
    }

    /// Retries the proof of a rating claimed by the reconciler.
    #[instrument(skip(self, task), fields(rating_id = %task.rating.id))]
    pub async fn reconcile_rating(&self, task: &RatingProofTask) -> Result<ProofStatus, AppError> {
        let attempt = task.rating.proof.retry_count;
        let update = match &task.rating.proof.pending_transaction_hash {
            Some(hash) => self.check_receipt(hash, attempt).await,
            None => {
                let outcome = self
                    .ledger_client
                    .record_rating(
                        &task.to_ledger_record(),
                        &self.recorder(ProofTarget::Rating(&task.rating.id)),
                    )
                    .await;
                proof_update(&outcome, self.config.next_retry_at(attempt))
            }
        };
        let update = self.finalize(attempt, update);

        self.db_client
            .update_rating_proof(&task.rating.id, &update)
            .await?;
        self.log_reconciled("rating", &task.rating.id, attempt, &update);
        Ok(update.status)
    }

    fn log_reconciled(&self, kind: &'static str, id: &str, attempt: i32, update: &ProofUpdate) {
        metrics::counter!("proof_reconciliations_total", "kind" => kind, "status" => update.status.as_str())
            .increment(1);

        match update.status {
            ProofStatus::Confirmed => info!(kind, id, attempt, "Proof reconciled"),
            ProofStatus::Failed if update.next_retry_at.is_none() => error!(
                kind,
                id,
                attempt,
                error = update.last_error.as_deref().unwrap_or_default(),
                "Proof abandoned"
            ),
            _ => info!(
                kind,
                id,
                attempt,
                status = %update.status,
                next_retry_at = ?update.next_retry_at,
                "Proof still missing, retry scheduled"
            ),
        }
    }
}
