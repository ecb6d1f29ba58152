//! Ledger client used when no ledger is configured.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{
    AppError, BlockchainError, BroadcastObserver, LedgerClient, LedgerOutcome, RatingRecord,
    ReceiptStatus, TradeRecord,
};

/// Skips every ledger write. Completions and ratings still commit; their
/// proofs stay failed until a ledger is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledLedgerClient;

impl DisabledLedgerClient {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LedgerClient for DisabledLedgerClient {
    async fn health_check(&self) -> Result<(), AppError> {
        Err(BlockchainError::NotConfigured.into())
    }

    async fn record_trade(
        &self,
        record: &TradeRecord,
        _observer: &dyn BroadcastObserver,
    ) -> LedgerOutcome {
        debug!(trade_id = %record.trade_id, "Ledger not configured, skipping trade write");
        LedgerOutcome::Failed(BlockchainError::NotConfigured.to_string())
    }

    async fn record_rating(
        &self,
        _record: &RatingRecord,
        _observer: &dyn BroadcastObserver,
    ) -> LedgerOutcome {
        debug!("Ledger not configured, skipping rating write");
        LedgerOutcome::Failed(BlockchainError::NotConfigured.to_string())
    }

    async fn receipt_status(&self, _tx_hash: &str) -> Result<ReceiptStatus, AppError> {
        Err(BlockchainError::NotConfigured.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IgnoreBroadcast;

    #[tokio::test]
    async fn test_disabled_client_fails_every_write() {
        let client = DisabledLedgerClient::new();
        let record = TradeRecord {
            trade_id: "T1".to_string(),
            buyer_identity: "b@x.com".to_string(),
            seller_identity: "s@x.com".to_string(),
            item_description: "Trade of item A for B".to_string(),
            amount: 0,
        };

        assert_eq!(
            client.record_trade(&record, &IgnoreBroadcast).await,
            LedgerOutcome::Failed("Ledger not configured".to_string())
        );
        assert!(client.health_check().await.is_err());
        assert!(client.receipt_status("0xabc").await.is_err());
    }
}
