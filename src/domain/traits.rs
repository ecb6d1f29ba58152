//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::{AppError, BlockchainError};
use super::types::{
    LedgerOutcome, NewRating, ProofUpdate, Rating, RatingProofTask, RatingRecord, ReceiptStatus,
    Trade, TradeParties, TradeRecord, User,
};

/// Relational store holding users, trades and ratings.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Get a single user by ID
    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError>;

    /// Get a single trade by ID
    async fn get_trade(&self, id: &str) -> Result<Option<Trade>, AppError>;

    /// Get a trade joined with the emails of both parties
    async fn get_trade_with_parties(&self, id: &str) -> Result<Option<TradeParties>, AppError>;

    /// Set the trade's status to completed and mark both items traded.
    ///
    /// Runs under a row lock. When the proof is claimable the ledger write is
    /// claimed for the caller (proof status becomes pending, leased until
    /// `lease_until`) and `true` is returned; otherwise the proof columns are
    /// left untouched and `false` is returned.
    async fn mark_trade_completed(
        &self,
        id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Write the outcome of a ledger write onto a trade
    async fn update_trade_proof(&self, id: &str, update: &ProofUpdate) -> Result<(), AppError>;

    /// Insert a rating whose proof is already claimed (pending).
    ///
    /// Fails with `DatabaseError::Duplicate` when the rater already rated the trade.
    async fn insert_rating(&self, rating: &NewRating) -> Result<Rating, AppError>;

    /// Get a single rating by ID
    async fn get_rating(&self, id: &str) -> Result<Option<Rating>, AppError>;

    /// Write the outcome of a ledger write onto a rating
    async fn update_rating_proof(&self, id: &str, update: &ProofUpdate)
    -> Result<(), AppError>;

    /// Ratings left on a trade, oldest first
    async fn list_ratings_for_trade(&self, trade_id: &str) -> Result<Vec<Rating>, AppError>;

    /// Ratings received by a user, newest first
    async fn list_ratings_for_user(&self, user_id: &str) -> Result<Vec<Rating>, AppError>;

    /// Claim completed trades whose proof is due for another attempt.
    ///
    /// Claimed rows get their retry count incremented and are leased until
    /// `lease_until` so concurrent reconcilers skip them.
    async fn claim_due_trade_proofs(
        &self,
        limit: i64,
        max_attempts: i32,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<TradeParties>, AppError>;

    /// Claim ratings whose proof is due for another attempt
    async fn claim_due_rating_proofs(
        &self,
        limit: i64,
        max_attempts: i32,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<RatingProofTask>, AppError>;
}

/// Receives the hash of a signed write before it is sent to the node.
///
/// Persisting the hash here lets a caller that is dropped mid-write, or a
/// crashed process, resolve the write by receipt instead of sending it again.
/// An error aborts the write before anything is broadcast.
#[async_trait]
pub trait BroadcastObserver: Send + Sync {
    async fn before_broadcast(&self, tx_hash: &str) -> Result<(), AppError>;
}

/// Observer for callers with nowhere to persist the hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreBroadcast;

#[async_trait]
impl BroadcastObserver for IgnoreBroadcast {
    async fn before_broadcast(&self, _tx_hash: &str) -> Result<(), AppError> {
        Ok(())
    }
}

/// Client for the notarization contract on the ledger.
///
/// Write operations never return errors: every failure is folded into
/// `LedgerOutcome::Failed` so callers can degrade uniformly. A write whose
/// transaction may have reached the node never ends in `Failed` unless a
/// receipt says it reverted; it is reported `Unconfirmed` instead.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Check ledger RPC connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Record a completed trade and wait for confirmation
    async fn record_trade(
        &self,
        record: &TradeRecord,
        observer: &dyn BroadcastObserver,
    ) -> LedgerOutcome;

    /// Record a rating and wait for confirmation
    async fn record_rating(
        &self,
        record: &RatingRecord,
        observer: &dyn BroadcastObserver,
    ) -> LedgerOutcome;

    /// Look up the receipt of a previously broadcast transaction
    async fn receipt_status(&self, tx_hash: &str) -> Result<ReceiptStatus, AppError> {
        let _ = tx_hash;
        Err(AppError::NotSupported(
            "receipt_status not implemented".to_string(),
        ))
    }
}

/// secp256k1 signature with its recovery id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

/// Signs transaction digests on behalf of the funding account.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Sign a 32-byte Keccak-256 digest
    async fn sign_digest(&self, digest: &[u8; 32]) -> Result<RecoverableSignature, BlockchainError>;

    /// The 20-byte account address paying transaction fees
    fn address(&self) -> [u8; 20];
}
