//! Mock implementations for testing.
//!
//! These mocks provide in-memory implementations of the store and ledger
//! traits that can be configured to simulate confirmed, unconfirmed and
//! failed ledger writes as well as store outages.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::{
    AppError, BlockchainError, BroadcastObserver, DatabaseClient, DatabaseError, Item,
    ItemStatus, LedgerClient, LedgerOutcome, NewRating, ProofRecord, ProofStatus, ProofUpdate, Rating, RatingProofTask,
    RatingRecord, ReceiptStatus, Trade, TradeParties, TradeRecord, TradeStatus, User,
};

/// Configuration for mock behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// If true, operations will fail.
    pub should_fail: bool,
    /// Custom error message for failures.
    pub error_message: Option<String>,
    /// Simulated latency in milliseconds.
    pub latency_ms: Option<u64>,
}

impl MockConfig {
    /// Creates a config that always succeeds.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// Creates a config that always fails.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
            latency_ms: None,
        }
    }

    /// Adds simulated latency.
    #[must_use]
    pub fn with_latency(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }

    async fn simulate_latency(&self) {
        if let Some(ms) = self.latency_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[derive(Default)]
struct MockStore {
    users: HashMap<String, User>,
    items: HashMap<String, Item>,
    trades: HashMap<String, Trade>,
    ratings: Vec<Rating>,
}

/// In-memory relational store.
///
/// # Example
///
/// ```
/// use barter_notary::domain::{Trade, User};
/// use barter_notary::test_utils::MockDatabaseClient;
///
/// let db = MockDatabaseClient::new();
/// db.insert_user(User::new("U1", "s@x.com", "Seller"));
/// db.insert_user(User::new("U2", "b@x.com", "Buyer"));
/// db.insert_trade(Trade::new("T1", "U1", "U2", "A", "B"));
/// assert!(db.trade("T1").is_some());
/// ```
pub struct MockDatabaseClient {
    store: Arc<Mutex<MockStore>>,
    config: MockConfig,
    call_count: AtomicU64,
    mutation_count: AtomicU64,
    is_healthy: AtomicBool,
    fail_proof_updates: AtomicBool,
}

impl MockDatabaseClient {
    /// Creates a new mock with default (success) configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    /// Creates a new mock with the given configuration.
    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(MockStore::default())),
            config,
            call_count: AtomicU64::new(0),
            mutation_count: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
            fail_proof_updates: AtomicBool::new(false),
        }
    }

    /// Creates a mock that always fails.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    /// Gets the number of times any method was called.
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Gets the number of writes applied to the store.
    pub fn mutation_count(&self) -> u64 {
        self.mutation_count.load(Ordering::Relaxed)
    }

    /// Sets the health status.
    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Makes proof writes fail while everything else keeps working.
    pub fn set_fail_proof_updates(&self, fail: bool) {
        self.fail_proof_updates.store(fail, Ordering::Relaxed);
    }

    pub fn insert_user(&self, user: User) {
        self.store.lock().unwrap().users.insert(user.id.clone(), user);
    }

    pub fn insert_item(&self, item: Item) {
        self.store.lock().unwrap().items.insert(item.id.clone(), item);
    }

    pub fn insert_trade(&self, trade: Trade) {
        self.store.lock().unwrap().trades.insert(trade.id.clone(), trade);
    }

    pub fn trade(&self, id: &str) -> Option<Trade> {
        self.store.lock().unwrap().trades.get(id).cloned()
    }

    pub fn item(&self, id: &str) -> Option<Item> {
        self.store.lock().unwrap().items.get(id).cloned()
    }

    pub fn rating(&self, id: &str) -> Option<Rating> {
        self.store
            .lock()
            .unwrap()
            .ratings
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn ratings(&self) -> Vec<Rating> {
        self.store.lock().unwrap().ratings.clone()
    }

    /// Expires every lease and retry delay so the next claim picks the rows up.
    pub fn make_proofs_due(&self) {
        let past = Some(Utc::now() - ChronoDuration::seconds(1));
        let mut store = self.store.lock().unwrap();
        for trade in store.trades.values_mut() {
            if trade.proof.next_retry_at.is_some() {
                trade.proof.next_retry_at = past;
            }
        }
        for rating in &mut store.ratings {
            if rating.proof.next_retry_at.is_some() {
                rating.proof.next_retry_at = past;
            }
        }
    }

    fn increment_call_count(&self) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_mutation(&self) {
        self.mutation_count.fetch_add(1, Ordering::Relaxed);
    }

    async fn enter(&self) -> Result<(), AppError> {
        self.increment_call_count();
        self.config.simulate_latency().await;
        self.check_should_fail()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock database error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }

    fn check_proof_update(&self) -> Result<(), AppError> {
        if self.fail_proof_updates.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Query(
                "Mock proof update failure".to_string(),
            )));
        }
        Ok(())
    }

    fn is_due(proof: &ProofRecord, max_attempts: i32) -> bool {
        matches!(proof.status, ProofStatus::Pending | ProofStatus::Failed)
            && proof.transaction_hash.is_none()
            && proof.next_retry_at.is_none_or(|at| at <= Utc::now())
            && proof.retry_count < max_attempts
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

fn claim_for_retry(proof: &mut ProofRecord, lease_until: chrono::DateTime<Utc>) {
    proof.retry_count += 1;
    proof.status = ProofStatus::Pending;
    proof.next_retry_at = Some(lease_until);
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn health_check(&self) -> Result<(), AppError> {
        self.increment_call_count();

        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Mock database unhealthy".to_string(),
            )));
        }

        self.check_should_fail()
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        self.enter().await?;
        Ok(self.store.lock().unwrap().users.get(id).cloned())
    }

    async fn get_trade(&self, id: &str) -> Result<Option<Trade>, AppError> {
        self.enter().await?;
        Ok(self.trade(id))
    }

    async fn get_trade_with_parties(&self, id: &str) -> Result<Option<TradeParties>, AppError> {
        self.enter().await?;
        let store = self.store.lock().unwrap();
        let Some(trade) = store.trades.get(id) else {
            return Ok(None);
        };
        let (Some(seller), Some(buyer)) = (
            store.users.get(&trade.from_user_id),
            store.users.get(&trade.to_user_id),
        ) else {
            return Ok(None);
        };
        Ok(Some(TradeParties {
            trade: trade.clone(),
            buyer_email: buyer.email.clone(),
            seller_email: seller.email.clone(),
        }))
    }

    async fn mark_trade_completed(
        &self,
        id: &str,
        lease_until: chrono::DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.enter().await?;
        let mut store = self.store.lock().unwrap();

        let trade = store
            .trades
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(format!("trade {}", id)))?;
        trade.status = TradeStatus::Completed;
        trade.updated_at = Utc::now();
        let claimed = trade.proof.status.is_claimable();
        if claimed {
            trade.proof.claim(lease_until);
        }
        let item_ids = [trade.from_item_id.clone(), trade.to_item_id.clone()];

        for item_id in &item_ids {
            if let Some(item) = store.items.get_mut(item_id) {
                item.status = ItemStatus::Traded;
            }
        }

        self.record_mutation();
        Ok(claimed)
    }

    async fn update_trade_proof(&self, id: &str, update: &ProofUpdate) -> Result<(), AppError> {
        self.enter().await?;
        self.check_proof_update()?;

        if let Some(trade) = self.store.lock().unwrap().trades.get_mut(id) {
            trade.proof.apply(update);
            trade.updated_at = Utc::now();
        }
        self.record_mutation();
        Ok(())
    }

    async fn insert_rating(&self, rating: &NewRating) -> Result<Rating, AppError> {
        self.enter().await?;
        let mut store = self.store.lock().unwrap();

        if store
            .ratings
            .iter()
            .any(|r| r.from_user_id == rating.from_user_id && r.trade_id == rating.trade_id)
        {
            return Err(AppError::Database(DatabaseError::Duplicate(format!(
                "rating by {} for trade {}",
                rating.from_user_id, rating.trade_id
            ))));
        }

        let mut proof = ProofRecord::default();
        proof.claim(rating.lease_until);
        let stored = Rating {
            id: rating.id.clone(),
            trade_id: rating.trade_id.clone(),
            from_user_id: rating.from_user_id.clone(),
            to_user_id: rating.to_user_id.clone(),
            rating: rating.rating,
            comment: rating.comment.clone(),
            proof,
            created_at: Utc::now(),
        };
        store.ratings.push(stored.clone());

        self.record_mutation();
        Ok(stored)
    }

    async fn get_rating(&self, id: &str) -> Result<Option<Rating>, AppError> {
        self.enter().await?;
        Ok(self.rating(id))
    }

    async fn update_rating_proof(&self, id: &str, update: &ProofUpdate) -> Result<(), AppError> {
        self.enter().await?;
        self.check_proof_update()?;

        let mut store = self.store.lock().unwrap();
        if let Some(rating) = store.ratings.iter_mut().find(|r| r.id == id) {
            rating.proof.apply(update);
        }
        self.record_mutation();
        Ok(())
    }

    async fn list_ratings_for_trade(&self, trade_id: &str) -> Result<Vec<Rating>, AppError> {
        self.enter().await?;
        let store = self.store.lock().unwrap();
        let mut ratings: Vec<Rating> = store
            .ratings
            .iter()
            .filter(|r| r.trade_id == trade_id)
            .cloned()
            .collect();
        ratings.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(ratings)
    }

    async fn list_ratings_for_user(&self, user_id: &str) -> Result<Vec<Rating>, AppError> {
        self.enter().await?;
        let store = self.store.lock().unwrap();
        let mut ratings: Vec<Rating> = store
            .ratings
            .iter()
            .filter(|r| r.to_user_id == user_id)
            .cloned()
            .collect();
        ratings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(ratings)
    }

    async fn claim_due_trade_proofs(
        &self,
        limit: i64,
        max_attempts: i32,
        lease_until: chrono::DateTime<Utc>,
    ) -> Result<Vec<TradeParties>, AppError> {
        self.enter().await?;
        let mut store = self.store.lock().unwrap();
        let store = &mut *store;

        let mut claimed = Vec::new();
        for trade in store.trades.values_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if trade.status != TradeStatus::Completed || !Self::is_due(&trade.proof, max_attempts) {
                continue;
            }
            let (Some(seller), Some(buyer)) = (
                store.users.get(&trade.from_user_id),
                store.users.get(&trade.to_user_id),
            ) else {
                continue;
            };
            claim_for_retry(&mut trade.proof, lease_until);
            claimed.push(TradeParties {
                trade: trade.clone(),
                buyer_email: buyer.email.clone(),
                seller_email: seller.email.clone(),
            });
        }

        if !claimed.is_empty() {
            self.record_mutation();
        }
        Ok(claimed)
    }

    async fn claim_due_rating_proofs(
        &self,
        limit: i64,
        max_attempts: i32,
        lease_until: chrono::DateTime<Utc>,
    ) -> Result<Vec<RatingProofTask>, AppError> {
        self.enter().await?;
        let mut store = self.store.lock().unwrap();
        let store = &mut *store;

        let mut claimed = Vec::new();
        for rating in store.ratings.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if !Self::is_due(&rating.proof, max_attempts) {
                continue;
            }
            let Some(ratee) = store.users.get(&rating.to_user_id) else {
                continue;
            };
            claim_for_retry(&mut rating.proof, lease_until);
            claimed.push(RatingProofTask {
                rating: rating.clone(),
                ratee_email: ratee.email.clone(),
            });
        }

        if !claimed.is_empty() {
            self.record_mutation();
        }
        Ok(claimed)
    }
}

/// What the mock ledger answers to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockLedgerMode {
    Confirm,
    Unconfirmed,
    Fail(String),
}

/// Mock ledger client recording every write it receives.
///
/// # Example
///
/// ```
/// use barter_notary::test_utils::MockLedgerClient;
///
/// // Confirms every write with a fixed hash
/// let ledger = MockLedgerClient::with_hash("0xABC");
///
/// // Fails every write
/// let failing = MockLedgerClient::failing("execution reverted");
/// ```
pub struct MockLedgerClient {
    trades: Arc<Mutex<Vec<TradeRecord>>>,
    ratings: Arc<Mutex<Vec<RatingRecord>>>,
    mode: Mutex<MockLedgerMode>,
    fixed_hash: Mutex<Option<String>>,
    receipt: Mutex<ReceiptStatus>,
    config: MockConfig,
    call_count: AtomicU64,
    receipt_checks: AtomicU64,
    nonce: AtomicU64,
    is_healthy: AtomicBool,
}

impl MockLedgerClient {
    /// Creates a new mock confirming every write.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    /// Creates a new mock with the given configuration.
    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        let mode = if config.should_fail {
            MockLedgerMode::Fail(
                config
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Mock ledger error".to_string()),
            )
        } else {
            MockLedgerMode::Confirm
        };
        Self {
            trades: Arc::new(Mutex::new(Vec::new())),
            ratings: Arc::new(Mutex::new(Vec::new())),
            mode: Mutex::new(mode),
            fixed_hash: Mutex::new(None),
            receipt: Mutex::new(ReceiptStatus::Confirmed),
            config,
            call_count: AtomicU64::new(0),
            receipt_checks: AtomicU64::new(0),
            nonce: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
        }
    }

    /// Creates a mock whose writes all fail.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    /// Creates a mock confirming every write with the given hash.
    #[must_use]
    pub fn with_hash(hash: impl Into<String>) -> Self {
        let mock = Self::new();
        *mock.fixed_hash.lock().unwrap() = Some(hash.into());
        mock
    }

    /// Creates a mock whose writes are broadcast but never seen mined.
    #[must_use]
    pub fn unconfirmed() -> Self {
        let mock = Self::new();
        mock.set_mode(MockLedgerMode::Unconfirmed);
        *mock.receipt.lock().unwrap() = ReceiptStatus::Pending;
        mock
    }

    pub fn set_mode(&self, mode: MockLedgerMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_receipt_status(&self, status: ReceiptStatus) {
        *self.receipt.lock().unwrap() = status;
    }

    /// Gets the number of writes attempted.
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn receipt_checks(&self) -> u64 {
        self.receipt_checks.load(Ordering::Relaxed)
    }

    /// Sets the health status.
    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn recorded_trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().unwrap().clone()
    }

    pub fn recorded_ratings(&self) -> Vec<RatingRecord> {
        self.ratings.lock().unwrap().clone()
    }

    fn next_hash(&self) -> String {
        if let Some(hash) = self.fixed_hash.lock().unwrap().clone() {
            return hash;
        }
        let n = self.nonce.fetch_add(1, Ordering::Relaxed) + 1;
        format!("0x{:064x}", n)
    }

    /// Hands the hash to the observer, then spends the configured latency
    /// waiting for "confirmation".
    async fn outcome(&self, observer: &dyn BroadcastObserver) -> LedgerOutcome {
        self.call_count.fetch_add(1, Ordering::Relaxed);

        let mode = self.mode.lock().unwrap().clone();
        let hash = match mode {
            MockLedgerMode::Fail(message) => {
                self.config.simulate_latency().await;
                return LedgerOutcome::Failed(message);
            }
            MockLedgerMode::Confirm | MockLedgerMode::Unconfirmed => self.next_hash(),
        };
        if let Err(e) = observer.before_broadcast(&hash).await {
            return LedgerOutcome::Failed(e.to_string());
        }
        self.config.simulate_latency().await;

        match mode {
            MockLedgerMode::Unconfirmed => LedgerOutcome::Unconfirmed(hash),
            _ => LedgerOutcome::Confirmed(hash),
        }
    }
}

impl Default for MockLedgerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Blockchain(BlockchainError::Connection(
                "Mock ledger unhealthy".to_string(),
            )));
        }
        Ok(())
    }

    async fn record_trade(
        &self,
        record: &TradeRecord,
        observer: &dyn BroadcastObserver,
    ) -> LedgerOutcome {
        self.trades.lock().unwrap().push(record.clone());
        self.outcome(observer).await
    }

    async fn record_rating(
        &self,
        record: &RatingRecord,
        observer: &dyn BroadcastObserver,
    ) -> LedgerOutcome {
        self.ratings.lock().unwrap().push(record.clone());
        self.outcome(observer).await
    }

    async fn receipt_status(&self, _tx_hash: &str) -> Result<ReceiptStatus, AppError> {
        self.receipt_checks.fetch_add(1, Ordering::Relaxed);
        Ok(*self.receipt.lock().unwrap())
    }
}
