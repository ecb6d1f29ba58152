use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::error::ValidationError;

/// Represents a unique identifier for domain entities.
pub type EntityId = String;

/// Represents a transaction hash returned by the ledger.
pub type TransactionId = String;

/// Amount recorded on-chain for barter trades.
pub const BARTER_AMOUNT: u128 = 0;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ValidationError::InvalidFormat(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
    Moderator,
}

string_enum!(UserRole {
    User => "user",
    Admin => "admin",
    Moderator => "moderator",
});

/// Marketplace user. The email is the identity recorded on-chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct User {
    pub id: EntityId,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: name.into(),
            role: UserRole::User,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Available,
    Traded,
    Removed,
    Draft,
    Pending,
}

string_enum!(ItemStatus {
    Available => "available",
    Traded => "traded",
    Removed => "removed",
    Draft => "draft",
    Pending => "pending",
});

/// Listed item offered for barter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Item {
    pub id: EntityId,
    pub user_id: EntityId,
    pub title: String,
    pub description: Option<String>,
    pub status: ItemStatus,
}

impl Item {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            title: title.into(),
            description: None,
            status: ItemStatus::Available,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Active,
    Completed,
    Cancelled,
}

string_enum!(TradeStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
});

/// Notarization state of a trade or rating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProofStatus {
    /// No notarization is owed yet.
    #[default]
    None,
    /// Claimed or broadcast; no confirmed receipt yet.
    Pending,
    /// Transaction hash attached.
    Confirmed,
    /// Last attempt failed; a retry is scheduled.
    Failed,
}

string_enum!(ProofStatus {
    None => "none",
    Pending => "pending",
    Confirmed => "confirmed",
    Failed => "failed",
});

impl ProofStatus {
    /// Whether a new ledger write may be claimed from this state.
    #[must_use]
    pub fn is_claimable(&self) -> bool {
        matches!(self, ProofStatus::None | ProofStatus::Failed)
    }
}

/// Ledger proof columns persisted alongside a trade or rating row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProofRecord {
    pub status: ProofStatus,
    pub transaction_hash: Option<TransactionId>,
    pub pending_transaction_hash: Option<TransactionId>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl ProofRecord {
    /// Claims a ledger write, leasing the row until `lease_until`.
    pub fn claim(&mut self, lease_until: DateTime<Utc>) {
        self.status = ProofStatus::Pending;
        self.last_error = None;
        self.next_retry_at = Some(lease_until);
    }

    /// Applies an outcome. A confirmed proof is never overwritten.
    pub fn apply(&mut self, update: &ProofUpdate) {
        if self.status == ProofStatus::Confirmed {
            return;
        }
        self.status = update.status;
        if let Some(hash) = &update.transaction_hash {
            self.transaction_hash = Some(hash.clone());
        }
        self.pending_transaction_hash = update.pending_transaction_hash.clone();
        self.last_error = update.last_error.clone();
        self.next_retry_at = update.next_retry_at;
    }
}

/// A single write to the proof columns.
///
/// Constructors keep `transaction_hash` tied to `ProofStatus::Confirmed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofUpdate {
    pub status: ProofStatus,
    pub transaction_hash: Option<TransactionId>,
    pub pending_transaction_hash: Option<TransactionId>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl ProofUpdate {
    pub fn confirmed(transaction_hash: impl Into<String>) -> Self {
        Self {
            status: ProofStatus::Confirmed,
            transaction_hash: Some(transaction_hash.into()),
            pending_transaction_hash: None,
            last_error: None,
            next_retry_at: None,
        }
    }

    pub fn unconfirmed(pending_hash: impl Into<String>, next_retry_at: DateTime<Utc>) -> Self {
        Self {
            status: ProofStatus::Pending,
            transaction_hash: None,
            pending_transaction_hash: Some(pending_hash.into()),
            last_error: None,
            next_retry_at: Some(next_retry_at),
        }
    }

    pub fn failed(error: impl Into<String>, next_retry_at: DateTime<Utc>) -> Self {
        Self {
            status: ProofStatus::Failed,
            transaction_hash: None,
            pending_transaction_hash: None,
            last_error: Some(error.into()),
            next_retry_at: Some(next_retry_at),
        }
    }
}

/// Trade between two users exchanging one item each.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Trade {
    pub id: EntityId,
    pub from_user_id: EntityId,
    pub to_user_id: EntityId,
    pub from_item_id: EntityId,
    pub to_item_id: EntityId,
    pub status: TradeStatus,
    pub proof: ProofRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    pub fn new(
        id: impl Into<String>,
        from_user_id: impl Into<String>,
        to_user_id: impl Into<String>,
        from_item_id: impl Into<String>,
        to_item_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            from_user_id: from_user_id.into(),
            to_user_id: to_user_id.into(),
            from_item_id: from_item_id.into(),
            to_item_id: to_item_id.into(),
            status: TradeStatus::Pending,
            proof: ProofRecord::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: TradeStatus) -> Self {
        self.status = status;
        self
    }

    /// The confirmed ledger proof, if any.
    #[must_use]
    pub fn transaction_hash(&self) -> Option<&str> {
        self.proof.transaction_hash.as_deref()
    }

    #[must_use]
    pub fn involves(&self, user_id: &str) -> bool {
        self.from_user_id == user_id || self.to_user_id == user_id
    }
}

/// A trade joined with the public identities of both parties.
///
/// The initiator (`from_user_id`) is the seller and the counter-party
/// (`to_user_id`) is the buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeParties {
    pub trade: Trade,
    pub buyer_email: String,
    pub seller_email: String,
}

impl TradeParties {
    #[must_use]
    pub fn item_description(&self) -> String {
        format!(
            "Trade of item {} for {}",
            self.trade.from_item_id, self.trade.to_item_id
        )
    }

    #[must_use]
    pub fn to_ledger_record(&self) -> TradeRecord {
        TradeRecord {
            trade_id: self.trade.id.clone(),
            buyer_identity: self.buyer_email.clone(),
            seller_identity: self.seller_email.clone(),
            item_description: self.item_description(),
            amount: BARTER_AMOUNT,
        }
    }
}

/// Rating left by one trade party for the other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub id: EntityId,
    pub trade_id: EntityId,
    pub from_user_id: EntityId,
    pub to_user_id: EntityId,
    pub rating: u8,
    pub comment: Option<String>,
    pub proof: ProofRecord,
    pub created_at: DateTime<Utc>,
}

/// Row to insert for a new rating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRating {
    pub id: EntityId,
    pub trade_id: EntityId,
    pub from_user_id: EntityId,
    pub to_user_id: EntityId,
    pub rating: u8,
    pub comment: Option<String>,
    pub lease_until: DateTime<Utc>,
}

impl NewRating {
    pub fn from_request(request: &SubmitRatingRequest, lease_until: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trade_id: request.trade_id.clone(),
            from_user_id: request.from_user_id.clone(),
            to_user_id: request.to_user_id.clone(),
            rating: request.rating,
            comment: request.comment.clone(),
            lease_until,
        }
    }
}

/// A rating awaiting its ledger proof, with the ratee's on-chain identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingProofTask {
    pub rating: Rating,
    pub ratee_email: String,
}

impl RatingProofTask {
    #[must_use]
    pub fn to_ledger_record(&self) -> RatingRecord {
        RatingRecord {
            rated_user_identity: self.ratee_email.clone(),
            score: self.rating.rating,
            comment: self.rating.comment.clone().unwrap_or_default(),
        }
    }
}

/// Request payload for submitting a rating.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRatingRequest {
    #[serde(alias = "from_user_id")]
    #[validate(length(min = 1, max = 64, message = "fromUserId must be 1-64 characters"))]
    pub from_user_id: String,
    #[serde(alias = "to_user_id")]
    #[validate(length(min = 1, max = 64, message = "toUserId must be 1-64 characters"))]
    pub to_user_id: String,
    #[serde(alias = "trade_id")]
    #[validate(length(min = 1, max = 64, message = "tradeId must be 1-64 characters"))]
    pub trade_id: String,
    #[serde(alias = "score")]
    #[validate(range(min = 1, max = 5, message = "rating must be between 1 and 5"))]
    pub rating: u8,
    #[validate(length(max = 1000, message = "comment must be at most 1000 characters"))]
    pub comment: Option<String>,
}

impl SubmitRatingRequest {
    pub fn new(
        from_user_id: impl Into<String>,
        to_user_id: impl Into<String>,
        trade_id: impl Into<String>,
        rating: u8,
        comment: Option<&str>,
    ) -> Self {
        Self {
            from_user_id: from_user_id.into(),
            to_user_id: to_user_id.into(),
            trade_id: trade_id.into(),
            rating,
            comment: comment.map(str::to_string),
        }
    }
}

/// Arguments of the contract's `recordTrade` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeRecord {
    pub trade_id: String,
    pub buyer_identity: String,
    pub seller_identity: String,
    pub item_description: String,
    pub amount: u128,
}

/// Arguments of the contract's `recordRating` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingRecord {
    pub rated_user_identity: String,
    pub score: u8,
    pub comment: String,
}

/// Result of a ledger write. Ledger clients never surface errors past this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// Mined and confirmed with this transaction hash.
    Confirmed(TransactionId),
    /// Broadcast, but no receipt within the confirmation window.
    Unconfirmed(TransactionId),
    /// Nothing usable was recorded.
    Failed(String),
}

impl LedgerOutcome {
    #[must_use]
    pub fn confirmed_hash(&self) -> Option<&str> {
        match self {
            LedgerOutcome::Confirmed(hash) => Some(hash),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            LedgerOutcome::Confirmed(_) => "confirmed",
            LedgerOutcome::Unconfirmed(_) => "unconfirmed",
            LedgerOutcome::Failed(_) => "failed",
        }
    }
}

/// Receipt lookup result for a previously broadcast transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Confirmed,
    Reverted,
    /// Known to the node but not mined yet
    Pending,
    /// Unknown to the node: never broadcast, or evicted from the mempool
    Dropped,
}

/// When the ledger write happens relative to the HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmationMode {
    /// Block the request until the receipt is seen or the wait times out.
    #[default]
    Wait,
    /// Respond immediately; a spawned task writes and attaches the proof.
    Background,
}

impl FromStr for ConfirmationMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" | "sync" => Ok(ConfirmationMode::Wait),
            "background" | "async" => Ok(ConfirmationMode::Background),
            other => Err(ValidationError::InvalidFormat(format!(
                "unknown confirmation mode '{}'",
                other
            ))),
        }
    }
}

/// Response payload of trade completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TradeCompletion {
    pub success: bool,
    pub trade_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<TransactionId>,
    pub proof_status: ProofStatus,
}

/// Response payload of rating submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RatingSubmission {
    pub success: bool,
    pub message: String,
    pub rating_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<TransactionId>,
    pub proof_status: ProofStatus,
}

impl RatingSubmission {
    pub fn new(rating_id: EntityId, proof: &ProofRecord) -> Self {
        let message = match proof.transaction_hash {
            Some(_) => "Rating submitted and verified on-chain!",
            None => "Rating submitted; on-chain proof pending",
        };
        Self {
            success: true,
            message: message.to_string(),
            rating_id,
            transaction_hash: proof.transaction_hash.clone(),
            proof_status: proof.status,
        }
    }
}

/// Health check status for services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response for the application.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub ledger: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    /// The database is required; a ledger outage only degrades the service
    /// because completions and ratings still commit without a proof.
    pub fn new(database: HealthStatus, ledger: HealthStatus) -> Self {
        let status = match (&database, &ledger) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };

        Self {
            status,
            database,
            ledger,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub r#type: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RateLimitResponse {
    pub error: ErrorDetail,
    pub retry_after: u64,
}
