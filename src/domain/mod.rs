//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{AppError, BlockchainError, ConfigError, DatabaseError, ValidationError};
pub use traits::{
    BroadcastObserver, DatabaseClient, IgnoreBroadcast, LedgerClient, RecoverableSignature,
    TransactionSigner,
};
pub use types::{
    BARTER_AMOUNT, ConfirmationMode, EntityId, ErrorDetail, ErrorResponse, HealthResponse,
    HealthStatus, Item, ItemStatus, LedgerOutcome, NewRating, ProofRecord, ProofStatus,
    ProofUpdate, RateLimitResponse, Rating, RatingProofTask, RatingRecord, RatingSubmission,
    ReceiptStatus, SubmitRatingRequest, Trade, TradeCompletion, TradeParties, TradeRecord,
    TradeStatus, TransactionId, User, UserRole,
};
