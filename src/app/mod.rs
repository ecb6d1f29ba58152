//! Application layer: the trade and rating orchestrators, the proof saga
//! shared between them, and the worker that reconciles missing proofs.

pub mod notary;
pub mod ratings;
pub mod service;
pub mod state;
pub mod trades;
pub mod worker;

pub use notary::{Notary, NotaryConfig};
pub use ratings::RatingSubmissionService;
pub use service::AppService;
pub use state::AppState;
pub use trades::TradeCompletionService;
pub use worker::{ProofReconciliationWorker, WorkerConfig, spawn_worker};
