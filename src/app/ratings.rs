//! Rating submission orchestration.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};
use validator::Validate;

use super::notary::{Notary, detached};
use crate::domain::{
    AppError, ConfirmationMode, DatabaseClient, DatabaseError, NewRating, Rating,
    RatingProofTask, RatingSubmission, SubmitRatingRequest, TradeStatus, ValidationError,
};

/// Stores ratings and notarizes them on the ledger under the ratee's identity.
#[derive(Clone)]
pub struct RatingSubmissionService {
    db_client: Arc<dyn DatabaseClient>,
    notary: Notary,
}

impl RatingSubmissionService {
    #[must_use]
    pub fn new(db_client: Arc<dyn DatabaseClient>, notary: Notary) -> Self {
        Self { db_client, notary }
    }

    /// Inserts a rating and records it on the ledger.
    ///
    /// # Errors
    ///
    /// - `Validation` for a malformed request, a self-rating, a trade that is
    ///   not completed, or users who are not the trade's two parties
    /// - `NotFound` when the ratee or the trade does not exist
    /// - `Conflict` when the rater already rated this trade
    ///
    /// Nothing is inserted and the ledger is not called in any of these cases.
    #[instrument(skip(self, request), fields(trade_id = %request.trade_id, rating = request.rating))]
    pub async fn submit_rating(
        &self,
        request: &SubmitRatingRequest,
    ) -> Result<RatingSubmission, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed for rating request");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;
        if request.from_user_id == request.to_user_id {
            return Err(ValidationError::field("toUserId", "users cannot rate themselves").into());
        }

        let ratee = self
            .db_client
            .get_user(&request.to_user_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {}", request.to_user_id)))?;

        let trade = self
            .db_client
            .get_trade(&request.trade_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("trade {}", request.trade_id)))?;
        if trade.status != TradeStatus::Completed {
            return Err(ValidationError::field("tradeId", "trade is not completed").into());
        }
        if !trade.involves(&request.from_user_id) || !trade.involves(&request.to_user_id) {
            return Err(ValidationError::field(
                "fromUserId",
                "rater and ratee must be the two parties of the trade",
            )
            .into());
        }

        let new_rating = NewRating::from_request(request, self.notary.config().lease_until());
        let rating = self
            .db_client
            .insert_rating(&new_rating)
            .await
            .map_err(|e| match e {
                AppError::Database(DatabaseError::Duplicate(_)) => AppError::Conflict(format!(
                    "user {} already rated trade {}",
                    request.from_user_id, request.trade_id
                )),
                other => other,
            })?;
        info!(rating_id = %rating.id, "Rating stored");

        let task = RatingProofTask {
            rating,
            ratee_email: ratee.email,
        };

        match self.notary.config().mode {
            ConfirmationMode::Wait => {
                let rating_id = task.rating.id.clone();
                let mut proof = task.rating.proof.clone();
                let notary = self.notary.clone();
                let update =
                    detached(async move { notary.notarize_rating(&task, 0).await }).await?;
                proof.apply(&update);
                Ok(RatingSubmission::new(rating_id, &proof))
            }
            ConfirmationMode::Background => {
                let response = RatingSubmission::new(task.rating.id.clone(), &task.rating.proof);
                let notary = self.notary.clone();
                tokio::spawn(async move {
                    if let Err(e) = notary.notarize_rating(&task, 0).await {
                        error!(rating_id = %task.rating.id, error = ?e, "Background notarization failed");
                    }
                });
                Ok(response)
            }
        }
    }

    /// Ratings left on a trade, oldest first.
    #[instrument(skip(self))]
    pub async fn ratings_for_trade(&self, trade_id: &str) -> Result<Vec<Rating>, AppError> {
        if self.db_client.get_trade(trade_id).await?.is_none() {
            return Err(AppError::not_found(format!("trade {}", trade_id)));
        }
        self.db_client.list_ratings_for_trade(trade_id).await
    }

    /// Ratings received by a user, newest first.
    #[instrument(skip(self))]
    pub async fn ratings_for_user(&self, user_id: &str) -> Result<Vec<Rating>, AppError> {
        if self.db_client.get_user(user_id).await?.is_none() {
            return Err(AppError::not_found(format!("user {}", user_id)));
        }
        self.db_client.list_ratings_for_user(user_id).await
    }
}
