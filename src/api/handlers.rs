//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use tracing::error;
use utoipa::OpenApi;

use crate::app::AppState;
use crate::domain::{
    AppError, DatabaseError, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus,
    ProofRecord, ProofStatus, RateLimitResponse, Rating, RatingSubmission, SubmitRatingRequest,
    TradeCompletion,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Barter Notary API",
        version = "0.1.0",
        description = "Completes barter trades and accepts ratings, notarizing both on an EVM ledger",
        license(
            name = "MIT"
        )
    ),
    paths(
        complete_trade_handler,
        get_trade_proof_handler,
        list_trade_ratings_handler,
        submit_rating_handler,
        get_rating_proof_handler,
        list_user_ratings_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
    ),
    components(
        schemas(
            TradeCompletion,
            SubmitRatingRequest,
            RatingSubmission,
            Rating,
            ProofRecord,
            ProofStatus,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
            RateLimitResponse,
        )
    ),
    tags(
        (name = "trades", description = "Trade completion and proofs"),
        (name = "ratings", description = "Rating submission and proofs"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Complete a trade and notarize it on the ledger
#[utoipa::path(
    post,
    path = "/trades/{id}/complete",
    tag = "trades",
    params(
        ("id" = String, Path, description = "Trade ID")
    ),
    responses(
        (status = 200, description = "Trade completed; the proof may be absent", body = TradeCompletion),
        (status = 404, description = "Trade not found", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn complete_trade_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TradeCompletion>, AppError> {
    let completion = state.service.complete_trade(&id).await?;
    Ok(Json(completion))
}

/// Get the ledger proof of a trade
#[utoipa::path(
    get,
    path = "/trades/{id}/proof",
    tag = "trades",
    params(
        ("id" = String, Path, description = "Trade ID")
    ),
    responses(
        (status = 200, description = "Proof record", body = ProofRecord),
        (status = 404, description = "Trade not found", body = ErrorResponse)
    )
)]
pub async fn get_trade_proof_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProofRecord>, AppError> {
    Ok(Json(state.service.get_trade_proof(&id).await?))
}

/// List the ratings left on a trade
#[utoipa::path(
    get,
    path = "/trades/{id}/ratings",
    tag = "trades",
    params(
        ("id" = String, Path, description = "Trade ID")
    ),
    responses(
        (status = 200, description = "Ratings, oldest first", body = Vec<Rating>),
        (status = 404, description = "Trade not found", body = ErrorResponse)
    )
)]
pub async fn list_trade_ratings_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Rating>>, AppError> {
    Ok(Json(state.service.list_trade_ratings(&id).await?))
}

/// Submit a rating for the other party of a completed trade
#[utoipa::path(
    post,
    path = "/ratings",
    tag = "ratings",
    request_body = SubmitRatingRequest,
    responses(
        (status = 201, description = "Rating stored; the proof may be absent", body = RatingSubmission),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "User or trade not found", body = ErrorResponse),
        (status = 409, description = "Trade already rated by this user", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn submit_rating_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRatingRequest>,
) -> Result<(StatusCode, Json<RatingSubmission>), AppError> {
    let submission = state.service.submit_rating(&payload).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// Get the ledger proof of a rating
#[utoipa::path(
    get,
    path = "/ratings/{id}/proof",
    tag = "ratings",
    params(
        ("id" = String, Path, description = "Rating ID")
    ),
    responses(
        (status = 200, description = "Proof record", body = ProofRecord),
        (status = 404, description = "Rating not found", body = ErrorResponse)
    )
)]
pub async fn get_rating_proof_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProofRecord>, AppError> {
    Ok(Json(state.service.get_rating_proof(&id).await?))
}

/// List the ratings a user received
#[utoipa::path(
    get,
    path = "/ratings/user/{user_id}",
    tag = "ratings",
    params(
        ("user_id" = String, Path, description = "Ratee user ID")
    ),
    responses(
        (status = 200, description = "Ratings, newest first", body = Vec<Rating>),
        (status = 404, description = "User not found", body = ErrorResponse)
    )
)]
pub async fn list_user_ratings_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Rating>>, AppError> {
    Ok(Json(state.service.list_user_ratings(&user_id).await?))
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe. A ledger outage does not make the service
/// unready because writes still commit without a proof.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus scrape endpoint
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type) = match &self {
            AppError::Database(DatabaseError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Database(DatabaseError::Duplicate(_)) | AppError::Conflict(_) => {
                (StatusCode::CONFLICT, "conflict")
            }
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Blockchain(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ledger_error"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::NotSupported(_) => (StatusCode::NOT_IMPLEMENTED, "not_supported"),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
