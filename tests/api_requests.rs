//! Additional integration tests for specific request flows.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use barter_notary::api::{RateLimitConfig, create_router, create_router_with_rate_limit};
use barter_notary::app::{AppState, NotaryConfig};
use barter_notary::domain::{
    ConfirmationMode, ProofRecord, ProofStatus, Rating, RatingSubmission, Trade, TradeCompletion,
    TradeStatus, User,
};
use barter_notary::test_utils::{MockDatabaseClient, MockLedgerClient};

fn seeded_db() -> Arc<MockDatabaseClient> {
    let db = Arc::new(MockDatabaseClient::new());
    db.insert_user(User::new("U1", "u1@x.com", "Alice"));
    db.insert_user(User::new("U2", "u2@x.com", "Bob"));
    db.insert_trade(Trade::new("T1", "U1", "U2", "A", "B").with_status(TradeStatus::Active));
    db
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn complete(trade_id: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/trades/{}/complete", trade_id))
        .body(Body::empty())
        .unwrap()
}

fn rate(payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/ratings")
        .header("Content-Type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_full_trade_and_rating_flow() {
    let db = seeded_db();
    let ledger = Arc::new(MockLedgerClient::new());
    let router = create_router(Arc::new(AppState::new(db.clone(), ledger.clone())));

    // 1. Complete the trade
    let (status, body) = send(&router, complete("T1")).await;
    assert_eq!(status, StatusCode::OK);
    let completion: TradeCompletion = serde_json::from_value(body).unwrap();
    assert_eq!(completion.proof_status, ProofStatus::Confirmed);

    // 2. Both parties rate each other
    let (status, body) = send(
        &router,
        rate(json!({"fromUserId": "U1", "toUserId": "U2", "tradeId": "T1", "rating": 5, "comment": "great"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let first: RatingSubmission = serde_json::from_value(body).unwrap();

    let (status, _) = send(
        &router,
        rate(json!({"fromUserId": "U2", "toUserId": "U1", "tradeId": "T1", "rating": 4})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // 3. Ratings are listed on the trade and under the ratee
    let (status, body) = send(&router, get("/trades/T1/ratings")).await;
    assert_eq!(status, StatusCode::OK);
    let on_trade: Vec<Rating> = serde_json::from_value(body).unwrap();
    assert_eq!(on_trade.len(), 2);

    let (_, body) = send(&router, get("/ratings/user/U2")).await;
    let received: Vec<Rating> = serde_json::from_value(body).unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].rating, 5);
    assert_eq!(received[0].comment.as_deref(), Some("great"));

    // 4. The rating proof matches the submission response
    let (status, body) = send(&router, get(&format!("/ratings/{}/proof", first.rating_id))).await;
    assert_eq!(status, StatusCode::OK);
    let proof: ProofRecord = serde_json::from_value(body).unwrap();
    assert_eq!(proof.status, ProofStatus::Confirmed);
    assert_eq!(proof.transaction_hash, first.transaction_hash);

    assert_eq!(ledger.call_count(), 3);
}

#[tokio::test]
async fn test_repeated_completion_is_idempotent() {
    let db = seeded_db();
    let ledger = Arc::new(MockLedgerClient::with_hash("0xABC"));
    let router = create_router(Arc::new(AppState::new(db, ledger.clone())));

    send(&router, complete("T1")).await;
    let (status, body) = send(&router, complete("T1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transactionHash"], "0xABC");
    assert_eq!(ledger.call_count(), 1);
}

#[tokio::test]
async fn test_duplicate_rating_conflict() {
    let db = seeded_db();
    let ledger = Arc::new(MockLedgerClient::new());
    let router = create_router(Arc::new(AppState::new(db.clone(), ledger.clone())));
    send(&router, complete("T1")).await;

    let payload = json!({"fromUserId": "U1", "toUserId": "U2", "tradeId": "T1", "rating": 5});
    let (status, _) = send(&router, rate(payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&router, rate(payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "conflict");
    assert_eq!(ledger.call_count(), 2);
    assert_eq!(db.ratings().len(), 1);
}

#[tokio::test]
async fn test_rating_before_completion_rejected() {
    let db = seeded_db();
    let ledger = Arc::new(MockLedgerClient::new());
    let router = create_router(Arc::new(AppState::new(db, ledger.clone())));

    let (status, _) = send(
        &router,
        rate(json!({"fromUserId": "U1", "toUserId": "U2", "tradeId": "T1", "rating": 5})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(ledger.call_count(), 0);
}

#[tokio::test]
async fn test_rating_accepts_snake_case_body() {
    let db = seeded_db();
    let router = create_router(Arc::new(AppState::new(db, Arc::new(MockLedgerClient::new()))));
    send(&router, complete("T1")).await;

    let (status, body) = send(
        &router,
        rate(json!({"from_user_id": "U1", "to_user_id": "U2", "trade_id": "T1", "rating": 3})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_ledger_failure_leaves_proof_failed() {
    let db = seeded_db();
    let router = create_router(Arc::new(AppState::new(
        db,
        Arc::new(MockLedgerClient::failing("insufficient funds")),
    )));

    let (status, body) = send(&router, complete("T1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body.get("transactionHash").is_none());

    let (_, body) = send(&router, get("/trades/T1/proof")).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["lastError"], "insufficient funds");
    assert!(body["nextRetryAt"].is_string());
}

#[tokio::test]
async fn test_background_mode_proof_arrives_later() {
    let db = seeded_db();
    let ledger = Arc::new(MockLedgerClient::with_hash("0xBEEF"));
    let config = NotaryConfig {
        mode: ConfirmationMode::Background,
        ..NotaryConfig::default()
    };
    let router = create_router(Arc::new(AppState::with_config(db, ledger, config)));

    let (status, body) = send(&router, complete("T1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["proofStatus"], "pending");

    let mut confirmed = false;
    for _ in 0..100 {
        let (_, proof) = send(&router, get("/trades/T1/proof")).await;
        if proof["status"] == "confirmed" {
            assert_eq!(proof["transactionHash"], "0xBEEF");
            confirmed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(confirmed);
}

#[tokio::test]
async fn test_rate_limited_router_rejects_burst() {
    let db = seeded_db();
    let router = create_router_with_rate_limit(
        Arc::new(AppState::new(db, Arc::new(MockLedgerClient::new()))),
        RateLimitConfig {
            general_rps: 1,
            general_burst: 1,
            ..RateLimitConfig::default()
        },
    );

    let (status, _) = send(&router, complete("T1")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, complete("T1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["type"], "rate_limited");

    // Health checks have their own quota
    let (status, _) = send(&router, get("/health/live")).await;
    assert_eq!(status, StatusCode::OK);
}
