//! HTTP routing configuration with rate limiting and OpenAPI documentation.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, Response, StatusCode},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
};
use governor::{Quota, RateLimiter};
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::app::AppState;
use crate::domain::{ErrorDetail, ErrorResponse, RateLimitResponse};

use super::handlers::{
    complete_trade_handler, get_rating_proof_handler, get_trade_proof_handler,
    health_check_handler, list_trade_ratings_handler, list_user_ratings_handler, liveness_handler,
    metrics_handler, openapi_handler, readiness_handler, submit_rating_handler,
};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per second for trade and rating endpoints
    pub general_rps: u32,
    /// Burst size for trade and rating endpoints
    pub general_burst: u32,
    /// Requests per second for health endpoints
    pub health_rps: u32,
    /// Burst size for health endpoints
    pub health_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general_rps: 10,
            general_burst: 20,
            health_rps: 100,
            health_burst: 100,
        }
    }
}

type KeyedLimiter = RateLimiter<
    IpAddr,
    governor::state::keyed::DashMapStateStore<IpAddr>,
    governor::clock::DefaultClock,
>;

/// Shared rate limiter state, keyed by client IP
pub struct RateLimitState {
    api_limiter: KeyedLimiter,
    health_limiter: KeyedLimiter,
    config: RateLimitConfig,
}

fn quota(rps: u32, burst: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(rps).unwrap_or(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN))
}

impl RateLimitState {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            api_limiter: RateLimiter::dashmap(quota(config.general_rps, config.general_burst)),
            health_limiter: RateLimiter::dashmap(quota(config.health_rps, config.health_burst)),
            config,
        }
    }
}

/// Extract client IP from request (X-Forwarded-For, X-Real-IP, or ConnectInfo).
/// Unknown clients share the 0.0.0.0 bucket.
fn client_ip_from_request<B>(request: &Request<B>) -> IpAddr {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    if let Some(ip) = forwarded {
        return ip;
    }
    let real_ip = request
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok());
    if let Some(ip) = real_ip {
        return ip;
    }
    if let Some(addr) = request.extensions().get::<SocketAddr>() {
        return addr.ip();
    }
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn retry_after_secs(not_until: &governor::NotUntil<governor::clock::QuantaInstant>) -> u64 {
    not_until
        .wait_time_from(governor::clock::Clock::now(
            &governor::clock::DefaultClock::default(),
        ))
        .as_secs()
}

/// Rate limit middleware for trade and rating endpoints
async fn rate_limit_api_middleware(
    State(rate_limit): State<Arc<RateLimitState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let client_ip = client_ip_from_request(&request);
    let limit = HeaderValue::from(rate_limit.config.general_rps);
    match rate_limit.api_limiter.check_key(&client_ip) {
        Ok(_) => {
            let mut response = next.run(request).await;
            response.headers_mut().insert("X-RateLimit-Limit", limit);
            response
        }
        Err(not_until) => {
            let retry_after = retry_after_secs(&not_until);

            let body = RateLimitResponse {
                error: ErrorDetail {
                    r#type: "rate_limited".to_string(),
                    message: "Rate limit exceeded. Please slow down your requests.".to_string(),
                },
                retry_after,
            };

            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", limit);
            headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
            headers.insert("Retry-After", HeaderValue::from(retry_after));
            response
        }
    }
}

/// Rate limit middleware for health endpoints
async fn rate_limit_health_middleware(
    State(rate_limit): State<Arc<RateLimitState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let client_ip = client_ip_from_request(&request);
    match rate_limit.health_limiter.check_key(&client_ip) {
        Ok(_) => next.run(request).await,
        Err(not_until) => {
            let retry_after = retry_after_secs(&not_until);

            let body = ErrorResponse {
                error: ErrorDetail {
                    r#type: "rate_limited".to_string(),
                    message: "Rate limit exceeded".to_string(),
                },
            };

            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            response
                .headers_mut()
                .insert("Retry-After", HeaderValue::from(retry_after));
            response
        }
    }
}

fn trade_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{id}/complete", post(complete_trade_handler))
        .route("/{id}/proof", get(get_trade_proof_handler))
        .route("/{id}/ratings", get(list_trade_ratings_handler))
}

fn rating_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(submit_rating_handler))
        .route("/{id}/proof", get(get_rating_proof_handler))
        .route("/user/{user_id}", get(list_user_ratings_handler))
}

fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_check_handler))
        .route("/live", get(liveness_handler))
        .route("/ready", get(readiness_handler))
}

/// A request is cut off once the proof lease runs out. The lease outlasts a
/// full confirmation wait, and the write itself continues on its own task.
fn request_timeout(app_state: &AppState) -> Duration {
    app_state.service.notary_config().lease
}

fn assemble(
    app_state: Arc<AppState>,
    trades: Router<Arc<AppState>>,
    ratings: Router<Arc<AppState>>,
    health: Router<Arc<AppState>>,
) -> Router {
    let timeout = request_timeout(&app_state);
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ));

    Router::new()
        .nest("/trades", trades)
        .nest("/ratings", ratings)
        .nest("/health", health)
        .route("/metrics", get(metrics_handler))
        .route("/api-docs/openapi.json", get(openapi_handler))
        .layer(middleware)
        .with_state(app_state)
}

/// Create router without rate limiting
pub fn create_router(app_state: Arc<AppState>) -> Router {
    assemble(app_state, trade_routes(), rating_routes(), health_routes())
}

/// Create router with per-IP rate limiting on every route group
pub fn create_router_with_rate_limit(app_state: Arc<AppState>, config: RateLimitConfig) -> Router {
    let rate_limit_state = Arc::new(RateLimitState::new(config));
    let api_limit =
        middleware::from_fn_with_state(Arc::clone(&rate_limit_state), rate_limit_api_middleware);

    assemble(
        app_state,
        trade_routes().layer(api_limit.clone()),
        rating_routes().layer(api_limit),
        health_routes().layer(middleware::from_fn_with_state(
            Arc::clone(&rate_limit_state),
            rate_limit_health_middleware,
        )),
    )
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    use super::*;
    use crate::app::NotaryConfig;
    use crate::domain::{Item, ProofStatus, Trade, TradeStatus, User};
    use crate::test_utils::{MockConfig, MockDatabaseClient, MockLedgerClient};

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            Arc::new(MockDatabaseClient::new()),
            Arc::new(MockLedgerClient::new()),
        ))
    }

    fn seeded_db() -> Arc<MockDatabaseClient> {
        let db = Arc::new(MockDatabaseClient::new());
        db.insert_user(User::new("U1", "s@x.com", "Seller"));
        db.insert_user(User::new("U2", "b@x.com", "Buyer"));
        db.insert_item(Item::new("A", "U1", "Bike"));
        db.insert_item(Item::new("B", "U2", "Guitar"));
        db.insert_trade(Trade::new("T1", "U1", "U2", "A", "B").with_status(TradeStatus::Accepted));
        db
    }

    fn tight_limits() -> RateLimitConfig {
        RateLimitConfig {
            general_rps: 1,
            general_burst: 1,
            health_rps: 100,
            health_burst: 100,
        }
    }

    fn get_from(uri: &str, client: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", client)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_zero_quota_clamped_to_one() {
        let state = RateLimitState::new(RateLimitConfig {
            general_rps: 0,
            general_burst: 0,
            health_rps: 0,
            health_burst: 0,
        });
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

        assert!(state.api_limiter.check_key(&ip).is_ok());
        assert!(state.api_limiter.check_key(&ip).is_err());
        assert!(state.health_limiter.check_key(&ip).is_ok());
        assert!(state.health_limiter.check_key(&ip).is_err());
    }

    #[test]
    fn test_client_ip_selection_order() {
        let forwarded = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "198.51.100.2")
            .body(())
            .unwrap();
        assert_eq!(
            client_ip_from_request(&forwarded),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );

        let real_ip = Request::builder()
            .header("x-forwarded-for", "not-an-ip")
            .header("x-real-ip", " 198.51.100.2 ")
            .body(())
            .unwrap();
        assert_eq!(
            client_ip_from_request(&real_ip),
            "198.51.100.2".parse::<IpAddr>().unwrap()
        );

        let mut connected = Request::builder().body(()).unwrap();
        connected
            .extensions_mut()
            .insert(SocketAddr::from(([192, 0, 2, 9], 4000)));
        assert_eq!(
            client_ip_from_request(&connected),
            "192.0.2.9".parse::<IpAddr>().unwrap()
        );

        let bare = Request::builder().body(()).unwrap();
        assert_eq!(
            client_ip_from_request(&bare),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
    }

    #[tokio::test]
    async fn test_trade_and_rating_routes_share_quota() {
        let router = create_router_with_rate_limit(test_state(), tight_limits());

        let res = router
            .clone()
            .oneshot(get_from("/trades/T9/proof", "203.0.113.7"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.headers().get("X-RateLimit-Limit").unwrap(), "1");

        let res = router
            .oneshot(get_from("/ratings/R9/proof", "203.0.113.7"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get("X-RateLimit-Remaining").unwrap(), "0");
        assert!(res.headers().contains_key("Retry-After"));

        let body = res.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"]["type"], "rate_limited");
        assert!(body["retry_after"].is_u64());
    }

    #[tokio::test]
    async fn test_quota_is_per_client() {
        let router = create_router_with_rate_limit(test_state(), tight_limits());

        router
            .clone()
            .oneshot(get_from("/ratings/user/U1", "192.168.1.1"))
            .await
            .unwrap();
        let blocked = router
            .clone()
            .oneshot(get_from("/ratings/user/U1", "192.168.1.1"))
            .await
            .unwrap();
        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = router
            .oneshot(get_from("/ratings/user/U1", "10.0.0.1"))
            .await
            .unwrap();
        assert_ne!(other.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_health_has_its_own_quota() {
        let router = create_router_with_rate_limit(test_state(), tight_limits());

        router
            .clone()
            .oneshot(get_from("/trades/T9/proof", "203.0.113.7"))
            .await
            .unwrap();
        for _ in 0..5 {
            let res = router
                .clone()
                .oneshot(get_from("/health/live", "203.0.113.7"))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let strict = create_router_with_rate_limit(
            test_state(),
            RateLimitConfig {
                health_rps: 1,
                health_burst: 1,
                ..RateLimitConfig::default()
            },
        );
        strict
            .clone()
            .oneshot(get_from("/health/ready", "203.0.113.7"))
            .await
            .unwrap();
        let res = strict
            .oneshot(get_from("/health/ready", "203.0.113.7"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key("Retry-After"));
    }

    #[tokio::test]
    async fn test_unlimited_router_serves_every_group() {
        let router = create_router(test_state());

        for (uri, status) in [
            ("/health/live", StatusCode::OK),
            ("/health/ready", StatusCode::OK),
            ("/api-docs/openapi.json", StatusCode::OK),
            ("/trades/T9/proof", StatusCode::NOT_FOUND),
            ("/ratings/R9/proof", StatusCode::NOT_FOUND),
        ] {
            let res = router.clone().oneshot(get_from(uri, "203.0.113.7")).await.unwrap();
            assert_eq!(res.status(), status, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_request_timeout_follows_lease() {
        let db = seeded_db();
        let ledger = Arc::new(MockLedgerClient::with_config(
            MockConfig::success().with_latency(300),
        ));
        let config = NotaryConfig {
            lease: Duration::from_millis(100),
            ..NotaryConfig::default()
        };
        let state = Arc::new(AppState::with_config(db.clone(), ledger.clone(), config));
        assert_eq!(request_timeout(&state), Duration::from_millis(100));

        let res = create_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/trades/T1/complete")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);

        // The write outlives the timed-out request.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ledger.call_count(), 1);
        assert_eq!(db.trade("T1").unwrap().proof.status, ProofStatus::Confirmed);
    }
}
