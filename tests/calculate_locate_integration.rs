//! End-to-end coverage of the HTTP surface: a real `axum::Router` wired to a
//! file-backed `SqliteRepository`, an in-memory L2/rate-limiter, and fake
//! upstream HTTP servers standing in for SecLend/Volatility/Events. Mirrors
//! §8's worked scenarios (S1, S5, S6) plus auth and rate-limit edge cases.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

use locate_pricing_engine::api;
use locate_pricing_engine::audit;
use locate_pricing_engine::auth::{generate_key, hash_key};
use locate_pricing_engine::cache::l2::InMemoryL2;
use locate_pricing_engine::cache::CacheStore;
use locate_pricing_engine::clock::SystemClock;
use locate_pricing_engine::config::{BreakerConfig, CacheTtls, Config, UpstreamEndpointConfig};
use locate_pricing_engine::engine::fee::calculate_fee;
use locate_pricing_engine::engine::rate::RateEngine;
use locate_pricing_engine::models::{Broker, TransactionFeeType};
use locate_pricing_engine::ratelimit::RateLimiter;
use locate_pricing_engine::repository::sqlite::SqliteRepository;
use locate_pricing_engine::rng::SystemRng;
use locate_pricing_engine::state::AppState;
use locate_pricing_engine::upstream::events::EventsClient;
use locate_pricing_engine::upstream::seclend::SecLendClient;
use locate_pricing_engine::upstream::volatility::VolatilityClient;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS stocks (
    ticker          TEXT PRIMARY KEY,
    borrow_status   TEXT NOT NULL,
    lender_api_id   TEXT,
    min_borrow_rate TEXT NOT NULL,
    last_updated    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS brokers (
    client_id            TEXT PRIMARY KEY,
    markup_percentage     TEXT NOT NULL,
    transaction_fee_type  TEXT NOT NULL,
    transaction_amount    TEXT NOT NULL,
    active                INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS volatility_samples (
    ticker            TEXT NOT NULL,
    vol_index         TEXT NOT NULL,
    event_risk_factor INTEGER NOT NULL,
    sampled_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_keys (
    key_hash   TEXT PRIMARY KEY,
    client_id  TEXT NOT NULL,
    rate_limit INTEGER NOT NULL,
    expires_at TEXT
);

CREATE TABLE IF NOT EXISTS audit_records (
    audit_id         TEXT PRIMARY KEY,
    recorded_at      TEXT NOT NULL,
    partition_date   TEXT NOT NULL,
    client_id        TEXT NOT NULL,
    ticker           TEXT NOT NULL,
    position_value   TEXT NOT NULL,
    loan_days        INTEGER NOT NULL,
    borrow_rate_used TEXT NOT NULL,
    total_fee        TEXT NOT NULL,
    data_sources     TEXT NOT NULL,
    breakdown        TEXT NOT NULL
);
"#;

/// Binds an axum `Router` to an ephemeral port and returns its base URL. The
/// server task is aborted implicitly when the test's single-threaded runtime
/// shuts down.
async fn spawn_fake_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn seclend_app(rate: &'static str, status: &'static str) -> Router {
    Router::new().route(
        "/api/borrows/:ticker",
        get(move || async move { Json(json!({ "rate": rate, "status": status })) }),
    )
}

fn seclend_app_down() -> Router {
    Router::new().route(
        "/api/borrows/:ticker",
        get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    )
}

fn volatility_app(value: &'static str) -> Router {
    Router::new().route(
        "/api/market/volatility/:ticker",
        get(move || async move {
            Json(json!({ "value": value, "timestamp": chrono::Utc::now().to_rfc3339() }))
        }),
    )
}

fn events_app(risk_factor: i32, days_out: i64) -> Router {
    Router::new().route(
        "/api/calendar/events",
        get(move || async move {
            let date = (chrono::Utc::now().date_naive() + chrono::Duration::days(days_out)).to_string();
            Json(json!({ "events": [{ "type": "earnings", "date": date, "risk_factor": risk_factor }] }))
        }),
    )
}

fn events_app_empty() -> Router {
    Router::new().route("/api/calendar/events", get(|| async { Json(json!({ "events": [] })) }))
}

fn test_config(seclend_url: String, volatility_url: String, events_url: String, db_path: String) -> Config {
    let endpoint = |timeout_ms: u64| UpstreamEndpointConfig {
        timeout: Duration::from_millis(timeout_ms),
        breaker: BreakerConfig {
            failure_threshold: 5,
            failure_window: Duration::from_secs(30),
            open_timeout: Duration::from_secs(60),
            success_threshold: 2,
        },
    };

    Config {
        min_borrow_rate: dec!(0.0025),
        default_volatility_index: dec!(20.0),
        default_event_risk_factor: dec!(0),
        volatility_factor: dec!(0.01),
        event_risk_factor_mult: dec!(0.05),
        days_in_year: dec!(365),
        rate_limit_default: 60,
        request_deadline: Duration::from_secs(5),
        cache_ttls: CacheTtls {
            borrow_rate_l2: Duration::from_secs(300),
            borrow_rate_l1: Duration::from_secs(60),
            volatility_l2: Duration::from_secs(900),
            volatility_l1: Duration::from_secs(60),
            event_risk_l2: Duration::from_secs(3600),
            event_risk_l1: Duration::from_secs(60),
            broker_config_l2: Duration::from_secs(1800),
            broker_config_l1: Duration::from_secs(60),
            min_rate_l2: Duration::from_secs(86_400),
            locate_fee_l2: Duration::from_secs(60),
        },
        seclend: endpoint(2_000),
        volatility: endpoint(2_000),
        events: endpoint(2_000),
        fallback_cache_age_multiplier: 2,
        db_path,
        data_dir: ".".into(),
        redis_url: None,
        audit_worker_count: 1,
        audit_queue_capacity: 16,
        audit_enqueue_timeout: Duration::from_millis(200),
        bind_addr: "127.0.0.1:0".into(),
        seclend_base_url: seclend_url,
        volatility_base_url: volatility_url,
        events_base_url: events_url,
        seclend_api_key: "test-key".into(),
        volatility_bearer_token: "test-token".into(),
        events_api_key: "test-key".into(),
        db_pool_size: 1,
    }
}

/// One row per ticker/client combination needed across the test suite.
struct Seed<'a> {
    ticker: &'a str,
    min_borrow_rate: &'a str,
    client_id: &'a str,
    markup_percentage: &'a str,
    fee_type: &'a str,
    transaction_amount: &'a str,
    rate_limit: u32,
}

struct TestApp {
    router: Router,
    db_path: std::path::PathBuf,
    raw_api_key: String,
}

async fn build_app(seeds: &[Seed<'_>], seclend: Router, volatility: Router, events: Router) -> TestApp {
    let tmp_dir = std::env::temp_dir().join(format!("locate-pricing-test-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&tmp_dir).await.unwrap();
    let db_path = tmp_dir.join("locate.db");
    let spill_path = tmp_dir.join("audit-spill.jsonl");

    {
        let path = db_path.clone();
        let raw_seeds: Vec<(String, String, String, String, String, String, u32)> = seeds
            .iter()
            .map(|s| {
                (
                    s.ticker.to_string(),
                    s.min_borrow_rate.to_string(),
                    s.client_id.to_string(),
                    s.markup_percentage.to_string(),
                    s.fee_type.to_string(),
                    s.transaction_amount.to_string(),
                    s.rate_limit,
                )
            })
            .collect();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch(SCHEMA_SQL).unwrap();
            for (ticker, min_rate, client_id, markup, fee_type, amount, _) in &raw_seeds {
                conn.execute(
                    "INSERT OR IGNORE INTO stocks (ticker, borrow_status, lender_api_id, min_borrow_rate, last_updated) \
                     VALUES (?1, 'EASY', 'seclend-1', ?2, '2026-01-01T00:00:00Z')",
                    rusqlite::params![ticker, min_rate],
                )
                .unwrap();
                conn.execute(
                    "INSERT OR IGNORE INTO brokers (client_id, markup_percentage, transaction_fee_type, transaction_amount, active) \
                     VALUES (?1, ?2, ?3, ?4, 1)",
                    rusqlite::params![client_id, markup, fee_type, amount],
                )
                .unwrap();
            }
        })
        .await
        .unwrap();
    }

    let raw_api_key = generate_key();
    let key_hash = hash_key(&raw_api_key);
    let client_id = seeds.first().map(|s| s.client_id.to_string()).unwrap_or_else(|| "xyz123".into());
    let rate_limit = seeds.first().map(|s| s.rate_limit).unwrap_or(60);
    {
        let path = db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute(
                "INSERT OR IGNORE INTO api_keys (key_hash, client_id, rate_limit, expires_at) VALUES (?1, ?2, ?3, NULL)",
                rusqlite::params![key_hash, client_id, rate_limit],
            )
            .unwrap();
        })
        .await
        .unwrap();
    }

    let seclend_url = spawn_fake_upstream(seclend).await;
    let volatility_url = spawn_fake_upstream(volatility).await;
    let events_url = spawn_fake_upstream(events).await;

    let config = Arc::new(test_config(seclend_url, volatility_url, events_url, db_path.to_string_lossy().into_owned()));

    let clock = Arc::new(SystemClock);
    let rng = Arc::new(SystemRng);
    let http = reqwest::Client::new();

    let seclend_client = SecLendClient::new(
        http.clone(),
        config.seclend_base_url.clone(),
        config.seclend_api_key.clone(),
        config.seclend,
        clock.clone(),
        rng.clone(),
    );
    let volatility_client = VolatilityClient::new(
        http.clone(),
        config.volatility_base_url.clone(),
        config.volatility_bearer_token.clone(),
        config.volatility,
        clock.clone(),
        rng.clone(),
    );
    let events_client = EventsClient::new(
        http.clone(),
        config.events_base_url.clone(),
        config.events_api_key.clone(),
        config.events,
        clock.clone(),
        rng.clone(),
    );

    let repo = Arc::new(SqliteRepository::open(&config.db_path, config.db_pool_size).await.unwrap());
    let l2: Arc<dyn locate_pricing_engine::cache::l2::L2Store> = InMemoryL2::new();
    let cache = Arc::new(CacheStore::new(l2.clone(), clock.clone()));
    let rate_engine = Arc::new(RateEngine::new(
        repo.clone(),
        cache.clone(),
        config.clone(),
        seclend_client,
        volatility_client,
        events_client,
    ));
    let rate_limiter = Arc::new(RateLimiter::new(l2));
    let audit_handle = audit::spawn(
        repo.clone(),
        config.audit_worker_count,
        config.audit_queue_capacity,
        config.audit_enqueue_timeout,
        spill_path,
    );

    let state = Arc::new(AppState {
        config,
        repo,
        cache,
        rate_engine,
        rate_limiter,
        audit: audit_handle,
        clock,
        rng,
    });

    TestApp { router: api::router(state), db_path, raw_api_key }
}

async fn post_json(router: Router, path: &str, api_key: Option<&str>, idem_key: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut builder = Request::post(path).header("content-type", "application/json");
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }
    if let Some(idem) = idem_key {
        builder = builder.header("Idempotency-Key", idem);
    }
    let request = builder.body(Body::from(serde_json::to_vec(&body).unwrap())).unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn get_req(router: Router, path: &str, api_key: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::get(path);
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }
    let request = builder.body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// S1 (§8): normal path, all three upstreams healthy. Asserts the full
/// breakdown matches the fee engine run directly against the same inputs,
/// rather than hardcoding figures that would drift if the formula changes.
#[tokio::test]
async fn s1_normal_path_returns_full_breakdown() {
    let app = build_app(
        &[Seed {
            ticker: "AAPL",
            min_borrow_rate: "0.0025",
            client_id: "xyz123",
            markup_percentage: "5",
            fee_type: "FLAT",
            transaction_amount: "25",
            rate_limit: 60,
        }],
        seclend_app("0.05", "EASY"),
        volatility_app("18.5"),
        events_app(2, 5),
    )
    .await;

    let (status, body) = post_json(
        app.router,
        "/api/v1/calculate-locate",
        Some(&app.raw_api_key),
        None,
        json!({ "ticker": "AAPL", "position_value": "100000", "loan_days": 30, "client_id": "xyz123" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let borrow_rate_used: Decimal = body["borrow_rate_used"].as_str().unwrap().parse().unwrap();
    assert_eq!(borrow_rate_used, dec!(0.0598));

    let broker = Broker {
        client_id: "xyz123".into(),
        markup_percentage: dec!(5),
        transaction_fee_type: TransactionFeeType::Flat,
        transaction_amount: dec!(25),
        active: true,
    };
    let expected = calculate_fee(dec!(100000), 30, borrow_rate_used, &broker).unwrap();

    let total_fee: Decimal = body["total_fee"].as_str().unwrap().parse().unwrap();
    assert_eq!(total_fee, expected.total_fee);

    let borrow_cost: Decimal = body["breakdown"]["borrow_cost"].as_str().unwrap().parse().unwrap();
    assert_eq!(borrow_cost, expected.borrow_cost);
}

/// S6 (§8): PERCENTAGE transaction fee, larger position and loan window.
#[tokio::test]
async fn s6_percentage_fee_path_matches_spec_scenario() {
    let app = build_app(
        &[Seed {
            ticker: "TSLA",
            min_borrow_rate: "0.01",
            client_id: "big_fund_007",
            markup_percentage: "2",
            fee_type: "PERCENTAGE",
            transaction_amount: "0.0818",
            rate_limit: 60,
        }],
        seclend_app("0.19", "EASY"),
        volatility_app("0"),
        events_app_empty(),
    )
    .await;

    let (status, body) = post_json(
        app.router,
        "/api/v1/calculate-locate",
        Some(&app.raw_api_key),
        None,
        json!({ "ticker": "TSLA", "position_value": "50000", "loan_days": 60, "client_id": "big_fund_007" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let total_fee: Decimal = body["total_fee"].as_str().unwrap().parse().unwrap();
    assert_eq!(total_fee, dec!(1633.7767));
}

/// S2 (§8): SecLend unreachable and nothing cached yet, so the engine falls
/// back to the stock's stored minimum rate rather than failing the request.
#[tokio::test]
async fn seclend_down_falls_back_to_stored_minimum() {
    let app = build_app(
        &[Seed {
            ticker: "GME",
            min_borrow_rate: "0.15",
            client_id: "xyz123",
            markup_percentage: "5",
            fee_type: "FLAT",
            transaction_amount: "25",
            rate_limit: 60,
        }],
        seclend_app_down(),
        volatility_app("18.5"),
        events_app_empty(),
    )
    .await;

    let (status, body) = post_json(
        app.router,
        "/api/v1/calculate-locate",
        Some(&app.raw_api_key),
        None,
        json!({ "ticker": "GME", "position_value": "10000", "loan_days": 10, "client_id": "xyz123" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let borrow_rate_used: Decimal = body["borrow_rate_used"].as_str().unwrap().parse().unwrap();
    assert_eq!(borrow_rate_used, dec!(0.15));
}

/// S4 (§8): validation failure (loan_days must be >= 1) never reaches the
/// rate engine.
#[tokio::test]
async fn invalid_loan_days_yields_400_with_field_detail() {
    let app = build_app(
        &[Seed {
            ticker: "AAPL",
            min_borrow_rate: "0.0025",
            client_id: "xyz123",
            markup_percentage: "5",
            fee_type: "FLAT",
            transaction_amount: "25",
            rate_limit: 60,
        }],
        seclend_app("0.05", "EASY"),
        volatility_app("18.5"),
        events_app_empty(),
    )
    .await;

    let (status, body) = post_json(
        app.router,
        "/api/v1/calculate-locate",
        Some(&app.raw_api_key),
        None,
        json!({ "ticker": "AAPL", "position_value": "100000", "loan_days": 0, "client_id": "xyz123" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_PARAMETER");
    assert_eq!(body["details"]["field"], "loan_days");
}

/// S5 (§8): unknown ticker yields 404 before any upstream client is touched.
#[tokio::test]
async fn unknown_ticker_yields_404() {
    let app = build_app(
        &[Seed {
            ticker: "AAPL",
            min_borrow_rate: "0.0025",
            client_id: "xyz123",
            markup_percentage: "5",
            fee_type: "FLAT",
            transaction_amount: "25",
            rate_limit: 60,
        }],
        seclend_app("0.05", "EASY"),
        volatility_app("18.5"),
        events_app_empty(),
    )
    .await;

    let (status, body) = post_json(
        app.router,
        "/api/v1/calculate-locate",
        Some(&app.raw_api_key),
        None,
        json!({ "ticker": "ZZZZ", "position_value": "1000", "loan_days": 5, "client_id": "xyz123" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "TICKER_NOT_FOUND");
}

/// An authenticated client whose broker row is missing gets CLIENT_NOT_FOUND,
/// not a 500 -- the repository error maps to a stable client-facing code.
#[tokio::test]
async fn missing_broker_row_yields_client_not_found() {
    let tmp_dir = std::env::temp_dir().join(format!("locate-pricing-test-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&tmp_dir).await.unwrap();
    let db_path = tmp_dir.join("locate.db");

    {
        let path = db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch(SCHEMA_SQL).unwrap();
            conn.execute(
                "INSERT INTO stocks (ticker, borrow_status, lender_api_id, min_borrow_rate, last_updated) \
                 VALUES ('AAPL', 'EASY', 'seclend-1', '0.0025', '2026-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        })
        .await
        .unwrap();
    }

    let raw_api_key = generate_key();
    let key_hash = hash_key(&raw_api_key);
    {
        let path = db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute(
                "INSERT INTO api_keys (key_hash, client_id, rate_limit, expires_at) VALUES (?1, 'no_broker_client', 60, NULL)",
                rusqlite::params![key_hash],
            )
            .unwrap();
        })
        .await
        .unwrap();
    }

    let seclend_url = spawn_fake_upstream(seclend_app("0.05", "EASY")).await;
    let volatility_url = spawn_fake_upstream(volatility_app("18.5")).await;
    let events_url = spawn_fake_upstream(events_app_empty()).await;
    let config = Arc::new(test_config(seclend_url, volatility_url, events_url, db_path.to_string_lossy().into_owned()));

    let clock = Arc::new(SystemClock);
    let rng = Arc::new(SystemRng);
    let http = reqwest::Client::new();
    let seclend_client = SecLendClient::new(http.clone(), config.seclend_base_url.clone(), config.seclend_api_key.clone(), config.seclend, clock.clone(), rng.clone());
    let volatility_client = VolatilityClient::new(http.clone(), config.volatility_base_url.clone(), config.volatility_bearer_token.clone(), config.volatility, clock.clone(), rng.clone());
    let events_client = EventsClient::new(http.clone(), config.events_base_url.clone(), config.events_api_key.clone(), config.events, clock.clone(), rng.clone());

    let repo = Arc::new(SqliteRepository::open(&config.db_path, config.db_pool_size).await.unwrap());
    let l2: Arc<dyn locate_pricing_engine::cache::l2::L2Store> = InMemoryL2::new();
    let cache = Arc::new(CacheStore::new(l2.clone(), clock.clone()));
    let rate_engine = Arc::new(RateEngine::new(repo.clone(), cache.clone(), config.clone(), seclend_client, volatility_client, events_client));
    let rate_limiter = Arc::new(RateLimiter::new(l2));
    let audit_handle = audit::spawn(repo.clone(), 1, 16, Duration::from_millis(200), tmp_dir.join("audit-spill.jsonl"));

    let state = Arc::new(AppState { config, repo, cache, rate_engine, rate_limiter, audit: audit_handle, clock, rng });
    let router = api::router(state);

    let (status, body) = post_json(
        router,
        "/api/v1/calculate-locate",
        Some(&raw_api_key),
        None,
        json!({ "ticker": "AAPL", "position_value": "1000", "loan_days": 5, "client_id": "no_broker_client" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "CLIENT_NOT_FOUND");
}

/// Missing X-API-Key header is rejected before the handler runs.
#[tokio::test]
async fn missing_api_key_yields_401() {
    let app = build_app(
        &[Seed {
            ticker: "AAPL",
            min_borrow_rate: "0.0025",
            client_id: "xyz123",
            markup_percentage: "5",
            fee_type: "FLAT",
            transaction_amount: "25",
            rate_limit: 60,
        }],
        seclend_app("0.05", "EASY"),
        volatility_app("18.5"),
        events_app_empty(),
    )
    .await;

    let (status, body) = post_json(
        app.router,
        "/api/v1/calculate-locate",
        None,
        None,
        json!({ "ticker": "AAPL", "position_value": "1000", "loan_days": 5, "client_id": "xyz123" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "UNAUTHORIZED");
}

/// S3 (§8): a client whose rate limit is 1 per minute gets the first request
/// through and the second throttled, matching the token-bucket contract.
#[tokio::test]
async fn second_request_within_the_same_instant_is_rate_limited() {
    let app = build_app(
        &[Seed {
            ticker: "AAPL",
            min_borrow_rate: "0.0025",
            client_id: "throttled_client",
            markup_percentage: "5",
            fee_type: "FLAT",
            transaction_amount: "25",
            rate_limit: 1,
        }],
        seclend_app("0.05", "EASY"),
        volatility_app("18.5"),
        events_app_empty(),
    )
    .await;

    let request_body = json!({ "ticker": "AAPL", "position_value": "1000", "loan_days": 5, "client_id": "throttled_client" });

    let (first_status, _) = post_json(
        app.router.clone(),
        "/api/v1/calculate-locate",
        Some(&app.raw_api_key),
        None,
        request_body.clone(),
    )
    .await;
    assert_eq!(first_status, StatusCode::OK);

    let (second_status, second_body) = post_json(
        app.router,
        "/api/v1/calculate-locate",
        Some(&app.raw_api_key),
        None,
        request_body,
    )
    .await;
    assert_eq!(second_status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second_body["error_code"], "RATE_LIMIT_EXCEEDED");
}

/// An Idempotency-Key on a retried POST replays the cached response and
/// never enqueues a second audit record for the same key.
#[tokio::test]
async fn idempotency_key_replay_produces_single_audit_record() {
    let app = build_app(
        &[Seed {
            ticker: "AAPL",
            min_borrow_rate: "0.0025",
            client_id: "xyz123",
            markup_percentage: "5",
            fee_type: "FLAT",
            transaction_amount: "25",
            rate_limit: 60,
        }],
        seclend_app("0.05", "EASY"),
        volatility_app("18.5"),
        events_app(2, 5),
    )
    .await;

    let request_body = json!({ "ticker": "AAPL", "position_value": "100000", "loan_days": 30, "client_id": "xyz123" });

    let (first_status, first_body) = post_json(
        app.router.clone(),
        "/api/v1/calculate-locate",
        Some(&app.raw_api_key),
        Some("replay-key-1"),
        request_body.clone(),
    )
    .await;
    assert_eq!(first_status, StatusCode::OK);

    let (second_status, second_body) = post_json(
        app.router,
        "/api/v1/calculate-locate",
        Some(&app.raw_api_key),
        Some("replay-key-1"),
        request_body,
    )
    .await;
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first_body, second_body);

    tokio::time::sleep(Duration::from_millis(150)).await;

    let db_path = app.db_path;
    let count: i64 = tokio::task::spawn_blocking(move || {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.query_row("SELECT COUNT(*) FROM audit_records WHERE client_id = 'xyz123'", [], |row| row.get(0))
            .unwrap()
    })
    .await
    .unwrap();
    assert_eq!(count, 1);
}

/// `/api/v1/health` needs no auth and reports ok when every dependency is
/// reachable.
#[tokio::test]
async fn health_endpoint_reports_ok_when_dependencies_are_up() {
    let app = build_app(
        &[Seed {
            ticker: "AAPL",
            min_borrow_rate: "0.0025",
            client_id: "xyz123",
            markup_percentage: "5",
            fee_type: "FLAT",
            transaction_amount: "25",
            rate_limit: 60,
        }],
        seclend_app("0.05", "EASY"),
        volatility_app("18.5"),
        events_app_empty(),
    )
    .await;

    let (status, body) = get_req(app.router, "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

/// `GET /rates/{ticker}` (§6.1): reports the same adjusted rate the fee
/// engine would use within the same cache TTL window (§8's idempotence law
/// for rate lookups), plus the borrow status and component inputs.
#[tokio::test]
async fn rates_endpoint_reports_the_adjusted_rate_and_inputs() {
    let app = build_app(
        &[Seed {
            ticker: "AAPL",
            min_borrow_rate: "0.0025",
            client_id: "xyz123",
            markup_percentage: "5",
            fee_type: "FLAT",
            transaction_amount: "25",
            rate_limit: 60,
        }],
        seclend_app("0.05", "EASY"),
        volatility_app("18.5"),
        events_app(2, 5),
    )
    .await;

    let (status, body) = get_req(app.router, "/api/v1/rates/AAPL", Some(&app.raw_api_key)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ticker"], "AAPL");
    assert_eq!(body["borrow_status"], "EASY");
    let current_rate: Decimal = body["current_rate"].as_str().unwrap().parse().unwrap();
    assert_eq!(current_rate, dec!(0.0598));
    let vol_index: Decimal = body["volatility_index"].as_str().unwrap().parse().unwrap();
    assert_eq!(vol_index, dec!(18.5));
    assert_eq!(body["event_risk_factor"], 2);
}

/// `GET /rates/{ticker}` for an unknown ticker returns `TICKER_NOT_FOUND`,
/// matching the same error taxonomy `/calculate-locate` uses (§7).
#[tokio::test]
async fn rates_endpoint_unknown_ticker_yields_404() {
    let app = build_app(
        &[Seed {
            ticker: "AAPL",
            min_borrow_rate: "0.0025",
            client_id: "xyz123",
            markup_percentage: "5",
            fee_type: "FLAT",
            transaction_amount: "25",
            rate_limit: 60,
        }],
        seclend_app("0.05", "EASY"),
        volatility_app("18.5"),
        events_app_empty(),
    )
    .await;

    let (status, body) = get_req(app.router, "/api/v1/rates/ZZZZ", Some(&app.raw_api_key)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "TICKER_NOT_FOUND");
}
