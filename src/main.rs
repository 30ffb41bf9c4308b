//! Securities borrow fee pricing engine: binary entrypoint.
//!
//! Resolves configuration once, wires every dependency into a single
//! `AppState`, reconciles any audit records spilled by a previous run, then
//! serves the HTTP API until the process is killed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use locate_pricing_engine::audit;
use locate_pricing_engine::cache::l2::{InMemoryL2, RedisL2};
use locate_pricing_engine::cache::CacheStore;
use locate_pricing_engine::clock::SystemClock;
use locate_pricing_engine::config::Config;
use locate_pricing_engine::engine::rate::RateEngine;
use locate_pricing_engine::ratelimit::RateLimiter;
use locate_pricing_engine::repository::sqlite::SqliteRepository;
use locate_pricing_engine::rng::SystemRng;
use locate_pricing_engine::state::AppState;
use locate_pricing_engine::upstream::events::EventsClient;
use locate_pricing_engine::upstream::seclend::SecLendClient;
use locate_pricing_engine::upstream::volatility::VolatilityClient;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = Arc::new(Config::from_env());
    info!(bind_addr = %config.bind_addr, "starting locate pricing engine");

    let clock = Arc::new(SystemClock);
    let rng = Arc::new(SystemRng);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("failed to build HTTP client")?;

    let seclend = SecLendClient::new(
        http.clone(),
        config.seclend_base_url.clone(),
        config.seclend_api_key.clone(),
        config.seclend,
        clock.clone(),
        rng.clone(),
    );
    let volatility = VolatilityClient::new(
        http.clone(),
        config.volatility_base_url.clone(),
        config.volatility_bearer_token.clone(),
        config.volatility,
        clock.clone(),
        rng.clone(),
    );
    let events = EventsClient::new(
        http,
        config.events_base_url.clone(),
        config.events_api_key.clone(),
        config.events,
        clock.clone(),
        rng.clone(),
    );

    let repo = Arc::new(
        SqliteRepository::open(&config.db_path, config.db_pool_size)
            .await
            .context("failed to open sqlite repository")?,
    );
    info!(db_path = %config.db_path, "repository initialized");

    let l2: Arc<dyn locate_pricing_engine::cache::l2::L2Store> = match &config.redis_url {
        Some(url) => {
            info!("connecting to redis for shared L2 cache");
            Arc::new(RedisL2::connect(url).await.context("failed to connect to redis")?)
        }
        None => {
            info!("no REDIS_URL set, using in-process L2 cache (single replica only)");
            InMemoryL2::new()
        }
    };
    let cache = Arc::new(CacheStore::new(l2.clone(), clock.clone()));

    let rate_engine = Arc::new(RateEngine::new(repo.clone(), cache.clone(), config.clone(), seclend, volatility, events));
    let rate_limiter = Arc::new(RateLimiter::new(l2));

    let spill_path = Path::new(&config.data_dir).join("audit_spill.jsonl");
    let replayed = audit::reconcile_spill(repo.as_ref(), &spill_path)
        .await
        .context("failed to reconcile spilled audit records")?;
    if replayed > 0 {
        info!(replayed, "reconciled spilled audit records from a previous run");
    }
    let audit_handle = audit::spawn(
        repo.clone(),
        config.audit_worker_count,
        config.audit_queue_capacity,
        config.audit_enqueue_timeout,
        spill_path,
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        repo,
        cache,
        rate_engine,
        rate_limiter,
        audit: audit_handle,
        clock,
        rng,
    });

    let app = locate_pricing_engine::api::router(state);

    let listener = TcpListener::bind(&config.bind_addr).await.context("failed to bind listener")?;
    info!(bind_addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "locate_pricing_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
