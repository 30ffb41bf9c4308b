//! Frozen application configuration resolved once at startup.
//!
//! Every tunable named in the external interface table is read here via
//! `std::env`, never re-read after boot: handlers and engines receive an
//! `Arc<Config>` instead of calling `env::var` themselves.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    std::env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str_exact(&v).ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Per-endpoint circuit breaker thresholds (§4.2).
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub open_timeout: Duration,
    pub success_threshold: u32,
}

/// Per-endpoint timeout/retry envelope (§4.2, §6.2).
#[derive(Debug, Clone, Copy)]
pub struct UpstreamEndpointConfig {
    pub timeout: Duration,
    pub breaker: BreakerConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub borrow_rate_l2: Duration,
    pub borrow_rate_l1: Duration,
    pub volatility_l2: Duration,
    pub volatility_l1: Duration,
    pub event_risk_l2: Duration,
    pub event_risk_l1: Duration,
    pub broker_config_l2: Duration,
    pub broker_config_l1: Duration,
    pub min_rate_l2: Duration,
    pub locate_fee_l2: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub min_borrow_rate: Decimal,
    pub default_volatility_index: Decimal,
    pub default_event_risk_factor: Decimal,
    pub volatility_factor: Decimal,
    pub event_risk_factor_mult: Decimal,
    pub days_in_year: Decimal,
    pub rate_limit_default: u32,
    pub request_deadline: Duration,
    pub cache_ttls: CacheTtls,
    pub seclend: UpstreamEndpointConfig,
    pub volatility: UpstreamEndpointConfig,
    pub events: UpstreamEndpointConfig,
    pub fallback_cache_age_multiplier: u32,
    pub db_path: String,
    pub data_dir: String,
    pub redis_url: Option<String>,
    pub audit_worker_count: usize,
    pub audit_queue_capacity: usize,
    pub audit_enqueue_timeout: Duration,
    pub bind_addr: String,
    pub seclend_base_url: String,
    pub volatility_base_url: String,
    pub events_base_url: String,
    pub seclend_api_key: String,
    pub volatility_bearer_token: String,
    pub events_api_key: String,
    pub db_pool_size: usize,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let cache_ttls = CacheTtls {
            borrow_rate_l2: Duration::from_secs(env_parse("CACHE_TTL_BORROW_RATE_L2", 300)),
            borrow_rate_l1: Duration::from_secs(env_parse("CACHE_TTL_BORROW_RATE_L1", 60)),
            volatility_l2: Duration::from_secs(env_parse("CACHE_TTL_VOLATILITY_L2", 900)),
            volatility_l1: Duration::from_secs(env_parse("CACHE_TTL_VOLATILITY_L1", 60)),
            event_risk_l2: Duration::from_secs(env_parse("CACHE_TTL_EVENT_RISK_L2", 3600)),
            event_risk_l1: Duration::from_secs(env_parse("CACHE_TTL_EVENT_RISK_L1", 60)),
            broker_config_l2: Duration::from_secs(env_parse("CACHE_TTL_BROKER_CONFIG_L2", 1800)),
            broker_config_l1: Duration::from_secs(env_parse("CACHE_TTL_BROKER_CONFIG_L1", 60)),
            min_rate_l2: Duration::from_secs(env_parse("CACHE_TTL_MIN_RATE_L2", 86_400)),
            locate_fee_l2: Duration::from_secs(env_parse("CACHE_TTL_LOCATE_FEE_L2", 60)),
        };

        let seclend = UpstreamEndpointConfig {
            timeout: Duration::from_millis(env_parse("SECLEND_TIMEOUT_MS", 500)),
            breaker: BreakerConfig {
                failure_threshold: env_parse("CB_SECLEND_FAILURE_THRESHOLD", 5),
                failure_window: Duration::from_secs(env_parse("CB_SECLEND_WINDOW_SECS", 30)),
                open_timeout: Duration::from_secs(env_parse("CB_SECLEND_OPEN_TIMEOUT_SECS", 60)),
                success_threshold: env_parse("CB_SECLEND_SUCCESS_THRESHOLD", 3),
            },
        };
        let volatility = UpstreamEndpointConfig {
            timeout: Duration::from_millis(env_parse("VOLATILITY_TIMEOUT_MS", 300)),
            breaker: BreakerConfig {
                failure_threshold: env_parse("CB_VOLATILITY_FAILURE_THRESHOLD", 3),
                failure_window: Duration::from_secs(env_parse("CB_VOLATILITY_WINDOW_SECS", 30)),
                open_timeout: Duration::from_secs(env_parse("CB_VOLATILITY_OPEN_TIMEOUT_SECS", 30)),
                success_threshold: env_parse("CB_VOLATILITY_SUCCESS_THRESHOLD", 2),
            },
        };
        let events = UpstreamEndpointConfig {
            timeout: Duration::from_millis(env_parse("EVENTS_TIMEOUT_MS", 300)),
            breaker: BreakerConfig {
                failure_threshold: env_parse("CB_EVENTS_FAILURE_THRESHOLD", 5),
                failure_window: Duration::from_secs(env_parse("CB_EVENTS_WINDOW_SECS", 30)),
                open_timeout: Duration::from_secs(env_parse("CB_EVENTS_OPEN_TIMEOUT_SECS", 60)),
                success_threshold: env_parse("CB_EVENTS_SUCCESS_THRESHOLD", 2),
            },
        };

        Self {
            min_borrow_rate: env_decimal("MIN_BORROW_RATE", dec!(0.0025)),
            default_volatility_index: env_decimal("DEFAULT_VOLATILITY_INDEX", dec!(20.0)),
            default_event_risk_factor: env_decimal("DEFAULT_EVENT_RISK_FACTOR", dec!(0)),
            volatility_factor: env_decimal("VOLATILITY_FACTOR", dec!(0.01)),
            event_risk_factor_mult: env_decimal("EVENT_RISK_FACTOR_MULT", dec!(0.05)),
            days_in_year: env_decimal("DAYS_IN_YEAR", dec!(365)),
            rate_limit_default: env_parse("RATE_LIMIT_DEFAULT", 60),
            request_deadline: Duration::from_millis(env_parse("REQUEST_DEADLINE_MS", 250)),
            cache_ttls,
            seclend,
            volatility,
            events,
            fallback_cache_age_multiplier: 2,
            db_path: env_string("DB_PATH", "locate_pricing.db"),
            data_dir: env_string("DATA_DIR", "."),
            redis_url: std::env::var("REDIS_URL").ok(),
            audit_worker_count: env_parse("AUDIT_WORKER_COUNT", 4),
            audit_queue_capacity: env_parse("AUDIT_QUEUE_CAPACITY", 10_000),
            audit_enqueue_timeout: Duration::from_millis(50),
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:3000"),
            seclend_base_url: env_string("SECLEND_BASE_URL", "https://seclend.internal"),
            volatility_base_url: env_string("VOLATILITY_BASE_URL", "https://volatility.internal"),
            events_base_url: env_string("EVENTS_BASE_URL", "https://events.internal"),
            seclend_api_key: env_string("SECLEND_API_KEY", ""),
            volatility_bearer_token: env_string("VOLATILITY_BEARER_TOKEN", ""),
            events_api_key: env_string("EVENTS_API_KEY", ""),
            db_pool_size: env_parse("DB_POOL_SIZE", 16),
        }
    }
}
