//! Shared L2 cache store, abstracted behind a trait so the same pricing
//! code runs against an in-memory store (tests, single-replica dev) or
//! Redis (production, multiple replicas) without branching.
//!
//! The trait is byte-oriented (not generic-over-`V`) so it stays object
//! safe and callers can hold it as `Arc<dyn L2Store>`; [`CacheStore`]
//! (in `cache::mod`) owns the `serde` (de)serialization on top of it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use super::Namespace;

#[derive(Debug, Error)]
pub enum L2Error {
    #[error("l2 backend error: {0}")]
    Backend(String),
}

pub struct RawEntry {
    pub bytes: Vec<u8>,
    pub age: Duration,
}

/// The L2 contract. `decrement_or_refill` is the rate limiter's atomic
/// bucket operation (§4.8, §5: "A scripted update (CAS loop or
/// server-side script) is required").
#[async_trait]
pub trait L2Store: Send + Sync {
    async fn get_bytes(&self, namespace: Namespace, key: &str) -> Result<Option<RawEntry>, L2Error>;

    async fn put_bytes(
        &self,
        namespace: Namespace,
        key: &str,
        bytes: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), L2Error>;

    async fn invalidate(&self, namespace: Namespace, key: &str) -> Result<(), L2Error>;

    /// Atomically decrements the bucket for `key` by 1 if a token is
    /// available, refilling first based on elapsed time. Returns
    /// `(allowed, remaining, seconds_until_next_token)`.
    async fn decrement_or_refill(
        &self,
        key: &str,
        capacity: u32,
        refill_per_sec: f64,
    ) -> Result<(bool, u32, u64), L2Error>;

    /// Cheap reachability probe for the health endpoint (§6.1).
    async fn ping(&self) -> Result<(), L2Error>;
}

struct Record {
    bytes: Vec<u8>,
    inserted_at: Instant,
    ttl: Duration,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Single-process default: a plain mutex-guarded map, mirroring the
/// reference backend's own `RateLimitLayer` (a `Mutex<HashMap<..>>` guarding
/// per-key windowed counters) generalized to arbitrary typed values.
#[derive(Default)]
pub struct InMemoryL2 {
    store: Mutex<HashMap<(&'static str, String), Record>>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InMemoryL2 {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl L2Store for InMemoryL2 {
    async fn get_bytes(&self, namespace: Namespace, key: &str) -> Result<Option<RawEntry>, L2Error> {
        let store = self.store.lock();
        let Some(record) = store.get(&(namespace.as_str(), key.to_string())) else {
            return Ok(None);
        };
        let age = record.inserted_at.elapsed();
        if age > record.ttl {
            return Ok(None);
        }
        Ok(Some(RawEntry {
            bytes: record.bytes.clone(),
            age,
        }))
    }

    async fn put_bytes(
        &self,
        namespace: Namespace,
        key: &str,
        bytes: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), L2Error> {
        self.store.lock().insert(
            (namespace.as_str(), key.to_string()),
            Record {
                bytes,
                inserted_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, namespace: Namespace, key: &str) -> Result<(), L2Error> {
        self.store.lock().remove(&(namespace.as_str(), key.to_string()));
        Ok(())
    }

    async fn decrement_or_refill(
        &self,
        key: &str,
        capacity: u32,
        refill_per_sec: f64,
    ) -> Result<(bool, u32, u64), L2Error> {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: capacity as f64,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            let remaining = bucket.tokens.floor() as u32;
            Ok((true, remaining, 0))
        } else {
            let deficit = 1.0 - bucket.tokens;
            let secs_until_next = if refill_per_sec > 0.0 {
                (deficit / refill_per_sec).ceil() as u64
            } else {
                60
            };
            Ok((false, 0, secs_until_next.max(1)))
        }
    }

    async fn ping(&self) -> Result<(), L2Error> {
        Ok(())
    }
}

/// Redis-backed L2, used in multi-replica deployments so the rate limiter
/// and cache are consistent across the fleet (§4.8: "local L1 buckets are
/// forbidden"). The bucket operation is a single `EVAL` so the read-refill-
/// decrement sequence is atomic server-side.
pub struct RedisL2 {
    manager: redis::aio::ConnectionManager,
}

impl RedisL2 {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    fn storage_key(namespace: Namespace, key: &str) -> String {
        format!("locate:{}:{}", namespace.as_str(), key)
    }
}

const BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_per_sec = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

local data = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(data[1])
local last_refill = tonumber(data[2])
if tokens == nil then
  tokens = capacity
  last_refill = now
end

local elapsed = now - last_refill
if elapsed < 0 then elapsed = 0 end
tokens = math.min(capacity, tokens + elapsed * refill_per_sec)

local allowed = 0
if tokens >= 1 then
  tokens = tokens - 1
  allowed = 1
end

redis.call('HSET', key, 'tokens', tokens, 'last_refill', now)
redis.call('EXPIRE', key, 3600)

return { allowed, math.floor(tokens), tokens }
"#;

#[async_trait]
impl L2Store for RedisL2 {
    async fn get_bytes(&self, namespace: Namespace, key: &str) -> Result<Option<RawEntry>, L2Error> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let storage_key = Self::storage_key(namespace, key);
        let raw: Option<(Vec<u8>, i64)> = {
            let payload: Option<Vec<u8>> = conn
                .hget(&storage_key, "payload")
                .await
                .map_err(|e| L2Error::Backend(e.to_string()))?;
            match payload {
                Some(p) => {
                    let inserted_at_ms: i64 = conn
                        .hget(&storage_key, "inserted_at_ms")
                        .await
                        .map_err(|e| L2Error::Backend(e.to_string()))?;
                    Some((p, inserted_at_ms))
                }
                None => None,
            }
        };
        let Some((bytes, inserted_at_ms)) = raw else {
            return Ok(None);
        };
        let now_ms = chrono::Utc::now().timestamp_millis();
        let age = Duration::from_millis((now_ms - inserted_at_ms).max(0) as u64);
        Ok(Some(RawEntry { bytes, age }))
    }

    async fn put_bytes(
        &self,
        namespace: Namespace,
        key: &str,
        bytes: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), L2Error> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let storage_key = Self::storage_key(namespace, key);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let _: () = conn
            .hset_multiple(
                &storage_key,
                &[("payload".to_string(), bytes), ("inserted_at_ms".to_string(), now_ms.to_string().into_bytes())],
            )
            .await
            .map_err(|e| L2Error::Backend(e.to_string()))?;
        let _: () = conn
            .expire(&storage_key, ttl.as_secs() as i64)
            .await
            .map_err(|e| L2Error::Backend(e.to_string()))?;
        Ok(())
    }

    async fn invalidate(&self, namespace: Namespace, key: &str) -> Result<(), L2Error> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let storage_key = Self::storage_key(namespace, key);
        let _: () = conn.del(&storage_key).await.map_err(|e| L2Error::Backend(e.to_string()))?;
        Ok(())
    }

    async fn decrement_or_refill(
        &self,
        key: &str,
        capacity: u32,
        refill_per_sec: f64,
    ) -> Result<(bool, u32, u64), L2Error> {
        let mut conn = self.manager.clone();
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let script = redis::Script::new(BUCKET_SCRIPT);
        let bucket_key = format!("locate:ratelimit:{key}");
        let (allowed, remaining, tokens_left): (i64, i64, f64) = script
            .key(&bucket_key)
            .arg(capacity)
            .arg(refill_per_sec)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| L2Error::Backend(e.to_string()))?;

        let secs_until_next = if tokens_left >= 1.0 || refill_per_sec <= 0.0 {
            0
        } else {
            ((1.0 - tokens_left) / refill_per_sec).ceil().max(1.0) as u64
        };
        Ok((allowed == 1, remaining.max(0) as u32, secs_until_next))
    }

    async fn ping(&self) -> Result<(), L2Error> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| L2Error::Backend(e.to_string()))?;
        Ok(())
    }
}
