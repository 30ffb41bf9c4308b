//! Two-layer cache (C3): L1 in-process + L2 shared, typed by namespace so
//! callers can never collide keys across data types (§9 redesign flag:
//! "duck-typed caches become a typed interface with per-namespace codecs").

pub mod key;
pub mod l1;
pub mod l2;
pub mod single_flight;

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use l1::L1Cache;
use l2::L2Store;
use single_flight::SingleFlight;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    BorrowRate,
    Volatility,
    EventRisk,
    BrokerConfig,
    MinRate,
    LocateFee,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BorrowRate => "borrow_rate",
            Self::Volatility => "volatility",
            Self::EventRisk => "event_risk",
            Self::BrokerConfig => "broker_config",
            Self::MinRate => "min_rate",
            Self::LocateFee => "locate_fee",
        }
    }
}

/// A value read back from the cache, tagged with whether it came from L1 or
/// L2, and how old it is (used by the rate engine's "cached within 2xTTL"
/// fallback rule).
#[derive(Debug, Clone)]
pub struct CachedValue<V> {
    pub value: V,
    pub age: Duration,
    pub from_l1: bool,
}

pub struct CacheStore {
    l1: L1Cache,
    l2: Arc<dyn L2Store>,
    single_flight: SingleFlight,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(l2: Arc<dyn L2Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            l1: L1Cache::new(),
            l2,
            single_flight: SingleFlight::new(),
            clock,
        }
    }

    /// Read-only lookup that never triggers a `loader`; used by the rate
    /// engine's stale-cache fallback path (§4.5 step 3).
    pub async fn peek<V>(&self, namespace: Namespace, key: &str) -> Option<CachedValue<V>>
    where
        V: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
    {
        let norm_key = key::normalize(namespace, key);
        if let Some(entry) = self.l1.get::<V>(namespace, &norm_key, self.clock.instant()) {
            return Some(CachedValue {
                value: entry.value,
                age: entry.age,
                from_l1: true,
            });
        }
        match self.l2.get_bytes(namespace, &norm_key).await {
            Ok(Some(raw)) => match serde_json::from_slice::<V>(&raw.bytes) {
                Ok(value) => Some(CachedValue {
                    value,
                    age: raw.age,
                    from_l1: false,
                }),
                Err(e) => {
                    warn!(error = %e, namespace = namespace.as_str(), "L2 payload decode failed, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, namespace = namespace.as_str(), "L2 cache read failed, treating as miss");
                None
            }
        }
    }

    /// `get_or_load` contract from §4.3: L1 hit returns immediately; L1 miss
    /// checks L2 and refreshes L1 on hit; full miss runs `loader` at most
    /// once per process per in-flight miss and writes L2 then L1. Cache
    /// writes are best-effort and never fail the caller.
    pub async fn get_or_load<V, F, Fut, E>(
        &self,
        namespace: Namespace,
        key: &str,
        l1_ttl: Duration,
        l2_ttl: Duration,
        loader: F,
    ) -> Result<V, E>
    where
        V: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<V, E>> + Send,
        E: Send + 'static,
    {
        let norm_key = key::normalize(namespace, key);

        if let Some(entry) = self.l1.get::<V>(namespace, &norm_key, self.clock.instant()) {
            debug!(namespace = namespace.as_str(), key = %norm_key, "L1 hit");
            return Ok(entry.value);
        }

        match self.l2.get_bytes(namespace, &norm_key).await {
            Ok(Some(raw)) => match serde_json::from_slice::<V>(&raw.bytes) {
                Ok(value) => {
                    debug!(namespace = namespace.as_str(), key = %norm_key, "L2 hit, refreshing L1");
                    self.l1.put(namespace, &norm_key, value.clone(), l1_ttl, self.clock.instant());
                    return Ok(value);
                }
                Err(e) => {
                    warn!(error = %e, namespace = namespace.as_str(), "L2 payload decode failed, bypassing to loader");
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, namespace = namespace.as_str(), "L2 cache read failed, bypassing to loader");
            }
        }

        let namespace_key = (namespace, norm_key.clone());
        let value = self
            .single_flight
            .run(namespace_key, || async {
                // Re-check now that we hold the per-key lock: a sibling
                // request may have just populated the cache while we were
                // waiting, in which case we skip the loader entirely.
                if let Some(entry) = self.l1.get::<V>(namespace, &norm_key, self.clock.instant()) {
                    return Ok(entry.value);
                }
                if let Ok(Some(raw)) = self.l2.get_bytes(namespace, &norm_key).await {
                    if let Ok(value) = serde_json::from_slice::<V>(&raw.bytes) {
                        return Ok(value);
                    }
                }
                loader().await
            })
            .await?;

        if let Ok(bytes) = serde_json::to_vec(&value) {
            if let Err(e) = self.l2.put_bytes(namespace, &norm_key, bytes, l2_ttl).await {
                warn!(error = %e, namespace = namespace.as_str(), "L2 cache write failed, proceeding");
            }
        }
        self.l1.put(namespace, &norm_key, value.clone(), l1_ttl, self.clock.instant());

        Ok(value)
    }

    /// Best-effort write used after the rate engine computes a fresh value
    /// outside the `get_or_load` path (§4.5 step 8: "Cache `final`").
    pub async fn put<V>(&self, namespace: Namespace, key: &str, value: V, l1_ttl: Duration, l2_ttl: Duration)
    where
        V: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
    {
        let norm_key = key::normalize(namespace, key);
        if let Ok(bytes) = serde_json::to_vec(&value) {
            if let Err(e) = self.l2.put_bytes(namespace, &norm_key, bytes, l2_ttl).await {
                warn!(error = %e, namespace = namespace.as_str(), "L2 cache write failed, proceeding");
            }
        }
        self.l1.put(namespace, &norm_key, value, l1_ttl, self.clock.instant());
    }

    pub async fn invalidate(&self, namespace: Namespace, key: &str) {
        let norm_key = key::normalize(namespace, key);
        self.l1.invalidate(namespace, &norm_key);
        if let Err(e) = self.l2.invalidate(namespace, &norm_key).await {
            warn!(error = %e, namespace = namespace.as_str(), "L2 invalidate failed");
        }
    }

    pub fn l2_store(&self) -> Arc<dyn L2Store> {
        self.l2.clone()
    }

    pub async fn l2_reachable(&self) -> bool {
        self.l2.ping().await.is_ok()
    }
}
