//! In-process L1 cache: a `dashmap` per namespace, sharded by key hash
//! (§5, "L1 cache: per-process map guarded by a fine-grained lock per
//! namespace or sharded by key hash").

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};

use super::Namespace;

struct Slot {
    bytes: Vec<u8>,
    inserted_at: Instant,
    ttl: Duration,
    version: u64,
}

pub struct Entry<V> {
    pub value: V,
    pub age: Duration,
}

pub struct L1Cache {
    borrow_rate: DashMap<String, Slot>,
    volatility: DashMap<String, Slot>,
    event_risk: DashMap<String, Slot>,
    broker_config: DashMap<String, Slot>,
    min_rate: DashMap<String, Slot>,
    locate_fee: DashMap<String, Slot>,
    version_counter: AtomicU64,
}

impl L1Cache {
    pub fn new() -> Self {
        Self {
            borrow_rate: DashMap::new(),
            volatility: DashMap::new(),
            event_risk: DashMap::new(),
            broker_config: DashMap::new(),
            min_rate: DashMap::new(),
            locate_fee: DashMap::new(),
            version_counter: AtomicU64::new(0),
        }
    }

    fn shard(&self, namespace: Namespace) -> &DashMap<String, Slot> {
        match namespace {
            Namespace::BorrowRate => &self.borrow_rate,
            Namespace::Volatility => &self.volatility,
            Namespace::EventRisk => &self.event_risk,
            Namespace::BrokerConfig => &self.broker_config,
            Namespace::MinRate => &self.min_rate,
            Namespace::LocateFee => &self.locate_fee,
        }
    }

    pub fn get<V: DeserializeOwned>(&self, namespace: Namespace, key: &str, now: Instant) -> Option<Entry<V>> {
        let shard = self.shard(namespace);
        let slot = shard.get(key)?;
        let age = now.saturating_duration_since(slot.inserted_at);
        if age > slot.ttl {
            drop(slot);
            shard.remove(key);
            return None;
        }
        let value = serde_json::from_slice(&slot.bytes).ok()?;
        Some(Entry { value, age })
    }

    pub fn put<V: Serialize>(&self, namespace: Namespace, key: &str, value: V, ttl: Duration, now: Instant) {
        let Ok(bytes) = serde_json::to_vec(&value) else {
            return;
        };
        let version = self.version_counter.fetch_add(1, Ordering::SeqCst);
        let shard = self.shard(namespace);
        // Monotonic version tag: don't let a stale concurrent write clobber
        // a newer one (§5, cache invalidation ordering guarantee).
        let should_write = match shard.get(key) {
            Some(existing) if existing.version > version => false,
            _ => true,
        };
        if should_write {
            shard.insert(
                key.to_string(),
                Slot {
                    bytes,
                    inserted_at: now,
                    ttl,
                    version,
                },
            );
        }
    }

    pub fn invalidate(&self, namespace: Namespace, key: &str) {
        self.shard(namespace).remove(key);
    }
}
