//! Cached status aggregator
//!
//! Status reads against the three planes go through a TTL cache keyed by
//! `(plane, query key)`. Each key has its own async lock which is held for
//! the duration of a fetch, so concurrent callers for the same key wait for
//! the in-flight fetch and then read its result (single-flight). A failed
//! fetch is never cached and never falls back to an expired value; callers
//! that were waiting on it each try again in turn.

use crate::clients::{ComputeClient, NetworkClient, StorageClient, StorageSummary};
use crate::retry::call_with_timeout;
use cee_common::{Plane, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

const CLUSTER_STATUS: &str = "cluster_status";
const STORAGE_SUMMARY: &str = "storage_summary";
const TOPOLOGY: &str = "topology";

/// Time source for TTL checks
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Tokio's clock; follows paused time in tests
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|p| p.into_inner());
        self.origin + offset
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub fetched_at: Instant,
}

type CacheKey = (Plane, String);
type Slot = Arc<tokio::sync::Mutex<Option<CacheEntry>>>;

pub struct StatusCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of distinct keys ever fetched
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, plane: Plane, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .entry((plane, key.to_string()))
            .or_default()
            .clone()
    }

    /// Cached value for `(plane, key)` using the cache's TTL
    pub async fn get<F, Fut>(&self, plane: Plane, key: &str, fetch: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        self.get_with_ttl(plane, key, self.ttl, fetch).await
    }

    pub async fn get_with_ttl<F, Fut>(
        &self,
        plane: Plane,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let slot = self.slot(plane, key);
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref() {
            let age = self.clock.now().saturating_duration_since(cached.fetched_at);
            if age < ttl {
                debug!(plane = %plane, key = %key, age_ms = age.as_millis() as u64, "Status cache hit");
                return Ok(cached.value.clone());
            }
        }

        debug!(plane = %plane, key = %key, "Status cache miss, fetching");
        let value = fetch().await?;

        *entry = Some(CacheEntry {
            value: value.clone(),
            fetched_at: self.clock.now(),
        });
        Ok(value)
    }
}

/// Typed, cached read path over the three capability clients
pub struct CachedStatusAggregator {
    cache: Arc<StatusCache>,
    compute: Arc<dyn ComputeClient>,
    storage: Arc<dyn StorageClient>,
    network: Arc<dyn NetworkClient>,
    control_timeout: Duration,
    storage_timeout: Duration,
}

impl CachedStatusAggregator {
    pub fn new(
        cache: Arc<StatusCache>,
        compute: Arc<dyn ComputeClient>,
        storage: Arc<dyn StorageClient>,
        network: Arc<dyn NetworkClient>,
    ) -> Self {
        Self {
            cache,
            compute,
            storage,
            network,
            control_timeout: Duration::from_secs(30),
            storage_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeouts(mut self, control: Duration, storage: Duration) -> Self {
        self.control_timeout = control;
        self.storage_timeout = storage;
        self
    }

    pub fn cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    pub async fn cluster_status(&self) -> Result<Value> {
        let compute = self.compute.clone();
        self.cache
            .get(Plane::Compute, CLUSTER_STATUS, || {
                call_with_timeout(self.control_timeout, "get_cluster_status", async move {
                    compute.get_cluster_status().await
                })
            })
            .await
    }

    pub async fn storage_summary_raw(&self) -> Result<Value> {
        let storage = self.storage.clone();
        self.cache
            .get(Plane::Storage, STORAGE_SUMMARY, || {
                call_with_timeout(self.storage_timeout, "get_storage_summary", async move {
                    storage.get_storage_summary().await
                })
            })
            .await
    }

    pub async fn storage_summary(&self) -> Result<StorageSummary> {
        StorageSummary::from_value(&self.storage_summary_raw().await?)
    }

    pub async fn topology(&self) -> Result<Value> {
        let network = self.network.clone();
        self.cache
            .get(Plane::Network, TOPOLOGY, || {
                call_with_timeout(self.control_timeout, "get_topology", async move {
                    network.get_topology().await
                })
            })
            .await
    }

    pub async fn bridge_status(&self, name: &str) -> Result<bool> {
        let network = self.network.clone();
        let bridge = name.to_string();
        let value = self
            .cache
            .get(Plane::Network, &format!("bridge:{}", name), || {
                call_with_timeout(self.control_timeout, "get_bridge_status", async move {
                    network.get_bridge_status(&bridge).await.map(Value::Bool)
                })
            })
            .await?;

        Ok(value.as_bool().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cee_common::Error;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = StatusCache::with_clock(DEFAULT_TTL, clock.clone());
        let calls = AtomicU32::new(0);

        let first = cache
            .get(Plane::Compute, "cluster_status", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(json!({"compute_services": 3}))
            })
            .await
            .unwrap();

        clock.advance(Duration::from_secs(299));

        let second = cache
            .get(Plane::Compute, "cluster_status", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(json!({"compute_services": 4}))
            })
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_by_plane() {
        let cache = StatusCache::new(DEFAULT_TTL);

        cache.get(Plane::Compute, "status", || async { Ok::<_, Error>(json!(1)) }).await.unwrap();
        let storage = cache
            .get(Plane::Storage, "status", || async { Ok::<_, Error>(json!(2)) })
            .await
            .unwrap();

        assert_eq!(storage, json!(2));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_after_expiry_is_not_masked() {
        let clock = Arc::new(ManualClock::new());
        let cache = StatusCache::with_clock(Duration::from_secs(10), clock.clone());

        cache
            .get(Plane::Storage, "summary", || async { Ok::<_, Error>(json!({"healthy": true})) })
            .await
            .unwrap();

        clock.advance(Duration::from_secs(11));

        let result = cache
            .get(Plane::Storage, "summary", || async {
                Err(Error::TransientUnavailable("gateway down".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::TransientUnavailable(_))));
    }
}
