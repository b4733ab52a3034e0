//! Lookup cache with per-key request coalescing.
//!
//! [`Cache`] is a thin discipline layer over a [`CacheStore`]: it owns entry
//! expiry and guarantees at most one in-flight fetch per key. A store failure
//! or a store call exceeding its timeout never fails a scan; the caller falls
//! through to a direct lookup.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::settings::MAX_CACHE_TTL;
use crate::config::CacheSettings;
use crate::models::product::LookupResult;

const REDIS_KEY_PREFIX: &str = "barcode_intake:lookup:";

/// Cached outcome of a provider lookup for one normalized barcode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CachedLookup {
    Found {
        results: Vec<LookupResult>,
        merged: LookupResult,
    },
    /// Every provider answered "not found".
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: CachedLookup,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of the fetch closure passed to [`Cache::get_or_fetch`].
#[derive(Debug, Clone)]
pub struct Fetched {
    pub payload: CachedLookup,
    /// False when the payload reflects a transient failure and must not be stored.
    pub cacheable: bool,
}

/// What [`Cache::get_or_fetch`] handed back and where it came from.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub payload: CachedLookup,
    pub from_cache: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Cache store timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache TTL must be positive")]
    InvalidTtl,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Backing key/value store. Expiry is enforced by [`Cache`]; a store may also
/// evict on its own using the TTL hint.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
    async fn set(&self, entry: &CacheEntry, ttl: Duration) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}

type SharedFetch = Shared<BoxFuture<'static, CacheLookup>>;

/// Upper bound on a single store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    next_id: Arc<AtomicU64>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.store_timeout, op)
            .await
            .map_err(|_| CacheError::Timeout(self.store_timeout))?
    }

    /// Stored value for `key`, treating expired entries as absent.
    pub async fn get(&self, key: &str) -> Result<Option<CachedLookup>, CacheError> {
        let Some(entry) = self.bounded(self.store.get(key)).await? else {
            return Ok(None);
        };
        if entry.expires_at <= self.clock.now() {
            debug!(key = %key, expired_at = %entry.expires_at, "Cache entry expired");
            if let Err(e) = self.bounded(self.store.remove(key)).await {
                debug!(key = %key, error = %e, "Failed to evict expired entry");
            }
            return Ok(None);
        }
        Ok(Some(entry.payload))
    }

    /// Store `payload` for `ttl`, clamped to 30 days.
    pub async fn set(
        &self,
        key: &str,
        payload: CachedLookup,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl);
        }
        let ttl = ttl.min(MAX_CACHE_TTL);
        let created_at = self.clock.now();
        let expires_at =
            created_at + chrono::Duration::from_std(ttl).map_err(|_| CacheError::InvalidTtl)?;

        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            created_at,
            expires_at,
        };
        self.bounded(self.store.set(&entry, ttl)).await
    }

    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.bounded(self.store.remove(key)).await
    }

    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.bounded(self.store.ping()).await
    }

    /// Return the stored value for `key`, or run `fetch` to produce it.
    ///
    /// Concurrent callers for the same key share one store read and at most
    /// one fetch. `skip_cache` ignores the stored value but still joins a
    /// fetch that is in progress. The work runs as a shared future, so it
    /// completes for the remaining waiters even if the caller that started it
    /// goes away.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        settings: &CacheSettings,
        skip_cache: bool,
        fetch: F,
    ) -> CacheLookup
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Fetched> + Send + 'static,
    {
        let (shared, joined) = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            // A finished entry is only waiting on its store write; skip_cache wants a fresh one.
            let joinable = in_flight
                .get(key)
                .filter(|entry| !skip_cache || entry.fetch.peek().is_none())
                .map(|entry| entry.fetch.clone());
            match joinable {
                Some(existing) => (existing, true),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let fetch = self
                        .clone()
                        .resolve(key.to_string(), id, settings.clone(), skip_cache, fetch)
                        .boxed()
                        .shared();
                    in_flight.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            fetch: fetch.clone(),
                        },
                    );
                    (fetch, false)
                }
            }
        };

        if joined {
            if let Some(done) = shared.peek() {
                metrics::counter!("cache_hits_total").increment(1);
                debug!(key = %key, "Served from a lookup awaiting its store write");
                return CacheLookup {
                    payload: done.payload.clone(),
                    from_cache: true,
                };
            }
            metrics::counter!("cache_coalesced_total").increment(1);
            debug!(key = %key, "Joining in-flight lookup");
        }

        shared.await
    }

    async fn resolve<F, Fut>(
        self,
        key: String,
        id: u64,
        settings: CacheSettings,
        skip_cache: bool,
        fetch: F,
    ) -> CacheLookup
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Fetched> + Send + 'static,
    {
        if !skip_cache {
            match self.get(&key).await {
                Ok(Some(payload)) => {
                    metrics::counter!("cache_hits_total").increment(1);
                    debug!(key = %key, "Cache hit");
                    self.release(&key, id);
                    return CacheLookup {
                        payload,
                        from_cache: true,
                    };
                }
                Ok(None) => metrics::counter!("cache_misses_total").increment(1),
                Err(e) => {
                    metrics::counter!("cache_errors_total").increment(1);
                    warn!(key = %key, error = %e, "Cache unavailable, falling back to direct lookup");
                }
            }
        }

        let fetched = fetch().await;

        if fetched.cacheable {
            let ttl = match fetched.payload {
                CachedLookup::Found { .. } => settings.ttl(),
                CachedLookup::NotFound => settings.not_found_ttl(),
            };
            // Waiters get the payload now; the entry stays joinable until the write lands.
            let cache = self.clone();
            let payload = fetched.payload.clone();
            tokio::spawn(async move {
                if let Err(e) = cache.set(&key, payload, ttl).await {
                    metrics::counter!("cache_errors_total").increment(1);
                    warn!(key = %key, error = %e, "Failed to store lookup in cache");
                }
                cache.release(&key, id);
            });
        } else {
            self.release(&key, id);
        }

        CacheLookup {
            payload: fetched.payload,
            from_cache: false,
        }
    }

    fn release(&self, key: &str, id: u64) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(key).is_some_and(|entry| entry.id == id) {
            in_flight.remove(key);
        }
    }
}

/// Process-local store, used when no Redis URL is configured.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, entry: &CacheEntry, _ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Redis-backed store; entries are JSON with a matching `EX` expiry.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    fn redis_key(key: &str) -> String {
        format!("{}{}", REDIS_KEY_PREFIX, key)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(Self::redis_key(key)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, entry: &CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(entry)?;
        conn.set_ex::<_, _, ()>(Self::redis_key(&entry.key), payload, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(Self::redis_key(key)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
