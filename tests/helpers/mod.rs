//! Fakes for the pipeline's external collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use barcode_intake::config::{
    CacheSettings, JobSettings, LookupSettings, LookupStrategy, ProviderSettings, Settings,
    SettingsHandle,
};
use barcode_intake::models::barcode::Barcode;
use barcode_intake::models::product::ProductDraft;
use barcode_intake::services::cache::{Cache, CacheEntry, CacheError, CacheStore, Clock};
use barcode_intake::services::inventory::{InventoryClient, InventoryError};
use barcode_intake::services::lookup::LookupManager;
use barcode_intake::services::optimizer::{LanguageModel, OptimizeError, Optimizer};
use barcode_intake::services::providers::{
    ProductProvider, ProviderError, ProviderHit, ProviderKind,
};
use barcode_intake::services::scan::ScanService;

// ── Providers ────────────────────────────────────────────────────────

/// Provider with a fixed outcome, an optional delay and a call counter.
pub struct FakeProvider {
    kind: ProviderKind,
    outcome: Result<ProviderHit, ProviderError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeProvider {
    pub fn found(kind: ProviderKind, hit: ProviderHit) -> Self {
        Self {
            kind,
            outcome: Ok(hit),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(kind: ProviderKind, error: ProviderError) -> Self {
        Self {
            kind,
            outcome: Err(error),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProductProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn fetch(
        &self,
        _barcode: &Barcode,
        _settings: &ProviderSettings,
    ) -> Result<ProviderHit, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone()
    }
}

/// Lookup settings enabling `order` (highest priority first).
pub fn lookup_settings(strategy: LookupStrategy, order: &[ProviderKind]) -> LookupSettings {
    LookupSettings {
        strategy,
        providers: order
            .iter()
            .map(|&kind| ProviderSettings {
                timeout_ms: 1_000,
                ..ProviderSettings::new(kind)
            })
            .collect(),
        parallel_deadline_ms: 500,
    }
}

pub fn cache_settings() -> CacheSettings {
    CacheSettings {
        ttl_secs: 60,
        not_found_ttl_secs: 10,
        skip_cache: false,
    }
}

/// Settings handle with fast retries for queue tests.
pub fn settings_handle(max_attempts: u32) -> SettingsHandle {
    let settings = Settings {
        jobs: JobSettings {
            max_attempts,
            base_delay_ms: 10,
            max_delay_ms: 40,
            retention_secs: 3600,
        },
        ..Settings::default()
    };
    SettingsHandle::new(settings).unwrap()
}

// ── Clock ────────────────────────────────────────────────────────────

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ── Language model ───────────────────────────────────────────────────

pub struct FakeLlm {
    reply: Result<String, String>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeLlm {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn erroring(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, OptimizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone().map_err(OptimizeError::Malformed)
    }
}

// ── Inventory ────────────────────────────────────────────────────────

/// Inventory system recording calls; fails the first `transient_failures`
/// attempts of each idempotency key.
#[derive(Default)]
pub struct FakeInventory {
    transient_failures: u32,
    reject: bool,
    delays: HashMap<String, Duration>,
    attempts: Mutex<HashMap<String, u32>>,
    /// `start:<key>` / `end:<key>` in the order they happened.
    pub log: Mutex<Vec<String>>,
}

impl FakeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(transient_failures: u32) -> Self {
        Self {
            transient_failures,
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    /// Hold calls whose key starts with `prefix` for `delay` before answering.
    pub fn slow_for(mut self, prefix: &str, delay: Duration) -> Self {
        self.delays.insert(prefix.to_string(), delay);
        self
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    async fn call(&self, key: &str) -> Result<(), InventoryError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.log.lock().unwrap().push(format!("start:{}", key));
        let delay = self
            .delays
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.log.lock().unwrap().push(format!("end:{}", key));

        if self.reject {
            return Err(InventoryError::Rejected("unknown product".into()));
        }
        if attempt <= self.transient_failures {
            return Err(InventoryError::Transient("HTTP 503".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryClient for FakeInventory {
    async fn create_product(
        &self,
        _product: &ProductDraft,
        idempotency_key: &str,
    ) -> Result<(), InventoryError> {
        self.call(idempotency_key).await
    }

    async fn update_product(
        &self,
        _product: &ProductDraft,
        idempotency_key: &str,
    ) -> Result<(), InventoryError> {
        self.call(idempotency_key).await
    }

    async fn add_stock(
        &self,
        _barcode: &str,
        _amount: f64,
        idempotency_key: &str,
    ) -> Result<(), InventoryError> {
        self.call(idempotency_key).await
    }

    async fn consume_stock(
        &self,
        _barcode: &str,
        _amount: f64,
        idempotency_key: &str,
    ) -> Result<(), InventoryError> {
        self.call(idempotency_key).await
    }

    async fn transfer_stock(
        &self,
        _barcode: &str,
        _amount: f64,
        _to_location: &str,
        idempotency_key: &str,
    ) -> Result<(), InventoryError> {
        self.call(idempotency_key).await
    }

    async fn undo(&self, target_key: &str, idempotency_key: &str) -> Result<(), InventoryError> {
        self.log.lock().unwrap().push(format!("undo:{}", target_key));
        self.call(idempotency_key).await
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────

/// Settings for scan tests: the given providers, default cache TTLs, optimizer off.
pub fn scan_settings(strategy: LookupStrategy, order: &[ProviderKind]) -> Settings {
    Settings {
        lookup: lookup_settings(strategy, order),
        cache: cache_settings(),
        ..Settings::default()
    }
}

pub fn scan_service(
    providers: Vec<Arc<dyn ProductProvider>>,
    store: Arc<dyn CacheStore>,
    model: Option<Arc<dyn LanguageModel>>,
    settings: Settings,
) -> ScanService {
    ScanService::new(
        Cache::new(store),
        Arc::new(LookupManager::new(providers)),
        Optimizer::new(model),
        SettingsHandle::new(settings).unwrap(),
    )
}

/// Store whose every call fails as if Redis were down.
pub struct UnavailableStore;

fn connection_refused() -> CacheError {
    CacheError::Unavailable(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

#[async_trait]
impl CacheStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Err(connection_refused())
    }

    async fn set(&self, _entry: &CacheEntry, _ttl: Duration) -> Result<(), CacheError> {
        Err(connection_refused())
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Err(connection_refused())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Err(connection_refused())
    }
}
