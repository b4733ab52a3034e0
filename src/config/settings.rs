//! Runtime-reconfigurable pipeline settings.
//!
//! Every component reads an `Arc<Settings>` snapshot at call time, so an update
//! takes effect on the next scan or job attempt without a restart.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::watch;

use crate::services::providers::ProviderKind;

/// Upper bound on any cache TTL.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Provider invocation policy for a lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LookupStrategy {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct Settings {
    #[garde(dive)]
    pub lookup: LookupSettings,

    #[garde(dive)]
    pub cache: CacheSettings,

    #[garde(dive)]
    pub optimizer: OptimizerSettings,

    #[garde(dive)]
    pub jobs: JobSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct LookupSettings {
    #[garde(skip)]
    pub strategy: LookupStrategy,

    /// Providers in priority order; the first entry is the highest priority.
    #[garde(dive, custom(unique_providers))]
    pub providers: Vec<ProviderSettings>,

    /// Overall deadline for the parallel strategy.
    #[garde(range(min = 100, max = 60_000))]
    pub parallel_deadline_ms: u64,
}

impl LookupSettings {
    pub fn parallel_deadline(&self) -> Duration {
        Duration::from_millis(self.parallel_deadline_ms)
    }

    /// Enabled providers with their 1-based rank.
    pub fn enabled(&self) -> impl Iterator<Item = (u32, &ProviderSettings)> {
        self.providers
            .iter()
            .filter(|p| p.enabled)
            .enumerate()
            .map(|(i, p)| (i as u32 + 1, p))
    }
}

#[allow(clippy::ptr_arg)]
fn unique_providers(value: &Vec<ProviderSettings>, _ctx: &()) -> garde::Result {
    let mut seen = HashSet::new();
    for provider in value {
        if !seen.insert(provider.kind) {
            return Err(garde::Error::new(format!(
                "provider {} listed more than once",
                provider.kind
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ProviderSettings {
    #[garde(skip)]
    pub kind: ProviderKind,

    #[garde(skip)]
    pub enabled: bool,

    #[garde(length(min = 1, max = 256))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Overrides the provider's public endpoint.
    #[garde(length(min = 1, max = 512))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[garde(range(min = 50, max = 60_000))]
    pub timeout_ms: u64,
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            enabled: true,
            api_key: None,
            base_url: None,
            timeout_ms: 5_000,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CacheSettings {
    #[garde(range(min = 1, max = 2_592_000))]
    pub ttl_secs: u64,

    /// TTL for explicit not-found markers.
    #[garde(range(min = 1, max = 2_592_000))]
    pub not_found_ttl_secs: u64,

    /// Ignore stored values and always fetch fresh.
    #[garde(skip)]
    pub skip_cache: bool,
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn not_found_ttl(&self) -> Duration {
        Duration::from_secs(self.not_found_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct OptimizerSettings {
    #[garde(skip)]
    pub enabled: bool,

    #[garde(range(min = 100, max = 120_000))]
    pub timeout_ms: u64,
}

impl OptimizerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct JobSettings {
    /// Total attempts including the first.
    #[garde(range(min = 1, max = 50))]
    pub max_attempts: u32,

    #[garde(range(min = 1, max = 600_000))]
    pub base_delay_ms: u64,

    #[garde(range(min = 1, max = 3_600_000))]
    pub max_delay_ms: u64,

    /// How long finished jobs stay queryable before the pruner drops them.
    #[garde(range(min = 1, max = 604_800))]
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_retention_secs() -> u64 {
    60 * 60
}

impl JobSettings {
    /// Exponential backoff before attempt `attempt + 1`, capped at `max_delay_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lookup: LookupSettings {
                strategy: LookupStrategy::Sequential,
                providers: ProviderKind::ALL
                    .iter()
                    .map(|&kind| ProviderSettings::new(kind))
                    .collect(),
                parallel_deadline_ms: 8_000,
            },
            cache: CacheSettings {
                ttl_secs: 7 * 24 * 60 * 60,
                not_found_ttl_secs: 6 * 60 * 60,
                skip_cache: false,
            },
            optimizer: OptimizerSettings {
                enabled: false,
                timeout_ms: 10_000,
            },
            jobs: JobSettings {
                max_attempts: 5,
                base_delay_ms: 500,
                max_delay_ms: 60_000,
                retention_secs: default_retention_secs(),
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid settings: {0}")]
    Invalid(#[from] garde::Report),
}

/// Shared handle publishing settings snapshots.
#[derive(Clone, Debug)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<Arc<Settings>>>,
}

impl SettingsHandle {
    pub fn new(initial: Settings) -> Result<Self, SettingsError> {
        initial.validate()?;
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Ok(Self { tx: Arc::new(tx) })
    }

    /// Current settings; callers hold the snapshot for the duration of one operation.
    pub fn snapshot(&self) -> Arc<Settings> {
        self.tx.borrow().clone()
    }

    /// Replace the settings after validation.
    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        settings.validate()?;
        tracing::info!(
            strategy = %settings.lookup.strategy,
            providers = settings.lookup.enabled().count(),
            optimizer = settings.optimizer.enabled,
            "Settings updated"
        );
        self.tx.send_replace(Arc::new(settings));
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.tx.subscribe()
    }
}
