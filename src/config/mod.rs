use std::str::FromStr;

use serde::Deserialize;

use crate::services::providers::ProviderKind;

pub mod settings;

pub use settings::{
    CacheSettings, JobSettings, LookupSettings, LookupStrategy, OptimizerSettings,
    ProviderSettings, Settings, SettingsError, SettingsHandle,
};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the lookup cache. In-memory cache when unset.
    pub redis_url: Option<String>,

    /// Cloudflare account ID for Workers AI (optimizer)
    pub cf_account_id: Option<String>,

    /// Cloudflare Workers AI API token
    pub cf_api_token: Option<String>,

    /// Workers AI text model used by the optimizer
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Base URL of the inventory system API
    pub inventory_url: String,

    /// Inventory system API key
    pub inventory_api_key: Option<String>,

    /// UPCitemdb key; the keyless trial endpoint is used when unset
    pub upcitemdb_key: Option<String>,

    /// barcodelookup.com API key
    pub barcodelookup_key: Option<String>,

    /// go-upc.com API key
    pub goupc_key: Option<String>,

    /// "sequential" or "parallel"
    #[serde(default = "default_strategy")]
    pub lookup_strategy: String,

    /// Comma-separated provider names, highest priority first
    #[serde(default = "default_provider_order")]
    pub provider_order: Vec<String>,

    #[serde(default = "default_parallel_deadline_ms")]
    pub parallel_deadline_ms: u64,

    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_not_found_ttl_secs")]
    pub not_found_ttl_secs: u64,

    #[serde(default)]
    pub skip_cache: bool,

    #[serde(default)]
    pub optimizer_enabled: bool,

    #[serde(default = "default_optimizer_timeout_ms")]
    pub optimizer_timeout_ms: u64,

    /// Size of the inventory job worker pool
    #[serde(default = "default_job_workers")]
    pub job_workers: usize,

    #[serde(default = "default_job_max_attempts")]
    pub job_max_attempts: u32,

    #[serde(default = "default_job_base_delay_ms")]
    pub job_base_delay_ms: u64,

    #[serde(default = "default_job_max_delay_ms")]
    pub job_max_delay_ms: u64,

    /// Seconds a finished job stays queryable
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,

    /// Upper bound on one cache store round trip
    #[serde(default = "default_cache_store_timeout_ms")]
    pub cache_store_timeout_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_llm_model() -> String {
    "@cf/meta/llama-3.1-8b-instruct".to_string()
}

fn default_strategy() -> String {
    LookupStrategy::Sequential.to_string()
}

fn default_provider_order() -> Vec<String> {
    ProviderKind::ALL.iter().map(|k| k.to_string()).collect()
}

fn default_parallel_deadline_ms() -> u64 {
    8_000
}

fn default_provider_timeout_ms() -> u64 {
    5_000
}

fn default_cache_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_not_found_ttl_secs() -> u64 {
    6 * 60 * 60
}

fn default_optimizer_timeout_ms() -> u64 {
    10_000
}

fn default_job_workers() -> usize {
    4
}

fn default_job_max_attempts() -> u32 {
    5
}

fn default_job_base_delay_ms() -> u64 {
    500
}

fn default_job_max_delay_ms() -> u64 {
    60_000
}

fn default_job_retention_secs() -> u64 {
    60 * 60
}

fn default_cache_store_timeout_ms() -> u64 {
    500
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Unknown lookup strategy: {0}")]
    UnknownStrategy(String),

    #[error("Unknown provider in PROVIDER_ORDER: {0}")]
    UnknownProvider(String),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl AppConfig {
    pub fn cache_store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cache_store_timeout_ms)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    /// Build the initial runtime settings from the environment.
    ///
    /// Providers left out of `PROVIDER_ORDER` are appended disabled so they can
    /// be switched on at runtime.
    pub fn initial_settings(&self) -> Result<SettingsHandle, ConfigError> {
        let strategy = LookupStrategy::from_str(self.lookup_strategy.trim())
            .map_err(|_| ConfigError::UnknownStrategy(self.lookup_strategy.clone()))?;

        let mut order = Vec::new();
        for name in self.provider_order.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            let kind = ProviderKind::from_str(name)
                .map_err(|_| ConfigError::UnknownProvider(name.to_string()))?;
            if !order.contains(&kind) {
                order.push(kind);
            }
        }
        let disabled: Vec<ProviderKind> = ProviderKind::ALL
            .iter()
            .copied()
            .filter(|k| !order.contains(k))
            .collect();

        let providers = order
            .iter()
            .map(|&kind| (kind, true))
            .chain(disabled.into_iter().map(|kind| (kind, false)))
            .map(|(kind, enabled)| ProviderSettings {
                kind,
                enabled,
                api_key: self.api_key_for(kind),
                base_url: None,
                timeout_ms: self.provider_timeout_ms,
            })
            .collect();

        let settings = Settings {
            lookup: LookupSettings {
                strategy,
                providers,
                parallel_deadline_ms: self.parallel_deadline_ms,
            },
            cache: CacheSettings {
                ttl_secs: self.cache_ttl_secs,
                not_found_ttl_secs: self.not_found_ttl_secs,
                skip_cache: self.skip_cache,
            },
            optimizer: OptimizerSettings {
                enabled: self.optimizer_enabled,
                timeout_ms: self.optimizer_timeout_ms,
            },
            jobs: JobSettings {
                max_attempts: self.job_max_attempts,
                base_delay_ms: self.job_base_delay_ms,
                max_delay_ms: self.job_max_delay_ms,
                retention_secs: self.job_retention_secs,
            },
        };

        Ok(SettingsHandle::new(settings)?)
    }

    fn api_key_for(&self, kind: ProviderKind) -> Option<String> {
        match kind {
            ProviderKind::OpenFoodFacts => None,
            ProviderKind::UpcItemDb => self.upcitemdb_key.clone(),
            ProviderKind::BarcodeLookup => self.barcodelookup_key.clone(),
            ProviderKind::GoUpc => self.goupc_key.clone(),
        }
    }
}
