//! Product lookup providers.
//!
//! Every provider implements [`ProductProvider`] and talks HTTP through an
//! [`HttpTransport`], so request shaping and response parsing can be exercised
//! against canned replies. Settings (enable flag, credentials, timeout, base URL)
//! arrive with every call and are never cached by the provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::ProviderSettings;
use crate::models::barcode::Barcode;

pub mod barcode_lookup;
pub mod go_upc;
pub mod open_food_facts;
pub mod upc_item_db;

pub use barcode_lookup::BarcodeLookupProvider;
pub use go_upc::GoUpcProvider;
pub use open_food_facts::OpenFoodFactsProvider;
pub use upc_item_db::UpcItemDbProvider;

const USER_AGENT: &str = concat!("barcode-intake/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderKind {
    OpenFoodFacts,
    UpcItemDb,
    BarcodeLookup,
    GoUpc,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenFoodFacts,
        ProviderKind::UpcItemDb,
        ProviderKind::BarcodeLookup,
        ProviderKind::GoUpc,
    ];
}

/// Classified provider failure. None of these abort a lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider timed out")]
    Timeout,

    #[error("Provider rate limit exceeded")]
    RateLimited,

    #[error("Product not found")]
    NotFound,

    #[error("Provider service error: {0}")]
    ServiceError(String),
}

impl ProviderError {
    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            ProviderError::Timeout => "timeout",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::NotFound => "not_found",
            ProviderError::ServiceError(_) => "service_error",
        }
    }

    /// A definitive answer, as opposed to a failure that may clear up on retry.
    pub fn is_definitive(&self) -> bool {
        matches!(self, ProviderError::NotFound)
    }
}

/// Product fields as parsed from one provider response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderHit {
    pub name: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait ProductProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn fetch(
        &self,
        barcode: &Barcode,
        settings: &ProviderSettings,
    ) -> Result<ProviderHit, ProviderError>;
}

/// The four public providers sharing one transport.
pub fn default_providers(transport: Arc<dyn HttpTransport>) -> Vec<Arc<dyn ProductProvider>> {
    vec![
        Arc::new(OpenFoodFactsProvider::new(transport.clone())),
        Arc::new(UpcItemDbProvider::new(transport.clone())),
        Arc::new(BarcodeLookupProvider::new(transport.clone())),
        Arc::new(GoUpcProvider::new(transport)),
    ]
}

// ── Transport ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("HTTP request failed: {0}")]
    Network(String),
}

impl From<TransportError> for ProviderError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ProviderError::Timeout,
            TransportError::Network(msg) => ProviderError::ServiceError(msg),
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, request: HttpRequest) -> Result<HttpReply, TransportError>;
}

/// Production transport backed by a shared `reqwest::Client`.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpReply, TransportError> {
        let mut builder = self
            .http
            .get(&request.url)
            .query(&request.query)
            .timeout(request.timeout);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(classify_reqwest)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest)?;
        Ok(HttpReply { status, body })
    }
}

fn classify_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}

// ── Shared response handling ─────────────────────────────────────────

/// Map HTTP status codes common to all providers.
pub(crate) fn check_status(reply: &HttpReply) -> Result<(), ProviderError> {
    match reply.status {
        200..=299 => Ok(()),
        404 => Err(ProviderError::NotFound),
        429 => Err(ProviderError::RateLimited),
        status => Err(ProviderError::ServiceError(format!("HTTP {}", status))),
    }
}

/// Parse a body into the raw JSON value plus a typed view of it.
pub(crate) fn parse_body<T: DeserializeOwned>(
    body: &str,
) -> Result<(serde_json::Value, T), ProviderError> {
    let raw: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::ServiceError(format!("invalid JSON: {}", e)))?;
    let typed = T::deserialize(&raw)
        .map_err(|e| ProviderError::ServiceError(format!("unexpected response shape: {}", e)))?;
    Ok((raw, typed))
}

pub(crate) fn base_url<'a>(settings: &'a ProviderSettings, default: &'a str) -> &'a str {
    settings
        .base_url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
}

pub(crate) fn required_key(settings: &ProviderSettings) -> Result<&str, ProviderError> {
    settings
        .api_key
        .as_deref()
        .ok_or_else(|| ProviderError::ServiceError(format!("{} requires an API key", settings.kind)))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let reply = |status| HttpReply {
            status,
            body: String::new(),
        };
        assert_eq!(check_status(&reply(200)), Ok(()));
        assert_eq!(check_status(&reply(404)), Err(ProviderError::NotFound));
        assert_eq!(check_status(&reply(429)), Err(ProviderError::RateLimited));
        assert!(matches!(
            check_status(&reply(503)),
            Err(ProviderError::ServiceError(_))
        ));
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ProviderKind::ALL {
            let parsed: ProviderKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert_eq!(ProviderKind::UpcItemDb.to_string(), "upc_item_db");
    }

    #[test]
    fn test_transport_timeout_maps_to_provider_timeout() {
        assert_eq!(
            ProviderError::from(TransportError::Timeout),
            ProviderError::Timeout
        );
    }
}
