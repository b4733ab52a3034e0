//! UPCitemdb lookup API.
//!
//! Without a key the rate-limited trial endpoint is used; with a key the paid
//! endpoint authenticates via `user_key`/`key_type` headers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    base_url, check_status, parse_body, HttpRequest, HttpTransport, ProductProvider, ProviderError,
    ProviderHit, ProviderKind,
};
use crate::config::ProviderSettings;
use crate::models::barcode::Barcode;

const DEFAULT_BASE_URL: &str = "https://api.upcitemdb.com";

pub struct UpcItemDbProvider {
    transport: Arc<dyn HttpTransport>,
}

#[derive(Deserialize)]
struct UpcResponse {
    code: String,
    #[serde(default)]
    items: Vec<UpcItem>,
}

#[derive(Deserialize)]
struct UpcItem {
    title: Option<String>,
    brand: Option<String>,
    category: Option<String>,
    description: Option<String>,
    #[serde(default)]
    images: Vec<String>,
}

impl UpcItemDbProvider {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ProductProvider for UpcItemDbProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::UpcItemDb
    }

    async fn fetch(
        &self,
        barcode: &Barcode,
        settings: &ProviderSettings,
    ) -> Result<ProviderHit, ProviderError> {
        let base = base_url(settings, DEFAULT_BASE_URL);
        let request = match settings.api_key.as_deref() {
            Some(key) => HttpRequest::get(format!("{}/prod/v1/lookup", base), settings.timeout())
                .header("user_key", key)
                .header("key_type", "3scale"),
            None => HttpRequest::get(format!("{}/prod/trial/lookup", base), settings.timeout()),
        }
        .query("upc", barcode.normalized());

        let reply = self.transport.get(request).await?;
        if reply.status == 400 && reply.body.contains("INVALID_UPC") {
            return Err(ProviderError::NotFound);
        }
        check_status(&reply)?;
        let (raw, parsed): (_, UpcResponse) = parse_body(&reply.body)?;

        if parsed.code != "OK" {
            return Err(ProviderError::ServiceError(format!("UPCitemdb code {}", parsed.code)));
        }
        let item = parsed
            .items
            .into_iter()
            .next()
            .ok_or(ProviderError::NotFound)?;

        Ok(ProviderHit {
            name: item.title,
            brand: item.brand,
            // "Food, Beverages & Tobacco > Beverages > Soda"
            category: item
                .category
                .as_deref()
                .and_then(|c| c.rsplit('>').next())
                .map(|c| c.trim().to_string()),
            description: item.description,
            image_url: item.images.into_iter().next(),
            raw,
        })
    }
}
