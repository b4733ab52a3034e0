//! barcodelookup.com v3 API (API key required).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    base_url, check_status, parse_body, required_key, HttpRequest, HttpTransport,
    ProductProvider, ProviderError, ProviderHit, ProviderKind,
};
use crate::config::ProviderSettings;
use crate::models::barcode::Barcode;

const DEFAULT_BASE_URL: &str = "https://api.barcodelookup.com";

pub struct BarcodeLookupProvider {
    transport: Arc<dyn HttpTransport>,
}

#[derive(Deserialize)]
struct BlResponse {
    #[serde(default)]
    products: Vec<BlProduct>,
}

#[derive(Deserialize)]
struct BlProduct {
    title: Option<String>,
    brand: Option<String>,
    manufacturer: Option<String>,
    category: Option<String>,
    description: Option<String>,
    #[serde(default)]
    images: Vec<String>,
}

impl BarcodeLookupProvider {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ProductProvider for BarcodeLookupProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::BarcodeLookup
    }

    async fn fetch(
        &self,
        barcode: &Barcode,
        settings: &ProviderSettings,
    ) -> Result<ProviderHit, ProviderError> {
        let key = required_key(settings)?;
        let request = HttpRequest::get(
            format!("{}/v3/products", base_url(settings, DEFAULT_BASE_URL)),
            settings.timeout(),
        )
        .query("barcode", barcode.normalized())
        .query("formatted", "y")
        .query("key", key);

        let reply = self.transport.get(request).await?;
        check_status(&reply)?;
        let (raw, parsed): (_, BlResponse) = parse_body(&reply.body)?;

        let product = parsed
            .products
            .into_iter()
            .next()
            .ok_or(ProviderError::NotFound)?;

        Ok(ProviderHit {
            name: product.title,
            brand: product.brand.or(product.manufacturer),
            category: product
                .category
                .as_deref()
                .and_then(|c| c.rsplit('>').next())
                .map(|c| c.trim().to_string()),
            description: product.description,
            image_url: product.images.into_iter().next(),
            raw,
        })
    }
}
