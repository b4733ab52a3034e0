//! go-upc.com code lookup (bearer API key).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    base_url, check_status, parse_body, required_key, HttpRequest, HttpTransport,
    ProductProvider, ProviderError, ProviderHit, ProviderKind,
};
use crate::config::ProviderSettings;
use crate::models::barcode::Barcode;

const DEFAULT_BASE_URL: &str = "https://go-upc.com";

pub struct GoUpcProvider {
    transport: Arc<dyn HttpTransport>,
}

#[derive(Deserialize)]
struct GoUpcResponse {
    product: Option<GoUpcProduct>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoUpcProduct {
    name: Option<String>,
    brand: Option<String>,
    category: Option<String>,
    description: Option<String>,
    image_url: Option<String>,
}

impl GoUpcProvider {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ProductProvider for GoUpcProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoUpc
    }

    async fn fetch(
        &self,
        barcode: &Barcode,
        settings: &ProviderSettings,
    ) -> Result<ProviderHit, ProviderError> {
        let key = required_key(settings)?;
        let request = HttpRequest::get(
            format!(
                "{}/api/v1/code/{}",
                base_url(settings, DEFAULT_BASE_URL),
                barcode.normalized()
            ),
            settings.timeout(),
        )
        .header("Authorization", format!("Bearer {}", key));

        let reply = self.transport.get(request).await?;
        check_status(&reply)?;
        let (raw, parsed): (_, GoUpcResponse) = parse_body(&reply.body)?;
        let product = parsed.product.ok_or(ProviderError::NotFound)?;

        Ok(ProviderHit {
            name: product.name,
            brand: product.brand,
            category: product.category,
            description: product.description,
            image_url: product.image_url,
            raw,
        })
    }
}
