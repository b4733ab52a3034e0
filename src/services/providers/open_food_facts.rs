//! Open Food Facts product API (no credentials).
//!
//! <https://openfoodfacts.github.io/openfoodfacts-server/api/>

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    base_url, check_status, parse_body, HttpRequest, HttpTransport, ProductProvider, ProviderError,
    ProviderHit, ProviderKind,
};
use crate::config::ProviderSettings;
use crate::models::barcode::Barcode;

const DEFAULT_BASE_URL: &str = "https://world.openfoodfacts.org";
const FIELDS: &str = "product_name,generic_name,brands,categories,quantity,image_url";

pub struct OpenFoodFactsProvider {
    transport: Arc<dyn HttpTransport>,
}

#[derive(Deserialize)]
struct OffResponse {
    #[serde(default)]
    status: i64,
    product: Option<OffProduct>,
}

#[derive(Deserialize)]
struct OffProduct {
    product_name: Option<String>,
    generic_name: Option<String>,
    brands: Option<String>,
    categories: Option<String>,
    quantity: Option<String>,
    image_url: Option<String>,
}

impl OpenFoodFactsProvider {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ProductProvider for OpenFoodFactsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenFoodFacts
    }

    async fn fetch(
        &self,
        barcode: &Barcode,
        settings: &ProviderSettings,
    ) -> Result<ProviderHit, ProviderError> {
        let url = format!(
            "{}/api/v2/product/{}.json",
            base_url(settings, DEFAULT_BASE_URL),
            barcode.normalized()
        );
        let request = HttpRequest::get(url, settings.timeout()).query("fields", FIELDS);

        let reply = self.transport.get(request).await?;
        check_status(&reply)?;
        let (raw, parsed): (_, OffResponse) = parse_body(&reply.body)?;

        let product = match (parsed.status, parsed.product) {
            (1, Some(product)) => product,
            _ => return Err(ProviderError::NotFound),
        };

        Ok(ProviderHit {
            name: product_title(product.product_name, product.quantity.as_deref()),
            // "Ferrero, Nutella": the first entry is the owning brand.
            brand: first_entry(product.brands.as_deref()),
            // Categories run from generic to specific.
            category: product
                .categories
                .as_deref()
                .and_then(|c| c.split(',').map(str::trim).filter(|s| !s.is_empty()).last())
                .map(str::to_string),
            description: product.generic_name,
            image_url: product.image_url,
            raw,
        })
    }
}

fn first_entry(list: Option<&str>) -> Option<String> {
    list?
        .split(',')
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Append the package quantity unless the name already carries it.
fn product_title(name: Option<String>, quantity: Option<&str>) -> Option<String> {
    let name = name?;
    match quantity.map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) if !name.to_lowercase().contains(&q.to_lowercase()) => {
            Some(format!("{} {}", name.trim(), q))
        }
        _ => Some(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::testing::{settings, StaticTransport};
    use crate::services::validation::validate_barcode;
    use serde_json::json;

    #[tokio::test]
    async fn test_parses_product() {
        let transport = StaticTransport::json(
            200,
            json!({
                "code": "3017620422003",
                "status": 1,
                "product": {
                    "product_name": "Nutella",
                    "brands": "Ferrero, Nutella",
                    "categories": "Spreads, Sweet spreads, Hazelnut spreads",
                    "quantity": "400 g",
                    "image_url": "https://images.example/nutella.jpg"
                }
            }),
        );
        let provider = OpenFoodFactsProvider::new(transport.clone());
        let barcode = validate_barcode("3017620422003").unwrap();

        let hit = provider
            .fetch(&barcode, &settings(ProviderKind::OpenFoodFacts, None))
            .await
            .unwrap();

        assert_eq!(hit.name.as_deref(), Some("Nutella 400 g"));
        assert_eq!(hit.brand.as_deref(), Some("Ferrero"));
        assert_eq!(hit.category.as_deref(), Some("Hazelnut spreads"));
        assert_eq!(hit.raw["code"], "3017620422003");
        assert!(transport
            .last_request()
            .url
            .ends_with("/api/v2/product/3017620422003.json"));
    }

    #[tokio::test]
    async fn test_status_zero_is_not_found() {
        let transport = StaticTransport::json(200, json!({"status": 0, "status_verbose": "product not found"}));
        let provider = OpenFoodFactsProvider::new(transport);
        let barcode = validate_barcode("4006381333931").unwrap();

        let err = provider
            .fetch(&barcode, &settings(ProviderKind::OpenFoodFacts, None))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::NotFound);
    }

    #[tokio::test]
    async fn test_base_url_override() {
        let transport = StaticTransport::json(404, json!({}));
        let provider = OpenFoodFactsProvider::new(transport.clone());
        let barcode = validate_barcode("4006381333931").unwrap();
        let mut cfg = settings(ProviderKind::OpenFoodFacts, None);
        cfg.base_url = Some("http://mirror.local/".into());

        let err = provider.fetch(&barcode, &cfg).await.unwrap_err();
        assert_eq!(err, ProviderError::NotFound);
        assert_eq!(
            transport.last_request().url,
            "http://mirror.local/api/v2/product/4006381333931.json"
        );
    }

    #[test]
    fn test_title_keeps_existing_quantity() {
        assert_eq!(
            product_title(Some("Cola 1.5L".into()), Some("1.5l")).as_deref(),
            Some("Cola 1.5L")
        );
    }
}
