//! Inventory system interface consumed by the job queue.
//!
//! Every call carries an idempotency key; the inventory system must apply an
//! effect at most once per key so queue retries are safe.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::models::product::ProductDraft;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    /// Worth retrying: network failures, timeouts, 5xx, 429.
    #[error("Inventory system unavailable: {0}")]
    Transient(String),

    /// The inventory system refused the operation; retrying will not help.
    #[error("Inventory system rejected the operation: {0}")]
    Rejected(String),
}

impl InventoryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, InventoryError::Transient(_))
    }
}

#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn create_product(
        &self,
        product: &ProductDraft,
        idempotency_key: &str,
    ) -> Result<(), InventoryError>;

    async fn update_product(
        &self,
        product: &ProductDraft,
        idempotency_key: &str,
    ) -> Result<(), InventoryError>;

    async fn add_stock(
        &self,
        barcode: &str,
        amount: f64,
        idempotency_key: &str,
    ) -> Result<(), InventoryError>;

    async fn consume_stock(
        &self,
        barcode: &str,
        amount: f64,
        idempotency_key: &str,
    ) -> Result<(), InventoryError>;

    async fn transfer_stock(
        &self,
        barcode: &str,
        amount: f64,
        to_location: &str,
        idempotency_key: &str,
    ) -> Result<(), InventoryError>;

    /// Reverse the effect booked under `target_key`.
    async fn undo(&self, target_key: &str, idempotency_key: &str) -> Result<(), InventoryError>;
}

/// JSON-over-HTTP adapter for the inventory system's REST API.
pub struct HttpInventoryClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct StockBody<'a> {
    barcode: &'a str,
    amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    to_location: Option<&'a str>,
}

#[derive(Serialize)]
struct UndoBody<'a> {
    target_key: &'a str,
}

impl HttpInventoryClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, InventoryError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| InventoryError::Transient(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
        idempotency_key: &str,
    ) -> Result<(), InventoryError> {
        let mut request = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .header("Idempotency-Key", idempotency_key)
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| InventoryError::Transient(e.to_string()))?;

        let status = response.status();
        // 409: already applied under this idempotency key.
        if status.is_success() || status == StatusCode::CONFLICT {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(InventoryError::Transient(format!("HTTP {}: {}", status, text)))
        } else {
            Err(InventoryError::Rejected(format!("HTTP {}: {}", status, text)))
        }
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn create_product(
        &self,
        product: &ProductDraft,
        idempotency_key: &str,
    ) -> Result<(), InventoryError> {
        self.post("products", product, idempotency_key).await
    }

    async fn update_product(
        &self,
        product: &ProductDraft,
        idempotency_key: &str,
    ) -> Result<(), InventoryError> {
        self.post(
            &format!("products/{}", product.barcode),
            product,
            idempotency_key,
        )
        .await
    }

    async fn add_stock(
        &self,
        barcode: &str,
        amount: f64,
        idempotency_key: &str,
    ) -> Result<(), InventoryError> {
        let body = StockBody {
            barcode,
            amount,
            to_location: None,
        };
        self.post("stock/add", &body, idempotency_key).await
    }

    async fn consume_stock(
        &self,
        barcode: &str,
        amount: f64,
        idempotency_key: &str,
    ) -> Result<(), InventoryError> {
        let body = StockBody {
            barcode,
            amount,
            to_location: None,
        };
        self.post("stock/consume", &body, idempotency_key).await
    }

    async fn transfer_stock(
        &self,
        barcode: &str,
        amount: f64,
        to_location: &str,
        idempotency_key: &str,
    ) -> Result<(), InventoryError> {
        let body = StockBody {
            barcode,
            amount,
            to_location: Some(to_location),
        };
        self.post("stock/transfer", &body, idempotency_key).await
    }

    async fn undo(&self, target_key: &str, idempotency_key: &str) -> Result<(), InventoryError> {
        self.post("transactions/undo", &UndoBody { target_key }, idempotency_key)
            .await
    }
}
