//! Scan pipeline: validate, cached multi-provider lookup, merge, optimize.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SettingsHandle;
use crate::models::barcode::{Barcode, LocationCode};
use crate::models::job::InventoryOperation;
use crate::models::product::{ProductDraft, ScanCandidate};
use crate::services::cache::{Cache, CachedLookup, Fetched};
use crate::services::lookup::LookupManager;
use crate::services::merger::merge_results;
use crate::services::optimizer::Optimizer;
use crate::services::validation::{validate_barcode, BarcodeError};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Invalid barcode: {0}")]
    InvalidBarcode(#[from] BarcodeError),

    #[error("No product found for barcode {0}")]
    NotFound(String),
}

/// What a scanned code resolved to.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Product(Box<ScanCandidate>),
    Location(LocationCode),
}

#[derive(Clone)]
pub struct ScanService {
    cache: Cache,
    lookup: Arc<LookupManager>,
    optimizer: Optimizer,
    settings: SettingsHandle,
}

impl ScanService {
    pub fn new(
        cache: Cache,
        lookup: Arc<LookupManager>,
        optimizer: Optimizer,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            cache,
            lookup,
            optimizer,
            settings,
        }
    }

    /// Resolve a raw scan. `skip_cache` overrides the configured flag for this call.
    pub async fn scan(
        &self,
        raw: &str,
        skip_cache: Option<bool>,
    ) -> Result<ScanOutcome, ScanError> {
        let barcode = validate_barcode(raw)?;
        if let Some(location) = barcode.location() {
            debug!(barcode = %barcode, "Scanned a location code");
            return Ok(ScanOutcome::Location(location));
        }

        let settings = self.settings.snapshot();
        let skip_cache = skip_cache.unwrap_or(settings.cache.skip_cache);

        let fetch = {
            let lookup = self.lookup.clone();
            let barcode = barcode.clone();
            let lookup_settings = settings.lookup.clone();
            move || async move { fetch_lookup(&lookup, &barcode, &lookup_settings).await }
        };

        let cached = self
            .cache
            .get_or_fetch(barcode.normalized(), &settings.cache, skip_cache, fetch)
            .await;

        let (results, merged) = match cached.payload {
            CachedLookup::Found { results, merged } => (results, merged),
            CachedLookup::NotFound => {
                info!(barcode = %barcode, from_cache = cached.from_cache, "Barcode not found");
                return Err(ScanError::NotFound(barcode.normalized().to_string()));
            }
        };

        let optimized = self.optimizer.optimize(&merged, &settings.optimizer).await;

        Ok(ScanOutcome::Product(Box::new(ScanCandidate {
            barcode,
            results,
            merged,
            optimized,
            from_cache: cached.from_cache,
        })))
    }
}

async fn fetch_lookup(
    lookup: &LookupManager,
    barcode: &Barcode,
    settings: &crate::config::LookupSettings,
) -> Fetched {
    match lookup.lookup(barcode, settings).await {
        Ok(results) => match merge_results(&results) {
            Some(merged) => Fetched {
                payload: CachedLookup::Found { results, merged },
                cacheable: true,
            },
            None => Fetched {
                payload: CachedLookup::NotFound,
                cacheable: false,
            },
        },
        // Only a unanimous "not found" is worth remembering; outages are not.
        Err(e) => Fetched {
            payload: CachedLookup::NotFound,
            cacheable: e.is_definitive(),
        },
    }
}

/// Jobs booking a confirmed scan: create the product record, then add stock.
pub fn confirmation_operations(
    barcode: &Barcode,
    amount: f64,
    product: ProductDraft,
) -> Vec<InventoryOperation> {
    vec![
        InventoryOperation::CreateProduct { product },
        InventoryOperation::AddStock {
            barcode: barcode.normalized().to_string(),
            amount,
        },
    ]
}
