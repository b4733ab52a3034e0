use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::barcode::Barcode;
use crate::services::providers::{ProviderHit, ProviderKind};

/// Output of one successful provider call, stamped with its source and rank.
///
/// Rank 1 is the highest priority: the provider's position in the configured order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LookupResult {
    pub source: ProviderKind,
    pub rank: u32,
    pub barcode: String,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl LookupResult {
    pub fn from_hit(source: ProviderKind, rank: u32, barcode: &Barcode, hit: ProviderHit) -> Self {
        Self {
            source,
            rank,
            barcode: barcode.normalized().to_string(),
            name: non_empty(hit.name),
            brand: non_empty(hit.brand),
            category: non_empty(hit.category),
            description: non_empty(hit.description),
            image_url: non_empty(hit.image_url),
            raw: hit.raw,
        }
    }
}

/// Normalize provider strings: trim, and treat blank as absent.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == v.len() {
            Some(v)
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Cleaned product record proposed by the language model.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct OptimizedProduct {
    #[garde(length(min = 1, max = 200))]
    pub title: String,

    #[garde(length(max = 1000))]
    #[serde(default)]
    pub description: Option<String>,

    #[garde(length(max = 100))]
    #[serde(default)]
    pub brand: Option<String>,

    #[garde(length(max = 100))]
    #[serde(default)]
    pub category: Option<String>,
}

/// Materialized outcome of one scan request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanCandidate {
    pub barcode: Barcode,
    /// Per-provider results ordered by rank.
    pub results: Vec<LookupResult>,
    pub merged: LookupResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized: Option<OptimizedProduct>,
    pub from_cache: bool,
}

impl ScanCandidate {
    /// Product fields to present: the optimized record when present, else the merge.
    pub fn best(&self) -> ProductDraft {
        match &self.optimized {
            Some(opt) => ProductDraft {
                barcode: self.merged.barcode.clone(),
                name: opt.title.clone(),
                brand: opt.brand.clone().or_else(|| self.merged.brand.clone()),
                category: opt.category.clone().or_else(|| self.merged.category.clone()),
                description: opt.description.clone().or_else(|| self.merged.description.clone()),
                image_url: self.merged.image_url.clone(),
            },
            None => ProductDraft::from(&self.merged),
        }
    }
}

/// Product as handed to the inventory system.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ProductDraft {
    #[garde(length(min = 1, max = 32))]
    pub barcode: String,

    #[garde(length(min = 1, max = 200))]
    pub name: String,

    #[garde(skip)]
    #[serde(default)]
    pub brand: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub category: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub description: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub image_url: Option<String>,
}

impl From<&LookupResult> for ProductDraft {
    fn from(result: &LookupResult) -> Self {
        Self {
            barcode: result.barcode.clone(),
            name: result
                .name
                .clone()
                .unwrap_or_else(|| result.barcode.clone()),
            brand: result.brand.clone(),
            category: result.category.clone(),
            description: result.description.clone(),
            image_url: result.image_url.clone(),
        }
    }
}
