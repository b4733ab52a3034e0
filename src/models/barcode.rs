use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Symbologies recognised by the scanner front-end.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BarcodeFormat {
    Ean13,
    Ean8,
    UpcA,
    UpcE,
    LocationCode,
}

/// A scanned code that passed validation. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Barcode {
    raw: String,
    format: BarcodeFormat,
    checksum_valid: bool,
    normalized: String,
}

impl Barcode {
    pub(crate) fn new(
        raw: impl Into<String>,
        format: BarcodeFormat,
        checksum_valid: bool,
        normalized: impl Into<String>,
    ) -> Self {
        Self {
            raw: raw.into(),
            format,
            checksum_valid,
            normalized: normalized.into(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn format(&self) -> BarcodeFormat {
        self.format
    }

    /// True for product codes whose scanned check digit verified.
    ///
    /// False for location codes and for six-digit UPC-E input, whose check
    /// digit is inferred during expansion rather than read.
    pub fn checksum_valid(&self) -> bool {
        self.checksum_valid
    }

    /// Canonical form used as cache key and provider query.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn is_product(&self) -> bool {
        self.format != BarcodeFormat::LocationCode
    }

    /// Split a location code into `(area, number)`.
    pub fn location(&self) -> Option<LocationCode> {
        if self.format != BarcodeFormat::LocationCode {
            return None;
        }
        let mut parts = self.normalized.splitn(3, '-').skip(1);
        let area = parts.next()?.to_string();
        let number = parts.next()?.parse().ok()?;
        Some(LocationCode { area, number })
    }
}

impl std::fmt::Display for Barcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Parsed `LOC-<AREA>-<NUMBER>` label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationCode {
    pub area: String,
    pub number: u32,
}
