//! Sample codes and provider payloads shared by the integration tests.

use barcode_intake::services::providers::ProviderHit;

/// Valid EAN-13 (Faber-Castell pencil).
pub const EAN13: &str = "4006381333931";

/// Second valid EAN-13, for tests needing distinct keys.
pub const EAN13_OTHER: &str = "5901234123457";

/// Valid UPC-A; normalizes to `UPCA_NORMALIZED`.
pub const UPCA: &str = "036000291452";
pub const UPCA_NORMALIZED: &str = "0036000291452";

/// EAN-13 with a wrong check digit.
pub const BAD_CHECKSUM: &str = "4006381333932";

pub const LOCATION: &str = "LOC-PANTRY-12";

pub fn hit(name: Option<&str>, brand: Option<&str>, image_url: Option<&str>) -> ProviderHit {
    ProviderHit {
        name: name.map(str::to_string),
        brand: brand.map(str::to_string),
        category: None,
        description: None,
        image_url: image_url.map(str::to_string),
        raw: serde_json::json!({ "name": name }),
    }
}

pub fn named(name: &str) -> ProviderHit {
    hit(Some(name), None, None)
}
