//! Barcode format and check-digit validation.
//!
//! Product codes are verified with the GS1 weighted modulo-10 check digit.
//! `LOC-<AREA>-<NUMBER>` shelf labels are recognised as a separate format and
//! carry no checksum.

use crate::models::barcode::{Barcode, BarcodeFormat};

const LOCATION_PREFIX: &str = "LOC-";
const MAX_AREA_LEN: usize = 16;
const MAX_LOCATION_NUMBER_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarcodeError {
    #[error("Barcode is empty")]
    Empty,

    #[error("Barcode contains non-digit characters: {0}")]
    NonNumeric(String),

    #[error("Unsupported barcode length {0}")]
    UnsupportedLength(usize),

    #[error("Check digit mismatch for {format}: expected {expected}, found {found}")]
    ChecksumMismatch {
        format: BarcodeFormat,
        expected: u8,
        found: u8,
    },

    #[error("Malformed location code: {0}")]
    MalformedLocation(String),
}

/// Validate a raw scanned string and detect its format.
pub fn validate_barcode(raw: &str) -> Result<Barcode, BarcodeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(BarcodeError::Empty);
    }

    if trimmed
        .get(..LOCATION_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(LOCATION_PREFIX))
    {
        return parse_location(raw, trimmed);
    }

    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BarcodeError::NonNumeric(trimmed.to_string()));
    }
    let digits: Vec<u8> = trimmed.bytes().map(|b| b - b'0').collect();

    match digits.len() {
        13 => {
            verify_gtin(&digits, BarcodeFormat::Ean13)?;
            Ok(Barcode::new(raw, BarcodeFormat::Ean13, true, trimmed))
        }
        12 => {
            verify_gtin(&digits, BarcodeFormat::UpcA)?;
            Ok(Barcode::new(
                raw,
                BarcodeFormat::UpcA,
                true,
                format!("0{}", trimmed),
            ))
        }
        8 => match verify_gtin(&digits, BarcodeFormat::Ean8) {
            Ok(()) => Ok(Barcode::new(raw, BarcodeFormat::Ean8, true, trimmed)),
            Err(ean_err) if digits[0] <= 1 => {
                // Number system 0/1 codes may be zero-suppressed UPC-E instead.
                validate_upc_e(raw, &digits).map_err(|_| ean_err)
            }
            Err(e) => Err(e),
        },
        7 => {
            let mut full = vec![0];
            full.extend_from_slice(&digits);
            validate_upc_e(raw, &full)
        }
        6 => {
            let mut body = vec![0];
            body.extend_from_slice(&digits);
            let expanded = expand_upc_e(&body);
            let check = gtin_check_digit(&expanded);
            body.push(check);
            // No check digit was scanned, so none was verified.
            validate_upc_e(raw, &body)
                .map(|b| Barcode::new(b.raw(), b.format(), false, b.normalized()))
        }
        n => Err(BarcodeError::UnsupportedLength(n)),
    }
}

/// Check digit for a GTIN body (all digits except the check digit).
///
/// Weights alternate 3,1,3,... starting from the digit next to the check digit,
/// which covers EAN-13, UPC-A and EAN-8 alike.
pub fn gtin_check_digit(body: &[u8]) -> u8 {
    let sum: u32 = body
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| u32::from(d) * if i % 2 == 0 { 3 } else { 1 })
        .sum();
    ((10 - (sum % 10)) % 10) as u8
}

fn verify_gtin(digits: &[u8], format: BarcodeFormat) -> Result<(), BarcodeError> {
    let (body, check) = digits.split_at(digits.len() - 1);
    let expected = gtin_check_digit(body);
    if expected != check[0] {
        return Err(BarcodeError::ChecksumMismatch {
            format,
            expected,
            found: check[0],
        });
    }
    Ok(())
}

/// Validate an 8-digit UPC-E (number system, six data digits, check digit).
fn validate_upc_e(raw: &str, digits: &[u8]) -> Result<Barcode, BarcodeError> {
    if digits.len() != 8 || digits[0] > 1 {
        return Err(BarcodeError::UnsupportedLength(digits.len()));
    }
    let upc_a_body = expand_upc_e(&digits[..7]);
    let expected = gtin_check_digit(&upc_a_body);
    let found = digits[7];
    if expected != found {
        return Err(BarcodeError::ChecksumMismatch {
            format: BarcodeFormat::UpcE,
            expected,
            found,
        });
    }
    let normalized: String = std::iter::once(0)
        .chain(upc_a_body)
        .chain(std::iter::once(found))
        .map(|d| char::from(b'0' + d))
        .collect();
    Ok(Barcode::new(raw, BarcodeFormat::UpcE, true, normalized))
}

/// Expand number system + six UPC-E data digits into the 11-digit UPC-A body.
fn expand_upc_e(ns_and_data: &[u8]) -> Vec<u8> {
    let ns = ns_and_data[0];
    let d = &ns_and_data[1..7];
    let mut out = Vec::with_capacity(11);
    out.push(ns);
    match d[5] {
        0..=2 => {
            out.extend_from_slice(&[d[0], d[1], d[5], 0, 0, 0, 0, d[2], d[3], d[4]]);
        }
        3 => {
            out.extend_from_slice(&[d[0], d[1], d[2], 0, 0, 0, 0, 0, d[3], d[4]]);
        }
        4 => {
            out.extend_from_slice(&[d[0], d[1], d[2], d[3], 0, 0, 0, 0, 0, d[4]]);
        }
        _ => {
            out.extend_from_slice(&[d[0], d[1], d[2], d[3], d[4], 0, 0, 0, 0, d[5]]);
        }
    }
    out
}

fn parse_location(raw: &str, trimmed: &str) -> Result<Barcode, BarcodeError> {
    let malformed = || BarcodeError::MalformedLocation(trimmed.to_string());
    let upper = trimmed.to_ascii_uppercase();
    let rest = &upper[LOCATION_PREFIX.len()..];
    let (area, number) = rest.split_once('-').ok_or_else(malformed)?;

    let area_ok = !area.is_empty()
        && area.len() <= MAX_AREA_LEN
        && area.bytes().all(|b| b.is_ascii_alphanumeric());
    let number_ok = !number.is_empty()
        && number.len() <= MAX_LOCATION_NUMBER_LEN
        && number.bytes().all(|b| b.is_ascii_digit());
    if !area_ok || !number_ok {
        return Err(malformed());
    }

    Ok(Barcode::new(raw, BarcodeFormat::LocationCode, false, upper))
}
