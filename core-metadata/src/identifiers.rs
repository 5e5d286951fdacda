//! Barcode and recording code validation, plus the text normalization used
//! for `normalizedTitle` / `normalizedName`.

use crate::error::{MetadataError, Result};
use std::fmt;

/// Validated GS1 barcode (EAN-8, UPC-A, EAN-13 or GTIN-14)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gtin(String);

impl Gtin {
    /// Strips whitespace and hyphens, then checks length and the mod-10
    /// check digit.
    ///
    /// ```
    /// use core_metadata::identifiers::Gtin;
    ///
    /// let gtin = Gtin::parse("0 724352 771752").unwrap();
    /// assert_eq!(gtin.as_str(), "0724352771752");
    /// assert!(Gtin::parse("0724352771753").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let digits: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();

        if digits.is_empty() {
            return Err(MetadataError::Validation("GTIN is empty".to_string()));
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MetadataError::Validation(format!(
                "GTIN must contain only digits: {input}"
            )));
        }
        if !matches!(digits.len(), 8 | 12 | 13 | 14) {
            return Err(MetadataError::Validation(format!(
                "GTIN must have 8, 12, 13 or 14 digits, got {}",
                digits.len()
            )));
        }
        if !has_valid_check_digit(&digits) {
            return Err(MetadataError::Validation(format!(
                "GTIN check digit mismatch: {digits}"
            )));
        }

        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Equivalent spellings worth querying: a UPC-A and its zero-padded
    /// EAN-13 form refer to the same product.
    pub fn variants(&self) -> Vec<String> {
        let mut variants = vec![self.0.clone()];
        match self.0.len() {
            12 => variants.push(format!("0{}", self.0)),
            13 if self.0.starts_with('0') => variants.push(self.0[1..].to_string()),
            _ => {}
        }
        variants
    }
}

impl fmt::Display for Gtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn has_valid_check_digit(digits: &str) -> bool {
    let values: Vec<u32> = digits.bytes().map(|b| u32::from(b - b'0')).collect();
    let Some((check, body)) = values.split_last() else {
        return false;
    };

    // Weights alternate 3,1,3,... starting from the digit next to the check digit.
    let sum: u32 = body
        .iter()
        .rev()
        .enumerate()
        .map(|(i, digit)| if i % 2 == 0 { digit * 3 } else { *digit })
        .sum();

    (10 - sum % 10) % 10 == *check
}

/// Validated International Standard Recording Code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Isrc(String);

impl Isrc {
    /// Accepts `CC-XXX-YY-NNNNN` with or without hyphens, any case.
    ///
    /// ```
    /// use core_metadata::identifiers::Isrc;
    ///
    /// assert_eq!(Isrc::parse("us-rc1-76-07839").unwrap().as_str(), "USRC17607839");
    /// assert!(Isrc::parse("USRC1760783").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let code: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect::<String>()
            .to_ascii_uppercase();

        let bytes = code.as_bytes();
        let valid = bytes.len() == 12
            && bytes[..2].iter().all(u8::is_ascii_uppercase)
            && bytes[2..5].iter().all(u8::is_ascii_alphanumeric)
            && bytes[5..].iter().all(u8::is_ascii_digit);

        if !valid {
            return Err(MetadataError::Validation(format!("Invalid ISRC: {input}")));
        }

        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Isrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-cases, drops punctuation and collapses whitespace.
///
/// ```
/// use core_metadata::identifiers::normalize_title;
///
/// assert_eq!(normalize_title("  Hello,   World! (Remastered) "), "hello world remastered");
/// ```
pub fn normalize_title(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keeps the first spelling of each case-insensitively distinct, non-blank
/// entry.
pub fn dedup_case_insensitive<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let trimmed = item.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            out.push(trimmed.to_string());
        }
    }
    out
}
