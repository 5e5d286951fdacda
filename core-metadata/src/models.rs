//! Provider-agnostic entity snapshots
//!
//! Every provider normalizes its payloads into these types. They serialize
//! with camelCase field names and round-trip through the snapshot cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ProviderFailure;

/// Provider name → provider-native identifier
pub type ExternalIds = BTreeMap<String, String>;

/// Provenance of one provider's contribution to an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSource {
    pub provider: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl ProviderSource {
    pub fn new(
        provider: impl Into<String>,
        id: impl Into<String>,
        url: Option<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider: provider.into(),
            id: id.into(),
            url,
            fetched_at,
        }
    }

    /// Identity used for deduplication and merge ordering
    pub fn key(&self) -> (&str, &str) {
        (self.provider.as_str(), self.id.as_str())
    }
}

/// Date with optional month and day precision.
///
/// A day is never kept without a month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartialDate {
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u8>,
}

impl PartialDate {
    pub fn year(year: i32) -> Self {
        Self {
            year,
            month: None,
            day: None,
        }
    }

    /// Parses `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
    ///
    /// Returns `None` for anything else, including out-of-range months
    /// (1-12) and days (1-31).
    ///
    /// ```
    /// use core_metadata::models::PartialDate;
    ///
    /// let date = PartialDate::parse("1997-05").unwrap();
    /// assert_eq!(date.year, 1997);
    /// assert_eq!(date.month, Some(5));
    /// assert_eq!(date.day, None);
    ///
    /// assert!(PartialDate::parse("1997-13-01").is_none());
    /// ```
    pub fn parse(input: &str) -> Option<Self> {
        let mut parts = input.trim().split('-');

        let year_part = parts.next()?;
        if year_part.len() != 4 || !year_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year: i32 = year_part.parse().ok()?;

        let month = match parts.next() {
            Some(raw) => Some(parse_component(raw, 12)?),
            None => None,
        };
        let day = match parts.next() {
            Some(raw) => Some(parse_component(raw, 31)?),
            None => None,
        };
        if parts.next().is_some() {
            return None;
        }

        Some(Self { year, month, day })
    }
}

fn parse_component(raw: &str, max: u8) -> Option<u8> {
    if raw.len() != 2 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u8 = raw.parse().ok()?;
    (1..=max).contains(&value).then_some(value)
}

impl fmt::Display for PartialDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year)?;
        if let Some(month) = self.month {
            write!(f, "-{:02}", month)?;
            if let Some(day) = self.day {
                write!(f, "-{:02}", day)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    Album,
    Single,
    Ep,
    Compilation,
    #[default]
    Other,
}

impl ReleaseType {
    /// Maps a provider's free-form type label, case-insensitively.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "album" | "lp" => ReleaseType::Album,
            "single" => ReleaseType::Single,
            "ep" => ReleaseType::Ep,
            "compilation" => ReleaseType::Compilation,
            _ => ReleaseType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarmonizedArtistCredit {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credited_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_phrase: Option<String>,
    #[serde(default)]
    pub external_ids: ExternalIds,
}

impl HarmonizedArtistCredit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_external_id(mut self, provider: &str, id: impl Into<String>) -> Self {
        self.external_ids.insert(provider.to_string(), id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarmonizedTrack {
    pub title: String,
    pub normalized_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disc_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub artists: Vec<HarmonizedArtistCredit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<PartialDate>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub external_ids: ExternalIds,
    #[serde(default)]
    pub sources: Vec<ProviderSource>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarmonizedMedium {
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub tracks: Vec<HarmonizedTrack>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarmonizedRelease {
    pub title: String,
    pub normalized_title: String,
    #[serde(default)]
    pub release_type: ReleaseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<PartialDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_number: Option<String>,
    #[serde(default)]
    pub artists: Vec<HarmonizedArtistCredit>,
    #[serde(default)]
    pub media: Vec<HarmonizedMedium>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub external_ids: ExternalIds,
    #[serde(default)]
    pub sources: Vec<ProviderSource>,
    pub confidence: f64,
}

impl HarmonizedRelease {
    pub fn track_count(&self) -> usize {
        self.media.iter().map(|medium| medium.tracks.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarmonizedArtist {
    pub name: String,
    pub normalized_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub external_ids: ExternalIds,
    #[serde(default)]
    pub sources: Vec<ProviderSource>,
    pub confidence: f64,
}

/// Accessors shared by the three top-level entities
pub trait Harmonized: Clone + Send + Sync {
    fn confidence(&self) -> f64;
    fn set_confidence(&mut self, confidence: f64);
    fn sources(&self) -> &[ProviderSource];
    fn sources_mut(&mut self) -> &mut Vec<ProviderSource>;
    fn external_ids_mut(&mut self) -> &mut ExternalIds;
    fn external_ids(&self) -> &ExternalIds;
}

macro_rules! impl_harmonized {
    ($($entity:ty),+) => {
        $(
            impl Harmonized for $entity {
                fn confidence(&self) -> f64 {
                    self.confidence
                }

                fn set_confidence(&mut self, confidence: f64) {
                    self.confidence = confidence;
                }

                fn sources(&self) -> &[ProviderSource] {
                    &self.sources
                }

                fn sources_mut(&mut self) -> &mut Vec<ProviderSource> {
                    &mut self.sources
                }

                fn external_ids_mut(&mut self) -> &mut ExternalIds {
                    &mut self.external_ids
                }

                fn external_ids(&self) -> &ExternalIds {
                    &self.external_ids
                }
            }
        )+
    };
}

impl_harmonized!(HarmonizedRelease, HarmonizedTrack, HarmonizedArtist);

/// Envelope returned by every lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResult<T> {
    pub data: Option<T>,
    pub sources: Vec<ProviderSource>,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub errors: Vec<ProviderFailure>,
}

impl<T: Harmonized> LookupResult<T> {
    pub fn from_cache(data: T, timestamp: DateTime<Utc>) -> Self {
        Self {
            sources: data.sources().to_vec(),
            data: Some(data),
            cached: true,
            timestamp,
            errors: Vec::new(),
        }
    }

    pub fn fresh(data: Option<T>, errors: Vec<ProviderFailure>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sources: data
                .as_ref()
                .map(|entity| entity.sources().to_vec())
                .unwrap_or_default(),
            data,
            cached: false,
            timestamp,
            errors,
        }
    }
}

/// Concatenated search hits plus per-provider failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult<T> {
    pub results: Vec<T>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub errors: Vec<ProviderFailure>,
}
