//! Discogs API client
//!
//! Authenticates with a personal access token
//! (`Authorization: Discogs token=...`). Discogs has no ISRC data and no
//! track search, so those operations answer empty without a request.

use super::{
    parse_clock_duration_ms, url_segments, EntityType, MetadataProvider, ParsedUrl, ProviderAuth,
    ProviderContext, ProviderHttp,
};
use crate::error::{MetadataError, Result};
use crate::identifiers::{dedup_case_insensitive, normalize_title, Gtin, Isrc};
use crate::models::{
    ExternalIds, HarmonizedArtist, HarmonizedArtistCredit, HarmonizedMedium, HarmonizedRelease,
    HarmonizedTrack, PartialDate, ProviderSource, ReleaseType,
};
use async_trait::async_trait;
use bridge_traits::time::Clock;
use core_auth::AuthError;
use core_runtime::config::{RateLimitSettings, DISCOGS};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const DISCOGS_API_BASE: &str = "https://api.discogs.com";
const DISCOGS_WEB_BASE: &str = "https://www.discogs.com";

const DEFAULT_PRIORITY: i32 = 60;

const DEFAULT_QUOTA: RateLimitSettings = RateLimitSettings {
    max_requests: 60,
    window_ms: 60_000,
};

const BARCODE_CANDIDATES: usize = 5;
const LOOKUP_CONFIDENCE: f64 = 0.85;
const SEARCH_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchHit {
    id: u64,
    title: String,
    year: Option<String>,
    uri: Option<String>,
    label: Vec<String>,
    catno: Option<String>,
    barcode: Vec<String>,
    format: Vec<String>,
    genre: Vec<String>,
    style: Vec<String>,
    cover_image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DgRelease {
    id: u64,
    title: String,
    year: Option<i32>,
    released: Option<String>,
    uri: Option<String>,
    artists: Vec<DgArtistCredit>,
    labels: Vec<DgLabel>,
    formats: Vec<DgFormat>,
    genres: Vec<String>,
    styles: Vec<String>,
    tracklist: Vec<DgTrack>,
    identifiers: Vec<DgIdentifier>,
    images: Vec<DgImage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DgArtistCredit {
    id: u64,
    name: String,
    anv: String,
    join: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DgLabel {
    name: String,
    catno: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DgFormat {
    name: String,
    descriptions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DgTrack {
    position: String,
    #[serde(rename = "type_")]
    kind: Option<String>,
    title: String,
    duration: String,
    artists: Vec<DgArtistCredit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DgIdentifier {
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DgImage {
    #[serde(rename = "type")]
    kind: String,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct DgMaster {
    main_release: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DgArtist {
    id: u64,
    name: String,
    uri: Option<String>,
    namevariations: Vec<String>,
    aliases: Vec<DgAlias>,
    images: Vec<DgImage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DgAlias {
    name: String,
}

/// Drops the numeric disambiguation suffix (`Nirvana (2)`) and the trailing
/// `*` Discogs appends to name variations in search titles.
fn strip_disambiguation(name: &str) -> String {
    let name = name.trim().trim_end_matches('*').trim_end();
    if let Some((base, number)) = name
        .strip_suffix(')')
        .and_then(|rest| rest.rfind(" (").map(|at| (&rest[..at], &rest[at + 2..])))
    {
        if !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit()) {
            return base.to_string();
        }
    }
    name.to_string()
}

/// `1997-06-16`, `1997-06-00` and `1997-00-00` carry decreasing precision.
fn release_date(released: Option<&str>, year: Option<i32>) -> Option<PartialDate> {
    let precise = released.and_then(|raw| {
        let known: Vec<&str> = raw
            .trim()
            .split('-')
            .take_while(|part| !part.chars().all(|c| c == '0'))
            .collect();
        PartialDate::parse(&known.join("-"))
    });
    precise.or_else(|| year.filter(|y| *y > 0).map(PartialDate::year))
}

fn release_type<'a>(descriptions: impl Iterator<Item = &'a str>) -> ReleaseType {
    let descriptions: Vec<String> = descriptions.map(str::to_ascii_lowercase).collect();
    let has = |label: &str| descriptions.iter().any(|d| d == label);

    if has("compilation") {
        ReleaseType::Compilation
    } else if has("ep") {
        ReleaseType::Ep
    } else if has("single") {
        ReleaseType::Single
    } else if has("album") || has("lp") {
        ReleaseType::Album
    } else {
        ReleaseType::Other
    }
}

/// `1-3`, `2.05` and `CD2-4` name a disc; plain numbers sit on disc 1.
fn disc_and_number(position: &str) -> Option<(Option<u32>, u32)> {
    let trimmed = position
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_alphabetic());
    if let Some((disc, number)) = trimmed.split_once(|c: char| c == '-' || c == '.') {
        return Some((Some(disc.parse().ok()?), number.parse().ok()?));
    }
    if position.trim().bytes().all(|b| b.is_ascii_digit()) {
        return Some((None, position.trim().parse().ok()?));
    }
    None
}

fn credits(artists: &[DgArtistCredit]) -> Vec<HarmonizedArtistCredit> {
    let count = artists.len();
    artists
        .iter()
        .enumerate()
        .map(|(i, artist)| {
            let join = artist.join.trim();
            HarmonizedArtistCredit {
                name: strip_disambiguation(&artist.name),
                credited_name: (!artist.anv.trim().is_empty()).then(|| artist.anv.trim().to_string()),
                join_phrase: match join {
                    _ if i + 1 == count || join.is_empty() => None,
                    "," => Some(", ".to_string()),
                    other => Some(format!(" {other} ")),
                },
                external_ids: discogs_ids(artist.id),
            }
        })
        .collect()
}

fn discogs_ids(id: u64) -> ExternalIds {
    BTreeMap::from([(DISCOGS.to_string(), id.to_string())])
}

fn primary_image(images: &[DgImage]) -> Option<String> {
    images
        .iter()
        .find(|image| image.kind == "primary")
        .or_else(|| images.first())
        .map(|image| image.uri.clone())
        .filter(|uri| !uri.is_empty())
}

fn web_url(uri: Option<&str>, fallback_path: String) -> String {
    match uri {
        Some(uri) if uri.starts_with("http") => uri.to_string(),
        Some(uri) if uri.starts_with('/') => format!("{DISCOGS_WEB_BASE}{uri}"),
        _ => format!("{DISCOGS_WEB_BASE}/{fallback_path}"),
    }
}

fn first_valid_barcode<'a>(candidates: impl Iterator<Item = &'a str>) -> Option<String> {
    candidates
        .filter_map(|raw| Gtin::parse(raw).ok())
        .map(|gtin| gtin.as_str().to_string())
        .next()
}

/// Discogs provider
pub struct DiscogsProvider {
    http: ProviderHttp,
    clock: Arc<dyn Clock>,
    priority: i32,
}

impl DiscogsProvider {
    pub fn new(ctx: &ProviderContext) -> Result<Self> {
        let Some(token) = ctx.settings.credentials.token.as_deref() else {
            return Err(MetadataError::Auth(AuthError::MissingCredentials(
                "discogs requires a personal access token".to_string(),
            )));
        };

        let http = ctx
            .http_for(DISCOGS, DISCOGS_API_BASE, DEFAULT_QUOTA)
            .with_auth(ProviderAuth::StaticToken(format!("Discogs token={token}")));

        Ok(Self {
            http,
            clock: Arc::clone(&ctx.clock),
            priority: ctx.priority_or(DEFAULT_PRIORITY),
        })
    }

    fn source(&self, id: u64, url: String) -> ProviderSource {
        ProviderSource::new(DISCOGS, id.to_string(), Some(url), self.clock.now())
    }

    fn normalize_release(&self, release: DgRelease) -> HarmonizedRelease {
        let format = release.formats.first().map(|f| f.name.clone()).filter(|n| !n.is_empty());

        let mut discs: BTreeMap<u32, Vec<HarmonizedTrack>> = BTreeMap::new();
        for track in release
            .tracklist
            .iter()
            .filter(|t| t.kind.as_deref().map_or(true, |kind| kind == "track"))
        {
            let (disc, number) = match disc_and_number(&track.position) {
                Some((disc, number)) => (disc.unwrap_or(1), number),
                None => (1, discs.get(&1).map_or(0, Vec::len) as u32 + 1),
            };
            discs.entry(disc).or_default().push(HarmonizedTrack {
                title: track.title.clone(),
                normalized_title: normalize_title(&track.title),
                position: Some(number),
                disc_number: Some(disc),
                duration_ms: parse_clock_duration_ms(&track.duration),
                artists: credits(&track.artists),
                confidence: LOOKUP_CONFIDENCE,
                ..Default::default()
            });
        }
        let media = discs
            .into_iter()
            .map(|(position, tracks)| HarmonizedMedium {
                position,
                format: format.clone(),
                tracks,
            })
            .collect();

        let label = release.labels.first();
        let url = web_url(release.uri.as_deref(), format!("release/{}", release.id));

        HarmonizedRelease {
            normalized_title: normalize_title(&release.title),
            release_type: release_type(
                release
                    .formats
                    .iter()
                    .flat_map(|f| f.descriptions.iter().map(String::as_str)),
            ),
            gtin: first_valid_barcode(
                release
                    .identifiers
                    .iter()
                    .filter(|id| id.kind.eq_ignore_ascii_case("barcode"))
                    .map(|id| id.value.as_str()),
            ),
            release_date: release_date(release.released.as_deref(), release.year),
            label: label.map(|l| strip_disambiguation(&l.name)),
            catalog_number: label
                .map(|l| l.catno.trim().to_string())
                .filter(|catno| !catno.is_empty() && !catno.eq_ignore_ascii_case("none")),
            artists: credits(&release.artists),
            media,
            genres: dedup_case_insensitive(release.genres.iter().chain(release.styles.iter())),
            artwork_url: primary_image(&release.images),
            external_ids: discogs_ids(release.id),
            sources: vec![self.source(release.id, url)],
            confidence: LOOKUP_CONFIDENCE,
            title: release.title,
        }
    }

    fn normalize_hit(&self, hit: SearchHit) -> HarmonizedRelease {
        let (artist, title) = match hit.title.split_once(" - ") {
            Some((artist, title)) => (Some(strip_disambiguation(artist)), title.trim().to_string()),
            None => (None, hit.title.trim().to_string()),
        };
        let url = web_url(hit.uri.as_deref(), format!("release/{}", hit.id));

        HarmonizedRelease {
            normalized_title: normalize_title(&title),
            title,
            release_type: release_type(hit.format.iter().map(String::as_str)),
            gtin: first_valid_barcode(hit.barcode.iter().map(String::as_str)),
            release_date: hit
                .year
                .as_deref()
                .and_then(|year| year.trim().parse::<i32>().ok())
                .filter(|year| *year > 0)
                .map(PartialDate::year),
            label: hit.label.first().map(|l| strip_disambiguation(l)),
            catalog_number: hit.catno.filter(|c| !c.trim().is_empty()),
            artists: artist.map(HarmonizedArtistCredit::new).into_iter().collect(),
            media: Vec::new(),
            genres: dedup_case_insensitive(hit.genre.iter().chain(hit.style.iter())),
            artwork_url: hit.cover_image.filter(|uri| !uri.is_empty()),
            external_ids: discogs_ids(hit.id),
            sources: vec![self.source(hit.id, url)],
            confidence: SEARCH_CONFIDENCE,
        }
    }

    fn normalize_artist(&self, artist: DgArtist, confidence: f64) -> HarmonizedArtist {
        let name = strip_disambiguation(&artist.name);
        let url = web_url(artist.uri.as_deref(), format!("artist/{}", artist.id));
        let aliases = dedup_case_insensitive(
            artist
                .namevariations
                .iter()
                .map(String::as_str)
                .chain(artist.aliases.iter().map(|a| a.name.as_str()))
                .map(strip_disambiguation)
                .filter(|alias| !alias.eq_ignore_ascii_case(&name)),
        );

        HarmonizedArtist {
            normalized_name: normalize_title(&name),
            aliases,
            image_url: primary_image(&artist.images),
            external_ids: discogs_ids(artist.id),
            sources: vec![self.source(artist.id, url)],
            confidence,
            name,
            ..Default::default()
        }
    }

    fn require_numeric(id: &str) -> Result<()> {
        if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
            Ok(())
        } else {
            Err(MetadataError::Validation(format!("Not a Discogs identifier: {id}")))
        }
    }

    async fn search(&self, operation: &str, params: &str) -> Result<Vec<SearchHit>> {
        Ok(self
            .http
            .get_json::<SearchResponse>(operation, &format!("database/search?{params}"))
            .await?
            .map(|response| response.results)
            .unwrap_or_default())
    }

    async fn lookup_master(&self, id: &str) -> Result<Option<HarmonizedRelease>> {
        Self::require_numeric(id)?;
        let Some(master) = self
            .http
            .get_json::<DgMaster>("lookup_master", &format!("masters/{id}"))
            .await?
        else {
            return Ok(None);
        };
        debug!(master = id, main_release = master.main_release, "Resolved Discogs master");
        self.lookup_release_by_id(&master.main_release.to_string()).await
    }
}

#[async_trait]
impl MetadataProvider for DiscogsProvider {
    fn name(&self) -> &str {
        DISCOGS
    }

    fn display_name(&self) -> &str {
        "Discogs"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn parse_url(&self, url: &str) -> Option<ParsedUrl> {
        let segments = url_segments(url, "discogs.com")?;
        let at = segments
            .iter()
            .position(|s| matches!(s.as_str(), "release" | "master" | "artist"))?;
        let entity_type = match segments[at].as_str() {
            "release" => EntityType::Release,
            "master" => EntityType::ReleaseGroup,
            _ => EntityType::Artist,
        };

        let id: String = segments
            .get(at + 1)?
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        (!id.is_empty()).then(|| ParsedUrl::new(entity_type, id))
    }

    async fn lookup_by_url(&self, url: &str) -> Result<Option<HarmonizedRelease>> {
        let parsed = self.parse_url(url).ok_or_else(|| {
            MetadataError::Validation(format!("discogs cannot handle URL {url}"))
        })?;
        match parsed.entity_type {
            EntityType::Release => self.lookup_release_by_id(&parsed.id).await,
            EntityType::ReleaseGroup => self.lookup_master(&parsed.id).await,
            other => Err(MetadataError::Validation(format!(
                "Discogs URL points to a {other}, not a release: {url}"
            ))),
        }
    }

    async fn lookup_by_gtin(&self, gtin: &Gtin) -> Result<Option<HarmonizedRelease>> {
        for barcode in gtin.variants() {
            let params = format!("barcode={barcode}&type=release&per_page={BARCODE_CANDIDATES}");
            let hits = self.search("lookup_by_gtin", &params).await?;

            if let Some(hit) = hits.first() {
                return self.lookup_release_by_id(&hit.id.to_string()).await;
            }
            debug!(barcode = %barcode, "No Discogs release for barcode variant");
        }

        debug!(gtin = %gtin, "No Discogs release for barcode");
        Ok(None)
    }

    async fn lookup_release_by_id(&self, id: &str) -> Result<Option<HarmonizedRelease>> {
        Self::require_numeric(id)?;
        Ok(self
            .http
            .get_json::<DgRelease>("lookup_release", &format!("releases/{id}"))
            .await?
            .map(|release| self.normalize_release(release)))
    }

    async fn lookup_by_isrc(&self, _isrc: &Isrc) -> Result<Option<HarmonizedTrack>> {
        Ok(None)
    }

    async fn lookup_artist(&self, id: &str) -> Result<Option<HarmonizedArtist>> {
        Self::require_numeric(id)?;
        Ok(self
            .http
            .get_json::<DgArtist>("lookup_artist", &format!("artists/{id}"))
            .await?
            .map(|artist| self.normalize_artist(artist, LOOKUP_CONFIDENCE)))
    }

    async fn search_releases(&self, query: &str, limit: usize) -> Result<Vec<HarmonizedRelease>> {
        let params = format!(
            "q={}&type=release&per_page={}",
            urlencoding::encode(query.trim()),
            limit
        );
        let hits = self.search("search_releases", &params).await?;

        Ok(hits
            .into_iter()
            .take(limit)
            .map(|hit| self.normalize_hit(hit))
            .collect())
    }

    async fn search_tracks(&self, _query: &str, _limit: usize) -> Result<Vec<HarmonizedTrack>> {
        Ok(Vec::new())
    }

    async fn search_artists(&self, query: &str, limit: usize) -> Result<Vec<HarmonizedArtist>> {
        let params = format!(
            "q={}&type=artist&per_page={}",
            urlencoding::encode(query.trim()),
            limit
        );
        let hits = self.search("search_artists", &params).await?;

        Ok(hits
            .into_iter()
            .take(limit)
            .map(|hit| {
                let artist = DgArtist {
                    id: hit.id,
                    name: hit.title,
                    uri: hit.uri,
                    images: hit
                        .cover_image
                        .map(|uri| DgImage {
                            kind: "primary".to_string(),
                            uri,
                        })
                        .into_iter()
                        .collect(),
                    ..Default::default()
                };
                self.normalize_artist(artist, SEARCH_CONFIDENCE)
            })
            .collect())
    }
}
