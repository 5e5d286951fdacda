//! MusicBrainz API Client
//!
//! ## API Endpoints
//!
//! - **Barcode search**: `https://musicbrainz.org/ws/2/release?query=barcode:{gtin}&fmt=json`
//! - **Release**: `https://musicbrainz.org/ws/2/release/{mbid}?inc=recordings+isrcs+...&fmt=json`
//! - **ISRC**: `https://musicbrainz.org/ws/2/isrc/{isrc}?inc=artist-credits+releases&fmt=json`
//! - **Artist**: `https://musicbrainz.org/ws/2/artist/{mbid}?inc=aliases+genres&fmt=json`
//! - **Release group**: `https://musicbrainz.org/ws/2/release-group/{mbid}?inc=releases&fmt=json`
//! - **Search**: `https://musicbrainz.org/ws/2/{release|recording|artist}?query={lucene}&fmt=json`
//! - **Cover Art**: `https://coverartarchive.org/release/{mbid}/front`
//!
//! ## Rate Limiting
//!
//! MusicBrainz allows 1 request per second per client. The default quota
//! matches that; exceeding it gets the client throttled with 503s.
//!
//! ## User Agent Requirement
//!
//! MusicBrainz requires all API clients to identify themselves with a proper User-Agent header:
//! Format: "ApplicationName/Version (ContactEmail)"
//! Example: "MyMusicApp/1.0 (contact@example.com)"

use super::{url_segments, EntityType, MetadataProvider, ParsedUrl, ProviderContext, ProviderHttp};
use crate::error::{MetadataError, Result};
use crate::identifiers::{dedup_case_insensitive, normalize_title, Gtin, Isrc};
use crate::models::{
    HarmonizedArtist, HarmonizedArtistCredit, HarmonizedMedium, HarmonizedRelease,
    HarmonizedTrack, PartialDate, ProviderSource, ReleaseType,
};
use async_trait::async_trait;
use bridge_traits::time::Clock;
use core_runtime::config::{RateLimitSettings, MUSICBRAINZ};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// MusicBrainz API base URL
const MUSICBRAINZ_API_BASE: &str = "https://musicbrainz.org/ws/2";

const MUSICBRAINZ_WEB_BASE: &str = "https://musicbrainz.org";

/// Cover Art Archive base URL
const COVERART_ARCHIVE_BASE: &str = "https://coverartarchive.org";

const DEFAULT_PRIORITY: i32 = 100;

const DEFAULT_QUOTA: RateLimitSettings = RateLimitSettings {
    max_requests: 1,
    window_ms: 1000,
};

/// Candidates fetched when resolving a barcode
const BARCODE_CANDIDATES: usize = 5;

const RELEASE_INCLUDES: &str = "recordings+isrcs+artist-credits+labels+genres+release-groups";

/// Exact identifier lookups are authoritative.
const LOOKUP_CONFIDENCE: f64 = 1.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ReleaseSearch {
    #[serde(default)]
    releases: Vec<MbRelease>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MbRelease {
    id: String,
    title: String,
    #[serde(default)]
    score: Option<u32>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    barcode: Option<String>,
    #[serde(default)]
    release_group: Option<MbReleaseGroup>,
    #[serde(default)]
    artist_credit: Vec<MbCredit>,
    #[serde(default)]
    label_info: Vec<MbLabelInfo>,
    #[serde(default)]
    media: Vec<MbMedium>,
    #[serde(default)]
    genres: Vec<MbGenre>,
    #[serde(default)]
    cover_art_archive: Option<MbCoverArt>,
}

/// Release group with its member releases
#[derive(Debug, Deserialize)]
struct MbReleaseGroupReleases {
    #[serde(default)]
    releases: Vec<MbReleaseRef>,
}

#[derive(Debug, Deserialize)]
struct MbReleaseRef {
    id: String,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MbReleaseGroup {
    #[serde(default)]
    primary_type: Option<String>,
    #[serde(default)]
    secondary_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MbCredit {
    name: String,
    #[serde(default)]
    joinphrase: String,
    artist: MbArtistRef,
}

#[derive(Debug, Deserialize)]
struct MbArtistRef {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MbLabelInfo {
    #[serde(default)]
    catalog_number: Option<String>,
    #[serde(default)]
    label: Option<MbLabel>,
}

#[derive(Debug, Deserialize)]
struct MbLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MbMedium {
    #[serde(default)]
    position: Option<u32>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    tracks: Vec<MbTrack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MbTrack {
    id: String,
    title: String,
    #[serde(default)]
    position: Option<u32>,
    #[serde(default)]
    length: Option<u64>,
    #[serde(default)]
    recording: Option<MbRecording>,
    #[serde(default)]
    artist_credit: Vec<MbCredit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MbRecording {
    id: String,
    title: String,
    #[serde(default)]
    score: Option<u32>,
    #[serde(default)]
    length: Option<u64>,
    #[serde(default)]
    isrcs: Vec<String>,
    #[serde(default)]
    artist_credit: Vec<MbCredit>,
    #[serde(default)]
    releases: Vec<MbRecordingReleaseRef>,
    #[serde(default)]
    genres: Vec<MbGenre>,
}

#[derive(Debug, Deserialize)]
struct MbRecordingReleaseRef {
    title: String,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MbGenre {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MbCoverArt {
    #[serde(default)]
    front: bool,
}

#[derive(Debug, Deserialize)]
struct RecordingList {
    #[serde(default)]
    recordings: Vec<MbRecording>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MbArtist {
    id: String,
    name: String,
    #[serde(default)]
    score: Option<u32>,
    #[serde(default)]
    sort_name: Option<String>,
    #[serde(default, rename = "type")]
    artist_type: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    aliases: Vec<MbAlias>,
    #[serde(default)]
    genres: Vec<MbGenre>,
}

#[derive(Debug, Deserialize)]
struct MbAlias {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ArtistSearch {
    #[serde(default)]
    artists: Vec<MbArtist>,
}

/// MusicBrainz provider
///
/// Unauthenticated; identifies itself through the configured User-Agent.
pub struct MusicBrainzProvider {
    http: ProviderHttp,
    clock: Arc<dyn Clock>,
    priority: i32,
}

impl MusicBrainzProvider {
    pub fn new(ctx: &ProviderContext) -> Result<Self> {
        let http = ctx.http_for(MUSICBRAINZ, MUSICBRAINZ_API_BASE, DEFAULT_QUOTA);
        Ok(Self {
            http,
            clock: Arc::clone(&ctx.clock),
            priority: ctx.priority_or(DEFAULT_PRIORITY),
        })
    }

    fn source(&self, entity: &str, id: &str) -> ProviderSource {
        ProviderSource::new(
            MUSICBRAINZ,
            id,
            Some(format!("{MUSICBRAINZ_WEB_BASE}/{entity}/{id}")),
            self.clock.now(),
        )
    }

    fn normalize_release(&self, release: MbRelease, confidence: f64) -> HarmonizedRelease {
        let artists = credits(&release.artist_credit);

        let release_type = match &release.release_group {
            Some(group) if group.secondary_types.iter().any(|t| t.eq_ignore_ascii_case("compilation")) => {
                ReleaseType::Compilation
            }
            Some(group) => group
                .primary_type
                .as_deref()
                .map(ReleaseType::from_label)
                .unwrap_or_default(),
            None => ReleaseType::Other,
        };

        let label = release
            .label_info
            .iter()
            .find_map(|info| info.label.as_ref().map(|l| l.name.clone()));
        let catalog_number = release
            .label_info
            .iter()
            .filter_map(|info| info.catalog_number.clone())
            .find(|catno| !catno.trim().is_empty());

        let media = release
            .media
            .into_iter()
            .enumerate()
            .map(|(i, medium)| {
                let disc = medium.position.unwrap_or(i as u32 + 1);
                let tracks = medium
                    .tracks
                    .into_iter()
                    .enumerate()
                    .map(|(j, track)| media_track(track, disc, j as u32 + 1, confidence))
                    .collect();
                HarmonizedMedium {
                    position: disc,
                    format: medium.format,
                    tracks,
                }
            })
            .collect();

        let artwork_url = release
            .cover_art_archive
            .as_ref()
            .filter(|art| art.front)
            .map(|_| format!("{COVERART_ARCHIVE_BASE}/release/{}/front", release.id));

        let mut external_ids = crate::models::ExternalIds::new();
        external_ids.insert(MUSICBRAINZ.to_string(), release.id.clone());

        HarmonizedRelease {
            normalized_title: normalize_title(&release.title),
            title: release.title,
            release_type,
            gtin: release.barcode.filter(|b| !b.trim().is_empty()),
            release_date: release.date.as_deref().and_then(PartialDate::parse),
            label,
            catalog_number,
            artists,
            media,
            genres: dedup_case_insensitive(release.genres.iter().map(|g| g.name.as_str())),
            artwork_url,
            external_ids,
            sources: vec![self.source("release", &release.id)],
            confidence,
        }
    }

    fn normalize_recording(
        &self,
        recording: MbRecording,
        isrc: Option<&Isrc>,
        confidence: f64,
    ) -> HarmonizedTrack {
        let first_release = recording.releases.first();
        let mut external_ids = crate::models::ExternalIds::new();
        external_ids.insert(MUSICBRAINZ.to_string(), recording.id.clone());

        HarmonizedTrack {
            normalized_title: normalize_title(&recording.title),
            isrc: isrc
                .map(|code| code.as_str().to_string())
                .or_else(|| recording.isrcs.first().cloned()),
            position: None,
            disc_number: None,
            duration_ms: recording.length,
            artists: credits(&recording.artist_credit),
            release_title: first_release.map(|r| r.title.clone()),
            release_date: first_release
                .and_then(|r| r.date.as_deref())
                .and_then(PartialDate::parse),
            genres: dedup_case_insensitive(recording.genres.iter().map(|g| g.name.as_str())),
            external_ids,
            sources: vec![self.source("recording", &recording.id)],
            confidence,
            title: recording.title,
        }
    }

    fn normalize_artist(&self, artist: MbArtist, confidence: f64) -> HarmonizedArtist {
        let mut external_ids = crate::models::ExternalIds::new();
        external_ids.insert(MUSICBRAINZ.to_string(), artist.id.clone());

        HarmonizedArtist {
            normalized_name: normalize_title(&artist.name),
            sort_name: artist.sort_name,
            artist_type: artist.artist_type,
            country: artist.country,
            aliases: dedup_case_insensitive(artist.aliases.iter().map(|a| a.name.as_str())),
            genres: dedup_case_insensitive(artist.genres.iter().map(|g| g.name.as_str())),
            image_url: None,
            external_ids,
            sources: vec![self.source("artist", &artist.id)],
            confidence,
            name: artist.name,
        }
    }

    /// Resolves a release group to its earliest dated release. Undated
    /// releases only win when no release carries a date.
    async fn lookup_release_group(&self, id: &str) -> Result<Option<HarmonizedRelease>> {
        Self::require_mbid(id)?;
        let path = format!("release-group/{id}?inc=releases&fmt=json");
        let Some(group) = self
            .http
            .get_json::<MbReleaseGroupReleases>("lookup_release_group", &path)
            .await?
        else {
            return Ok(None);
        };

        let earliest = group
            .releases
            .iter()
            .filter_map(|release| {
                let date = PartialDate::parse(release.date.as_deref()?)?;
                Some((date, release))
            })
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, release)| release)
            .or_else(|| group.releases.first());

        match earliest {
            Some(release) => {
                debug!(group = id, release = %release.id, "Resolved MusicBrainz release group");
                self.lookup_release_by_id(&release.id).await
            }
            None => Ok(None),
        }
    }

    fn require_mbid(id: &str) -> Result<()> {
        if is_mbid(id) {
            Ok(())
        } else {
            Err(MetadataError::Validation(format!(
                "Not a MusicBrainz identifier: {id}"
            )))
        }
    }

    /// Escapes special characters in Lucene query syntax
    fn escape_query(s: &str) -> String {
        // Escape special Lucene characters: + - && || ! ( ) { } [ ] ^ " ~ * ? : \ / .
        s.replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('+', "\\+")
            .replace('-', "\\-")
            .replace('!', "\\!")
            .replace('(', "\\(")
            .replace(')', "\\)")
            .replace('{', "\\{")
            .replace('}', "\\}")
            .replace('[', "\\[")
            .replace(']', "\\]")
            .replace('^', "\\^")
            .replace('~', "\\~")
            .replace('*', "\\*")
            .replace('?', "\\?")
            .replace(':', "\\:")
            .replace('/', "\\/")
            .replace('.', "\\.")
    }

    fn search_path(entity: &str, query: &str, limit: usize) -> String {
        format!(
            "{entity}?query={}&limit={}&fmt=json",
            urlencoding::encode(&Self::escape_query(query)),
            limit
        )
    }
}

fn score_confidence(score: Option<u32>) -> f64 {
    score.map(|s| (f64::from(s) / 100.0).clamp(0.0, 1.0)).unwrap_or(0.5)
}

fn credits(credits: &[MbCredit]) -> Vec<HarmonizedArtistCredit> {
    credits
        .iter()
        .map(|credit| HarmonizedArtistCredit {
            name: credit.artist.name.clone(),
            credited_name: (credit.name != credit.artist.name).then(|| credit.name.clone()),
            join_phrase: (!credit.joinphrase.is_empty()).then(|| credit.joinphrase.clone()),
            external_ids: [(MUSICBRAINZ.to_string(), credit.artist.id.clone())]
                .into_iter()
                .collect(),
        })
        .collect()
}

fn media_track(track: MbTrack, disc: u32, fallback_position: u32, confidence: f64) -> HarmonizedTrack {
    let recording = track.recording;
    let mut artists = credits(&track.artist_credit);
    if artists.is_empty() {
        if let Some(recording) = &recording {
            artists = credits(&recording.artist_credit);
        }
    }

    let mut external_ids = crate::models::ExternalIds::new();
    external_ids.insert(
        MUSICBRAINZ.to_string(),
        recording
            .as_ref()
            .map(|r| r.id.clone())
            .unwrap_or_else(|| track.id.clone()),
    );

    HarmonizedTrack {
        normalized_title: normalize_title(&track.title),
        isrc: recording.as_ref().and_then(|r| r.isrcs.first().cloned()),
        position: Some(track.position.unwrap_or(fallback_position)),
        disc_number: Some(disc),
        duration_ms: track.length.or_else(|| recording.as_ref().and_then(|r| r.length)),
        artists,
        external_ids,
        confidence,
        title: track.title,
        ..Default::default()
    }
}

/// `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, lower- or upper-case hex
fn is_mbid(id: &str) -> bool {
    id.len() == 36
        && id.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

#[async_trait]
impl MetadataProvider for MusicBrainzProvider {
    fn name(&self) -> &str {
        MUSICBRAINZ
    }

    fn display_name(&self) -> &str {
        "MusicBrainz"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn parse_url(&self, url: &str) -> Option<ParsedUrl> {
        let segments = url_segments(url, "musicbrainz.org")?;
        let [kind, id, ..] = segments.as_slice() else {
            return None;
        };
        if !is_mbid(id) {
            return None;
        }
        let entity_type = match kind.as_str() {
            "release" => EntityType::Release,
            "release-group" => EntityType::ReleaseGroup,
            "recording" => EntityType::Track,
            "artist" => EntityType::Artist,
            _ => return None,
        };
        Some(ParsedUrl::new(entity_type, id.to_ascii_lowercase()))
    }

    async fn lookup_by_url(&self, url: &str) -> Result<Option<HarmonizedRelease>> {
        let parsed = self.parse_url(url).ok_or_else(|| {
            MetadataError::Validation(format!("musicbrainz cannot handle URL {url}"))
        })?;
        match parsed.entity_type {
            EntityType::Release => self.lookup_release_by_id(&parsed.id).await,
            EntityType::ReleaseGroup => self.lookup_release_group(&parsed.id).await,
            other => Err(MetadataError::Validation(format!(
                "MusicBrainz URL points to a {other}, not a release: {url}"
            ))),
        }
    }

    async fn lookup_by_gtin(&self, gtin: &Gtin) -> Result<Option<HarmonizedRelease>> {
        let variants = gtin.variants();
        let query = variants
            .iter()
            .map(|code| format!("barcode:{code}"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let path = format!(
            "release?query={}&limit={}&fmt=json",
            urlencoding::encode(&query),
            BARCODE_CANDIDATES
        );

        let Some(search) = self.http.get_json::<ReleaseSearch>("lookup_by_gtin", &path).await? else {
            return Ok(None);
        };

        // A top hit without a barcode is still a candidate; one carrying a
        // different barcode is not.
        let best = search
            .releases
            .iter()
            .find(|release| {
                release
                    .barcode
                    .as_deref()
                    .is_some_and(|barcode| variants.iter().any(|v| v == barcode))
            })
            .or_else(|| {
                search.releases.first().filter(|release| {
                    release
                        .barcode
                        .as_deref()
                        .map_or(true, |barcode| barcode.trim().is_empty())
                })
            });

        match best {
            Some(release) => {
                info!(gtin = %gtin, mbid = %release.id, "Resolved barcode on MusicBrainz");
                self.lookup_release_by_id(&release.id).await
            }
            None => {
                debug!(gtin = %gtin, "No MusicBrainz release for barcode");
                Ok(None)
            }
        }
    }

    async fn lookup_release_by_id(&self, id: &str) -> Result<Option<HarmonizedRelease>> {
        Self::require_mbid(id)?;
        let path = format!("release/{id}?inc={RELEASE_INCLUDES}&fmt=json");

        Ok(self
            .http
            .get_json::<MbRelease>("lookup_release", &path)
            .await?
            .map(|release| self.normalize_release(release, LOOKUP_CONFIDENCE)))
    }

    async fn lookup_by_isrc(&self, isrc: &Isrc) -> Result<Option<HarmonizedTrack>> {
        let path = format!("isrc/{isrc}?inc=artist-credits+releases&fmt=json");

        let Some(list) = self.http.get_json::<RecordingList>("lookup_by_isrc", &path).await? else {
            return Ok(None);
        };

        Ok(list
            .recordings
            .into_iter()
            .next()
            .map(|recording| self.normalize_recording(recording, Some(isrc), LOOKUP_CONFIDENCE)))
    }

    async fn lookup_artist(&self, id: &str) -> Result<Option<HarmonizedArtist>> {
        Self::require_mbid(id)?;
        let path = format!("artist/{id}?inc=aliases+genres&fmt=json");

        Ok(self
            .http
            .get_json::<MbArtist>("lookup_artist", &path)
            .await?
            .map(|artist| self.normalize_artist(artist, LOOKUP_CONFIDENCE)))
    }

    async fn search_releases(&self, query: &str, limit: usize) -> Result<Vec<HarmonizedRelease>> {
        let path = Self::search_path("release", query, limit);
        let search = self
            .http
            .get_json::<ReleaseSearch>("search_releases", &path)
            .await?
            .map(|s| s.releases)
            .unwrap_or_default();

        Ok(search
            .into_iter()
            .take(limit)
            .map(|release| {
                let confidence = score_confidence(release.score);
                self.normalize_release(release, confidence)
            })
            .collect())
    }

    async fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<HarmonizedTrack>> {
        let path = Self::search_path("recording", query, limit);
        let recordings = self
            .http
            .get_json::<RecordingList>("search_tracks", &path)
            .await?
            .map(|list| list.recordings)
            .unwrap_or_default();

        Ok(recordings
            .into_iter()
            .take(limit)
            .map(|recording| {
                let confidence = score_confidence(recording.score);
                self.normalize_recording(recording, None, confidence)
            })
            .collect())
    }

    async fn search_artists(&self, query: &str, limit: usize) -> Result<Vec<HarmonizedArtist>> {
        let path = Self::search_path("artist", query, limit);
        let artists = self
            .http
            .get_json::<ArtistSearch>("search_artists", &path)
            .await?
            .map(|search| search.artists)
            .unwrap_or_default();

        Ok(artists
            .into_iter()
            .take(limit)
            .map(|artist| {
                let confidence = score_confidence(artist.score);
                self.normalize_artist(artist, confidence)
            })
            .collect())
    }
}
