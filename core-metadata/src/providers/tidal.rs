//! Tidal catalog API client
//!
//! Talks to the v2 OpenAPI (`https://openapi.tidal.com/v2`), which speaks
//! JSON:API: primary resources in `data`, related resources in `included`,
//! links between them in `relationships`. Every catalog call needs a
//! `countryCode`.
//!
//! Authentication uses an OAuth2 client-credentials token shared by all
//! requests; see [`core_auth::ClientCredentialsAuth`].

use super::{
    parse_iso8601_duration_ms, url_segments, EntityType, MetadataProvider, ParsedUrl,
    ProviderAuth, ProviderContext, ProviderHttp,
};
use crate::error::{MetadataError, Result};
use crate::identifiers::{normalize_title, Gtin, Isrc};
use crate::models::{
    ExternalIds, HarmonizedArtist, HarmonizedArtistCredit, HarmonizedMedium, HarmonizedRelease,
    HarmonizedTrack, PartialDate, ProviderSource, ReleaseType,
};
use async_trait::async_trait;
use bridge_traits::time::Clock;
use core_auth::{AuthError, ClientCredentialsAuth, ClientCredentialsConfig};
use core_runtime::config::{RateLimitSettings, TIDAL};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

const TIDAL_API_BASE: &str = "https://openapi.tidal.com/v2";
const TIDAL_TOKEN_URL: &str = "https://auth.tidal.com/v1/oauth2/token";
const TIDAL_WEB_BASE: &str = "https://tidal.com";
const JSON_API: &str = "application/vnd.api+json";

const DEFAULT_PRIORITY: i32 = 80;
const DEFAULT_COUNTRY: &str = "US";

const DEFAULT_QUOTA: RateLimitSettings = RateLimitSettings {
    max_requests: 5,
    window_ms: 1000,
};

const LOOKUP_CONFIDENCE: f64 = 0.9;
/// Tidal search carries no relevance score.
const SEARCH_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Deserialize)]
struct Document<D> {
    data: D,
    #[serde(default)]
    included: Vec<Resource>,
}

#[derive(Debug, Clone, Deserialize)]
struct Resource {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: serde_json::Value,
    #[serde(default)]
    relationships: HashMap<String, Relationship>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Relationship {
    #[serde(default)]
    data: Option<Linkage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Linkage {
    Many(Vec<ResourceRef>),
    One(ResourceRef),
}

#[derive(Debug, Clone, Deserialize)]
struct ResourceRef {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    meta: Option<RefMeta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefMeta {
    #[serde(default)]
    track_number: Option<u32>,
    #[serde(default)]
    volume_number: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AlbumAttributes {
    title: String,
    barcode_id: Option<String>,
    release_date: Option<String>,
    #[serde(rename = "type")]
    album_type: Option<String>,
    image_links: Vec<ImageLink>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TrackAttributes {
    title: String,
    isrc: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ArtistAttributes {
    name: String,
    image_links: Vec<ImageLink>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageLink {
    href: String,
    meta: Option<ImageMeta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageMeta {
    width: u32,
}

impl Resource {
    fn attributes<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if self.attributes.is_null() {
            return Ok(T::default());
        }
        T::deserialize(&self.attributes).map_err(|e| MetadataError::Parse {
            provider: TIDAL.to_string(),
            message: format!("{} {}: {}", self.kind, self.id, e),
        })
    }

    fn related(&self, name: &str) -> Vec<&ResourceRef> {
        match self.relationships.get(name).and_then(|r| r.data.as_ref()) {
            Some(Linkage::Many(refs)) => refs.iter().collect(),
            Some(Linkage::One(single)) => vec![single],
            None => Vec::new(),
        }
    }
}

/// `included` indexed by `(type, id)`
struct Included<'a> {
    resources: HashMap<(&'a str, &'a str), &'a Resource>,
}

impl<'a> Included<'a> {
    fn new(resources: &'a [Resource]) -> Self {
        Self {
            resources: resources
                .iter()
                .map(|r| ((r.kind.as_str(), r.id.as_str()), r))
                .collect(),
        }
    }

    fn get(&self, reference: &ResourceRef) -> Option<&'a Resource> {
        self.resources
            .get(&(reference.kind.as_str(), reference.id.as_str()))
            .copied()
    }
}

fn largest_image(links: &[ImageLink]) -> Option<String> {
    links
        .iter()
        .max_by_key(|link| link.meta.as_ref().map(|m| m.width).unwrap_or(0))
        .map(|link| link.href.clone())
        .filter(|href| !href.is_empty())
}

fn tidal_ids(id: &str) -> ExternalIds {
    BTreeMap::from([(TIDAL.to_string(), id.to_string())])
}

/// Tidal provider
pub struct TidalProvider {
    http: ProviderHttp,
    clock: Arc<dyn Clock>,
    priority: i32,
    country_code: String,
}

impl TidalProvider {
    pub fn new(ctx: &ProviderContext) -> Result<Self> {
        let credentials = &ctx.settings.credentials;
        let (Some(client_id), Some(client_secret)) =
            (credentials.client_id.as_deref(), credentials.client_secret.as_deref())
        else {
            return Err(MetadataError::Auth(AuthError::MissingCredentials(
                "tidal requires clientId and clientSecret".to_string(),
            )));
        };

        let auth = ClientCredentialsAuth::with_clock(
            ClientCredentialsConfig::new(TIDAL, TIDAL_TOKEN_URL, client_id, client_secret),
            Arc::clone(&ctx.http),
            Arc::clone(&ctx.clock),
        );

        let http = ctx
            .http_for(TIDAL, TIDAL_API_BASE, DEFAULT_QUOTA)
            .with_accept(JSON_API)
            .with_auth(ProviderAuth::ClientCredentials(Arc::new(auth)));

        Ok(Self {
            http,
            clock: Arc::clone(&ctx.clock),
            priority: ctx.priority_or(DEFAULT_PRIORITY),
            country_code: ctx
                .settings
                .country_code
                .clone()
                .unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
        })
    }

    fn source(&self, entity: &str, id: &str) -> ProviderSource {
        ProviderSource::new(
            TIDAL,
            id,
            Some(format!("{TIDAL_WEB_BASE}/{entity}/{id}")),
            self.clock.now(),
        )
    }

    fn credits(&self, resource: &Resource, included: &Included<'_>) -> Vec<HarmonizedArtistCredit> {
        let names: Vec<(String, String)> = resource
            .related("artists")
            .into_iter()
            .filter_map(|reference| {
                let artist = included.get(reference)?;
                let attrs: ArtistAttributes = artist.attributes().ok()?;
                Some((attrs.name, artist.id.clone()))
            })
            .collect();

        let count = names.len();
        names
            .into_iter()
            .enumerate()
            .map(|(i, (name, id))| HarmonizedArtistCredit {
                name,
                credited_name: None,
                join_phrase: match count - i {
                    1 => None,
                    2 => Some(" & ".to_string()),
                    _ => Some(", ".to_string()),
                },
                external_ids: tidal_ids(&id),
            })
            .collect()
    }

    fn normalize_album(
        &self,
        album: &Resource,
        included: &Included<'_>,
        confidence: f64,
    ) -> Result<HarmonizedRelease> {
        let attrs: AlbumAttributes = album.attributes()?;

        let mut volumes: BTreeMap<u32, Vec<(u32, HarmonizedTrack)>> = BTreeMap::new();
        for (index, reference) in album.related("items").into_iter().enumerate() {
            if reference.kind != "tracks" {
                continue;
            }
            let Some(track) = included.get(reference) else {
                continue;
            };
            let meta = reference.meta.clone().unwrap_or_default();
            let volume = meta.volume_number.unwrap_or(1);
            let number = meta.track_number.unwrap_or(index as u32 + 1);

            let mut harmonized = self.normalize_track(track, included, confidence)?;
            harmonized.position = Some(number);
            harmonized.disc_number = Some(volume);
            harmonized.sources.clear();
            volumes.entry(volume).or_default().push((number, harmonized));
        }

        let media = volumes
            .into_iter()
            .map(|(position, mut tracks)| {
                tracks.sort_by_key(|(number, _)| *number);
                HarmonizedMedium {
                    position,
                    format: Some("Digital Media".to_string()),
                    tracks: tracks.into_iter().map(|(_, track)| track).collect(),
                }
            })
            .collect();

        Ok(HarmonizedRelease {
            normalized_title: normalize_title(&attrs.title),
            release_type: attrs
                .album_type
                .as_deref()
                .map(ReleaseType::from_label)
                .unwrap_or_default(),
            gtin: attrs.barcode_id.filter(|b| !b.is_empty()),
            release_date: attrs.release_date.as_deref().and_then(PartialDate::parse),
            label: None,
            catalog_number: None,
            artists: self.credits(album, included),
            media,
            genres: Vec::new(),
            artwork_url: largest_image(&attrs.image_links),
            external_ids: tidal_ids(&album.id),
            sources: vec![self.source("album", &album.id)],
            confidence,
            title: attrs.title,
        })
    }

    fn normalize_track(
        &self,
        track: &Resource,
        included: &Included<'_>,
        confidence: f64,
    ) -> Result<HarmonizedTrack> {
        let attrs: TrackAttributes = track.attributes()?;

        let album = track
            .related("albums")
            .into_iter()
            .find_map(|reference| included.get(reference))
            .and_then(|album| album.attributes::<AlbumAttributes>().ok());

        Ok(HarmonizedTrack {
            normalized_title: normalize_title(&attrs.title),
            isrc: attrs.isrc.filter(|code| !code.is_empty()),
            position: None,
            disc_number: None,
            duration_ms: attrs.duration.as_deref().and_then(parse_iso8601_duration_ms),
            artists: self.credits(track, included),
            release_date: album
                .as_ref()
                .and_then(|a| a.release_date.as_deref())
                .and_then(PartialDate::parse),
            release_title: album.map(|a| a.title),
            genres: Vec::new(),
            external_ids: tidal_ids(&track.id),
            sources: vec![self.source("track", &track.id)],
            confidence,
            title: attrs.title,
        })
    }

    fn normalize_artist(&self, artist: &Resource, confidence: f64) -> Result<HarmonizedArtist> {
        let attrs: ArtistAttributes = artist.attributes()?;

        Ok(HarmonizedArtist {
            normalized_name: normalize_title(&attrs.name),
            image_url: largest_image(&attrs.image_links),
            external_ids: tidal_ids(&artist.id),
            sources: vec![self.source("artist", &artist.id)],
            confidence,
            name: attrs.name,
            ..Default::default()
        })
    }

    fn require_numeric(id: &str) -> Result<()> {
        if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
            Ok(())
        } else {
            Err(MetadataError::Validation(format!("Not a Tidal identifier: {id}")))
        }
    }

    /// Fetches `searchResults/{query}` and resolves the `relation`
    /// relationship against `included`.
    async fn search_resources(
        &self,
        operation: &str,
        query: &str,
        relation: &str,
    ) -> Result<Option<Document<Resource>>> {
        let path = format!(
            "searchResults/{}?countryCode={}&include={}",
            urlencoding::encode(query.trim()),
            self.country_code,
            relation
        );
        self.http.get_json(operation, &path).await
    }
}

#[async_trait]
impl MetadataProvider for TidalProvider {
    fn name(&self) -> &str {
        TIDAL
    }

    fn display_name(&self) -> &str {
        "Tidal"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn parse_url(&self, url: &str) -> Option<ParsedUrl> {
        let segments = url_segments(url, "tidal.com")?;
        let rest = match segments.first().map(String::as_str) {
            Some("browse") => &segments[1..],
            _ => &segments[..],
        };
        let [kind, id, ..] = rest else {
            return None;
        };

        let entity_type = match kind.as_str() {
            "album" => EntityType::Release,
            "track" => EntityType::Track,
            "artist" => EntityType::Artist,
            "playlist" => return Some(ParsedUrl::new(EntityType::Playlist, id.as_str())),
            _ => return None,
        };
        Self::require_numeric(id).ok()?;
        Some(ParsedUrl::new(entity_type, id.as_str()))
    }

    async fn lookup_by_url(&self, url: &str) -> Result<Option<HarmonizedRelease>> {
        let parsed = self.parse_url(url).ok_or_else(|| {
            MetadataError::Validation(format!("tidal cannot handle URL {url}"))
        })?;
        match parsed.entity_type {
            EntityType::Release => self.lookup_release_by_id(&parsed.id).await,
            EntityType::Playlist => Err(MetadataError::UserAuthNotSupported {
                provider: TIDAL.to_string(),
                operation: "playlist lookup".to_string(),
            }),
            other => Err(MetadataError::Validation(format!(
                "Tidal URL points to a {other}, not an album: {url}"
            ))),
        }
    }

    async fn lookup_by_gtin(&self, gtin: &Gtin) -> Result<Option<HarmonizedRelease>> {
        for barcode in gtin.variants() {
            let path = format!(
                "albums?countryCode={}&filter%5BbarcodeId%5D={}&include=artists,items",
                self.country_code, barcode
            );
            let Some(document) = self
                .http
                .get_json::<Document<Vec<Resource>>>("lookup_by_gtin", &path)
                .await?
            else {
                continue;
            };

            let included = Included::new(&document.included);
            if let Some(album) = document.data.first() {
                return self
                    .normalize_album(album, &included, LOOKUP_CONFIDENCE)
                    .map(Some);
            }
            debug!(barcode = %barcode, "No Tidal album for barcode variant");
        }
        Ok(None)
    }

    async fn lookup_release_by_id(&self, id: &str) -> Result<Option<HarmonizedRelease>> {
        Self::require_numeric(id)?;
        let path = format!(
            "albums/{id}?countryCode={}&include=artists,items",
            self.country_code
        );

        let Some(document) = self
            .http
            .get_json::<Document<Resource>>("lookup_release", &path)
            .await?
        else {
            return Ok(None);
        };

        let included = Included::new(&document.included);
        self.normalize_album(&document.data, &included, LOOKUP_CONFIDENCE)
            .map(Some)
    }

    async fn lookup_by_isrc(&self, isrc: &Isrc) -> Result<Option<HarmonizedTrack>> {
        let path = format!(
            "tracks?countryCode={}&filter%5Bisrc%5D={}&include=artists,albums",
            self.country_code, isrc
        );

        let Some(document) = self
            .http
            .get_json::<Document<Vec<Resource>>>("lookup_by_isrc", &path)
            .await?
        else {
            return Ok(None);
        };

        let included = Included::new(&document.included);
        match document.data.first() {
            Some(track) => self
                .normalize_track(track, &included, LOOKUP_CONFIDENCE)
                .map(Some),
            None => Ok(None),
        }
    }

    async fn lookup_artist(&self, id: &str) -> Result<Option<HarmonizedArtist>> {
        Self::require_numeric(id)?;
        let path = format!("artists/{id}?countryCode={}", self.country_code);

        let Some(document) = self
            .http
            .get_json::<Document<Resource>>("lookup_artist", &path)
            .await?
        else {
            return Ok(None);
        };

        self.normalize_artist(&document.data, LOOKUP_CONFIDENCE).map(Some)
    }

    async fn search_releases(&self, query: &str, limit: usize) -> Result<Vec<HarmonizedRelease>> {
        let Some(document) = self.search_resources("search_releases", query, "albums").await? else {
            return Ok(Vec::new());
        };
        let included = Included::new(&document.included);

        document
            .data
            .related("albums")
            .into_iter()
            .filter_map(|reference| included.get(reference))
            .take(limit)
            .map(|album| self.normalize_album(album, &included, SEARCH_CONFIDENCE))
            .collect()
    }

    async fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<HarmonizedTrack>> {
        let Some(document) = self.search_resources("search_tracks", query, "tracks").await? else {
            return Ok(Vec::new());
        };
        let included = Included::new(&document.included);

        document
            .data
            .related("tracks")
            .into_iter()
            .filter_map(|reference| included.get(reference))
            .take(limit)
            .map(|track| self.normalize_track(track, &included, SEARCH_CONFIDENCE))
            .collect()
    }

    async fn search_artists(&self, query: &str, limit: usize) -> Result<Vec<HarmonizedArtist>> {
        let Some(document) = self.search_resources("search_artists", query, "artists").await? else {
            return Ok(Vec::new());
        };
        let included = Included::new(&document.included);

        document
            .data
            .related("artists")
            .into_iter()
            .filter_map(|reference| included.get(reference))
            .take(limit)
            .map(|artist| self.normalize_artist(artist, SEARCH_CONFIDENCE))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{context, FixtureHttp};
    use core_runtime::config::{Credentials, ProviderSettings};

    const TOKEN: &str = r#"{"access_token": "tidal-token", "token_type": "Bearer", "expires_in": 86400}"#;

    const ALBUM_BY_BARCODE: &str = r#"{
        "data": [{
            "id": "77646169",
            "type": "albums",
            "attributes": {
                "title": "Random Access Memories",
                "barcodeId": "886443927087",
                "releaseDate": "2013-05-17",
                "type": "ALBUM",
                "imageLinks": [
                    {"href": "https://resources.tidal.com/images/small.jpg", "meta": {"width": 160, "height": 160}},
                    {"href": "https://resources.tidal.com/images/large.jpg", "meta": {"width": 1280, "height": 1280}}
                ]
            },
            "relationships": {
                "artists": {"data": [{"id": "8847", "type": "artists"}]},
                "items": {"data": [
                    {"id": "77646171", "type": "tracks", "meta": {"trackNumber": 2, "volumeNumber": 1}},
                    {"id": "77646170", "type": "tracks", "meta": {"trackNumber": 1, "volumeNumber": 1}},
                    {"id": "999", "type": "videos", "meta": {"trackNumber": 3, "volumeNumber": 1}}
                ]}
            }
        }],
        "included": [
            {"id": "8847", "type": "artists", "attributes": {"name": "Daft Punk"}},
            {"id": "77646170", "type": "tracks", "attributes": {"title": "Give Life Back to Music", "isrc": "USQX91300101", "duration": "PT4M34S"}},
            {"id": "77646171", "type": "tracks", "attributes": {"title": "The Game of Love", "isrc": "USQX91300102", "duration": "PT5M22S"}}
        ]
    }"#;

    const TRACK_BY_ISRC: &str = r#"{
        "data": [{
            "id": "77646170",
            "type": "tracks",
            "attributes": {"title": "Give Life Back to Music", "isrc": "USQX91300101", "duration": "PT4M34S"},
            "relationships": {
                "artists": {"data": [{"id": "8847", "type": "artists"}, {"id": "1", "type": "artists"}]},
                "albums": {"data": [{"id": "77646169", "type": "albums"}]}
            }
        }],
        "included": [
            {"id": "8847", "type": "artists", "attributes": {"name": "Daft Punk"}},
            {"id": "1", "type": "artists", "attributes": {"name": "Nile Rodgers"}},
            {"id": "77646169", "type": "albums", "attributes": {"title": "Random Access Memories", "releaseDate": "2013-05-17"}}
        ]
    }"#;

    const SEARCH: &str = r#"{
        "data": {
            "id": "daft punk",
            "type": "searchResults",
            "relationships": {
                "artists": {"data": [{"id": "8847", "type": "artists"}, {"id": "404", "type": "artists"}]}
            }
        },
        "included": [
            {"id": "8847", "type": "artists", "attributes": {"name": "Daft Punk", "imageLinks": [{"href": "https://resources.tidal.com/images/dp.jpg"}]}}
        ]
    }"#;

    fn settings() -> ProviderSettings {
        ProviderSettings::enabled()
            .with_country_code("NO")
            .with_credentials(Credentials {
                client_id: Some("client".to_string()),
                client_secret: Some("secret".to_string()),
                ..Default::default()
            })
    }

    fn provider(http: Arc<FixtureHttp>) -> TidalProvider {
        TidalProvider::new(&context(http, settings())).unwrap()
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let ctx = context(Arc::new(FixtureHttp::new()), ProviderSettings::enabled());

        let err = TidalProvider::new(&ctx).err().unwrap();
        assert!(matches!(
            err,
            MetadataError::Auth(AuthError::MissingCredentials(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_by_gtin_normalizes_json_api() {
        let http = Arc::new(
            FixtureHttp::new()
                .route("oauth2/token", 200, TOKEN)
                .route("filter%5BbarcodeId%5D=886443927087", 200, ALBUM_BY_BARCODE),
        );
        let tidal = provider(http.clone());

        let gtin = Gtin::parse("886443927087").unwrap();
        let release = tidal.lookup_by_gtin(&gtin).await.unwrap().unwrap();

        assert_eq!(release.title, "Random Access Memories");
        assert_eq!(release.release_type, ReleaseType::Album);
        assert_eq!(release.gtin.as_deref(), Some("886443927087"));
        assert_eq!(release.artists[0].name, "Daft Punk");
        assert_eq!(release.artists[0].external_ids[TIDAL], "8847");
        assert_eq!(
            release.artwork_url.as_deref(),
            Some("https://resources.tidal.com/images/large.jpg")
        );
        assert_eq!(release.confidence, LOOKUP_CONFIDENCE);

        let tracks = &release.media[0].tracks;
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title, "Give Life Back to Music");
        assert_eq!(tracks[0].position, Some(1));
        assert_eq!(tracks[0].duration_ms, Some(274_000));
        assert_eq!(tracks[1].isrc.as_deref(), Some("USQX91300102"));
        assert!(tracks[0].sources.is_empty());

        let api_request = http
            .requests()
            .into_iter()
            .find(|r| r.url.contains("/albums"))
            .unwrap();
        assert!(api_request.url.contains("countryCode=NO"));
        assert_eq!(api_request.headers["Authorization"], "Bearer tidal-token");
        assert_eq!(api_request.headers["Accept"], JSON_API);
    }

    #[tokio::test]
    async fn test_lookup_by_gtin_tries_padded_variant() {
        let http = Arc::new(
            FixtureHttp::new()
                .route("oauth2/token", 200, TOKEN)
                .route("filter%5BbarcodeId%5D=886443927087", 200, r#"{"data": []}"#)
                .route("filter%5BbarcodeId%5D=0886443927087", 200, ALBUM_BY_BARCODE),
        );
        let tidal = provider(http);

        let gtin = Gtin::parse("886443927087").unwrap();
        let release = tidal.lookup_by_gtin(&gtin).await.unwrap();

        assert!(release.is_some());
    }

    #[tokio::test]
    async fn test_lookup_by_isrc() {
        let http = Arc::new(
            FixtureHttp::new()
                .route("oauth2/token", 200, TOKEN)
                .route("filter%5Bisrc%5D=USQX91300101", 200, TRACK_BY_ISRC),
        );
        let tidal = provider(http);

        let isrc = Isrc::parse("USQX91300101").unwrap();
        let track = tidal.lookup_by_isrc(&isrc).await.unwrap().unwrap();

        assert_eq!(track.duration_ms, Some(274_000));
        assert_eq!(track.release_title.as_deref(), Some("Random Access Memories"));
        assert_eq!(track.release_date.unwrap().to_string(), "2013-05-17");
        assert_eq!(track.artists.len(), 2);
        assert_eq!(track.artists[0].join_phrase.as_deref(), Some(" & "));
        assert_eq!(track.artists[1].join_phrase, None);
        assert_eq!(
            track.sources[0].url.as_deref(),
            Some("https://tidal.com/track/77646170")
        );
    }

    #[tokio::test]
    async fn test_search_artists_skips_missing_included() {
        let http = Arc::new(
            FixtureHttp::new()
                .route("oauth2/token", 200, TOKEN)
                .route("searchResults/daft%20punk", 200, SEARCH),
        );
        let tidal = provider(http);

        let artists = tidal.search_artists("daft punk", 5).await.unwrap();

        assert_eq!(artists.len(), 1);
        assert_eq!(artists[0].name, "Daft Punk");
        assert_eq!(artists[0].confidence, SEARCH_CONFIDENCE);
        assert_eq!(
            artists[0].image_url.as_deref(),
            Some("https://resources.tidal.com/images/dp.jpg")
        );
    }

    #[tokio::test]
    async fn test_token_failure_surfaces_as_auth_error() {
        let http = Arc::new(FixtureHttp::new().route("oauth2/token", 401, r#"{"error": "invalid_client"}"#));
        let tidal = provider(http);

        let err = tidal.lookup_artist("8847").await.unwrap_err();
        assert!(matches!(err, MetadataError::Auth(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_url() {
        let tidal = provider(Arc::new(FixtureHttp::new()));

        assert_eq!(
            tidal.parse_url("https://tidal.com/browse/album/77646169"),
            Some(ParsedUrl::new(EntityType::Release, "77646169"))
        );
        assert_eq!(
            tidal.parse_url("https://listen.tidal.com/track/77646170").map(|p| p.entity_type),
            Some(EntityType::Track)
        );
        assert_eq!(
            tidal.parse_url("https://tidal.com/artist/8847").map(|p| p.entity_type),
            Some(EntityType::Artist)
        );
        assert!(tidal.parse_url("https://tidal.com/album/abc").is_none());
        assert!(tidal.parse_url("https://tidal.com/video/1").is_none());
    }

    #[tokio::test]
    async fn test_playlist_urls_need_user_auth() {
        let tidal = provider(Arc::new(FixtureHttp::new()));

        let err = tidal
            .lookup_by_url("https://tidal.com/browse/playlist/0f1c6b2e-3c7a-4c55-a9d1-0e8a2d7c7e51")
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::UserAuthNotSupported { .. }));
    }
}
