//! Cross-provider merging
//!
//! Several providers often resolve the same release. A merger folds their
//! results into one entity:
//!
//! - inputs are ranked by confidence (ties: first source `(provider, id)`),
//!   and the top one supplies every scalar field
//! - `sources` and `externalIds` are unioned, first-wins in rank order
//! - list fields (genres, aliases) are unioned case-insensitively
//! - artist credits and media tracks are aligned by position and receive
//!   the other inputs' external ids
//!
//! Arrival order never affects the output: ranking happens before anything
//! order-sensitive.

use crate::identifiers::dedup_case_insensitive;
use crate::models::{
    ExternalIds, Harmonized, HarmonizedArtist, HarmonizedArtistCredit, HarmonizedRelease,
    HarmonizedTrack, ProviderSource,
};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// Combines the input confidences into the merged entity's confidence
pub trait MergePolicy: Send + Sync {
    fn combined_confidence(&self, confidences: &[f64]) -> f64;
}

/// Average of the inputs plus a bounded bonus for each corroborating source.
///
/// `avg + min(max_bonus, bonus_per_source × (N − 1))`, capped at 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorroborationPolicy {
    pub bonus_per_source: f64,
    pub max_bonus: f64,
}

impl Default for CorroborationPolicy {
    fn default() -> Self {
        Self {
            bonus_per_source: 0.05,
            max_bonus: 0.1,
        }
    }
}

impl MergePolicy for CorroborationPolicy {
    fn combined_confidence(&self, confidences: &[f64]) -> f64 {
        if confidences.is_empty() {
            return 0.0;
        }
        let n = confidences.len() as f64;
        let average = confidences.iter().sum::<f64>() / n;
        let bonus = (self.bonus_per_source * (n - 1.0)).min(self.max_bonus);
        (average + bonus).clamp(0.0, 1.0)
    }
}

/// Folds N results for the same logical entity into one
pub trait EntityMerger<T>: Send + Sync {
    /// `None` for no input; a single input comes back unchanged.
    fn merge(&self, entities: Vec<T>) -> Option<T>;
}

fn first_source_key<T: Harmonized>(entity: &T) -> Option<(&str, &str)> {
    entity.sources().first().map(ProviderSource::key)
}

fn rank_order<T: Harmonized>(a: &T, b: &T) -> Ordering {
    b.confidence()
        .total_cmp(&a.confidence())
        .then_with(|| first_source_key(a).cmp(&first_source_key(b)))
}

/// Ranks `entities` and builds the merged shell from the primary: unioned
/// sources and external ids, combined confidence. Returns the shell plus
/// the ranked inputs for the entity-specific passes.
fn merge_common<T: Harmonized>(mut entities: Vec<T>, policy: &dyn MergePolicy) -> (T, Vec<T>) {
    entities.sort_by(rank_order);

    let mut merged = entities[0].clone();

    let mut seen = HashSet::new();
    let sources: Vec<ProviderSource> = entities
        .iter()
        .flat_map(|entity| entity.sources().iter())
        .filter(|source| seen.insert((source.provider.clone(), source.id.clone())))
        .cloned()
        .collect();
    *merged.sources_mut() = sources;

    let mut external_ids = ExternalIds::new();
    for entity in &entities {
        union_ids(&mut external_ids, entity.external_ids());
    }
    *merged.external_ids_mut() = external_ids;

    let confidences: Vec<f64> = entities.iter().map(Harmonized::confidence).collect();
    merged.set_confidence(policy.combined_confidence(&confidences));

    (merged, entities)
}

fn union_ids(target: &mut ExternalIds, other: &ExternalIds) {
    for (provider, id) in other {
        target
            .entry(provider.clone())
            .or_insert_with(|| id.clone());
    }
}

fn union_lists<'a>(lists: impl Iterator<Item = &'a Vec<String>>) -> Vec<String> {
    dedup_case_insensitive(lists.flatten())
}

fn align_credits<'a>(
    primary: &mut [HarmonizedArtistCredit],
    others: impl Iterator<Item = &'a [HarmonizedArtistCredit]>,
) {
    for credits in others {
        for (credit, other) in primary.iter_mut().zip(credits) {
            union_ids(&mut credit.external_ids, &other.external_ids);
        }
    }
}

fn align_track(track: &mut HarmonizedTrack, other: &HarmonizedTrack) {
    union_ids(&mut track.external_ids, &other.external_ids);
    if track.isrc.is_none() {
        track.isrc.clone_from(&other.isrc);
    }
    align_credits(&mut track.artists, std::iter::once(other.artists.as_slice()));
}

/// Merges [`HarmonizedRelease`] results
#[derive(Clone)]
pub struct ReleaseMerger {
    policy: Arc<dyn MergePolicy>,
}

impl Default for ReleaseMerger {
    fn default() -> Self {
        Self::new(Arc::new(CorroborationPolicy::default()))
    }
}

impl ReleaseMerger {
    pub fn new(policy: Arc<dyn MergePolicy>) -> Self {
        Self { policy }
    }
}

impl EntityMerger<HarmonizedRelease> for ReleaseMerger {
    fn merge(&self, entities: Vec<HarmonizedRelease>) -> Option<HarmonizedRelease> {
        if entities.len() <= 1 {
            return entities.into_iter().next();
        }

        let (mut merged, ranked) = merge_common(entities, self.policy.as_ref());
        let others = &ranked[1..];

        merged.genres = union_lists(ranked.iter().map(|r| &r.genres));
        align_credits(&mut merged.artists, others.iter().map(|r| r.artists.as_slice()));

        for (index, medium) in merged.media.iter_mut().enumerate() {
            for other in others.iter().filter_map(|r| r.media.get(index)) {
                for (track, theirs) in medium.tracks.iter_mut().zip(&other.tracks) {
                    align_track(track, theirs);
                }
            }
        }

        Some(merged)
    }
}

/// Merges [`HarmonizedTrack`] results
#[derive(Clone)]
pub struct TrackMerger {
    policy: Arc<dyn MergePolicy>,
}

impl Default for TrackMerger {
    fn default() -> Self {
        Self::new(Arc::new(CorroborationPolicy::default()))
    }
}

impl TrackMerger {
    pub fn new(policy: Arc<dyn MergePolicy>) -> Self {
        Self { policy }
    }
}

impl EntityMerger<HarmonizedTrack> for TrackMerger {
    fn merge(&self, entities: Vec<HarmonizedTrack>) -> Option<HarmonizedTrack> {
        if entities.len() <= 1 {
            return entities.into_iter().next();
        }

        let (mut merged, ranked) = merge_common(entities, self.policy.as_ref());

        merged.genres = union_lists(ranked.iter().map(|t| &t.genres));
        if merged.isrc.is_none() {
            merged.isrc = ranked.iter().find_map(|t| t.isrc.clone());
        }
        align_credits(
            &mut merged.artists,
            ranked[1..].iter().map(|t| t.artists.as_slice()),
        );

        Some(merged)
    }
}

/// Merges [`HarmonizedArtist`] results
#[derive(Clone)]
pub struct ArtistMerger {
    policy: Arc<dyn MergePolicy>,
}

impl Default for ArtistMerger {
    fn default() -> Self {
        Self::new(Arc::new(CorroborationPolicy::default()))
    }
}

impl ArtistMerger {
    pub fn new(policy: Arc<dyn MergePolicy>) -> Self {
        Self { policy }
    }
}

impl EntityMerger<HarmonizedArtist> for ArtistMerger {
    fn merge(&self, entities: Vec<HarmonizedArtist>) -> Option<HarmonizedArtist> {
        if entities.len() <= 1 {
            return entities.into_iter().next();
        }

        let (mut merged, ranked) = merge_common(entities, self.policy.as_ref());

        merged.genres = union_lists(ranked.iter().map(|a| &a.genres));
        merged.aliases = union_lists(ranked.iter().map(|a| &a.aliases));

        Some(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HarmonizedMedium, ProviderSource};
    use chrono::{TimeZone, Utc};

    fn source(provider: &str, id: &str) -> ProviderSource {
        ProviderSource::new(
            provider,
            id,
            None,
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        )
    }

    fn release(provider: &str, id: &str, confidence: f64) -> HarmonizedRelease {
        HarmonizedRelease {
            title: format!("{provider} title"),
            gtin: Some("0724352771752".to_string()),
            external_ids: ExternalIds::from([(provider.to_string(), id.to_string())]),
            sources: vec![source(provider, id)],
            confidence,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_and_single_inputs() {
        let merger = ReleaseMerger::default();
        assert!(merger.merge(Vec::new()).is_none());

        let only = release("musicbrainz", "abc", 0.42);
        assert_eq!(merger.merge(vec![only.clone()]), Some(only));
    }

    #[test]
    fn test_two_providers_resolving_same_gtin() {
        let a = release("musicbrainz", "abc", 1.0);
        let b = release("spotify", "xyz", 0.9);

        let merged = ReleaseMerger::default().merge(vec![b, a]).unwrap();

        assert_eq!(merged.title, "musicbrainz title");
        assert_eq!(merged.external_ids["musicbrainz"], "abc");
        assert_eq!(merged.external_ids["spotify"], "xyz");
        assert_eq!(merged.sources.len(), 2);
        assert!(merged.confidence >= 0.9 && merged.confidence <= 1.0);
    }

    #[test]
    fn test_union_fields_ignore_input_order() {
        let mut a = release("musicbrainz", "abc", 0.8);
        a.genres = vec!["Rock".to_string(), "Alternative".to_string()];
        a.sources.push(source("tidal", "77"));
        let mut b = release("tidal", "77", 0.8);
        b.genres = vec!["rock".to_string(), "Art Rock".to_string()];
        b.external_ids.insert("musicbrainz".to_string(), "other".to_string());
        let mut c = release("discogs", "83182", 0.6);
        c.genres = vec!["Electronic".to_string()];

        let merger = ReleaseMerger::default();
        let forward = merger
            .merge(vec![a.clone(), b.clone(), c.clone()])
            .unwrap();
        let backward = merger.merge(vec![c, b, a]).unwrap();

        assert_eq!(forward, backward);
        assert_eq!(forward.genres, vec!["Rock", "Alternative", "Art Rock", "Electronic"]);
        assert_eq!(forward.sources.len(), 3);
        // equal confidence: "musicbrainz" sorts before "tidal", so it is primary
        assert_eq!(forward.external_ids["musicbrainz"], "abc");
        assert_eq!(forward.title, "musicbrainz title");
    }

    #[test]
    fn test_confidence_never_below_average() {
        let merger = ReleaseMerger::default();
        let merged = merger
            .merge(vec![
                release("a", "1", 0.2),
                release("b", "2", 0.4),
                release("c", "3", 0.6),
                release("d", "4", 0.8),
            ])
            .unwrap();

        assert!((merged.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_corroboration_policy_bounds() {
        let policy = CorroborationPolicy::default();

        assert_eq!(policy.combined_confidence(&[]), 0.0);
        assert_eq!(policy.combined_confidence(&[0.7]), 0.7);
        assert!((policy.combined_confidence(&[0.5, 0.7]) - 0.65).abs() < 1e-9);
        assert_eq!(policy.combined_confidence(&[1.0, 1.0, 1.0]), 1.0);
    }

    #[test]
    fn test_custom_policy_is_used() {
        struct Minimum;
        impl MergePolicy for Minimum {
            fn combined_confidence(&self, confidences: &[f64]) -> f64 {
                confidences.iter().copied().fold(1.0, f64::min)
            }
        }

        let merger = ReleaseMerger::new(Arc::new(Minimum));
        let merged = merger
            .merge(vec![release("a", "1", 0.9), release("b", "2", 0.3)])
            .unwrap();

        assert_eq!(merged.confidence, 0.3);
    }

    #[test]
    fn test_credits_and_tracks_align_by_position() {
        let mut a = release("musicbrainz", "abc", 1.0);
        a.artists = vec![
            HarmonizedArtistCredit::new("Radiohead").with_external_id("musicbrainz", "rh"),
        ];
        a.media = vec![HarmonizedMedium {
            position: 1,
            format: Some("CD".to_string()),
            tracks: vec![HarmonizedTrack {
                title: "Airbag".to_string(),
                external_ids: ExternalIds::from([("musicbrainz".to_string(), "t1".to_string())]),
                ..Default::default()
            }],
        }];

        let mut b = release("tidal", "77", 0.9);
        b.artists = vec![
            HarmonizedArtistCredit::new("Radiohead").with_external_id("tidal", "64518"),
            HarmonizedArtistCredit::new("Extra"),
        ];
        b.media = vec![HarmonizedMedium {
            position: 1,
            format: Some("Digital Media".to_string()),
            tracks: vec![HarmonizedTrack {
                title: "Airbag".to_string(),
                isrc: Some("GBAYE9700142".to_string()),
                external_ids: ExternalIds::from([("tidal".to_string(), "900".to_string())]),
                ..Default::default()
            }],
        }];

        let merged = ReleaseMerger::default().merge(vec![a, b]).unwrap();

        assert_eq!(merged.artists.len(), 1);
        assert_eq!(merged.artists[0].external_ids["tidal"], "64518");
        assert_eq!(merged.artists[0].external_ids["musicbrainz"], "rh");

        let track = &merged.media[0].tracks[0];
        assert_eq!(merged.media[0].format.as_deref(), Some("CD"));
        assert_eq!(track.isrc.as_deref(), Some("GBAYE9700142"));
        assert_eq!(track.external_ids.len(), 2);
    }

    #[test]
    fn test_track_merger_fills_isrc() {
        let primary = HarmonizedTrack {
            title: "Airbag".to_string(),
            sources: vec![source("musicbrainz", "r1")],
            confidence: 1.0,
            ..Default::default()
        };
        let other = HarmonizedTrack {
            title: "Airbag (Remastered)".to_string(),
            isrc: Some("GBAYE9700142".to_string()),
            sources: vec![source("tidal", "900")],
            confidence: 0.9,
            ..Default::default()
        };

        let merged = TrackMerger::default().merge(vec![other, primary]).unwrap();

        assert_eq!(merged.title, "Airbag");
        assert_eq!(merged.isrc.as_deref(), Some("GBAYE9700142"));
        assert_eq!(merged.sources.len(), 2);
    }

    #[test]
    fn test_artist_merger_unions_aliases() {
        let a = HarmonizedArtist {
            name: "Radiohead".to_string(),
            aliases: vec!["On A Friday".to_string()],
            sources: vec![source("musicbrainz", "rh")],
            confidence: 1.0,
            ..Default::default()
        };
        let b = HarmonizedArtist {
            name: "Radiohead".to_string(),
            aliases: vec!["on a friday".to_string(), "Radio Head".to_string()],
            sources: vec![source("discogs", "3840")],
            confidence: 0.85,
            ..Default::default()
        };

        let merged = ArtistMerger::default().merge(vec![b, a]).unwrap();

        assert_eq!(merged.aliases, vec!["On A Friday", "Radio Head"]);
        assert_eq!(merged.sources[0].provider, "musicbrainz");
    }
}
