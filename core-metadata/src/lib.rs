//! # Metadata Harmonization
//!
//! Resolves canonical release, track and artist metadata from several
//! external providers and folds their answers into one schema.
//!
//! ## Overview
//!
//! This crate handles:
//! - Provider clients (MusicBrainz, Tidal, Discogs) behind [`MetadataProvider`]
//! - Per-provider rate limiting, local or shared between processes
//! - Retry with exponential backoff for transient failures
//! - Confidence-weighted merging of multi-provider results
//! - A snapshot cache that degrades to a miss on any failure
//! - The [`LookupCoordinator`] tying it all together
//!
//! ## Example
//!
//! ```ignore
//! use core_metadata::{LookupCoordinator, ProviderRegistry, ReleaseLookupRequest};
//!
//! let coordinator = LookupCoordinator::new(registry, cache);
//! let result = coordinator
//!     .lookup_release(ReleaseLookupRequest::by_gtin("0724352771752"))
//!     .await?;
//! if let Some(release) = result.data {
//!     println!("{} ({} sources)", release.title, result.sources.len());
//! }
//! ```

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod identifiers;
pub mod merge;
pub mod models;
pub mod providers;
pub mod rate_limit;
pub mod registry;
pub mod retry;

pub use cache::{CacheBackend, CacheEntity, SnapshotCache};
pub use coordinator::{
    LookupCoordinator, NoopPersistence, PersistenceSink, ReleaseLookup, ReleaseLookupRequest,
};
pub use error::{FailureKind, MetadataError, ProviderFailure, Result};
pub use identifiers::{Gtin, Isrc};
pub use merge::{
    ArtistMerger, CorroborationPolicy, EntityMerger, MergePolicy, ReleaseMerger, TrackMerger,
};
pub use models::{
    HarmonizedArtist, HarmonizedArtistCredit, HarmonizedMedium, HarmonizedRelease,
    HarmonizedTrack, LookupResult, PartialDate, ProviderSource, ReleaseType, SearchResult,
};
pub use providers::{EntityType, MetadataProvider, ParsedUrl, ProviderContext};
pub use rate_limit::{RateLimitBackend, RateLimiter};
pub use registry::{ProviderConstructors, ProviderInfo, ProviderRegistry};
pub use retry::{with_retry, RetryPolicy};
