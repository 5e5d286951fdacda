//! # Host Bridge Traits
//!
//! Capabilities the harmonization engine needs from its host, expressed as
//! traits so the engine never depends on a concrete HTTP stack or storage
//! backend.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP execution.
//!   Retry and backoff live in the engine, not in the bridge.
//!
//! ### Shared state
//! - [`KeyValueStore`](storage::KeyValueStore) - TTL-capable string store that
//!   backs the snapshot cache
//! - [`WindowCounterStore`](storage::WindowCounterStore) - Sliding-window event
//!   log shared between processes, used by the distributed rate limiter
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Wall-clock source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Optional capabilities
//!
//! Neither store is required. The engine models a missing store as an explicit
//! absent variant and keeps working: the cache always misses and rate limiting
//! stays process-local.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! across Tokio tasks behind an `Arc`.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         // Implementation
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::{Admission, KeyValueStore, WindowCounterStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
