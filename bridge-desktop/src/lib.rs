//! # Desktop Bridge Implementations
//!
//! Default implementations of the host bridges for desktop and server
//! processes:
//! - `HttpClient` using `reqwest` (single attempt; the engine owns retries)
//! - `KeyValueStore` using a SQLite table with an expiry column
//! - `WindowCounterStore` using a SQLite table shared by every process that
//!   opens the same file
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteKeyValueStore};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http = ReqwestHttpClient::new()?;
//!     let cache = SqliteKeyValueStore::new("cache/harmonizer.db".into()).await?;
//!     // Hand both to the harmonizer service
//!     Ok(())
//! }
//! ```

mod http;
mod kv_store;
mod window_store;

pub use http::ReqwestHttpClient;
pub use kv_store::SqliteKeyValueStore;
pub use window_store::SqliteWindowStore;
