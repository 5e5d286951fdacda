//! # Core Runtime Module
//!
//! Runtime plumbing shared by the harmonizer crates:
//! - Configuration (`HarmonizerConfig`, loadable from a builder, JSON or the
//!   environment)
//! - Logging and tracing setup, with optional forwarding to a host
//!   `LoggerSink` and credential redaction

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    CacheSettings, Credentials, HarmonizerConfig, HarmonizerConfigBuilder, ProviderSettings,
    RateLimitSettings, RetrySettings, StorageSettings,
};
pub use error::{Error, Result};
