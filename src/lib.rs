//! Workspace umbrella crate.
//!
//! Re-exports the harmonization engine so host applications can depend on
//! `harmonizer-workspace` alone. The `desktop-shims` feature (default) adds
//! the service façade with its reqwest/SQLite bootstrap.

pub use core_metadata as metadata;
pub use core_runtime as runtime;

#[cfg(feature = "desktop-shims")]
pub use core_service::{bootstrap_desktop, HarmonizerDependencies, HarmonizerService};
