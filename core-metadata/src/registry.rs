//! Provider registry
//!
//! Instantiates the enabled providers from configuration and answers the
//! coordinator's selection questions (defaults, priority order, URL routing).

use crate::error::{MetadataError, Result};
use crate::providers::{
    DiscogsProvider, MetadataProvider, MusicBrainzProvider, ProviderContext, TidalProvider,
};
use core_runtime::config::{HarmonizerConfig, DISCOGS, MUSICBRAINZ, TIDAL};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Builds a provider from its context
pub type ProviderConstructor =
    Arc<dyn Fn(&ProviderContext) -> Result<Arc<dyn MetadataProvider>> + Send + Sync>;

/// Name → constructor table consulted by [`ProviderRegistry::from_config`]
#[derive(Clone)]
pub struct ProviderConstructors {
    table: HashMap<String, ProviderConstructor>,
}

impl Default for ProviderConstructors {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderConstructors {
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// MusicBrainz, Tidal and Discogs
    pub fn builtin() -> Self {
        Self::empty()
            .with(MUSICBRAINZ, |ctx| {
                Ok(Arc::new(MusicBrainzProvider::new(ctx)?) as Arc<dyn MetadataProvider>)
            })
            .with(TIDAL, |ctx| {
                Ok(Arc::new(TidalProvider::new(ctx)?) as Arc<dyn MetadataProvider>)
            })
            .with(DISCOGS, |ctx| {
                Ok(Arc::new(DiscogsProvider::new(ctx)?) as Arc<dyn MetadataProvider>)
            })
    }

    pub fn with<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ProviderContext) -> Result<Arc<dyn MetadataProvider>> + Send + Sync + 'static,
    {
        self.register(name, constructor);
        self
    }

    /// Adds or replaces the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&ProviderContext) -> Result<Arc<dyn MetadataProvider>> + Send + Sync + 'static,
    {
        self.table.insert(name.into(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<&ProviderConstructor> {
        self.table.get(name)
    }
}

/// Snapshot of a registered provider for hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub name: String,
    pub display_name: String,
    pub priority: i32,
    pub enabled: bool,
}

struct Entry {
    provider: Arc<dyn MetadataProvider>,
    enabled: bool,
}

/// Registered providers, keyed by name
pub struct ProviderRegistry {
    entries: RwLock<BTreeMap<String, Entry>>,
    defaults: Vec<String>,
}

impl ProviderRegistry {
    /// Empty registry. `defaults` names the providers queried when a request
    /// names none (empty: every enabled provider).
    pub fn new(defaults: Vec<String>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            defaults,
        }
    }

    /// Instantiates every enabled provider in `config`.
    ///
    /// `base` supplies the host bridges; each provider gets a copy carrying
    /// its own settings. An enabled provider without a constructor is a
    /// configuration error.
    pub fn from_config(
        config: &HarmonizerConfig,
        base: &ProviderContext,
        constructors: &ProviderConstructors,
    ) -> Result<Self> {
        let registry = Self::new(config.default_providers.clone());

        for (name, settings) in config.providers.iter().filter(|(_, s)| s.enabled) {
            let constructor = constructors.get(name).ok_or_else(|| {
                MetadataError::Config(format!(
                    "Provider '{name}' is enabled but no constructor is registered for it"
                ))
            })?;

            let ctx = ProviderContext {
                settings: settings.clone(),
                ..base.clone()
            };
            let provider = constructor(&ctx)?;
            debug!(provider = %name, priority = provider.priority(), "Provider instantiated");
            registry.register(provider);
        }

        info!(
            providers = ?registry.enabled_names(),
            "Provider registry ready"
        );
        Ok(registry)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Entry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Entry>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds (or replaces) a provider, enabled.
    pub fn register(&self, provider: Arc<dyn MetadataProvider>) {
        let name = provider.name().to_string();
        self.write().insert(
            name,
            Entry {
                provider,
                enabled: true,
            },
        );
    }

    /// Returns `false` when no provider has that name.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.write().get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                info!(provider = name, enabled, "Provider toggled");
                true
            }
            None => false,
        }
    }

    /// Enabled provider by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn MetadataProvider>> {
        self.read()
            .get(name)
            .filter(|entry| entry.enabled)
            .map(|entry| Arc::clone(&entry.provider))
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.read().get(name).is_some_and(|entry| entry.enabled)
    }

    /// Every registered provider, enabled or not, by name
    pub fn get_all(&self) -> Vec<Arc<dyn MetadataProvider>> {
        self.read()
            .values()
            .map(|entry| Arc::clone(&entry.provider))
            .collect()
    }

    /// Enabled providers, by name
    pub fn get_enabled(&self) -> Vec<Arc<dyn MetadataProvider>> {
        self.read()
            .values()
            .filter(|entry| entry.enabled)
            .map(|entry| Arc::clone(&entry.provider))
            .collect()
    }

    /// Enabled providers, highest priority first. Ties go to the name.
    pub fn get_by_priority(&self) -> Vec<Arc<dyn MetadataProvider>> {
        let mut providers = self.get_enabled();
        sort_by_priority(&mut providers);
        providers
    }

    /// Configured defaults that are enabled, in priority order. Falls back
    /// to every enabled provider when no defaults are configured.
    pub fn get_defaults(&self) -> Vec<Arc<dyn MetadataProvider>> {
        if self.defaults.is_empty() {
            return self.get_by_priority();
        }

        let mut providers: Vec<_> = self
            .defaults
            .iter()
            .filter_map(|name| self.get(name))
            .collect();
        sort_by_priority(&mut providers);
        providers
    }

    /// First enabled provider, in priority order, that understands `url`
    pub fn find_by_url(&self, url: &str) -> Option<Arc<dyn MetadataProvider>> {
        self.get_by_priority()
            .into_iter()
            .find(|provider| provider.can_handle_url(url))
    }

    pub fn info(&self) -> Vec<ProviderInfo> {
        self.read()
            .values()
            .map(|entry| ProviderInfo {
                name: entry.provider.name().to_string(),
                display_name: entry.provider.display_name().to_string(),
                priority: entry.provider.priority(),
                enabled: entry.enabled,
            })
            .collect()
    }

    fn enabled_names(&self) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Descending priority, ties broken by name
pub fn sort_by_priority(providers: &mut [Arc<dyn MetadataProvider>]) {
    providers.sort_by(|a, b| {
        b.priority()
            .cmp(&a.priority())
            .then_with(|| a.name().cmp(b.name()))
    });
}
