//! Filter registry for managing available filter types.
//!
//! The registry is an explicit table built at startup and passed by
//! reference. Each entry pairs cached metadata with a factory building the
//! filter from a TOML parameter table.

use crate::core::error::ConfigurationError;
use crate::core::filter::{Filter, FilterMetadata};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Builds a filter from its parameter table.
pub type FilterFactory = Arc<dyn Fn(&toml::Table) -> Result<Box<dyn Filter>, ConfigurationError> + Send + Sync>;

/// A registered filter type.
#[derive(Clone)]
pub struct RegistryEntry {
    pub factory: FilterFactory,
    /// Metadata of a default-constructed instance.
    pub metadata: FilterMetadata,
    /// Disabled entries are listed but cannot be created.
    pub enabled: bool,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("id", &self.metadata.id)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Deserialize a filter's parameter table.
///
/// Errors name the filter and carry the deserializer message.
pub fn parse_params<T: DeserializeOwned>(filter: &str, params: &toml::Table) -> Result<T, ConfigurationError> {
    toml::Value::Table(params.clone())
        .try_into()
        .map_err(|e: toml::de::Error| ConfigurationError::InvalidParameter {
            parameter: filter.to_string(),
            reason: e.message().to_string(),
        })
}

/// Table of filter factories keyed by filter id, in registration order.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    entries: IndexMap<String, RegistryEntry>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in filter.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::filters::builtin::register_all(&mut registry);
        registry
    }

    /// Register a filter type under `metadata.id`, replacing any previous
    /// entry with the same id.
    pub fn register<F>(&mut self, metadata: FilterMetadata, factory: F)
    where
        F: Fn(&toml::Table) -> Result<Box<dyn Filter>, ConfigurationError> + Send + Sync + 'static,
    {
        let id = metadata.id.clone();
        let replaced = self.entries.insert(
            id.clone(),
            RegistryEntry {
                factory: Arc::new(factory),
                metadata,
                enabled: true,
            },
        );
        if replaced.is_some() {
            log::warn!("Filter '{}' registered twice; keeping the last factory", id);
        }
    }

    /// Build filter `id` from `params`.
    pub fn create(&self, id: &str, params: &toml::Table) -> Result<Box<dyn Filter>, ConfigurationError> {
        let entry = self
            .entries
            .get(id)
            .filter(|e| e.enabled)
            .ok_or_else(|| ConfigurationError::UnknownFilter(id.to_string()))?;
        log::debug!("Creating filter '{}' with {} parameter(s)", id, params.len());
        (entry.factory)(params)
    }

    /// Build filter `id` with its default parameters.
    pub fn create_default(&self, id: &str) -> Result<Box<dyn Filter>, ConfigurationError> {
        self.create(id, &toml::Table::new())
    }

    pub fn get_metadata(&self, id: &str) -> Option<&FilterMetadata> {
        self.entries.get(id).map(|e| &e.metadata)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Ids in registration order.
    pub fn filter_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries in registration order.
    pub fn filters(&self) -> impl Iterator<Item = (&str, &RegistryEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Ids of the filters whose id, name or description contains `query`,
    /// ignoring case.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let query = query.to_lowercase();
        self.entries
            .values()
            .filter(|entry| {
                let m = &entry.metadata;
                [&m.id, &m.name, &m.description]
                    .iter()
                    .any(|text| text.to_lowercase().contains(&query))
            })
            .map(|entry| entry.metadata.id.as_str())
            .collect()
    }

    /// Enable or disable creation of `id`. Returns false for unknown ids.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Remove `id`, keeping the order of the others.
    pub fn unregister(&mut self, id: &str) -> bool {
        self.entries.shift_remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = FilterRegistry::with_builtins();
        for id in [
            "shift_scale",
            "band_math",
            "spectral_angle",
            "local_statistics",
            "fine_registration",
            "coarse_mask",
            "streaming_statistics",
        ] {
            assert!(registry.contains(id), "missing {}", id);
        }
        assert_eq!(registry.filter_ids().next(), Some("shift_scale"));
    }

    #[test]
    fn test_create_with_params() {
        let registry = FilterRegistry::with_builtins();
        let params: toml::Table = toml::from_str("scale = 2.0\noutput_type = \"u16\"").unwrap();
        let filter = registry.create("shift_scale", &params).unwrap();
        assert_eq!(filter.metadata().id, "shift_scale");
    }

    #[test]
    fn test_create_rejects_bad_params() {
        let registry = FilterRegistry::with_builtins();
        let params: toml::Table = toml::from_str("scale = \"big\"").unwrap();
        assert!(matches!(
            registry.create("shift_scale", &params),
            Err(ConfigurationError::InvalidParameter { .. })
        ));
        let params: toml::Table = toml::from_str("sigma = 1.0").unwrap();
        assert!(registry.create("shift_scale", &params).is_err());
    }

    #[test]
    fn test_unknown_and_disabled() {
        let mut registry = FilterRegistry::with_builtins();
        assert!(matches!(
            registry.create_default("gaussian"),
            Err(ConfigurationError::UnknownFilter(_))
        ));
        assert!(registry.set_enabled("band_math", false));
        assert!(registry.create_default("band_math").is_err());
        assert!(registry.unregister("band_math"));
        assert!(!registry.contains("band_math"));
    }

    #[test]
    fn test_search() {
        let registry = FilterRegistry::with_builtins();
        assert!(registry.search("registration").contains(&"fine_registration"));
        assert!(registry.search("zzz").is_empty());
    }
}
