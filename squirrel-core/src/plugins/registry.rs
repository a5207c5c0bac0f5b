//! Enabled-plugin registry - which plugins the operator has switched on

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use super::error::PluginHostError;

/// Persisted set of enabled plugin ids
///
/// Stored as TOML, by default in `~/.config/squirrel/plugins/registry.toml`:
///
/// ```toml
/// enabled = ["squirrel.wiki.plugins.lucene"]
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledRegistry {
    #[serde(default)]
    enabled: BTreeSet<String>,
}

impl EnabledRegistry {
    /// Load the registry; a missing file is an empty registry
    pub fn load(path: &Path) -> Result<Self, PluginHostError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            PluginHostError::Registry(format!("{}: {}", path.display(), e))
        })
    }

    /// Write the registry, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<(), PluginHostError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| PluginHostError::Registry(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Whether a plugin id is enabled
    pub fn is_enabled(&self, plugin_id: &str) -> bool {
        self.enabled.contains(plugin_id)
    }

    /// Enable a plugin; returns false if it already was
    pub fn enable(&mut self, plugin_id: &str) -> bool {
        self.enabled.insert(plugin_id.to_string())
    }

    /// Disable a plugin; returns false if it was not enabled
    pub fn disable(&mut self, plugin_id: &str) -> bool {
        self.enabled.remove(plugin_id)
    }

    /// Enabled ids, sorted
    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }
}
