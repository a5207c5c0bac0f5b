//! Stored per-plugin settings

use std::path::{Path, PathBuf};

use squirrel_plugin_api::PluginSettings;

use super::error::PluginHostError;

/// File name of a plugin's stored settings inside its directory
pub const SETTINGS_FILE: &str = "settings.toml";

/// Reads and writes `<root>/<plugin-id>/settings.toml`
#[derive(Debug, Clone)]
pub struct SettingsStore {
    root: PathBuf,
}

impl SettingsStore {
    /// Store rooted at the plugin directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Settings file for a plugin id
    pub fn path_for(&self, plugin_id: &str) -> PathBuf {
        self.root.join(plugin_id).join(SETTINGS_FILE)
    }

    /// Stored settings; a missing file yields empty settings
    pub fn load(&self, plugin_id: &str) -> Result<PluginSettings, PluginHostError> {
        PluginSettings::load(&self.path_for(plugin_id))
            .map_err(|e| PluginHostError::Settings(format!("{plugin_id}: {e}")))
    }

    /// Persist settings for a plugin id
    pub fn save(&self, plugin_id: &str, settings: &PluginSettings) -> Result<(), PluginHostError> {
        let path = self.path_for(plugin_id);
        settings
            .save(&path)
            .map_err(|e| PluginHostError::Settings(format!("{plugin_id}: {e}")))?;
        tracing::debug!(plugin = %plugin_id, path = %path.display(), "Plugin settings saved");
        Ok(())
    }
}
