//! Environment overrides for plugin settings
//!
//! A deployment can pin any setting of any plugin through a variable named
//! `PLUGIN_<ID>_<KEY>`, where the id is upper-cased with `.` and `-`
//! replaced by `_`. For example the `IndexPath` setting of
//! `squirrel.wiki.plugins.lucene` is read from
//! `PLUGIN_SQUIRREL_WIKI_PLUGINS_LUCENE_INDEXPATH`. A pinned setting wins
//! over the stored value and is reported as locked.

use std::sync::Arc;

use squirrel_plugin_api::helper::parse_bool_value;
use squirrel_plugin_api::{ConfigurationReader, ConfigurationSchemaItem, PluginSettings};

/// Setting key controlling whether a plugin is enabled
pub const ENABLED_KEY: &str = "ENABLED";

/// `PLUGIN_<ID>_` for a plugin id
pub fn environment_prefix(plugin_id: &str) -> String {
    let id: String = plugin_id
        .chars()
        .map(|c| match c {
            '.' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("PLUGIN_{id}_")
}

/// Full variable name overriding `key` of `plugin_id`
pub fn environment_variable_name(plugin_id: &str, key: &str) -> String {
    format!("{}{}", environment_prefix(plugin_id), key.to_ascii_uppercase())
}

/// Whether the environment fixes a plugin's enabled state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnabledLock {
    /// No override; the operator decides
    Unlocked,
    /// Pinned on or off
    Locked(bool),
    /// A value is present but is not a boolean
    Indeterminate,
}

impl EnabledLock {
    /// Whether the operator may not change the enabled state
    pub fn is_locked(self) -> bool {
        !matches!(self, EnabledLock::Unlocked)
    }
}

/// Settings after environment overrides were applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub settings: PluginSettings,
    /// Schema keys whose value came from the environment
    pub locked_keys: Vec<String>,
}

impl ResolvedSettings {
    /// Whether a key was overridden (case-insensitive)
    pub fn is_locked(&self, key: &str) -> bool {
        self.locked_keys.iter().any(|k| k.eq_ignore_ascii_case(key))
    }
}

/// Resolves environment overrides through a [`ConfigurationReader`]
#[derive(Clone)]
pub struct EnvironmentOverrides {
    reader: Arc<dyn ConfigurationReader>,
}

impl std::fmt::Debug for EnvironmentOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentOverrides").finish_non_exhaustive()
    }
}

impl EnvironmentOverrides {
    /// Overrides read from `reader`
    pub fn new(reader: Arc<dyn ConfigurationReader>) -> Self {
        Self { reader }
    }

    /// Override for one setting; blank values count as unset
    pub fn get(&self, plugin_id: &str, key: &str) -> Option<String> {
        self.reader
            .get_non_empty(&environment_variable_name(plugin_id, key))
    }

    /// Whether the environment pins a setting
    pub fn is_locked(&self, plugin_id: &str, key: &str) -> bool {
        self.get(plugin_id, key).is_some()
    }

    /// Enabled-state lock from `PLUGIN_<ID>_ENABLED`
    pub fn enabled_lock(&self, plugin_id: &str) -> EnabledLock {
        let Some(raw) = self.get(plugin_id, ENABLED_KEY) else {
            return EnabledLock::Unlocked;
        };
        match parse_bool_value(&raw) {
            Some(enabled) => EnabledLock::Locked(enabled),
            None => {
                tracing::warn!(
                    plugin = %plugin_id,
                    variable = %environment_variable_name(plugin_id, ENABLED_KEY),
                    value = %raw,
                    "Enabled override is not a boolean"
                );
                EnabledLock::Indeterminate
            }
        }
    }

    /// Overlay environment values onto `settings` for every schema key
    pub fn apply(
        &self,
        plugin_id: &str,
        settings: &PluginSettings,
        schema: &[ConfigurationSchemaItem],
    ) -> ResolvedSettings {
        let mut resolved = settings.clone();
        let mut locked_keys = Vec::new();

        for item in schema {
            if let Some(value) = self.get(plugin_id, &item.key) {
                resolved.insert(item.key.clone(), value);
                locked_keys.push(item.key.clone());
            }
        }

        if !locked_keys.is_empty() {
            tracing::debug!(plugin = %plugin_id, keys = ?locked_keys, "Applied environment overrides");
        }

        ResolvedSettings {
            settings: resolved,
            locked_keys,
        }
    }
}
