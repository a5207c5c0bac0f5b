//! PluginSettings - string key/value configuration handed to plugins

use crate::error::PluginError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Plugin configuration values.
///
/// Keys are looked up case-insensitively; inserting a key that differs only
/// by case replaces the existing entry. Persisted as a flat TOML table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginSettings {
    values: BTreeMap<String, String>,
}

impl PluginSettings {
    /// Create empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a TOML file.
    ///
    /// Returns empty settings if the file doesn't exist. Non-string TOML
    /// values are stored in their TOML text form.
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let raw: BTreeMap<String, toml::Value> =
            toml::from_str(&content).map_err(|e| PluginError::Config(e.to_string()))?;

        Ok(raw
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    toml::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect())
    }

    /// Save settings to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), PluginError> {
        let content = toml::to_string_pretty(&self.values)
            .map_err(|e| PluginError::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get a value by key (case-insensitive)
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .or_else(|| {
                self.values
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    /// Whether a key is present (case-insensitive)
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert a value, replacing any entry whose key differs only by case
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.remove(&key);
        self.values.insert(key, value.into());
    }

    /// Remove a value (case-insensitive), returning it if present
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let existing = self
            .values
            .keys()
            .find(|k| k.eq_ignore_ascii_case(key))
            .cloned()?;
        self.values.remove(&existing)
    }

    /// Iterate over `(key, value)` pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate over keys in key order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PluginSettings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = Self::new();
        for (key, value) in iter {
            settings.insert(key, value);
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_is_case_insensitive() {
        let settings: PluginSettings = [("IndexPath", "/var/index")].into_iter().collect();
        assert_eq!(settings.get("indexpath"), Some("/var/index"));
        assert_eq!(settings.get("INDEXPATH"), Some("/var/index"));
        assert_eq!(settings.get("missing"), None);
    }

    #[test]
    fn test_insert_replaces_key_differing_by_case() {
        let mut settings = PluginSettings::new();
        settings.insert("IndexPath", "a");
        settings.insert("indexpath", "b");

        assert_eq!(settings.len(), 1);
        assert_eq!(settings.get("IndexPath"), Some("b"));
    }

    #[test]
    fn test_remove() {
        let mut settings: PluginSettings = [("ApiKey", "secret")].into_iter().collect();
        assert_eq!(settings.remove("APIKEY").as_deref(), Some("secret"));
        assert!(settings.is_empty());
        assert_eq!(settings.remove("ApiKey"), None);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/settings.toml");

        let settings: PluginSettings = [("IndexPath", "/var/index"), ("MaxResults", "25")]
            .into_iter()
            .collect();
        settings.save(&path).unwrap();

        let loaded = PluginSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_stringifies_non_string_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "MaxResults = 25\nEnabled = true\n").unwrap();

        let loaded = PluginSettings::load(&path).unwrap();
        assert_eq!(loaded.get("MaxResults"), Some("25"));
        assert_eq!(loaded.get("Enabled"), Some("true"));
    }

    #[test]
    fn test_load_missing_file() {
        let settings = PluginSettings::load(Path::new("/nonexistent/settings.toml")).unwrap();
        assert!(settings.is_empty());
    }

    #[test]
    fn test_load_invalid_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let err = PluginSettings::load(&path).unwrap_err();
        assert!(matches!(err, PluginError::Config(_)));
    }
}
