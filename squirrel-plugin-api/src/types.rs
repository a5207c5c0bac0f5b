//! Plugin types and metadata structures

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The extension point a plugin implements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityType {
    /// Full-text search backend
    #[default]
    SearchProvider,
    /// External identity / login backend
    AuthenticationProvider,
    /// Any other host-defined capability
    Other(String),
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SearchProvider => f.write_str("SearchProvider"),
            Self::AuthenticationProvider => f.write_str("AuthenticationProvider"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Plugin metadata. Immutable once the module is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Globally unique identifier, stable across reloads
    pub id: String,
    /// Display name
    pub name: String,
    /// Plugin version (semver)
    pub version: String,
    /// API version this plugin was built against
    pub api_version: u32,
    /// Human-readable description
    pub description: String,
    /// Plugin author
    pub author: String,
    /// Which extension point this plugin implements
    pub capability: CapabilityType,
    /// Core plugins cannot be removed or disabled, only reconfigured
    pub is_core_plugin: bool,
    /// Whether the plugin needs configuration before it can be initialized
    pub requires_configuration: bool,
    /// Ordered configuration schema
    pub configuration_schema: Vec<ConfigurationSchemaItem>,
}

impl Default for PluginMetadata {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            version: "0.0.1".to_string(),
            api_version: crate::API_VERSION,
            description: String::new(),
            author: String::new(),
            capability: CapabilityType::default(),
            is_core_plugin: false,
            requires_configuration: false,
            configuration_schema: Vec::new(),
        }
    }
}

/// Value kind of a configuration setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettingKind {
    /// Single-line text
    #[default]
    Text,
    /// Secret text, masked on display
    Secret,
    /// Absolute http(s) URL
    Url,
    /// Decimal number
    Number,
    /// true/false, 1/0, yes/no
    Boolean,
    /// Multi-line text
    MultilineText,
    /// One of an explicit option set
    Dropdown {
        /// Allowed values
        options: Vec<String>,
    },
}

/// One entry of a plugin's configuration schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSchemaItem {
    /// Setting key (case-insensitive, unique within a plugin)
    pub key: String,
    /// Label shown to administrators
    pub display_name: String,
    /// Value kind
    pub kind: SettingKind,
    /// Whether a non-blank value must be present
    pub required: bool,
    /// Whether the value must be masked on display
    pub secret: bool,
    /// Optional custom pattern the value must match
    pub validation_pattern: Option<String>,
    /// Message reported when `validation_pattern` does not match
    pub validation_message: Option<String>,
    /// Value used when the setting is absent
    pub default_value: Option<String>,
    /// Help text shown next to the setting
    pub help_text: Option<String>,
}

impl ConfigurationSchemaItem {
    /// Create an optional setting. `Secret` kinds are flagged secret automatically.
    pub fn new(key: impl Into<String>, display_name: impl Into<String>, kind: SettingKind) -> Self {
        let secret = kind == SettingKind::Secret;
        Self {
            key: key.into(),
            display_name: display_name.into(),
            kind,
            required: false,
            secret,
            validation_pattern: None,
            validation_message: None,
            default_value: None,
            help_text: None,
        }
    }

    /// Builder: mark the setting as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder: mask the value on display
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Builder: set a default value
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Builder: set a custom validation pattern and the message reported on mismatch
    pub fn with_pattern(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.validation_pattern = Some(pattern.into());
        self.validation_message = Some(message.into());
        self
    }

    /// Builder: set help text
    pub fn with_help(mut self, text: impl Into<String>) -> Self {
        self.help_text = Some(text.into());
        self
    }

    /// Case-insensitive key comparison
    pub fn matches_key(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }
}

/// A host-invocable operation exposed by a plugin (e.g. "rebuild index")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginAction {
    /// Action identifier used for dispatch
    pub id: String,
    /// Display name
    pub name: String,
    /// What the action does
    pub description: String,
    /// Whether the management surface should ask before running it
    pub requires_confirmation: bool,
}

impl PluginAction {
    /// Create an action that runs without confirmation
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            requires_confirmation: false,
        }
    }

    /// Builder: ask the operator before running
    pub fn confirmed(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }
}

/// Output of an executed plugin action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutput {
    /// Whether the action did what it was asked
    pub success: bool,
    /// Human-readable outcome
    pub message: String,
    /// Structured details
    pub data: BTreeMap<String, String>,
}

impl ActionOutput {
    /// Successful output with a message
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: BTreeMap::new(),
        }
    }

    /// Builder: attach a detail entry
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_default_api_version() {
        let metadata = PluginMetadata::default();
        assert_eq!(metadata.api_version, crate::API_VERSION);
        assert!(!metadata.is_core_plugin);
    }

    #[test]
    fn test_secret_kind_sets_secret_flag() {
        let item = ConfigurationSchemaItem::new("ApiKey", "API key", SettingKind::Secret);
        assert!(item.secret);

        let item = ConfigurationSchemaItem::new("Endpoint", "Endpoint", SettingKind::Url);
        assert!(!item.secret);
        assert!(item.clone().secret().secret);
    }

    #[test]
    fn test_schema_item_key_is_case_insensitive() {
        let item = ConfigurationSchemaItem::new("IndexPath", "Index path", SettingKind::Text);
        assert!(item.matches_key("indexpath"));
        assert!(item.matches_key("INDEXPATH"));
        assert!(!item.matches_key("index_path"));
    }

    #[test]
    fn test_metadata_toml_roundtrip() {
        let metadata = PluginMetadata {
            id: "squirrel.wiki.plugins.lucene".to_string(),
            name: "Lucene search".to_string(),
            capability: CapabilityType::SearchProvider,
            configuration_schema: vec![
                ConfigurationSchemaItem::new("IndexPath", "Index path", SettingKind::Text)
                    .required()
                    .with_default("data/index"),
                ConfigurationSchemaItem::new(
                    "Analyzer",
                    "Analyzer",
                    SettingKind::Dropdown {
                        options: vec!["standard".into(), "english".into()],
                    },
                ),
            ],
            ..Default::default()
        };

        let toml_str = toml::to_string(&metadata).expect("Failed to serialize");
        let parsed: PluginMetadata = toml::from_str(&toml_str).expect("Failed to parse");

        assert_eq!(parsed.id, metadata.id);
        assert_eq!(parsed.configuration_schema, metadata.configuration_schema);
    }

    #[test]
    fn test_capability_display() {
        assert_eq!(CapabilityType::SearchProvider.to_string(), "SearchProvider");
        assert_eq!(
            CapabilityType::Other("MenuRenderer".into()).to_string(),
            "MenuRenderer"
        );
    }

    #[test]
    fn test_action_output_builder() {
        let output = ActionOutput::ok("rebuilt").with_data("documents", "42");
        assert!(output.success);
        assert_eq!(output.data.get("documents").map(String::as_str), Some("42"));
    }
}
