//! Type-aware configuration validation

use crate::helper::{parse_bool_value, parse_finite, parse_http_url};
use crate::settings::PluginSettings;
use crate::types::{ConfigurationSchemaItem, SettingKind};
use regex::RegexBuilder;
use std::collections::BTreeMap;
use std::fmt;

/// Maximum accepted length (in characters) of text, secret, and multiline values
pub const MAX_TEXT_LENGTH: usize = 10_000;

/// Default compiled-size budget for custom validation patterns
pub const DEFAULT_PATTERN_BUDGET: usize = 256 * 1024;

/// Aggregated validation messages, keyed by setting key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Blocking problems
    pub errors: BTreeMap<String, Vec<String>>,
    /// Non-blocking problems
    pub warnings: BTreeMap<String, Vec<String>>,
}

impl ValidationResult {
    /// True iff there are no errors; warnings do not block
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record an error for `key`
    pub fn add_error(&mut self, key: &str, message: impl Into<String>) {
        self.errors
            .entry(key.to_string())
            .or_default()
            .push(message.into());
    }

    /// Record a warning for `key`
    pub fn add_warning(&mut self, key: &str, message: impl Into<String>) {
        self.warnings
            .entry(key.to_string())
            .or_default()
            .push(message.into());
    }

    /// Errors recorded for `key`
    pub fn errors_for(&self, key: &str) -> &[String] {
        self.errors.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Warnings recorded for `key`
    pub fn warnings_for(&self, key: &str) -> &[String] {
        self.warnings.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Total number of error messages
    pub fn error_count(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, messages) in &self.errors {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{key}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Validates plugin settings against a configuration schema
#[derive(Debug, Clone)]
pub struct ConfigurationValidator {
    pattern_budget: usize,
}

impl Default for ConfigurationValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationValidator {
    /// Create a validator with the default pattern budget
    pub fn new() -> Self {
        Self {
            pattern_budget: DEFAULT_PATTERN_BUDGET,
        }
    }

    /// Builder: override the compiled-size budget for custom patterns
    pub fn with_pattern_budget(mut self, bytes: usize) -> Self {
        self.pattern_budget = bytes;
        self
    }

    /// Validate every schema item against `settings`.
    ///
    /// A missing required value yields exactly one error for that key and
    /// skips further checks on it.
    pub fn validate(
        &self,
        settings: &PluginSettings,
        schema: &[ConfigurationSchemaItem],
    ) -> ValidationResult {
        let mut result = ValidationResult::default();

        for item in schema {
            let value = settings.get(&item.key).filter(|v| !v.trim().is_empty());
            let Some(value) = value else {
                if item.required {
                    result.add_error(&item.key, format!("{} is required", item.display_name));
                }
                continue;
            };

            if let Err(message) = check_kind(item, value) {
                result.add_error(&item.key, message);
            }

            if let Some(pattern) = &item.validation_pattern {
                self.check_pattern(item, pattern, value, &mut result);
            }
        }

        result
    }

    fn check_pattern(
        &self,
        item: &ConfigurationSchemaItem,
        pattern: &str,
        value: &str,
        result: &mut ValidationResult,
    ) {
        // The regex engine matches in linear time, so the budget bounds the
        // compiled program rather than the match itself.
        let compiled = RegexBuilder::new(pattern)
            .size_limit(self.pattern_budget)
            .dfa_size_limit(self.pattern_budget)
            .build();

        match compiled {
            Ok(regex) => {
                if !regex.is_match(value) {
                    let message = item
                        .validation_message
                        .clone()
                        .unwrap_or_else(|| format!("{} has an invalid format", item.display_name));
                    result.add_error(&item.key, message);
                }
            }
            Err(regex::Error::CompiledTooBig(limit)) => {
                tracing::warn!(key = %item.key, limit, "Validation pattern exceeded its budget");
                result.add_error(
                    &item.key,
                    format!(
                        "Validation of {} timed out: pattern exceeds the {limit} byte budget",
                        item.display_name
                    ),
                );
            }
            Err(e) => {
                result.add_warning(
                    &item.key,
                    format!("Validation pattern for {} is invalid: {e}", item.display_name),
                );
            }
        }
    }
}

fn check_kind(item: &ConfigurationSchemaItem, value: &str) -> Result<(), String> {
    let name = &item.display_name;
    match &item.kind {
        SettingKind::Url => parse_http_url(value)
            .map(|_| ())
            .ok_or_else(|| format!("{name} must be an absolute http or https URL")),
        SettingKind::Number => parse_finite(value)
            .map(|_| ())
            .ok_or_else(|| format!("{name} must be a number")),
        SettingKind::Boolean => parse_bool_value(value)
            .map(|_| ())
            .ok_or_else(|| format!("{name} must be true/false, yes/no, or 1/0")),
        SettingKind::Text | SettingKind::Secret | SettingKind::MultilineText => {
            if value.chars().count() > MAX_TEXT_LENGTH {
                Err(format!("{name} must be at most {MAX_TEXT_LENGTH} characters"))
            } else {
                Ok(())
            }
        }
        SettingKind::Dropdown { options } => {
            if options.iter().any(|option| option == value) {
                Ok(())
            } else {
                Err(format!("{name} must be one of: {}", options.join(", ")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> PluginSettings {
        pairs.iter().copied().collect()
    }

    fn item(key: &str, kind: SettingKind) -> ConfigurationSchemaItem {
        ConfigurationSchemaItem::new(key, key, kind)
    }

    #[test]
    fn test_missing_required_is_single_error() {
        let schema = vec![item("IndexPath", SettingKind::Url).required()];
        let result = ConfigurationValidator::new().validate(&PluginSettings::new(), &schema);

        assert!(!result.is_valid());
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors_for("IndexPath").len(), 1);
    }

    #[test]
    fn test_blank_required_value_is_missing() {
        let schema = vec![item("ApiKey", SettingKind::Secret).required()];
        let result = ConfigurationValidator::new().validate(&settings(&[("ApiKey", "   ")]), &schema);
        assert_eq!(result.errors_for("ApiKey"), ["ApiKey is required".to_string()]);
    }

    #[test]
    fn test_optional_missing_value_is_fine() {
        let schema = vec![item("Endpoint", SettingKind::Url)];
        let result = ConfigurationValidator::new().validate(&PluginSettings::new(), &schema);
        assert!(result.is_valid());
    }

    #[test]
    fn test_url_kind() {
        let schema = vec![item("Endpoint", SettingKind::Url)];
        let validator = ConfigurationValidator::new();

        let bad = validator.validate(&settings(&[("Endpoint", "not-a-url")]), &schema);
        assert_eq!(bad.errors_for("Endpoint").len(), 1);

        let good = validator.validate(&settings(&[("Endpoint", "https://example.com")]), &schema);
        assert!(good.errors_for("Endpoint").is_empty());

        let ftp = validator.validate(&settings(&[("Endpoint", "ftp://example.com")]), &schema);
        assert!(!ftp.is_valid());
    }

    #[test]
    fn test_number_kind() {
        let schema = vec![item("MaxResults", SettingKind::Number)];
        let validator = ConfigurationValidator::new();

        assert!(validator.validate(&settings(&[("MaxResults", "12.5")]), &schema).is_valid());
        assert!(validator.validate(&settings(&[("MaxResults", "-3")]), &schema).is_valid());
        assert!(!validator.validate(&settings(&[("MaxResults", "ten")]), &schema).is_valid());
    }

    #[test]
    fn test_boolean_kind() {
        let schema = vec![item("Enabled", SettingKind::Boolean)];
        let validator = ConfigurationValidator::new();

        for ok in ["true", "FALSE", "1", "0", "Yes", "no"] {
            assert!(validator.validate(&settings(&[("Enabled", ok)]), &schema).is_valid());
        }
        assert!(!validator.validate(&settings(&[("Enabled", "on")]), &schema).is_valid());
    }

    #[test]
    fn test_text_length_guard() {
        let schema = vec![item("Notes", SettingKind::MultilineText)];
        let validator = ConfigurationValidator::new();

        let at_limit = "x".repeat(MAX_TEXT_LENGTH);
        assert!(validator.validate(&settings(&[("Notes", at_limit.as_str())]), &schema).is_valid());

        let too_long = "x".repeat(MAX_TEXT_LENGTH + 1);
        assert!(!validator.validate(&settings(&[("Notes", too_long.as_str())]), &schema).is_valid());
    }

    #[test]
    fn test_dropdown_membership() {
        let schema = vec![item(
            "Analyzer",
            SettingKind::Dropdown {
                options: vec!["standard".into(), "english".into()],
            },
        )];
        let validator = ConfigurationValidator::new();

        assert!(validator.validate(&settings(&[("Analyzer", "english")]), &schema).is_valid());
        let result = validator.validate(&settings(&[("Analyzer", "klingon")]), &schema);
        assert!(result.errors_for("Analyzer")[0].contains("standard, english"));
    }

    #[test]
    fn test_custom_pattern_mismatch_uses_message() {
        let schema = vec![item("Tenant", SettingKind::Text)
            .with_pattern("^[a-z0-9-]+$", "Tenant must be lowercase")];
        let validator = ConfigurationValidator::new();

        let result = validator.validate(&settings(&[("Tenant", "Contoso Ltd")]), &schema);
        assert_eq!(result.errors_for("Tenant"), ["Tenant must be lowercase".to_string()]);

        assert!(validator.validate(&settings(&[("Tenant", "contoso")]), &schema).is_valid());
    }

    #[test]
    fn test_invalid_pattern_is_warning() {
        let schema = vec![item("Tenant", SettingKind::Text).with_pattern("([a-z", "bad")];
        let result = ConfigurationValidator::new().validate(&settings(&[("Tenant", "x")]), &schema);

        assert!(result.is_valid());
        assert_eq!(result.warnings_for("Tenant").len(), 1);
    }

    #[test]
    fn test_pattern_over_budget_is_error() {
        let schema = vec![item("Code", SettingKind::Text).with_pattern(r"^\w{500}$", "bad")];
        let result = ConfigurationValidator::new()
            .with_pattern_budget(64)
            .validate(&settings(&[("Code", "x")]), &schema);

        assert!(!result.is_valid());
        assert!(result.errors_for("Code")[0].contains("timed out"));
    }

    #[test]
    fn test_messages_aggregate_per_key() {
        let schema = vec![item("Endpoint", SettingKind::Url)
            .with_pattern("^https://", "Endpoint must use https")];
        let result = ConfigurationValidator::new()
            .validate(&settings(&[("Endpoint", "nonsense")]), &schema);

        assert_eq!(result.errors_for("Endpoint").len(), 2);
        assert_eq!(result.error_count(), 2);
    }

    #[test]
    fn test_case_insensitive_keys() {
        let schema = vec![item("IndexPath", SettingKind::Text).required()];
        let result = ConfigurationValidator::new()
            .validate(&settings(&[("indexpath", "/srv/index")]), &schema);
        assert!(result.is_valid());
    }

    #[test]
    fn test_display_joins_errors() {
        let mut result = ValidationResult::default();
        result.add_error("A", "first");
        result.add_error("B", "second");
        assert_eq!(result.to_string(), "A: first; B: second");
    }
}
