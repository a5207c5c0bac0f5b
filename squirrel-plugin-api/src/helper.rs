//! Configuration helpers shared by the host and plugin authors.
//!
//! Every parser takes an explicit default and never fails on malformed
//! input; schema utilities return new settings instead of mutating.

use crate::settings::PluginSettings;
use crate::types::ConfigurationSchemaItem;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Mask used by [`mask_secrets`] when the caller has no preference
pub const DEFAULT_SECRET_MASK: &str = "********";

/// Recognise `true/false/1/0/yes/no` (case-insensitive, surrounding whitespace ignored)
pub fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parse a boolean, falling back to `default`
pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    value.and_then(parse_bool_value).unwrap_or(default)
}

/// Parse a 32-bit integer, falling back to `default`
pub fn parse_int(value: Option<&str>, default: i32) -> i32 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Parse a 64-bit integer, falling back to `default`
pub fn parse_long(value: Option<&str>, default: i64) -> i64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Parse a finite decimal number, falling back to `default`
pub fn parse_double(value: Option<&str>, default: f64) -> f64 {
    value.and_then(parse_finite).unwrap_or(default)
}

/// Parse an absolute http(s) URL, falling back to `default`
pub fn parse_url(value: Option<&str>, default: Url) -> Url {
    value.and_then(parse_http_url).unwrap_or(default)
}

/// Parse a duration, falling back to `default`.
///
/// Accepts bare seconds (`90`), unit suffixes (`250ms`, `30s`, `5m`, `2h`,
/// `1d`) and clock notation (`hh:mm` or `hh:mm:ss`).
pub fn parse_duration(value: Option<&str>, default: Duration) -> Duration {
    value.and_then(parse_duration_value).unwrap_or(default)
}

pub(crate) fn parse_finite(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

pub(crate) fn parse_http_url(value: &str) -> Option<Url> {
    Url::parse(value.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

fn parse_duration_value(value: &str) -> Option<Duration> {
    let value = value.trim().to_ascii_lowercase();
    if value.is_empty() {
        return None;
    }

    if value.contains(':') {
        let parts: Vec<u64> = value
            .split(':')
            .map(|p| p.parse().ok())
            .collect::<Option<_>>()?;
        let (h, m, s) = match parts.as_slice() {
            [h, m] if *m < 60 => (*h, *m, 0),
            [h, m, s] if *m < 60 && *s < 60 => (*h, *m, *s),
            _ => return None,
        };
        let secs = h.checked_mul(3600)?.checked_add(m * 60 + s)?;
        return Some(Duration::from_secs(secs));
    }

    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok().filter(|n: &f64| n.is_finite() && *n >= 0.0)?;
    let seconds = match unit.trim() {
        "" | "s" | "sec" | "secs" => number,
        "ms" => number / 1000.0,
        "m" | "min" | "mins" => number * 60.0,
        "h" | "hr" | "hrs" => number * 3600.0,
        "d" | "day" | "days" => number * 86_400.0,
        _ => return None,
    };
    Duration::try_from_secs_f64(seconds).ok()
}

/// Typed conversion from a stored setting string
pub trait FromSetting: Sized {
    /// Parse the value, returning `None` when it is malformed
    fn from_setting(value: &str) -> Option<Self>;
}

impl FromSetting for String {
    fn from_setting(value: &str) -> Option<Self> {
        Some(value.to_string())
    }
}

impl FromSetting for bool {
    fn from_setting(value: &str) -> Option<Self> {
        parse_bool_value(value)
    }
}

macro_rules! from_setting_via_parse {
    ($($ty:ty),+) => {
        $(
            impl FromSetting for $ty {
                fn from_setting(value: &str) -> Option<Self> {
                    value.trim().parse().ok()
                }
            }
        )+
    };
}

from_setting_via_parse!(i32, i64, u16, u32, u64, usize);

impl FromSetting for f64 {
    fn from_setting(value: &str) -> Option<Self> {
        parse_finite(value)
    }
}

impl FromSetting for Duration {
    fn from_setting(value: &str) -> Option<Self> {
        parse_duration_value(value)
    }
}

impl FromSetting for Url {
    fn from_setting(value: &str) -> Option<Self> {
        parse_http_url(value)
    }
}

impl FromSetting for PathBuf {
    fn from_setting(value: &str) -> Option<Self> {
        let value = value.trim();
        (!value.is_empty()).then(|| PathBuf::from(value))
    }
}

/// Nullable settings: a present, parsable value becomes `Some`
impl<T: FromSetting> FromSetting for Option<T> {
    fn from_setting(value: &str) -> Option<Self> {
        T::from_setting(value).map(Some)
    }
}

/// Enumerations selectable by variant name
pub trait SettingEnum: Sized + Copy + 'static {
    /// Variant names paired with their values
    const VARIANTS: &'static [(&'static str, Self)];
}

/// Parse an enum variant by name (case-insensitive)
pub fn parse_enum<T: SettingEnum>(value: &str) -> Option<T> {
    let value = value.trim();
    T::VARIANTS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|(_, variant)| *variant)
}

/// Typed read with graceful fallback to `default` when absent or malformed
pub fn get_value<T: FromSetting>(settings: &PluginSettings, key: &str, default: T) -> T {
    settings
        .get(key)
        .and_then(T::from_setting)
        .unwrap_or(default)
}

/// Enum read by variant name with graceful fallback to `default`
pub fn get_enum<T: SettingEnum>(settings: &PluginSettings, key: &str, default: T) -> T {
    settings.get(key).and_then(parse_enum).unwrap_or(default)
}

/// Fill keys absent from `settings` with schema defaults. Existing values always win.
pub fn merge_with_defaults(
    settings: &PluginSettings,
    schema: &[ConfigurationSchemaItem],
) -> PluginSettings {
    let mut merged = settings.clone();
    for item in schema {
        if let Some(default) = &item.default_value
            && !merged.contains_key(&item.key)
        {
            merged.insert(item.key.clone(), default.clone());
        }
    }
    merged
}

/// Drop every key that the schema does not declare
pub fn filter_by_schema(
    settings: &PluginSettings,
    schema: &[ConfigurationSchemaItem],
) -> PluginSettings {
    settings
        .iter()
        .filter(|(key, _)| schema.iter().any(|item| item.matches_key(key)))
        .collect()
}

/// Replace the value of every secret setting with `mask`
pub fn mask_secrets(
    settings: &PluginSettings,
    schema: &[ConfigurationSchemaItem],
    mask: &str,
) -> PluginSettings {
    settings
        .iter()
        .map(|(key, value)| {
            let secret = schema
                .iter()
                .any(|item| item.secret && item.matches_key(key));
            (key, if secret { mask } else { value })
        })
        .collect()
}

/// Required keys that are absent or blank, in schema order
pub fn missing_required_keys(
    settings: &PluginSettings,
    schema: &[ConfigurationSchemaItem],
) -> Vec<String> {
    schema
        .iter()
        .filter(|item| item.required)
        .filter(|item| {
            settings
                .get(&item.key)
                .is_none_or(|value| value.trim().is_empty())
        })
        .map(|item| item.key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SettingKind;

    fn schema() -> Vec<ConfigurationSchemaItem> {
        vec![
            ConfigurationSchemaItem::new("IndexPath", "Index path", SettingKind::Text)
                .required()
                .with_default("data/index"),
            ConfigurationSchemaItem::new("ApiKey", "API key", SettingKind::Secret).required(),
            ConfigurationSchemaItem::new("MaxResults", "Max results", SettingKind::Number)
                .with_default("50"),
        ]
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Analyzer {
        Standard,
        English,
    }

    impl SettingEnum for Analyzer {
        const VARIANTS: &'static [(&'static str, Self)] =
            &[("Standard", Analyzer::Standard), ("English", Analyzer::English)];
    }

    #[test]
    fn test_parse_bool_variants() {
        for yes in ["true", "TRUE", "1", "Yes", " yes "] {
            assert!(parse_bool(Some(yes), false), "{yes} should be true");
        }
        for no in ["false", "False", "0", "NO"] {
            assert!(!parse_bool(Some(no), true), "{no} should be false");
        }
        assert!(parse_bool(Some("maybe"), true));
        assert!(!parse_bool(None, false));
    }

    #[test]
    fn test_numeric_parsers_fall_back() {
        assert_eq!(parse_int(Some("42"), 7), 42);
        assert_eq!(parse_int(Some("forty"), 7), 7);
        assert_eq!(parse_long(Some(" 9000000000 "), 0), 9_000_000_000);
        assert_eq!(parse_double(Some("2.5"), 0.0), 2.5);
        assert_eq!(parse_double(Some("NaN"), 1.0), 1.0);
        assert_eq!(parse_double(None, 1.5), 1.5);
    }

    #[test]
    fn test_parse_url_requires_http_scheme() {
        let fallback = Url::parse("http://localhost/").unwrap();
        let url = parse_url(Some("https://example.com/search"), fallback.clone());
        assert_eq!(url.host_str(), Some("example.com"));

        assert_eq!(parse_url(Some("ftp://example.com"), fallback.clone()), fallback);
        assert_eq!(parse_url(Some("not-a-url"), fallback.clone()), fallback);
    }

    #[test]
    fn test_parse_duration_forms() {
        let fallback = Duration::from_secs(1);
        assert_eq!(parse_duration(Some("90"), fallback), Duration::from_secs(90));
        assert_eq!(parse_duration(Some("250ms"), fallback), Duration::from_millis(250));
        assert_eq!(parse_duration(Some("5m"), fallback), Duration::from_secs(300));
        assert_eq!(parse_duration(Some("2h"), fallback), Duration::from_secs(7200));
        assert_eq!(parse_duration(Some("1d"), fallback), Duration::from_secs(86_400));
        assert_eq!(parse_duration(Some("01:30"), fallback), Duration::from_secs(5400));
        assert_eq!(parse_duration(Some("00:01:05"), fallback), Duration::from_secs(65));
        assert_eq!(parse_duration(Some("00:75"), fallback), fallback);
        assert_eq!(parse_duration(Some("soon"), fallback), fallback);
        assert_eq!(parse_duration(Some("-5s"), fallback), fallback);
    }

    #[test]
    fn test_parse_duration_overflow_falls_back() {
        let fallback = Duration::from_secs(7);
        assert_eq!(parse_duration(Some("99999999999999999:00"), fallback), fallback);
        assert_eq!(parse_duration(Some("5124095576030431:59:59"), fallback), fallback);

        let settings: PluginSettings = [("Timeout", "99999999999999999:00")].into_iter().collect();
        assert_eq!(get_value(&settings, "Timeout", fallback), fallback);
    }

    #[test]
    fn test_merge_with_defaults_keeps_existing_values() {
        let settings: PluginSettings = [("maxresults", "10")].into_iter().collect();
        let merged = merge_with_defaults(&settings, &schema());

        assert_eq!(merged.get("IndexPath"), Some("data/index"));
        assert_eq!(merged.get("MaxResults"), Some("10"));
        assert!(!merged.contains_key("ApiKey"));
    }

    #[test]
    fn test_filter_by_schema_drops_stale_keys() {
        let settings: PluginSettings = [("IndexPath", "/srv"), ("LegacyOption", "x")]
            .into_iter()
            .collect();
        let filtered = filter_by_schema(&settings, &schema());

        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("indexpath"));
    }

    #[test]
    fn test_mask_secrets() {
        let settings: PluginSettings = [("IndexPath", "/srv"), ("ApiKey", "hunter2")]
            .into_iter()
            .collect();
        let masked = mask_secrets(&settings, &schema(), DEFAULT_SECRET_MASK);

        assert_eq!(masked.get("ApiKey"), Some(DEFAULT_SECRET_MASK));
        assert_eq!(masked.get("IndexPath"), Some("/srv"));
    }

    #[test]
    fn test_get_value_typed_with_fallback() {
        let settings: PluginSettings = [
            ("MaxResults", "25"),
            ("Timeout", "30s"),
            ("Broken", "abc"),
            ("Endpoint", "https://search.local"),
        ]
        .into_iter()
        .collect();

        assert_eq!(get_value(&settings, "maxresults", 10u32), 25);
        assert_eq!(get_value(&settings, "Broken", 10u32), 10);
        assert_eq!(get_value(&settings, "Missing", 10u32), 10);
        assert_eq!(
            get_value(&settings, "Timeout", Duration::ZERO),
            Duration::from_secs(30)
        );
        assert_eq!(get_value::<Option<u32>>(&settings, "MaxResults", None), Some(25));
        assert_eq!(get_value::<Option<u32>>(&settings, "Broken", None), None);
        assert!(get_value::<Option<Url>>(&settings, "Endpoint", None).is_some());
    }

    #[test]
    fn test_get_enum_case_insensitive() {
        let settings: PluginSettings = [("Analyzer", "english"), ("Other", "klingon")]
            .into_iter()
            .collect();

        assert_eq!(get_enum(&settings, "Analyzer", Analyzer::Standard), Analyzer::English);
        assert_eq!(get_enum(&settings, "Other", Analyzer::Standard), Analyzer::Standard);
        assert_eq!(parse_enum::<Analyzer>(" STANDARD "), Some(Analyzer::Standard));
    }

    #[test]
    fn test_missing_required_keys() {
        let settings: PluginSettings = [("IndexPath", "  ")].into_iter().collect();
        assert_eq!(
            missing_required_keys(&settings, &schema()),
            vec!["IndexPath".to_string(), "ApiKey".to_string()]
        );

        let settings: PluginSettings = [("IndexPath", "/srv"), ("ApiKey", "k")]
            .into_iter()
            .collect();
        assert!(missing_required_keys(&settings, &schema()).is_empty());
    }
}
