use super::types::{PluginsConfig, RawPluginsConfig, RawSquirrelConfig, SquirrelConfig};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable pointing at the project configuration directory
pub const PROJECT_CONFIG_DIR_ENV: &str = "SQUIRREL_PROJECT_CONFIG_DIR";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<SquirrelConfig> {
        let mut raw = RawSquirrelConfig::default();

        // Layer 1: User config
        let user_path = Self::user_config_path();
        if user_path.exists() {
            raw = Self::merge_raw(raw, Self::read(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read(&project_path)?);
        }

        Ok(Self::finalize(raw))
    }

    fn read(path: &Path) -> Result<RawSquirrelConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// User config path (`~/.config/squirrel/config.toml`)
    pub fn user_config_path() -> PathBuf {
        squirrel_paths::config_dir().join("config.toml")
    }

    /// Project config path
    /// Can be overridden with SQUIRREL_PROJECT_CONFIG_DIR (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        match std::env::var(PROJECT_CONFIG_DIR_ENV) {
            Ok(dir) => PathBuf::from(dir).join("config.toml"),
            Err(_) => PathBuf::from(".squirrel/config.toml"),
        }
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawSquirrelConfig, overlay: RawSquirrelConfig) -> RawSquirrelConfig {
        RawSquirrelConfig {
            plugins: RawPluginsConfig {
                dir: overlay.plugins.dir.or(base.plugins.dir),
                registry: overlay.plugins.registry.or(base.plugins.registry),
                shared_library_dirs: overlay
                    .plugins
                    .shared_library_dirs
                    .or(base.plugins.shared_library_dirs),
                restart_delay_ms: overlay
                    .plugins
                    .restart_delay_ms
                    .or(base.plugins.restart_delay_ms),
                degraded_window_secs: overlay
                    .plugins
                    .degraded_window_secs
                    .or(base.plugins.degraded_window_secs),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawSquirrelConfig) -> SquirrelConfig {
        let defaults = PluginsConfig::default();
        SquirrelConfig {
            plugins: PluginsConfig {
                dir: raw.plugins.dir.unwrap_or(defaults.dir),
                registry: raw.plugins.registry,
                shared_library_dirs: raw
                    .plugins
                    .shared_library_dirs
                    .unwrap_or(defaults.shared_library_dirs),
                restart_delay_ms: raw
                    .plugins
                    .restart_delay_ms
                    .unwrap_or(defaults.restart_delay_ms),
                degraded_window_secs: raw
                    .plugins
                    .degraded_window_secs
                    .unwrap_or(defaults.degraded_window_secs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn raw(toml: &str) -> RawSquirrelConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_overlay_wins_key_by_key() {
        let user = raw(
            r#"
            [plugins]
            dir = "/home/me/plugins"
            restart_delay_ms = 250
            "#,
        );
        let project = raw(
            r#"
            [plugins]
            restart_delay_ms = 50
            "#,
        );

        let merged = ConfigLoader::finalize(ConfigLoader::merge_raw(user, project));
        assert_eq!(merged.plugins.dir, PathBuf::from("/home/me/plugins"));
        assert_eq!(merged.plugins.restart_delay_ms, 50);
        assert_eq!(merged.plugins.degraded_window_secs, 300);
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let merged = ConfigLoader::finalize(raw(""));
        assert_eq!(merged, SquirrelConfig::default());
    }

    #[test]
    #[serial]
    fn test_project_config_dir_override() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[plugins]\nshared_library_dirs = [\"/usr/lib/squirrel\"]\n",
        )
        .unwrap();

        // SAFETY: serialized with other tests touching this variable
        unsafe { std::env::set_var(PROJECT_CONFIG_DIR_ENV, dir.path()) };
        let path = ConfigLoader::project_config_path();
        let loaded = ConfigLoader::read(&path);
        unsafe { std::env::remove_var(PROJECT_CONFIG_DIR_ENV) };

        assert_eq!(path, dir.path().join("config.toml"));
        let loaded = loaded.unwrap();
        assert_eq!(
            loaded.plugins.shared_library_dirs,
            Some(vec![PathBuf::from("/usr/lib/squirrel")])
        );
    }

    #[test]
    #[serial]
    fn test_invalid_project_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[plugins\n").unwrap();

        let err = ConfigLoader::read(&path).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }
}
