use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use squirrel_core::plugins::{LifecycleOptions, PluginHostConfig};

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSquirrelConfig {
    #[serde(default)]
    pub plugins: RawPluginsConfig,
}

/// Plugin section as stored in TOML (optional fields for proper merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPluginsConfig {
    /// Root directory containing one sub-directory per plugin
    pub dir: Option<PathBuf>,

    /// Enabled-plugin registry file
    pub registry: Option<PathBuf>,

    /// Host directories searched for shared plugin dependencies
    pub shared_library_dirs: Option<Vec<PathBuf>>,

    /// Pause between shutdown and initialize on restart
    pub restart_delay_ms: Option<u64>,

    /// How long a recorded error keeps a plugin degraded
    pub degraded_window_secs: Option<u64>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SquirrelConfig {
    #[serde(default)]
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginsConfig {
    pub dir: PathBuf,
    pub registry: Option<PathBuf>,
    pub shared_library_dirs: Vec<PathBuf>,
    pub restart_delay_ms: u64,
    pub degraded_window_secs: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        let lifecycle = LifecycleOptions::default();
        Self {
            dir: squirrel_paths::plugin_dir(),
            registry: None,
            shared_library_dirs: Vec::new(),
            restart_delay_ms: lifecycle.restart_delay.as_millis() as u64,
            degraded_window_secs: lifecycle.degraded_window.as_secs(),
        }
    }
}

impl SquirrelConfig {
    /// Host configuration; `plugin_dir` (from the command line) wins over files
    pub fn host_config(&self, plugin_dir: Option<PathBuf>) -> PluginHostConfig {
        let plugins = &self.plugins;
        let mut config =
            PluginHostConfig::for_plugin_dir(plugin_dir.unwrap_or_else(|| plugins.dir.clone()));
        if let Some(registry) = &plugins.registry {
            config.registry_path = registry.clone();
        }
        config.shared_library_dirs = plugins.shared_library_dirs.clone();
        config.lifecycle = LifecycleOptions {
            restart_delay: Duration::from_millis(plugins.restart_delay_ms),
            degraded_window: Duration::from_secs(plugins.degraded_window_secs),
        };
        config
    }
}
