//! XDG Base Directory paths for the Squirrel wiki.
//!
//! The wiki host and its management CLI resolve configuration, plugin, and
//! data locations through XDG paths on every platform.

use std::path::PathBuf;

/// Environment variable that relocates the plugin root directly
pub const PLUGIN_DIR_ENV: &str = "SQUIRREL_PLUGIN_DIR";

/// Get the squirrel config directory.
///
/// Returns `$XDG_CONFIG_HOME/squirrel` if set, otherwise `~/.config/squirrel`.
///
/// # Examples
///
/// ```
/// use squirrel_paths::config_dir;
///
/// let config = config_dir();
/// let registry = config.join("plugins/registry.toml");
/// ```
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Get the squirrel data directory.
///
/// Returns `$XDG_DATA_HOME/squirrel` if set, otherwise `~/.local/share/squirrel`.
/// Plugins keep on-disk state such as search indexes below this directory.
pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// Get the plugin root: one sub-directory per plugin id.
///
/// Returns `$SQUIRREL_PLUGIN_DIR` if set, otherwise `<config_dir>/plugins`.
pub fn plugin_dir() -> PathBuf {
    match std::env::var(PLUGIN_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => config_dir().join("plugins"),
    }
}

fn xdg_dir(variable: &str, home_relative: &str) -> PathBuf {
    if let Ok(base) = std::env::var(variable)
        && !base.is_empty()
    {
        PathBuf::from(base).join("squirrel")
    } else if let Some(home) = dirs::home_dir() {
        home.join(home_relative).join("squirrel")
    } else {
        PathBuf::from(home_relative).join("squirrel")
    }
}
