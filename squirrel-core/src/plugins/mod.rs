//! Plugin runtime for the Squirrel wiki
//!
//! This module provides the infrastructure for loading and managing plugins:
//!
//! - [`PluginHost`]: Facade the wiki talks to - discovery, enablement, settings, lifecycle
//! - [`PluginLoader`]: Finds plugin modules on disk and keeps the loaded set
//! - [`LifecycleManager`]: Runs initialize/shutdown hooks and reports health
//! - [`EnvironmentOverrides`]: Deployment-pinned settings (`PLUGIN_<ID>_<KEY>`)
//! - [`LoadContext`]: One isolated dependency scope per module
//!
//! # Plugin Discovery
//!
//! Plugins are discovered from `~/.config/squirrel/plugins/` (or the
//! directory named by `SQUIRREL_PLUGIN_DIR`). Each sub-directory is one
//! plugin and should contain:
//! - `<plugin-id>.so` or `lib<plugin_id>.so` (`.dylib`/`.dll` elsewhere) - the module
//! - private dependencies next to it or under `deps/`
//! - `plugin.toml` (optional) - `dependencies = [..]` loaded before the module
//! - `settings.toml` (optional) - stored settings
//!
//! # Example
//!
//! ```ignore
//! use squirrel_core::plugins::{PluginHost, PluginHostConfig};
//! use squirrel_plugin_api::CancellationToken;
//!
//! let host = PluginHost::new(PluginHostConfig::default());
//! let cancel = CancellationToken::new();
//!
//! host.load_enabled(&cancel).await?;
//! for result in host.initialize_all(&cancel).await {
//!     println!("{}: {}", result.plugin_id, result.success);
//! }
//! ```

mod context;
mod environment;
mod error;
mod guard;
mod handle;
mod host;
mod lifecycle;
mod loader;
mod registry;
mod store;
pub mod testing;

pub use context::{
    DEPENDENCY_MANIFEST, DependencyResolver, LoadContext, LoadContextFactory,
    NativeContextFactory, NativeLoadContext, PRIVATE_DEPENDENCY_DIR, SharedResolver,
    is_library_file, library_file_names,
};
pub use environment::{
    ENABLED_KEY, EnabledLock, EnvironmentOverrides, ResolvedSettings, environment_prefix,
    environment_variable_name,
};
pub use error::PluginHostError;
pub use handle::PluginHandle;
pub use host::{PluginHost, PluginHostConfig, PluginInfo, REGISTRY_FILE, SettingsView};
pub use lifecycle::{
    HealthTier, LifecycleManager, LifecycleOperation, LifecycleOptions, LifecyclePhase,
    PluginHealthStatus, PluginLifecycleResult, PluginLifecycleState,
};
pub use loader::{LoadedPluginEntry, LoadedPlugins, PluginLoader, plugin_directories};
pub use registry::EnabledRegistry;
pub use store::{SETTINGS_FILE, SettingsStore};
