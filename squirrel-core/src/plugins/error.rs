//! Plugin host error types

use std::path::PathBuf;
use thiserror::Error;

use squirrel_plugin_api::PluginError;

/// Errors that can occur in the plugin host
#[derive(Error, Debug)]
pub enum PluginHostError {
    /// Plugin directory not found
    #[error("Plugin directory not found: {path}")]
    PluginDirNotFound { path: PathBuf },

    /// Plugin library not found in directory
    #[error("Plugin library not found in {dir}")]
    LibraryNotFound { dir: PathBuf },

    /// Failed to load dynamic library
    #[error("Failed to load plugin library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    /// Module could not be loaded for a reason other than the dynamic loader
    #[error("Failed to load module {path}: {message}")]
    ModuleLoad { path: PathBuf, message: String },

    /// API version mismatch between host and plugin
    #[error("API version mismatch: host expects {expected}, plugin has {found}")]
    ApiVersionMismatch { expected: u32, found: u32 },

    /// The module exports no type implementing the capability contract
    #[error("No plugin type exported by {path}")]
    NoPluginType { path: PathBuf },

    /// Plugin constructor panicked
    #[error("Failed to instantiate plugin type {type_name}: {message}")]
    Instantiation { type_name: String, message: String },

    /// Dependency manifest could not be read
    #[error("Invalid dependency manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    /// A declared private dependency could not be resolved
    #[error("Dependency '{name}' of {module} could not be resolved")]
    DependencyNotFound { name: String, module: PathBuf },

    /// The load context was already released
    #[error("Load context for {path} has been released")]
    ContextReleased { path: PathBuf },

    /// Plugin not loaded
    #[error("Plugin '{name}' not found")]
    NotFound { name: String },

    /// Plugin is not initialized
    #[error("Plugin '{name}' is not initialized")]
    NotInitialized { name: String },

    /// Core plugins can be reconfigured but never disabled
    #[error("Plugin '{name}' is a core plugin and cannot be disabled")]
    CorePlugin { name: String },

    /// Enabled state is fixed by the deployment environment
    #[error("Plugin '{name}' is locked by environment variable {variable}")]
    Locked { name: String, variable: String },

    /// Registry error (parsing, saving, etc.)
    #[error("Registry error: {0}")]
    Registry(String),

    /// Settings store error
    #[error("Settings error: {0}")]
    Settings(String),

    /// Operation cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Error returned by plugin code
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
