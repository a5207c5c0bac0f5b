//! squirrel-plugin-api - Plugin API for the Squirrel wiki
//!
//! This crate provides the capability contract and supporting types needed
//! to write search and authentication providers for the wiki. Plugins are
//! native Rust dynamic libraries; the host discovers them on disk, loads
//! each into its own load context, and drives their lifecycle.
//!
//! # Example
//!
//! ```ignore
//! use async_trait::async_trait;
//! use squirrel_plugin_api::{
//!     CancellationToken, Plugin, PluginError, PluginMetadata, ServiceProvider, export_plugin,
//! };
//!
//! #[derive(Default)]
//! pub struct LuceneSearch;
//!
//! #[async_trait]
//! impl Plugin for LuceneSearch {
//!     fn metadata(&self) -> PluginMetadata {
//!         PluginMetadata {
//!             id: "squirrel.wiki.plugins.lucene".to_string(),
//!             name: "Lucene search".to_string(),
//!             version: "1.0.0".to_string(),
//!             ..Default::default()
//!         }
//!     }
//!
//!     async fn initialize(&self, services: &ServiceProvider, _cancel: &CancellationToken) -> Result<(), PluginError> {
//!         services.logger("squirrel.wiki.plugins.lucene").info("Index ready");
//!         Ok(())
//!     }
//!
//!     async fn shutdown(&self, _cancel: &CancellationToken) -> Result<(), PluginError> {
//!         Ok(())
//!     }
//! }
//!
//! export_plugin!(LuceneSearch);
//! ```

pub mod context;
pub mod error;
pub mod helper;
pub mod settings;
pub mod types;
pub mod validation;

use async_trait::async_trait;
use std::sync::Arc;

pub use context::{ConfigurationReader, EnvironmentReader, MemoryReader, PluginLogger, ServiceProvider};
pub use error::PluginError;
pub use settings::PluginSettings;
pub use tokio_util::sync::CancellationToken;
pub use types::*;
pub use validation::{ConfigurationValidator, ValidationResult};

/// Current plugin API version. Plugins must match this exactly.
/// This is checked when loading plugins to ensure compatibility.
pub const API_VERSION: u32 = 1;

/// The capability contract - implement this to create a wiki plugin.
///
/// Optional hooks have default implementations, so plugins only need to
/// provide metadata and the initialize/shutdown hooks.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Return plugin metadata
    fn metadata(&self) -> PluginMetadata;

    /// Configuration schema; defaults to the schema carried in the metadata
    fn configuration_schema(&self) -> Vec<ConfigurationSchemaItem> {
        self.metadata().configuration_schema
    }

    /// Receive the merged configuration before `initialize` runs.
    ///
    /// Plugins that keep configuration should store it behind interior
    /// mutability; the host only ever holds shared references.
    fn set_configuration(&self, _settings: &PluginSettings) {}

    /// Prepare the plugin for use (open indexes, warm caches, ...)
    async fn initialize(
        &self,
        services: &ServiceProvider,
        cancel: &CancellationToken,
    ) -> Result<(), PluginError>;

    /// Release resources acquired in `initialize`
    async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), PluginError>;

    /// Host-invocable operations (e.g. "rebuild index")
    fn actions(&self) -> Vec<PluginAction> {
        Vec::new()
    }

    /// Run one of the operations listed by [`Plugin::actions`]
    async fn execute_action(
        &self,
        action_id: &str,
        _services: &ServiceProvider,
        _cancel: &CancellationToken,
    ) -> Result<ActionOutput, PluginError> {
        Err(PluginError::UnknownAction(action_id.to_string()))
    }

    /// Check whether `settings` is acceptable; defaults to schema validation
    async fn validate_configuration(
        &self,
        settings: &PluginSettings,
        _cancel: &CancellationToken,
    ) -> Result<bool, PluginError> {
        let result = ConfigurationValidator::new().validate(settings, &self.configuration_schema());
        Ok(result.is_valid())
    }
}

/// Zero-argument factory for one plugin type exported by a module
#[derive(Clone)]
pub struct PluginConstructor {
    type_name: String,
    create: Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>,
}

impl PluginConstructor {
    /// Constructor from an arbitrary factory closure
    pub fn new(
        type_name: impl Into<String>,
        create: impl Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            create: Arc::new(create),
        }
    }

    /// Constructor using the type's `Default` implementation
    pub fn of<T: Plugin + Default + 'static>(type_name: impl Into<String>) -> Self {
        Self::new(type_name, || Box::new(T::default()) as Box<dyn Plugin>)
    }

    /// Name of the plugin type, as exported
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Create a new instance
    pub fn create(&self) -> Box<dyn Plugin> {
        (self.create)()
    }
}

impl std::fmt::Debug for PluginConstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginConstructor")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Collects the plugin types a module exports, in declaration order
#[derive(Debug, Default)]
pub struct PluginRegistrar {
    constructors: Vec<PluginConstructor>,
}

impl PluginRegistrar {
    /// Create an empty registrar
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type constructed through `Default`
    pub fn register<T: Plugin + Default + 'static>(&mut self, type_name: &str) {
        self.constructors.push(PluginConstructor::of::<T>(type_name));
    }

    /// Register a pre-built constructor
    pub fn register_constructor(&mut self, constructor: PluginConstructor) {
        self.constructors.push(constructor);
    }

    /// Registered constructors, in registration order
    pub fn into_constructors(self) -> Vec<PluginConstructor> {
        self.constructors
    }
}

/// Export plugin types for dynamic loading.
///
/// This macro generates the entry points the host uses to discover the
/// plugin types a module carries. When several types are listed the host
/// uses the first and logs a warning.
///
/// # Usage
///
/// ```ignore
/// squirrel_plugin_api::export_plugin!(LuceneSearch);
/// ```
///
/// # Generated Functions
///
/// - `_squirrel_plugin_api_version()`: Returns the API version
/// - `_squirrel_plugin_register()`: Registers a constructor per listed type
#[macro_export]
macro_rules! export_plugin {
    ($($plugin_type:ty),+ $(,)?) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn _squirrel_plugin_api_version() -> u32 {
            $crate::API_VERSION
        }

        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn _squirrel_plugin_register(registrar: &mut $crate::PluginRegistrar) {
            $(
                registrar.register::<$plugin_type>(stringify!($plugin_type));
            )+
        }
    };
}
