//! ServiceProvider - the plugin's interface to host-provided collaborators

use crate::error::PluginError;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

// ─── Configuration Reader ────────────────────────────────────────────

/// Key/value configuration lookup supplied by the host.
///
/// The host's default reader is backed by process environment variables;
/// environment overrides for plugin settings are resolved through it.
pub trait ConfigurationReader: Send + Sync {
    /// Look up a raw value
    fn get(&self, key: &str) -> Option<String>;

    /// Look up a value, treating blank strings as absent
    fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }
}

/// Reads configuration from process environment variables
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvironmentReader;

impl ConfigurationReader for EnvironmentReader {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// In-memory configuration, mainly for tests and embedding
#[derive(Debug, Default, Clone)]
pub struct MemoryReader {
    values: HashMap<String, String>,
}

impl MemoryReader {
    /// Create an empty reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigurationReader for MemoryReader {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

// ─── Logging ─────────────────────────────────────────────────────────

/// Logger handed out to plugins; every message carries the plugin id
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin_id: String,
}

impl PluginLogger {
    /// Logger for a plugin id
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
        }
    }

    /// Log an info message
    pub fn info(&self, message: &str) {
        tracing::info!(plugin = %self.plugin_id, "{}", message);
    }

    /// Log a warning message
    pub fn warn(&self, message: &str) {
        tracing::warn!(plugin = %self.plugin_id, "{}", message);
    }

    /// Log an error message
    pub fn error(&self, message: &str) {
        tracing::error!(plugin = %self.plugin_id, "{}", message);
    }

    /// Log a debug message
    pub fn debug(&self, message: &str) {
        tracing::debug!(plugin = %self.plugin_id, "{}", message);
    }
}

// ─── Service Provider ────────────────────────────────────────────────

/// Typed service locator passed to plugin hooks.
///
/// Services are keyed by their concrete type. For trait objects, register
/// an `Arc<dyn Trait>` and retrieve it with `T = Arc<dyn Trait>`.
///
/// # Example
///
/// ```ignore
/// async fn initialize(&self, services: &ServiceProvider, _: &CancellationToken) -> Result<(), PluginError> {
///     let index_root = services.configuration().get("SQUIRREL_DATA_DIR");
///     let log = services.logger("squirrel.wiki.plugins.lucene");
///     log.info("Preparing index");
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ServiceProvider {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    configuration: Arc<dyn ConfigurationReader>,
}

impl Default for ServiceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("services", &self.services.len())
            .finish_non_exhaustive()
    }
}

impl ServiceProvider {
    /// Create a provider reading configuration from the environment
    pub fn new() -> Self {
        Self::with_configuration(Arc::new(EnvironmentReader))
    }

    /// Create a provider with an explicit configuration reader
    pub fn with_configuration(configuration: Arc<dyn ConfigurationReader>) -> Self {
        Self {
            services: HashMap::new(),
            configuration,
        }
    }

    /// Register a service, replacing any previous one of the same type
    pub fn insert<T: Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    /// Builder: register a service
    pub fn with_service<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.insert(service);
        self
    }

    /// Resolve a service by type
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Resolve a service, failing with [`PluginError::MissingService`]
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, PluginError> {
        self.get::<T>()
            .ok_or_else(|| PluginError::MissingService(std::any::type_name::<T>().to_string()))
    }

    /// The host configuration reader
    pub fn configuration(&self) -> Arc<dyn ConfigurationReader> {
        Arc::clone(&self.configuration)
    }

    /// A logger whose messages are tagged with `plugin_id`
    pub fn logger(&self, plugin_id: &str) -> PluginLogger {
        PluginLogger::new(plugin_id)
    }
}
