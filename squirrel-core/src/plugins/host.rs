//! PluginHost - the wiki's single entry point to its plugins
//!
//! Composes the loader, the lifecycle manager (bound to the loader's
//! registry), the enabled-plugin registry, stored settings and environment
//! overrides.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use squirrel_plugin_api::helper::{
    DEFAULT_SECRET_MASK, filter_by_schema, mask_secrets, merge_with_defaults,
    missing_required_keys,
};
use squirrel_plugin_api::{
    ActionOutput, CancellationToken, ConfigurationReader, ConfigurationSchemaItem,
    ConfigurationValidator, EnvironmentReader, PluginAction, PluginError, PluginMetadata,
    PluginSettings, ServiceProvider, ValidationResult,
};

use super::context::{LoadContextFactory, NativeContextFactory, SharedResolver};
use super::environment::{
    ENABLED_KEY, EnabledLock, EnvironmentOverrides, ResolvedSettings, environment_variable_name,
};
use super::error::PluginHostError;
use super::guard;
use super::handle::PluginHandle;
use super::lifecycle::{
    LifecycleManager, LifecycleOperation, LifecycleOptions, LifecyclePhase, PluginHealthStatus,
    PluginLifecycleResult,
};
use super::loader::{LoadedPluginEntry, PluginLoader, plugin_directories};
use super::registry::EnabledRegistry;
use super::store::SettingsStore;

/// File name of the enabled-plugin registry inside the plugin directory
pub const REGISTRY_FILE: &str = "registry.toml";

/// Configuration for [`PluginHost`]
#[derive(Debug, Clone)]
pub struct PluginHostConfig {
    /// Root containing one sub-directory per plugin
    pub plugin_dir: PathBuf,
    /// Enabled-plugin registry file
    pub registry_path: PathBuf,
    /// Host directories searched for dependencies a plugin does not carry
    pub shared_library_dirs: Vec<PathBuf>,
    /// Lifecycle tunables
    pub lifecycle: LifecycleOptions,
}

impl Default for PluginHostConfig {
    fn default() -> Self {
        Self::for_plugin_dir(squirrel_paths::plugin_dir())
    }
}

impl PluginHostConfig {
    /// Configuration rooted at `plugin_dir`, keeping the registry inside it
    pub fn for_plugin_dir(plugin_dir: impl Into<PathBuf>) -> Self {
        let plugin_dir = plugin_dir.into();
        Self {
            registry_path: plugin_dir.join(REGISTRY_FILE),
            plugin_dir,
            shared_library_dirs: Vec::new(),
            lifecycle: LifecycleOptions::default(),
        }
    }
}

/// Summary of a loaded plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub id: String,
    pub metadata: PluginMetadata,
    pub type_name: String,
    pub path: PathBuf,
    pub loaded_at: DateTime<Utc>,
    pub enabled: bool,
    pub phase: LifecyclePhase,
}

/// Effective settings prepared for display
#[derive(Debug, Clone, Serialize)]
pub struct SettingsView {
    /// Effective values with secrets masked
    pub settings: PluginSettings,
    /// Keys pinned by environment overrides
    pub locked_keys: Vec<String>,
    /// Required keys with no value
    pub missing_required: Vec<String>,
}

/// The plugin host
pub struct PluginHost {
    config: PluginHostConfig,
    loader: PluginLoader,
    lifecycle: LifecycleManager,
    overrides: EnvironmentOverrides,
    store: SettingsStore,
    services: ServiceProvider,
}

impl PluginHost {
    /// Host using the native loader and process environment
    pub fn new(config: PluginHostConfig) -> Self {
        let factory = NativeContextFactory::new(SharedResolver::new(
            config.shared_library_dirs.clone(),
        ));
        Self::with_parts(config, Arc::new(factory), Arc::new(EnvironmentReader))
    }

    /// Host with an explicit module factory and configuration reader
    pub fn with_parts(
        config: PluginHostConfig,
        factory: Arc<dyn LoadContextFactory>,
        reader: Arc<dyn ConfigurationReader>,
    ) -> Self {
        let loader = PluginLoader::new(factory);
        let lifecycle =
            LifecycleManager::new(config.lifecycle).with_registry(Arc::clone(loader.registry()));
        Self {
            store: SettingsStore::new(&config.plugin_dir),
            services: ServiceProvider::with_configuration(Arc::clone(&reader)),
            overrides: EnvironmentOverrides::new(reader),
            loader,
            lifecycle,
            config,
        }
    }

    /// Builder: services handed to plugin hooks
    pub fn with_services(mut self, services: ServiceProvider) -> Self {
        self.services = services;
        self
    }

    pub fn config(&self) -> &PluginHostConfig {
        &self.config
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn overrides(&self) -> &EnvironmentOverrides {
        &self.overrides
    }

    fn handle(&self, plugin_id: &str) -> Result<PluginHandle, PluginHostError> {
        self.loader
            .get(plugin_id)
            .ok_or_else(|| PluginHostError::NotFound {
                name: plugin_id.to_string(),
            })
    }

    fn schema(handle: &PluginHandle) -> Result<Vec<ConfigurationSchemaItem>, PluginHostError> {
        Ok(guard::call_sync(|| handle.configuration_schema())?)
    }

    fn registry(&self) -> Result<EnabledRegistry, PluginHostError> {
        EnabledRegistry::load(&self.config.registry_path)
    }

    fn enabled_in(&self, registry: &EnabledRegistry, plugin_id: &str, is_core: bool) -> bool {
        if is_core {
            return true;
        }
        match self.overrides.enabled_lock(plugin_id) {
            EnabledLock::Locked(enabled) => enabled,
            EnabledLock::Indeterminate => false,
            EnabledLock::Unlocked => registry.is_enabled(plugin_id),
        }
    }

    // ─── Discovery ───────────────────────────────────────────────────

    /// Load every plugin under the plugin directory
    pub async fn discover(&self, cancel: &CancellationToken) -> Vec<PluginHandle> {
        self.loader.load_all(&self.config.plugin_dir, cancel).await
    }

    /// Load only enabled plugins; core plugins are always enabled
    pub async fn load_enabled(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<PluginHandle>, PluginHostError> {
        let registry = self.registry()?;
        let mut loaded = Vec::new();

        for plugin_id in plugin_directories(&self.config.plugin_dir) {
            if cancel.is_cancelled() {
                return Err(PluginHostError::Cancelled);
            }
            let Some(handle) = self
                .loader
                .load_one(&self.config.plugin_dir, &plugin_id, cancel)
                .await
            else {
                continue;
            };

            if self.enabled_in(&registry, &plugin_id, handle.metadata().is_core_plugin) {
                loaded.push(handle);
            } else {
                tracing::debug!(plugin = %plugin_id, "Plugin disabled, unloading");
                drop(handle);
                self.loader.unload_one(&plugin_id, cancel).await;
            }
        }

        Ok(loaded)
    }

    // ─── Enabled state ───────────────────────────────────────────────

    /// Whether a plugin is enabled
    pub fn is_enabled(&self, plugin_id: &str) -> Result<bool, PluginHostError> {
        let is_core = self
            .loader
            .get(plugin_id)
            .is_some_and(|handle| handle.metadata().is_core_plugin);
        Ok(self.enabled_in(&self.registry()?, plugin_id, is_core))
    }

    fn ensure_unlocked(&self, plugin_id: &str) -> Result<(), PluginHostError> {
        if self.overrides.enabled_lock(plugin_id).is_locked() {
            return Err(PluginHostError::Locked {
                name: plugin_id.to_string(),
                variable: environment_variable_name(plugin_id, ENABLED_KEY),
            });
        }
        Ok(())
    }

    /// Persistently enable a plugin
    pub fn enable(&self, plugin_id: &str) -> Result<(), PluginHostError> {
        self.ensure_unlocked(plugin_id)?;
        let mut registry = self.registry()?;
        if registry.enable(plugin_id) {
            registry.save(&self.config.registry_path)?;
            tracing::info!(plugin = %plugin_id, "Plugin enabled");
        }
        Ok(())
    }

    /// Persistently disable a plugin; core and locked plugins refuse
    pub fn disable(&self, plugin_id: &str) -> Result<(), PluginHostError> {
        if self
            .loader
            .get(plugin_id)
            .is_some_and(|handle| handle.metadata().is_core_plugin)
        {
            return Err(PluginHostError::CorePlugin {
                name: plugin_id.to_string(),
            });
        }
        self.ensure_unlocked(plugin_id)?;

        let mut registry = self.registry()?;
        if registry.disable(plugin_id) {
            registry.save(&self.config.registry_path)?;
            tracing::info!(plugin = %plugin_id, "Plugin disabled");
        }
        Ok(())
    }

    // ─── Settings ────────────────────────────────────────────────────

    fn resolve(
        &self,
        plugin_id: &str,
        stored: &PluginSettings,
        schema: &[ConfigurationSchemaItem],
    ) -> ResolvedSettings {
        let mut resolved = self.overrides.apply(plugin_id, stored, schema);
        resolved.settings = filter_by_schema(&merge_with_defaults(&resolved.settings, schema), schema);
        resolved
    }

    /// Stored settings, then environment overrides, then schema defaults,
    /// restricted to schema keys
    pub fn resolved_settings(&self, plugin_id: &str) -> Result<ResolvedSettings, PluginHostError> {
        let handle = self.handle(plugin_id)?;
        let schema = Self::schema(&handle)?;
        let stored = self.store.load(plugin_id)?;
        Ok(self.resolve(plugin_id, &stored, &schema))
    }

    /// Settings as persisted, before overrides and defaults
    pub fn stored_settings(&self, plugin_id: &str) -> Result<PluginSettings, PluginHostError> {
        self.store.load(plugin_id)
    }

    /// The configuration the plugin is initialized with
    pub fn effective_settings(&self, plugin_id: &str) -> Result<PluginSettings, PluginHostError> {
        Ok(self.resolved_settings(plugin_id)?.settings)
    }

    /// Validate the effective settings against the plugin's schema
    pub fn validate(&self, plugin_id: &str) -> Result<ValidationResult, PluginHostError> {
        let handle = self.handle(plugin_id)?;
        let schema = Self::schema(&handle)?;
        let settings = self.effective_settings(plugin_id)?;
        Ok(ConfigurationValidator::new().validate(&settings, &schema))
    }

    /// Validate and persist settings; undeclared keys are dropped
    pub fn save_settings(
        &self,
        plugin_id: &str,
        settings: &PluginSettings,
    ) -> Result<ValidationResult, PluginHostError> {
        let handle = self.handle(plugin_id)?;
        let schema = Self::schema(&handle)?;
        let filtered = filter_by_schema(settings, &schema);

        let effective = self.resolve(plugin_id, &filtered, &schema).settings;
        let validation = ConfigurationValidator::new().validate(&effective, &schema);
        if !validation.is_valid() {
            return Err(PluginHostError::Settings(format!(
                "{plugin_id}: {validation}"
            )));
        }

        self.store.save(plugin_id, &filtered)?;
        Ok(validation)
    }

    /// Effective settings with secrets masked
    pub fn display_settings(&self, plugin_id: &str) -> Result<SettingsView, PluginHostError> {
        let handle = self.handle(plugin_id)?;
        let schema = Self::schema(&handle)?;
        let resolved = self.resolved_settings(plugin_id)?;

        Ok(SettingsView {
            missing_required: missing_required_keys(&resolved.settings, &schema),
            settings: mask_secrets(&resolved.settings, &schema, DEFAULT_SECRET_MASK),
            locked_keys: resolved.locked_keys,
        })
    }

    // ─── Lifecycle ───────────────────────────────────────────────────

    /// Validate settings, then initialize. Invalid settings produce a
    /// failed result and leave the plugin uninitialized.
    pub async fn initialize(
        &self,
        plugin_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PluginLifecycleResult, PluginHostError> {
        let started = Instant::now();
        let handle = self.handle(plugin_id)?;
        let settings = self.effective_settings(plugin_id)?;

        if let Some(error) = Self::check_settings(&handle, &settings, cancel).await? {
            tracing::warn!(plugin = %plugin_id, error = %error, "Plugin configuration invalid, not initializing");
            self.lifecycle.record_failed_initialize(&handle, error.to_string());
            return Ok(PluginLifecycleResult::for_id(
                handle.id(),
                handle.name(),
                LifecycleOperation::Initialize,
                Err(error),
                started.elapsed(),
            ));
        }

        Ok(self
            .lifecycle
            .initialize(&handle, &settings, &self.services, cancel)
            .await)
    }

    /// Initialize every loaded plugin
    pub async fn initialize_all(&self, cancel: &CancellationToken) -> Vec<PluginLifecycleResult> {
        let mut results = Vec::new();
        for plugin_id in self.loader.registry().ids() {
            if cancel.is_cancelled() {
                break;
            }
            match self.initialize(&plugin_id, cancel).await {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!(plugin = %plugin_id, error = %e, "Skipping initialization"),
            }
        }
        results
    }

    /// Shut a plugin down, keeping it loaded
    pub async fn shutdown(
        &self,
        plugin_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PluginLifecycleResult, PluginHostError> {
        let handle = self.handle(plugin_id)?;
        Ok(self.lifecycle.shutdown(&handle, cancel).await)
    }

    /// Shut down and re-initialize with freshly resolved settings. Settings
    /// that fail validation refuse the restart and leave the plugin running.
    pub async fn restart(
        &self,
        plugin_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PluginLifecycleResult, PluginHostError> {
        let started = Instant::now();
        let handle = self.handle(plugin_id)?;
        let settings = self.effective_settings(plugin_id)?;

        if let Some(error) = Self::check_settings(&handle, &settings, cancel).await? {
            tracing::warn!(plugin = %plugin_id, error = %error, "Plugin configuration invalid, not restarting");
            self.lifecycle.record_error(handle.id(), error.to_string());
            return Ok(PluginLifecycleResult::for_id(
                handle.id(),
                handle.name(),
                LifecycleOperation::Restart,
                Err(error),
                started.elapsed(),
            ));
        }

        Ok(self
            .lifecycle
            .restart(&handle, &settings, &self.services, cancel)
            .await)
    }

    /// Schema validation followed by the plugin's own check; `Some` is the
    /// reason the settings were refused
    async fn check_settings(
        handle: &PluginHandle,
        settings: &PluginSettings,
        cancel: &CancellationToken,
    ) -> Result<Option<PluginError>, PluginHostError> {
        let validation = ConfigurationValidator::new().validate(settings, &Self::schema(handle)?);
        if !validation.is_valid() {
            return Ok(Some(PluginError::config(validation.to_string())));
        }

        Ok(
            match guard::call_async(handle.validate_configuration(settings, cancel), cancel).await {
                Ok(true) => None,
                Ok(false) => Some(PluginError::config("configuration rejected by plugin")),
                Err(e) => Some(e),
            },
        )
    }

    /// Metadata id the lifecycle manager tracks a loaded plugin under
    fn instance_id(&self, plugin_id: &str) -> String {
        self.loader
            .get(plugin_id)
            .map_or_else(|| plugin_id.to_string(), |handle| handle.id().to_string())
    }

    /// Unload a plugin and forget its lifecycle state
    pub async fn unload(&self, plugin_id: &str, cancel: &CancellationToken) -> bool {
        let instance_id = self.instance_id(plugin_id);
        let unloaded = self.loader.unload_one(plugin_id, cancel).await;
        self.lifecycle.remove(&instance_id);
        unloaded
    }

    /// Unload then load the module again, initializing it when it was running
    pub async fn reload(
        &self,
        plugin_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PluginLifecycleResult>, PluginHostError> {
        let was_running = self.lifecycle.is_initialized(&self.instance_id(plugin_id));
        self.unload(plugin_id, cancel).await;

        let handle = self
            .loader
            .try_load_one(&self.config.plugin_dir, plugin_id, cancel)
            .await?;
        tracing::info!(plugin = %plugin_id, was_running, "Plugin reloaded");

        if was_running {
            return Ok(Some(self.initialize(plugin_id, cancel).await?));
        }
        Ok(None)
    }

    /// Health of a plugin; `Unknown` when it is not loaded
    pub fn health(&self, plugin_id: &str) -> PluginHealthStatus {
        let Some(handle) = self.loader.get(plugin_id) else {
            return PluginHealthStatus::unknown(plugin_id, "Plugin is not loaded");
        };
        let mut status = self.lifecycle.check_health(handle.id());
        status.plugin_id = plugin_id.to_string();
        status
    }

    /// Health of every loaded plugin
    pub fn health_all(&self) -> Vec<PluginHealthStatus> {
        self.loader
            .registry()
            .ids()
            .iter()
            .map(|plugin_id| self.health(plugin_id))
            .collect()
    }

    // ─── Actions ─────────────────────────────────────────────────────

    /// Operations a plugin offers
    pub fn actions(&self, plugin_id: &str) -> Result<Vec<PluginAction>, PluginHostError> {
        let handle = self.handle(plugin_id)?;
        Ok(guard::call_sync(|| handle.actions())?)
    }

    /// Run an operation on a running plugin; failures are recorded against it
    pub async fn execute_action(
        &self,
        plugin_id: &str,
        action_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ActionOutput, PluginHostError> {
        let handle = self.handle(plugin_id)?;
        if !self.lifecycle.is_initialized(handle.id()) {
            return Err(PluginHostError::NotInitialized {
                name: plugin_id.to_string(),
            });
        }

        let known = guard::call_sync(|| handle.actions())?
            .iter()
            .any(|action| action.id == action_id);
        if !known {
            return Err(PluginError::UnknownAction(action_id.to_string()).into());
        }

        match guard::call_async(handle.execute_action(action_id, &self.services, cancel), cancel).await {
            Ok(output) => {
                tracing::info!(plugin = %plugin_id, action = %action_id, success = output.success, "Action executed");
                Ok(output)
            }
            Err(PluginError::Cancelled) => Err(PluginHostError::Cancelled),
            Err(e) => {
                tracing::error!(plugin = %plugin_id, action = %action_id, error = %e, "Action failed");
                self.lifecycle.record_error(handle.id(), e.to_string());
                Err(e.into())
            }
        }
    }

    // ─── Listing ─────────────────────────────────────────────────────

    /// Summary of one loaded plugin
    pub fn info(&self, plugin_id: &str) -> Result<PluginInfo, PluginHostError> {
        let registry = self.registry()?;
        let entry = self
            .loader
            .entry(plugin_id)
            .ok_or_else(|| PluginHostError::NotFound {
                name: plugin_id.to_string(),
            })?;
        Ok(self.info_for(&registry, plugin_id, entry))
    }

    fn info_for(
        &self,
        registry: &EnabledRegistry,
        plugin_id: &str,
        entry: LoadedPluginEntry,
    ) -> PluginInfo {
        let metadata = entry.handle.metadata().clone();
        PluginInfo {
            id: plugin_id.to_string(),
            enabled: self.enabled_in(registry, plugin_id, metadata.is_core_plugin),
            phase: self.lifecycle.phase(entry.handle.id()),
            type_name: entry.handle.type_name().to_string(),
            path: entry.path,
            loaded_at: entry.loaded_at,
            metadata,
        }
    }

    /// Summaries of every loaded plugin, sorted by id
    pub fn list(&self) -> Result<Vec<PluginInfo>, PluginHostError> {
        let registry = self.registry()?;
        Ok(self
            .loader
            .registry()
            .ids()
            .into_iter()
            .filter_map(|plugin_id| {
                let entry = self.loader.entry(&plugin_id)?;
                Some(self.info_for(&registry, &plugin_id, entry))
            })
            .collect())
    }
}
