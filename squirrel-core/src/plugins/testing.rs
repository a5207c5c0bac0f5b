//! In-process plugin modules for tests and embedding
//!
//! [`StaticModuleFactory`] stands in for the native loader: it maps module
//! file stems to constructors, so discovery can run against a directory of
//! empty placeholder files without compiling shared libraries.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use squirrel_plugin_api::{
    ActionOutput, CancellationToken, CapabilityType, ConfigurationSchemaItem,
    ConfigurationValidator, Plugin,
    PluginAction, PluginConstructor, PluginError, PluginMetadata, PluginSettings, ServiceProvider,
};

use super::context::{LoadContext, LoadContextFactory};
use super::error::PluginHostError;
use super::handle::PluginHandle;

/// Create `root/<plugin_id>/<plugin_id>.<dll ext>` as an empty placeholder
pub fn install_module(root: &Path, plugin_id: &str) -> std::io::Result<PathBuf> {
    install_module_file(root, plugin_id, plugin_id)
}

/// Create `root/<dir>/<stem>.<dll ext>` as an empty placeholder
pub fn install_module_file(root: &Path, dir: &str, stem: &str) -> std::io::Result<PathBuf> {
    let dir = root.join(dir);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{stem}.{}", std::env::consts::DLL_EXTENSION));
    std::fs::write(&path, b"")?;
    Ok(path)
}

enum StaticModule {
    Exports(Vec<PluginConstructor>),
    Broken(String),
}

/// A load context whose exports are known up front
pub struct StaticLoadContext {
    module_path: PathBuf,
    constructors: Vec<PluginConstructor>,
    released: AtomicBool,
}

impl StaticLoadContext {
    /// Context for `module_path` exporting `constructors`
    pub fn new(module_path: impl Into<PathBuf>, constructors: Vec<PluginConstructor>) -> Self {
        Self {
            module_path: module_path.into(),
            constructors,
            released: AtomicBool::new(false),
        }
    }

    /// Shared context with a placeholder path named after `name`
    pub fn shared(name: &str, constructors: Vec<PluginConstructor>) -> Arc<dyn LoadContext> {
        Arc::new(Self::new(
            format!("{name}.{}", std::env::consts::DLL_EXTENSION),
            constructors,
        ))
    }
}

impl LoadContext for StaticLoadContext {
    fn module_path(&self) -> &Path {
        &self.module_path
    }

    fn resolve(&self, _dependency: &str) -> Option<PathBuf> {
        None
    }

    fn load(&self) -> Result<Vec<PluginConstructor>, PluginHostError> {
        if self.is_released() {
            return Err(PluginHostError::ContextReleased {
                path: self.module_path.clone(),
            });
        }
        Ok(self.constructors.clone())
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Factory resolving modules by file stem to in-process constructors
#[derive(Default)]
pub struct StaticModuleFactory {
    modules: HashMap<String, StaticModule>,
    created: AtomicUsize,
}

impl StaticModuleFactory {
    /// Factory with no modules
    pub fn new() -> Self {
        Self::default()
    }

    /// Module `stem` exporting `constructors`, in order
    pub fn with_module(mut self, stem: &str, constructors: Vec<PluginConstructor>) -> Self {
        self.modules
            .insert(stem.to_string(), StaticModule::Exports(constructors));
        self
    }

    /// Module `stem` exporting one test plugin
    pub fn with_plugin(self, stem: &str, plugin: TestPlugin) -> Self {
        let constructor = plugin.constructor("TestPlugin");
        self.with_module(stem, vec![constructor])
    }

    /// Module `stem` that fails to load
    pub fn with_broken_module(mut self, stem: &str, message: &str) -> Self {
        self.modules
            .insert(stem.to_string(), StaticModule::Broken(message.to_string()));
        self
    }

    /// Number of contexts created so far
    pub fn contexts_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl LoadContextFactory for StaticModuleFactory {
    fn create(&self, module_path: &Path) -> Result<Arc<dyn LoadContext>, PluginHostError> {
        let stem = module_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();

        let module_error = |message: String| PluginHostError::ModuleLoad {
            path: module_path.to_path_buf(),
            message,
        };
        let constructors = match self.modules.get(stem) {
            Some(StaticModule::Exports(constructors)) => constructors.clone(),
            Some(StaticModule::Broken(message)) => return Err(module_error(message.clone())),
            None => return Err(module_error("not a registered test module".to_string())),
        };

        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StaticLoadContext::new(module_path, constructors)))
    }
}

#[derive(Default)]
struct Script {
    fail_initialize: Mutex<Option<String>>,
    panic_initialize: AtomicBool,
    initialize_delay: Mutex<Option<Duration>>,
    fail_shutdown: Mutex<Option<String>>,
    panic_shutdown: AtomicBool,
    shutdown_delay: Mutex<Option<Duration>>,
    reject_configuration: AtomicBool,
    initialize_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    action_calls: AtomicUsize,
    configuration: Mutex<PluginSettings>,
}

/// Scripted plugin whose behavior and call counts are shared by all clones
#[derive(Clone)]
pub struct TestPlugin {
    metadata: PluginMetadata,
    script: Arc<Script>,
}

impl TestPlugin {
    /// Plugin with the given id and no configuration
    pub fn new(plugin_id: &str) -> Self {
        Self {
            metadata: PluginMetadata {
                id: plugin_id.to_string(),
                name: format!("Test plugin {plugin_id}"),
                version: "1.0.0".to_string(),
                capability: CapabilityType::SearchProvider,
                ..Default::default()
            },
            script: Arc::new(Script::default()),
        }
    }

    /// Mark as a core plugin
    pub fn core(mut self) -> Self {
        self.metadata.is_core_plugin = true;
        self
    }

    /// Declare a configuration schema
    pub fn with_schema(mut self, schema: Vec<ConfigurationSchemaItem>) -> Self {
        self.metadata.requires_configuration = schema.iter().any(|item| item.required);
        self.metadata.configuration_schema = schema;
        self
    }

    /// Set the capability
    pub fn with_capability(mut self, capability: CapabilityType) -> Self {
        self.metadata.capability = capability;
        self
    }

    /// Initialize returns an error
    pub fn failing_initialize(self, message: &str) -> Self {
        *lock(&self.script.fail_initialize) = Some(message.to_string());
        self
    }

    /// Initialize panics
    pub fn panicking_initialize(self) -> Self {
        self.script.panic_initialize.store(true, Ordering::SeqCst);
        self
    }

    /// Initialize sleeps before completing
    pub fn initialize_delay(self, delay: Duration) -> Self {
        *lock(&self.script.initialize_delay) = Some(delay);
        self
    }

    /// Shutdown returns an error
    pub fn failing_shutdown(self, message: &str) -> Self {
        *lock(&self.script.fail_shutdown) = Some(message.to_string());
        self
    }

    /// Shutdown panics
    pub fn panicking_shutdown(self) -> Self {
        self.script.panic_shutdown.store(true, Ordering::SeqCst);
        self
    }

    /// Shutdown sleeps before completing
    pub fn shutdown_delay(self, delay: Duration) -> Self {
        *lock(&self.script.shutdown_delay) = Some(delay);
        self
    }

    /// Make `validate_configuration` accept or reject every configuration
    pub fn reject_configuration(&self, reject: bool) {
        self.script.reject_configuration.store(reject, Ordering::SeqCst);
    }

    /// Stop failing initialize and shutdown
    pub fn clear_failures(&self) {
        *lock(&self.script.fail_initialize) = None;
        *lock(&self.script.fail_shutdown) = None;
        self.script.panic_initialize.store(false, Ordering::SeqCst);
        self.script.panic_shutdown.store(false, Ordering::SeqCst);
    }

    pub fn initialize_calls(&self) -> usize {
        self.script.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.script.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn action_calls(&self) -> usize {
        self.script.action_calls.load(Ordering::SeqCst)
    }

    /// Configuration most recently passed to `set_configuration`
    pub fn configuration(&self) -> PluginSettings {
        lock(&self.script.configuration).clone()
    }

    /// Constructor producing clones of this plugin
    pub fn constructor(&self, type_name: &str) -> PluginConstructor {
        let template = self.clone();
        PluginConstructor::new(type_name, move || Box::new(template.clone()) as Box<dyn Plugin>)
    }

    /// A handle backed by a static load context
    ///
    /// # Panics
    ///
    /// Panics if the plugin cannot be instantiated.
    pub fn handle(&self) -> PluginHandle {
        let constructor = self.constructor("TestPlugin");
        let context = StaticLoadContext::shared(&self.metadata.id, vec![constructor.clone()]);
        match PluginHandle::instantiate(&constructor, context) {
            Ok(handle) => handle,
            Err(e) => panic!("test plugin failed to instantiate: {e}"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Plugin for TestPlugin {
    fn metadata(&self) -> PluginMetadata {
        self.metadata.clone()
    }

    fn set_configuration(&self, settings: &PluginSettings) {
        *lock(&self.script.configuration) = settings.clone();
    }

    async fn initialize(
        &self,
        _services: &ServiceProvider,
        _cancel: &CancellationToken,
    ) -> Result<(), PluginError> {
        self.script.initialize_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.script.initialize_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.script.panic_initialize.load(Ordering::SeqCst) {
            panic!("initialize panicked in {}", self.metadata.id);
        }
        let failure = lock(&self.script.fail_initialize).clone();
        match failure {
            Some(message) => Err(PluginError::initialization(message)),
            None => Ok(()),
        }
    }

    async fn validate_configuration(
        &self,
        settings: &PluginSettings,
        _cancel: &CancellationToken,
    ) -> Result<bool, PluginError> {
        if self.script.reject_configuration.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let result = ConfigurationValidator::new().validate(settings, &self.metadata.configuration_schema);
        Ok(result.is_valid())
    }

    async fn shutdown(&self, _cancel: &CancellationToken) -> Result<(), PluginError> {
        self.script.shutdown_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.script.shutdown_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.script.panic_shutdown.load(Ordering::SeqCst) {
            panic!("shutdown panicked in {}", self.metadata.id);
        }
        let failure = lock(&self.script.fail_shutdown).clone();
        match failure {
            Some(message) => Err(PluginError::Shutdown(message)),
            None => Ok(()),
        }
    }

    fn actions(&self) -> Vec<PluginAction> {
        vec![
            PluginAction::new("ping", "Ping", "Reply with pong"),
            PluginAction::new("explode", "Explode", "Panic inside the plugin").confirmed(),
            PluginAction::new("fail", "Fail", "Return an error"),
        ]
    }

    async fn execute_action(
        &self,
        action_id: &str,
        _services: &ServiceProvider,
        _cancel: &CancellationToken,
    ) -> Result<ActionOutput, PluginError> {
        self.script.action_calls.fetch_add(1, Ordering::SeqCst);
        match action_id {
            "ping" => Ok(ActionOutput::ok("pong").with_data("plugin", self.metadata.id.clone())),
            "explode" => panic!("action exploded"),
            "fail" => Err(PluginError::custom("action failed")),
            other => Err(PluginError::UnknownAction(other.to_string())),
        }
    }
}
