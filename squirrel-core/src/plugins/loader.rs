//! PluginLoader - discovers plugin modules on disk and keeps the loaded set

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use squirrel_plugin_api::{CancellationToken, PluginConstructor};

use super::context::{LoadContext, LoadContextFactory, NativeContextFactory, is_library_file};
use super::error::PluginHostError;
use super::guard;
use super::handle::PluginHandle;

/// A registered plugin: its instance, the module it came from, and when
#[derive(Debug, Clone)]
pub struct LoadedPluginEntry {
    /// The live instance
    pub handle: PluginHandle,
    /// Source binary path
    pub path: PathBuf,
    /// When the module was loaded
    pub loaded_at: DateTime<Utc>,
}

impl LoadedPluginEntry {
    /// The load context owning the instance
    pub fn context(&self) -> &Arc<dyn LoadContext> {
        self.handle.load_context()
    }
}

/// The loaded-plugin registry, keyed by plugin id
#[derive(Debug, Default)]
pub struct LoadedPlugins {
    entries: Mutex<HashMap<String, LoadedPluginEntry>>,
}

impl LoadedPlugins {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, LoadedPluginEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry for a plugin id
    pub fn get(&self, plugin_id: &str) -> Option<LoadedPluginEntry> {
        self.lock().get(plugin_id).cloned()
    }

    /// Whether a plugin id is registered
    pub fn contains(&self, plugin_id: &str) -> bool {
        self.lock().contains_key(plugin_id)
    }

    /// Snapshot of all entries, sorted by id
    pub fn snapshot(&self) -> Vec<LoadedPluginEntry> {
        let mut entries: Vec<_> = self.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.handle.id().cmp(b.handle.id()));
        entries
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Generation of the registered instance, by registry key or metadata id
    pub fn generations(&self) -> HashMap<String, u64> {
        let entries = self.lock();
        let mut generations: HashMap<String, u64> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.handle.generation()))
            .collect();
        for entry in entries.values() {
            generations.insert(entry.handle.id().to_string(), entry.handle.generation());
        }
        generations
    }

    /// Number of registered plugins
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no plugin is registered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub(crate) fn insert(&self, plugin_id: &str, entry: LoadedPluginEntry) -> Option<LoadedPluginEntry> {
        self.lock().insert(plugin_id.to_string(), entry)
    }

    pub(crate) fn remove(&self, plugin_id: &str) -> Option<LoadedPluginEntry> {
        self.lock().remove(plugin_id)
    }
}

/// Discovers, loads, unloads and reloads plugin modules
pub struct PluginLoader {
    registry: Arc<LoadedPlugins>,
    factory: Arc<dyn LoadContextFactory>,
}

impl PluginLoader {
    /// Loader with its own registry
    pub fn new(factory: Arc<dyn LoadContextFactory>) -> Self {
        Self::with_registry(factory, Arc::new(LoadedPlugins::new()))
    }

    /// Loader backed by the platform dynamic loader
    pub fn native() -> Self {
        Self::new(Arc::new(NativeContextFactory::default()))
    }

    /// Loader sharing an existing registry
    pub fn with_registry(factory: Arc<dyn LoadContextFactory>, registry: Arc<LoadedPlugins>) -> Self {
        Self { registry, factory }
    }

    /// The registry this loader writes to
    pub fn registry(&self) -> &Arc<LoadedPlugins> {
        &self.registry
    }

    /// Load every plugin directory under `root`, skipping failures
    pub async fn load_all(&self, root: &Path, cancel: &CancellationToken) -> Vec<PluginHandle> {
        let mut loaded = Vec::new();
        for plugin_id in plugin_directories(root) {
            if cancel.is_cancelled() {
                tracing::info!(root = %root.display(), "Plugin discovery cancelled");
                break;
            }
            if let Some(handle) = self.load_one(root, &plugin_id, cancel).await {
                loaded.push(handle);
            }
        }

        tracing::info!(root = %root.display(), count = loaded.len(), "Plugin discovery complete");
        loaded
    }

    /// Load `root/plugin_id`, logging and returning `None` on any failure
    pub async fn load_one(
        &self,
        root: &Path,
        plugin_id: &str,
        cancel: &CancellationToken,
    ) -> Option<PluginHandle> {
        match self.try_load_one(root, plugin_id, cancel).await {
            Ok(handle) => Some(handle),
            Err(PluginHostError::PluginDirNotFound { path }) => {
                tracing::debug!(plugin = %plugin_id, path = %path.display(), "Plugin directory not found");
                None
            }
            Err(e) => {
                tracing::error!(plugin = %plugin_id, error = %e, "Failed to load plugin");
                None
            }
        }
    }

    /// Load `root/plugin_id`, reporting the failure cause
    pub async fn try_load_one(
        &self,
        root: &Path,
        plugin_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PluginHandle, PluginHostError> {
        if cancel.is_cancelled() {
            return Err(PluginHostError::Cancelled);
        }

        let dir = root.join(plugin_id);
        if !dir.is_dir() {
            return Err(PluginHostError::PluginDirNotFound { path: dir });
        }

        let module_path = select_module(&dir, plugin_id)?;
        let context = self.factory.create(&module_path)?;
        let constructors = context.load()?;
        let constructor = select_constructor(&module_path, &constructors)?;
        let handle = PluginHandle::instantiate(&constructor, Arc::clone(&context))?;

        if handle.id() != plugin_id {
            tracing::debug!(
                plugin = %plugin_id,
                metadata_id = %handle.id(),
                "Plugin directory name differs from metadata id"
            );
        }

        if self.registry.contains(plugin_id) {
            self.unload_one(plugin_id, cancel).await;
        }

        let entry = LoadedPluginEntry {
            handle: handle.clone(),
            path: module_path.clone(),
            loaded_at: Utc::now(),
        };
        if let Some(displaced) = self.registry.insert(plugin_id, entry) {
            tracing::warn!(plugin = %plugin_id, "Concurrent load replaced a plugin instance");
            tear_down(plugin_id, displaced, cancel).await;
        }

        tracing::info!(
            plugin = %plugin_id,
            version = %handle.metadata().version,
            type_name = %handle.type_name(),
            path = %module_path.display(),
            "Plugin loaded"
        );
        Ok(handle)
    }

    /// Unload a plugin; returns whether anything was unloaded
    pub async fn unload_one(&self, plugin_id: &str, cancel: &CancellationToken) -> bool {
        let Some(entry) = self.registry.remove(plugin_id) else {
            tracing::debug!(plugin = %plugin_id, "Plugin not loaded, nothing to unload");
            return false;
        };

        tear_down(plugin_id, entry, cancel).await;
        true
    }

    /// Unload then load a plugin
    pub async fn reload_one(
        &self,
        root: &Path,
        plugin_id: &str,
        cancel: &CancellationToken,
    ) -> Option<PluginHandle> {
        self.unload_one(plugin_id, cancel).await;
        self.load_one(root, plugin_id, cancel).await
    }

    /// All loaded instances, sorted by id
    pub fn loaded(&self) -> Vec<PluginHandle> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|entry| entry.handle)
            .collect()
    }

    /// A loaded instance by id
    pub fn get(&self, plugin_id: &str) -> Option<PluginHandle> {
        self.registry.get(plugin_id).map(|entry| entry.handle)
    }

    /// Full registry entry by id
    pub fn entry(&self, plugin_id: &str) -> Option<LoadedPluginEntry> {
        self.registry.get(plugin_id)
    }
}

/// Shut down an entry already taken out of the registry and release its context
async fn tear_down(plugin_id: &str, entry: LoadedPluginEntry, cancel: &CancellationToken) {
    if let Err(e) = guard::call_async(entry.handle.shutdown(cancel), cancel).await {
        tracing::warn!(plugin = %plugin_id, error = %e, "Plugin shutdown failed during unload");
    }

    let weak = entry.handle.weak_context();
    entry.context().release();
    drop(entry);

    let reclaimed = weak.upgrade().is_none();
    tracing::info!(plugin = %plugin_id, reclaimed, "Plugin unloaded");
}

/// Immediate sub-directory names of `root`, sorted
pub fn plugin_directories(root: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(root = %root.display(), error = %e, "Plugin root not readable");
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

fn normalize(name: &str) -> String {
    name.replace('-', "_").to_lowercase()
}

fn stem_matches(stem: &str, plugin_id: &str) -> bool {
    let stem = normalize(stem);
    let id = normalize(plugin_id);
    stem == id || stem.strip_prefix("lib").is_some_and(|rest| rest == id)
}

/// Choose the module binary inside a plugin directory
fn select_module(dir: &Path, plugin_id: &str) -> Result<PathBuf, PluginHostError> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| is_library_file(path))
        .collect();
    candidates.sort();

    if let Some(named) = candidates.iter().find(|path| {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| stem_matches(stem, plugin_id))
    }) {
        return Ok(named.clone());
    }

    match candidates.len() {
        0 => Err(PluginHostError::LibraryNotFound {
            dir: dir.to_path_buf(),
        }),
        1 => Ok(candidates.remove(0)),
        count => {
            let first = candidates.remove(0);
            tracing::warn!(
                plugin = %plugin_id,
                candidates = count,
                selected = %first.display(),
                "Multiple plugin binaries found, using the first"
            );
            Ok(first)
        }
    }
}

/// Choose the capability type exported by a module
fn select_constructor(
    module_path: &Path,
    constructors: &[PluginConstructor],
) -> Result<PluginConstructor, PluginHostError> {
    match constructors {
        [] => Err(PluginHostError::NoPluginType {
            path: module_path.to_path_buf(),
        }),
        [only] => Ok(only.clone()),
        [first, ..] => {
            let types: Vec<&str> = constructors.iter().map(|c| c.type_name()).collect();
            tracing::warn!(
                path = %module_path.display(),
                types = ?types,
                selected = %first.type_name(),
                "Module exports multiple plugin types, using the first"
            );
            Ok(first.clone())
        }
    }
}
