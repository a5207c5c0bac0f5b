//! Isolated load contexts - one per loaded plugin module
//!
//! A load context owns the dynamic libraries of one module: its private
//! dependencies (resolved next to the module first, host-shared directories
//! second) and the module itself. Libraries are opened with local symbol
//! visibility, so two plugins can carry different copies of the same
//! dependency. Contexts are reference counted and close their libraries
//! when the last reference drops.

use libloading::{Library, Symbol};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use squirrel_plugin_api::{API_VERSION, PluginConstructor, PluginRegistrar};

use super::error::PluginHostError;
use super::guard;

/// Optional per-plugin manifest listing private dependencies
pub const DEPENDENCY_MANIFEST: &str = "plugin.toml";

/// Sub-directory searched for private dependencies after the module directory
pub const PRIVATE_DEPENDENCY_DIR: &str = "deps";

const API_VERSION_SYMBOL: &[u8] = b"_squirrel_plugin_api_version";
const REGISTER_SYMBOL: &[u8] = b"_squirrel_plugin_register";

/// A module's independent resolution and loading scope
pub trait LoadContext: Send + Sync {
    /// Path of the primary module binary
    fn module_path(&self) -> &Path;

    /// Resolve a dependency: module scope first, then host-shared directories
    fn resolve(&self, dependency: &str) -> Option<PathBuf>;

    /// Load the module and return the plugin types it exports, in export order
    fn load(&self) -> Result<Vec<PluginConstructor>, PluginHostError>;

    /// Mark the context releasable. Reclamation happens once the last
    /// reference to the context drops.
    fn release(&self);

    /// Whether `release` has been called
    fn is_released(&self) -> bool;
}

/// Creates a load context for a module path
pub trait LoadContextFactory: Send + Sync {
    /// Build the context; the module itself is loaded by [`LoadContext::load`]
    fn create(&self, module_path: &Path) -> Result<Arc<dyn LoadContext>, PluginHostError>;
}

/// Platform file names a library called `name` may have
pub fn library_file_names(name: &str) -> Vec<String> {
    let extension = std::env::consts::DLL_EXTENSION;
    if Path::new(name)
        .extension()
        .is_some_and(|ext| ext == extension)
    {
        return vec![name.to_string()];
    }

    let mut names = vec![format!("{name}.{extension}")];
    let prefix = std::env::consts::DLL_PREFIX;
    if !prefix.is_empty() && !name.starts_with(prefix) {
        names.push(format!("{prefix}{name}.{extension}"));
    }
    names
}

/// Whether `path` is a file with the platform's dynamic library extension
pub fn is_library_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION)
}

fn find_library_in(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    let names = library_file_names(name);
    dirs.iter()
        .flat_map(|dir| names.iter().map(move |file| dir.join(file)))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Default, Deserialize)]
struct DependencyManifest {
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Host-level resolution for framework and intentionally shared libraries
#[derive(Debug, Clone, Default)]
pub struct SharedResolver {
    search_dirs: Vec<PathBuf>,
}

impl SharedResolver {
    /// Resolver searching `search_dirs` in order
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// Find a shared library by name
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        find_library_in(&self.search_dirs, name)
    }
}

/// Dependency resolver scoped to one module's directory and manifest
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    scope: Vec<PathBuf>,
    dependencies: Vec<String>,
    shared: SharedResolver,
}

impl DependencyResolver {
    /// Build a resolver for the module at `module_path`
    pub fn for_module(module_path: &Path, shared: SharedResolver) -> Result<Self, PluginHostError> {
        let module_dir = module_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let manifest_path = module_dir.join(DEPENDENCY_MANIFEST);
        let manifest = if manifest_path.is_file() {
            let content = std::fs::read_to_string(&manifest_path)?;
            toml::from_str::<DependencyManifest>(&content).map_err(|e| {
                PluginHostError::Manifest {
                    path: manifest_path.clone(),
                    message: e.to_string(),
                }
            })?
        } else {
            DependencyManifest::default()
        };

        Ok(Self {
            scope: vec![module_dir.clone(), module_dir.join(PRIVATE_DEPENDENCY_DIR)],
            dependencies: manifest.dependencies,
            shared,
        })
    }

    /// Private dependencies declared by the manifest, in load order
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Resolve within the module's own scope only
    pub fn resolve_private(&self, name: &str) -> Option<PathBuf> {
        find_library_in(&self.scope, name)
    }

    /// Resolve privately, deferring to the shared resolver when unresolved
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.resolve_private(name)
            .or_else(|| self.shared.resolve(name))
    }
}

/// Load context backed by the platform dynamic loader
pub struct NativeLoadContext {
    module_path: PathBuf,
    resolver: DependencyResolver,
    /// Private dependencies first, module last; closed in reverse order
    libraries: Mutex<Vec<Library>>,
    released: AtomicBool,
}

impl NativeLoadContext {
    /// Create a context for the module at `module_path`
    pub fn new(module_path: &Path, shared: SharedResolver) -> Result<Self, PluginHostError> {
        Ok(Self {
            module_path: module_path.to_path_buf(),
            resolver: DependencyResolver::for_module(module_path, shared)?,
            libraries: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        })
    }

    /// The resolver scoped to this module
    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    fn open_dependencies(&self) -> Result<Vec<Library>, PluginHostError> {
        let mut opened = Vec::with_capacity(self.resolver.dependencies().len());
        for name in self.resolver.dependencies() {
            let path = self
                .resolver
                .resolve(name)
                .ok_or_else(|| PluginHostError::DependencyNotFound {
                    name: name.clone(),
                    module: self.module_path.clone(),
                })?;
            tracing::debug!(
                module = %self.module_path.display(),
                dependency = %path.display(),
                "Loading private dependency"
            );
            // SAFETY: dependencies are declared by a plugin the operator
            // installed; their initialisers run like any linked library.
            opened.push(unsafe { Library::new(&path)? });
        }
        Ok(opened)
    }
}

impl LoadContext for NativeLoadContext {
    fn module_path(&self) -> &Path {
        &self.module_path
    }

    fn resolve(&self, dependency: &str) -> Option<PathBuf> {
        self.resolver.resolve(dependency)
    }

    fn load(&self) -> Result<Vec<PluginConstructor>, PluginHostError> {
        if self.is_released() {
            return Err(PluginHostError::ContextReleased {
                path: self.module_path.clone(),
            });
        }

        let mut opened = self.open_dependencies()?;

        // SAFETY: the module was placed in the plugin directory by the
        // operator and is expected to follow the export_plugin! contract.
        let library = unsafe { Library::new(&self.module_path)? };

        let constructors = {
            // SAFETY: symbol signatures are fixed by export_plugin!.
            let version_fn: Symbol<extern "C" fn() -> u32> =
                unsafe { library.get(API_VERSION_SYMBOL)? };
            let found = version_fn();
            if found != API_VERSION {
                return Err(PluginHostError::ApiVersionMismatch {
                    expected: API_VERSION,
                    found,
                });
            }

            // SAFETY: see above.
            let register_fn: Symbol<extern "C" fn(&mut PluginRegistrar)> =
                unsafe { library.get(REGISTER_SYMBOL)? };
            let mut registrar = PluginRegistrar::new();
            guard::call_sync(|| register_fn(&mut registrar)).map_err(|e| {
                PluginHostError::ModuleLoad {
                    path: self.module_path.clone(),
                    message: e.to_string(),
                }
            })?;
            registrar.into_constructors()
        };

        opened.push(library);
        self.libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(opened);

        Ok(constructors)
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        tracing::debug!(module = %self.module_path.display(), "Load context released");
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for NativeLoadContext {
    fn drop(&mut self) {
        let libraries = self
            .libraries
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        while let Some(library) = libraries.pop() {
            if let Err(e) = library.close() {
                tracing::warn!(
                    module = %self.module_path.display(),
                    error = %e,
                    "Failed to close plugin library"
                );
            }
        }
        tracing::debug!(module = %self.module_path.display(), "Load context reclaimed");
    }
}

/// Factory producing [`NativeLoadContext`]s
#[derive(Debug, Clone, Default)]
pub struct NativeContextFactory {
    shared: SharedResolver,
}

impl NativeContextFactory {
    /// Factory whose contexts fall back to `shared` for unresolved dependencies
    pub fn new(shared: SharedResolver) -> Self {
        Self { shared }
    }
}

impl LoadContextFactory for NativeContextFactory {
    fn create(&self, module_path: &Path) -> Result<Arc<dyn LoadContext>, PluginHostError> {
        Ok(Arc::new(NativeLoadContext::new(
            module_path,
            self.shared.clone(),
        )?))
    }
}
