//! PluginHandle - a shared reference to one live plugin instance

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use squirrel_plugin_api::{Plugin, PluginConstructor, PluginMetadata};

use super::context::LoadContext;
use super::error::PluginHostError;
use super::guard;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

struct PluginInstance {
    /// Dropped before `context`: the instance's code lives in the context
    plugin: Box<dyn Plugin>,
    metadata: PluginMetadata,
    type_name: String,
    generation: u64,
    context: Arc<dyn LoadContext>,
}

/// A loaded plugin instance together with the load context that owns its code.
///
/// Handles are cheap to clone. The context stays alive while any handle
/// does, so code from a released module is never called after it is closed.
#[derive(Clone)]
pub struct PluginHandle {
    inner: Arc<PluginInstance>,
}

impl PluginHandle {
    /// Construct an instance through `constructor`, isolating panics
    pub fn instantiate(
        constructor: &PluginConstructor,
        context: Arc<dyn LoadContext>,
    ) -> Result<Self, PluginHostError> {
        let instantiation_error = |message: String| PluginHostError::Instantiation {
            type_name: constructor.type_name().to_string(),
            message,
        };

        let plugin = guard::call_sync(|| constructor.create())
            .map_err(|e| instantiation_error(e.to_string()))?;
        let metadata = guard::call_sync(|| plugin.metadata())
            .map_err(|e| instantiation_error(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(PluginInstance {
                plugin,
                metadata,
                type_name: constructor.type_name().to_string(),
                generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
                context,
            }),
        })
    }

    /// Plugin id from the metadata captured at load time
    pub fn id(&self) -> &str {
        &self.inner.metadata.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.inner.metadata.name
    }

    /// Metadata captured at load time
    pub fn metadata(&self) -> &PluginMetadata {
        &self.inner.metadata
    }

    /// Exported type name the instance was created from
    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    /// The load context that owns this instance's code
    pub fn load_context(&self) -> &Arc<dyn LoadContext> {
        &self.inner.context
    }

    /// Weak reference for observing when the context is reclaimed
    pub fn weak_context(&self) -> Weak<dyn LoadContext> {
        Arc::downgrade(&self.inner.context)
    }

    /// Process-unique number of this instance, never zero and never reused
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Whether both handles point at the same instance
    pub fn same_instance(&self, other: &PluginHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for PluginHandle {
    type Target = dyn Plugin;

    fn deref(&self) -> &Self::Target {
        self.inner.plugin.as_ref()
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("id", &self.id())
            .field("type_name", &self.type_name())
            .field("module", &self.inner.context.module_path())
            .finish()
    }
}
