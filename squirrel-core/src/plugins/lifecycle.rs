//! LifecycleManager - initialize, shut down, restart and health-check plugins
//!
//! Every operation produces a [`PluginLifecycleResult`]; failures inside
//! plugin hooks (errors, panics, cancellation) are recorded in the
//! plugin's [`PluginLifecycleState`] and never propagate to the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use squirrel_plugin_api::{CancellationToken, PluginError, PluginSettings, ServiceProvider};

use super::guard;
use super::handle::PluginHandle;
use super::loader::LoadedPlugins;

/// Where a plugin is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Not in the loaded registry
    Unloaded,
    /// Loaded, not running
    Loaded,
    /// Initialize hook in progress
    Initializing,
    /// Initialized successfully
    Running,
    /// Shutdown hook in progress
    ShuttingDown,
    /// Last initialize or shutdown failed; initialize may be retried
    Failed,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LifecyclePhase::Unloaded => "unloaded",
            LifecyclePhase::Loaded => "loaded",
            LifecyclePhase::Initializing => "initializing",
            LifecyclePhase::Running => "running",
            LifecyclePhase::ShuttingDown => "shutting down",
            LifecyclePhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Lifecycle operation a result describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleOperation {
    Initialize,
    Shutdown,
    Restart,
    HealthCheck,
}

/// Tracked initialization/shutdown history of one plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginLifecycleState {
    pub plugin_id: String,
    pub name: String,
    pub phase: LifecyclePhase,
    pub is_initialized: bool,
    pub last_initialized: Option<DateTime<Utc>>,
    pub last_shutdown: Option<DateTime<Utc>>,
    pub last_initialization_duration: Option<Duration>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Generation of the instance this state describes; 0 when unknown
    #[serde(skip)]
    pub generation: u64,
}

impl PluginLifecycleState {
    fn new(plugin_id: &str, name: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            name: name.to_string(),
            phase: LifecyclePhase::Loaded,
            is_initialized: false,
            last_initialized: None,
            last_shutdown: None,
            last_initialization_duration: None,
            last_error: None,
            last_error_at: None,
            generation: 0,
        }
    }

    fn record_failure(&mut self, message: String) {
        self.last_error = Some(message);
        self.last_error_at = Some(Utc::now());
    }
}

/// Outcome of a lifecycle operation
#[derive(Debug, Clone, Serialize)]
pub struct PluginLifecycleResult {
    pub success: bool,
    pub plugin_id: String,
    pub plugin_name: String,
    pub operation: LifecycleOperation,
    pub error_message: Option<String>,
    /// The captured failure cause
    #[serde(skip)]
    pub exception: Option<Arc<PluginError>>,
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
}

impl PluginLifecycleResult {
    fn new(
        plugin: &PluginHandle,
        operation: LifecycleOperation,
        outcome: Result<(), PluginError>,
        duration: Duration,
    ) -> Self {
        Self::for_id(plugin.id(), plugin.name(), operation, outcome, duration)
    }

    pub(crate) fn for_id(
        plugin_id: &str,
        plugin_name: &str,
        operation: LifecycleOperation,
        outcome: Result<(), PluginError>,
        duration: Duration,
    ) -> Self {
        let (success, error_message, exception) = match outcome {
            Ok(()) => (true, None, None),
            Err(e) => (false, Some(e.to_string()), Some(Arc::new(e))),
        };
        Self {
            success,
            plugin_id: plugin_id.to_string(),
            plugin_name: plugin_name.to_string(),
            operation,
            error_message,
            exception,
            duration,
            completed_at: Utc::now(),
        }
    }
}

/// Health tier reported by a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthTier {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            HealthTier::Healthy => "healthy",
            HealthTier::Degraded => "degraded",
            HealthTier::Unhealthy => "unhealthy",
            HealthTier::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Result of a health check
#[derive(Debug, Clone, Serialize)]
pub struct PluginHealthStatus {
    pub plugin_id: String,
    pub state: Option<PluginLifecycleState>,
    pub health: HealthTier,
    pub message: String,
    pub details: BTreeMap<String, String>,
    pub uptime: Option<Duration>,
    pub checked_at: DateTime<Utc>,
}

impl PluginHealthStatus {
    pub(crate) fn unknown(plugin_id: &str, message: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            state: None,
            health: HealthTier::Unknown,
            message: message.into(),
            details: BTreeMap::new(),
            uptime: None,
            checked_at: Utc::now(),
        }
    }
}

/// Tunables for the lifecycle manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleOptions {
    /// Pause between shutdown and initialize during a restart
    pub restart_delay: Duration,
    /// How long a recorded error keeps an initialized plugin degraded
    pub degraded_window: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(500),
            degraded_window: Duration::from_secs(5 * 60),
        }
    }
}

/// Drives plugin lifecycle hooks and tracks their outcome
pub struct LifecycleManager {
    states: Mutex<HashMap<String, PluginLifecycleState>>,
    registry: Option<Arc<LoadedPlugins>>,
    options: LifecycleOptions,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new(LifecycleOptions::default())
    }
}

impl LifecycleManager {
    /// Create a manager not bound to a loaded-plugin registry
    pub fn new(options: LifecycleOptions) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            registry: None,
            options,
        }
    }

    /// Bind to a loaded-plugin registry; states of plugins missing from it
    /// are purged on every read
    pub fn with_registry(mut self, registry: Arc<LoadedPlugins>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// The configured options
    pub fn options(&self) -> LifecycleOptions {
        self.options
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PluginLifecycleState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registered_generation(&self, plugin_id: &str) -> Option<u64> {
        self.registry
            .as_ref()
            .and_then(|registry| registry.generations().get(plugin_id).copied())
    }

    fn update(&self, plugin_id: &str, name: &str, f: impl FnOnce(&mut PluginLifecycleState)) {
        let generation = self.registered_generation(plugin_id).unwrap_or_default();
        let mut states = self.lock();
        let state = states.entry(plugin_id.to_string()).or_insert_with(|| {
            let mut state = PluginLifecycleState::new(plugin_id, name);
            state.generation = generation;
            state
        });
        f(state);
    }

    /// Update the state of `plugin`, starting over if the recorded state
    /// belongs to another instance
    fn update_instance(&self, plugin: &PluginHandle, f: impl FnOnce(&mut PluginLifecycleState)) {
        let mut states = self.lock();
        let state = states
            .entry(plugin.id().to_string())
            .or_insert_with(|| PluginLifecycleState::new(plugin.id(), plugin.name()));
        if state.generation != 0 && state.generation != plugin.generation() {
            tracing::debug!(plugin = %plugin.id(), "Discarding lifecycle state of a replaced instance");
            *state = PluginLifecycleState::new(plugin.id(), plugin.name());
        }
        state.generation = plugin.generation();
        f(state);
    }

    fn purge_orphans(&self) {
        let Some(registry) = &self.registry else {
            return;
        };
        let loaded = registry.generations();
        self.lock().retain(|plugin_id, state| {
            let keep = loaded
                .get(plugin_id)
                .is_some_and(|&live| state.generation == 0 || state.generation == live);
            if !keep {
                tracing::debug!(plugin = %plugin_id, "Purging lifecycle state of unloaded plugin");
            }
            keep
        });
    }

    /// Apply configuration and run the plugin's initialize hook
    pub async fn initialize(
        &self,
        plugin: &PluginHandle,
        config: &PluginSettings,
        services: &ServiceProvider,
        cancel: &CancellationToken,
    ) -> PluginLifecycleResult {
        let started = Instant::now();
        self.update_instance(plugin, |state| {
            state.phase = LifecyclePhase::Initializing;
        });

        let outcome = match guard::call_sync(|| plugin.set_configuration(config)) {
            Ok(()) => guard::call_async(plugin.initialize(services, cancel), cancel).await,
            Err(e) => Err(e),
        };
        let duration = started.elapsed();

        match &outcome {
            Ok(()) => {
                self.update_instance(plugin, |state| {
                    state.phase = LifecyclePhase::Running;
                    state.is_initialized = true;
                    state.last_initialized = Some(Utc::now());
                    state.last_initialization_duration = Some(duration);
                });
                tracing::info!(
                    plugin = %plugin.id(),
                    duration_ms = duration.as_millis() as u64,
                    "Plugin initialized"
                );
            }
            Err(e) => {
                self.update_instance(plugin, |state| {
                    state.phase = LifecyclePhase::Failed;
                    state.is_initialized = false;
                    state.record_failure(e.to_string());
                });
                tracing::error!(plugin = %plugin.id(), error = %e, "Plugin initialization failed");
            }
        }

        PluginLifecycleResult::new(plugin, LifecycleOperation::Initialize, outcome, duration)
    }

    /// Run the plugin's shutdown hook; the plugin is marked not initialized
    /// whatever the outcome
    pub async fn shutdown(
        &self,
        plugin: &PluginHandle,
        cancel: &CancellationToken,
    ) -> PluginLifecycleResult {
        let started = Instant::now();
        self.update_instance(plugin, |state| {
            state.phase = LifecyclePhase::ShuttingDown;
        });

        let outcome = guard::call_async(plugin.shutdown(cancel), cancel).await;
        let duration = started.elapsed();

        self.update_instance(plugin, |state| {
            state.is_initialized = false;
            state.last_shutdown = Some(Utc::now());
            match &outcome {
                Ok(()) => state.phase = LifecyclePhase::Loaded,
                Err(e) => {
                    state.phase = LifecyclePhase::Failed;
                    state.record_failure(e.to_string());
                }
            }
        });

        match &outcome {
            Ok(()) => tracing::info!(plugin = %plugin.id(), "Plugin shut down"),
            Err(e) => tracing::error!(plugin = %plugin.id(), error = %e, "Plugin shutdown failed"),
        }

        PluginLifecycleResult::new(plugin, LifecycleOperation::Shutdown, outcome, duration)
    }

    /// Shut down, pause, then initialize again
    pub async fn restart(
        &self,
        plugin: &PluginHandle,
        config: &PluginSettings,
        services: &ServiceProvider,
        cancel: &CancellationToken,
    ) -> PluginLifecycleResult {
        let started = Instant::now();

        let stopped = self.shutdown(plugin, cancel).await;
        if !stopped.success {
            tracing::warn!(
                plugin = %plugin.id(),
                error = stopped.error_message.as_deref().unwrap_or_default(),
                "Shutdown failed during restart, initializing anyway"
            );
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return PluginLifecycleResult::new(
                    plugin,
                    LifecycleOperation::Restart,
                    Err(PluginError::Cancelled),
                    started.elapsed(),
                );
            }
            _ = tokio::time::sleep(self.options.restart_delay) => {}
        }

        let initialized = self.initialize(plugin, config, services, cancel).await;
        PluginLifecycleResult {
            operation: LifecycleOperation::Restart,
            duration: started.elapsed(),
            ..initialized
        }
    }

    /// Health of a plugin derived from its recorded state
    pub fn check_health(&self, plugin_id: &str) -> PluginHealthStatus {
        let state = self.state(plugin_id);
        let mut details = BTreeMap::new();
        let now = Utc::now();

        let (health, message, uptime) = match &state {
            Some(state) if state.is_initialized => {
                let uptime = state
                    .last_initialized
                    .and_then(|at| (now - at).to_std().ok());
                let recent_error = state.last_error.as_ref().filter(|_| {
                    state.last_error_at.is_some_and(|at| {
                        (now - at)
                            .to_std()
                            .map_or(true, |age| age <= self.options.degraded_window)
                    })
                });

                if let Some(error) = recent_error {
                    details.insert("last_error".to_string(), error.clone());
                    if let Some(at) = state.last_error_at {
                        details.insert("last_error_at".to_string(), at.to_rfc3339());
                    }
                    (HealthTier::Degraded, "Plugin reported a recent error".to_string(), uptime)
                } else {
                    let duration_ms = state
                        .last_initialization_duration
                        .map(|d| d.as_millis())
                        .unwrap_or_default();
                    details.insert("initialization_duration_ms".to_string(), duration_ms.to_string());
                    (HealthTier::Healthy, "Plugin is running".to_string(), uptime)
                }
            }
            Some(state) => {
                if let Some(error) = &state.last_error {
                    details.insert("last_error".to_string(), error.clone());
                }
                (HealthTier::Unhealthy, "Plugin is not initialized".to_string(), None)
            }
            None => (HealthTier::Unhealthy, "Plugin is not initialized".to_string(), None),
        };

        PluginHealthStatus {
            plugin_id: plugin_id.to_string(),
            state,
            health,
            message,
            details,
            uptime,
            checked_at: now,
        }
    }

    /// Record an initialize that was refused before the hook ran
    pub fn record_failed_initialize(&self, plugin: &PluginHandle, message: impl Into<String>) {
        let message = message.into();
        self.update_instance(plugin, |state| {
            state.phase = LifecyclePhase::Failed;
            state.is_initialized = false;
            state.record_failure(message);
        });
    }

    /// Record an error raised outside initialize/shutdown (e.g. by an action)
    pub fn record_error(&self, plugin_id: &str, message: impl Into<String>) {
        let message = message.into();
        self.update(plugin_id, plugin_id, |state| state.record_failure(message));
    }

    /// Snapshot of one plugin's state
    pub fn state(&self, plugin_id: &str) -> Option<PluginLifecycleState> {
        self.purge_orphans();
        self.lock().get(plugin_id).cloned()
    }

    /// Snapshot of all states, sorted by id
    pub fn states(&self) -> Vec<PluginLifecycleState> {
        self.purge_orphans();
        let mut states: Vec<_> = self.lock().values().cloned().collect();
        states.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        states
    }

    /// Current phase; `Loaded` for a registered plugin with no state yet
    pub fn phase(&self, plugin_id: &str) -> LifecyclePhase {
        match self.state(plugin_id) {
            Some(state) => state.phase,
            None if self
                .registry
                .as_ref()
                .is_some_and(|registry| registry.generations().contains_key(plugin_id)) =>
            {
                LifecyclePhase::Loaded
            }
            None => LifecyclePhase::Unloaded,
        }
    }

    /// Whether the plugin is currently initialized
    pub fn is_initialized(&self, plugin_id: &str) -> bool {
        self.state(plugin_id).is_some_and(|state| state.is_initialized)
    }

    /// Drop a plugin's state
    pub fn remove(&self, plugin_id: &str) -> Option<PluginLifecycleState> {
        self.lock().remove(plugin_id)
    }
}
