//! End-to-end tests for the plugin runtime
//!
//! Modules are served by the in-process `StaticModuleFactory`, so these
//! tests exercise discovery, the loaded registry, lifecycle tracking and the
//! host facade against real plugin directories without building shared
//! libraries.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use squirrel_core::plugins::testing::{StaticModuleFactory, TestPlugin, install_module, install_module_file};
use squirrel_core::plugins::{
    HealthTier, LifecycleManager, LifecycleOptions, LoadContextFactory, LifecyclePhase, PluginHost, PluginHostConfig,
    PluginHostError, PluginLoader, environment_prefix, environment_variable_name,
};
use squirrel_plugin_api::{
    CancellationToken, ConfigurationSchemaItem, ConfigurationValidator, MemoryReader,
    PluginError, PluginSettings, ServiceProvider, SettingKind,
};
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;

fn fast_lifecycle() -> LifecycleOptions {
    LifecycleOptions {
        restart_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

fn host(root: &TempDir, factory: StaticModuleFactory, reader: MemoryReader) -> PluginHost {
    let mut config = PluginHostConfig::for_plugin_dir(root.path());
    config.lifecycle = fast_lifecycle();
    PluginHost::with_parts(config, Arc::new(factory), Arc::new(reader))
}

fn search_schema() -> Vec<ConfigurationSchemaItem> {
    vec![
        ConfigurationSchemaItem::new("IndexPath", "Index path", SettingKind::Text).required(),
        ConfigurationSchemaItem::new("MaxResults", "Maximum results", SettingKind::Number)
            .with_default("20"),
        ConfigurationSchemaItem::new("ApiKey", "API key", SettingKind::Secret),
    ]
}

// ─── Loader ──────────────────────────────────────────────────────────

#[tokio::test]
async fn loading_twice_keeps_one_entry() {
    let root = TempDir::new().unwrap();
    install_module(root.path(), "search-x").unwrap();
    let plugin = TestPlugin::new("search-x");
    let loader = PluginLoader::new(Arc::new(
        StaticModuleFactory::new().with_plugin("search-x", plugin.clone()),
    ));
    let cancel = CancellationToken::new();

    let first = loader.load_one(root.path(), "search-x", &cancel).await.unwrap();
    let second = loader.load_one(root.path(), "search-x", &cancel).await.unwrap();

    let loaded = loader.loaded();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id(), "search-x");
    assert!(loaded[0].same_instance(&second));
    assert!(!first.same_instance(&second));
    assert_eq!(plugin.shutdown_calls(), 1);
}

#[tokio::test]
async fn unloading_unknown_plugin_is_a_no_op() {
    let root = TempDir::new().unwrap();
    install_module(root.path(), "search-x").unwrap();
    let loader = PluginLoader::new(Arc::new(
        StaticModuleFactory::new().with_plugin("search-x", TestPlugin::new("search-x")),
    ));
    let cancel = CancellationToken::new();
    loader.load_one(root.path(), "search-x", &cancel).await.unwrap();

    assert!(!loader.unload_one("never-loaded", &cancel).await);
    assert_eq!(loader.registry().ids(), ["search-x"]);
}

#[tokio::test]
async fn reload_yields_fresh_instance_with_same_id() {
    let root = TempDir::new().unwrap();
    install_module(root.path(), "search-x").unwrap();
    let factory = Arc::new(
        StaticModuleFactory::new().with_plugin("search-x", TestPlugin::new("search-x")),
    );
    let shared: Arc<dyn LoadContextFactory> = factory.clone();
    let loader = PluginLoader::new(shared);
    let cancel = CancellationToken::new();

    let before = loader.load_one(root.path(), "search-x", &cancel).await.unwrap();
    let weak = before.weak_context();
    drop(before);

    let after = loader.reload_one(root.path(), "search-x", &cancel).await.unwrap();

    assert_eq!(after.metadata().id, "search-x");
    assert_eq!(loader.loaded().len(), 1);
    assert_eq!(factory.contexts_created(), 2);
    assert!(weak.upgrade().is_none(), "old context should be reclaimed");
}

/// Log sink shared between a test and the subscriber it installs
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn module_with_two_types_uses_the_first() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let root = TempDir::new().unwrap();
    install_module(root.path(), "search-x").unwrap();
    let primary = TestPlugin::new("search-x");
    let secondary = TestPlugin::new("search-x-secondary");
    let loader = PluginLoader::new(Arc::new(StaticModuleFactory::new().with_module(
        "search-x",
        vec![
            primary.constructor("LuceneSearch"),
            secondary.constructor("FuzzySearch"),
        ],
    )));

    let handle = loader
        .load_one(root.path(), "search-x", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(handle.type_name(), "LuceneSearch");
    assert_eq!(handle.id(), "search-x");

    let output = logs.contents();
    assert!(output.contains("WARN"), "{output}");
    assert!(output.contains("Module exports multiple plugin types, using the first"), "{output}");
    assert!(output.contains("FuzzySearch"), "{output}");
}

#[tokio::test]
async fn load_all_skips_broken_plugins() {
    let root = TempDir::new().unwrap();
    install_module(root.path(), "alpha").unwrap();
    install_module(root.path(), "broken").unwrap();
    install_module(root.path(), "gamma").unwrap();
    std::fs::create_dir_all(root.path().join("no-binary")).unwrap();
    install_module_file(root.path(), "unregistered", "mystery").unwrap();

    let loader = PluginLoader::new(Arc::new(
        StaticModuleFactory::new()
            .with_plugin("alpha", TestPlugin::new("alpha"))
            .with_broken_module("broken", "bad image format")
            .with_plugin("gamma", TestPlugin::new("gamma")),
    ));

    let loaded = loader.load_all(root.path(), &CancellationToken::new()).await;
    let ids: Vec<&str> = loaded.iter().map(|h| h.id()).collect();
    assert_eq!(ids, ["alpha", "gamma"]);
}

#[tokio::test]
async fn load_all_on_missing_root_is_empty() {
    let root = TempDir::new().unwrap();
    let loader = PluginLoader::new(Arc::new(StaticModuleFactory::new()));

    let loaded = loader
        .load_all(&root.path().join("missing"), &CancellationToken::new())
        .await;
    assert!(loaded.is_empty());
}

// ─── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_unhealthy_before_initialize() {
    let root = TempDir::new().unwrap();
    install_module(root.path(), "search-x").unwrap();
    let loader = PluginLoader::new(Arc::new(
        StaticModuleFactory::new().with_plugin("search-x", TestPlugin::new("search-x")),
    ));
    let lifecycle = LifecycleManager::new(fast_lifecycle()).with_registry(Arc::clone(loader.registry()));
    loader
        .load_one(root.path(), "search-x", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(lifecycle.phase("search-x"), LifecyclePhase::Loaded);
    assert_eq!(lifecycle.check_health("search-x").health, HealthTier::Unhealthy);
}

#[tokio::test]
async fn health_is_healthy_after_initialize() {
    let lifecycle = LifecycleManager::new(fast_lifecycle());
    let handle = TestPlugin::new("search-x").handle();

    let result = lifecycle
        .initialize(&handle, &PluginSettings::new(), &ServiceProvider::new(), &CancellationToken::new())
        .await;
    assert!(result.success);

    let status = lifecycle.check_health("search-x");
    assert_eq!(status.health, HealthTier::Healthy);
    let duration_ms: i64 = status.details["initialization_duration_ms"].parse().unwrap();
    assert!(duration_ms >= 0);
}

#[tokio::test]
async fn recent_error_degrades_health_with_message() {
    let lifecycle = LifecycleManager::new(fast_lifecycle());
    let plugin = TestPlugin::new("search-x").failing_initialize("index locked");
    let handle = plugin.handle();
    let services = ServiceProvider::new();
    let cancel = CancellationToken::new();

    let failed = lifecycle
        .initialize(&handle, &PluginSettings::new(), &services, &cancel)
        .await;
    let message = failed.error_message.clone().unwrap();

    plugin.clear_failures();
    assert!(lifecycle.initialize(&handle, &PluginSettings::new(), &services, &cancel).await.success);

    let status = lifecycle.check_health("search-x");
    assert_eq!(status.health, HealthTier::Degraded);
    assert_eq!(status.details["last_error"], message);
}

#[tokio::test]
async fn throwing_initialize_is_never_healthy() {
    let lifecycle = LifecycleManager::new(fast_lifecycle());
    let handle = TestPlugin::new("search-x").panicking_initialize().handle();

    let result = lifecycle
        .initialize(&handle, &PluginSettings::new(), &ServiceProvider::new(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert!(matches!(result.exception.as_deref(), Some(PluginError::Panicked(_))));
    let health = lifecycle.check_health("search-x").health;
    assert!(matches!(health, HealthTier::Unhealthy | HealthTier::Degraded));
}

// ─── Validation and environment ──────────────────────────────────────

#[test]
fn missing_required_key_yields_exactly_one_error() {
    let schema = vec![ConfigurationSchemaItem::new("IndexPath", "Index path", SettingKind::Text).required()];
    let result = ConfigurationValidator::new().validate(&PluginSettings::new(), &schema);

    assert!(!result.is_valid());
    assert_eq!(result.error_count(), 1);
    assert_eq!(result.errors_for("IndexPath").len(), 1);
}

#[test]
fn url_kind_accepts_absolute_http_only() {
    let schema = vec![ConfigurationSchemaItem::new("Endpoint", "Endpoint", SettingKind::Url)];
    let validator = ConfigurationValidator::new();

    let bad: PluginSettings = [("Endpoint", "not-a-url")].into_iter().collect();
    assert!(!validator.validate(&bad, &schema).errors_for("Endpoint").is_empty());

    let good: PluginSettings = [("Endpoint", "https://example.com")].into_iter().collect();
    assert!(validator.validate(&good, &schema).errors_for("Endpoint").is_empty());
}

#[test]
fn environment_names_follow_convention() {
    assert_eq!(environment_prefix("My.Plugin-A"), "PLUGIN_MY_PLUGIN_A_");
    assert_eq!(
        environment_variable_name("My.Plugin-A", "IndexPath"),
        "PLUGIN_MY_PLUGIN_A_INDEXPATH"
    );
}

// ─── Host ────────────────────────────────────────────────────────────

#[tokio::test]
async fn host_refuses_to_initialize_with_invalid_settings() {
    let root = TempDir::new().unwrap();
    install_module(root.path(), "search-x").unwrap();
    let plugin = TestPlugin::new("search-x").with_schema(search_schema());
    let host = host(
        &root,
        StaticModuleFactory::new().with_plugin("search-x", plugin.clone()),
        MemoryReader::new(),
    );
    let cancel = CancellationToken::new();
    host.discover(&cancel).await;

    let result = host.initialize("search-x", &cancel).await.unwrap();

    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("Index path is required"));
    assert_eq!(plugin.initialize_calls(), 0);
    assert_ne!(host.health("search-x").health, HealthTier::Healthy);
    assert_eq!(host.lifecycle().phase("search-x"), LifecyclePhase::Failed);
}

#[tokio::test]
async fn host_initializes_with_env_overrides_and_defaults() {
    let root = TempDir::new().unwrap();
    install_module(root.path(), "search-x").unwrap();
    let plugin = TestPlugin::new("search-x").with_schema(search_schema());
    let host = host(
        &root,
        StaticModuleFactory::new().with_plugin("search-x", plugin.clone()),
        MemoryReader::new().with("PLUGIN_SEARCH_X_INDEXPATH", "/env/index"),
    );
    let cancel = CancellationToken::new();
    host.discover(&cancel).await;

    let stored: PluginSettings = [("IndexPath", "/stored/index"), ("Unknown", "dropped")]
        .into_iter()
        .collect();
    host.save_settings("search-x", &stored).unwrap();

    let result = host.initialize("search-x", &cancel).await.unwrap();
    assert!(result.success, "{:?}", result.error_message);

    let applied = plugin.configuration();
    assert_eq!(applied.get("IndexPath"), Some("/env/index"));
    assert_eq!(applied.get("MaxResults"), Some("20"));
    assert!(!applied.contains_key("Unknown"));
    assert_eq!(host.health("search-x").health, HealthTier::Healthy);
}

#[tokio::test]
async fn host_rejects_invalid_settings_on_save() {
    let root = TempDir::new().unwrap();
    install_module(root.path(), "search-x").unwrap();
    let host = host(
        &root,
        StaticModuleFactory::new().with_plugin(
            "search-x",
            TestPlugin::new("search-x").with_schema(search_schema()),
        ),
        MemoryReader::new(),
    );
    host.discover(&CancellationToken::new()).await;

    let settings: PluginSettings = [("IndexPath", "/srv/index"), ("MaxResults", "lots")]
        .into_iter()
        .collect();
    let err = host.save_settings("search-x", &settings).unwrap_err();
    assert!(matches!(err, PluginHostError::Settings(msg) if msg.contains("MaxResults")));
    assert!(!root.path().join("search-x").join("settings.toml").exists());
}

#[tokio::test]
async fn load_enabled_honors_registry_core_and_env_lock() {
    let root = TempDir::new().unwrap();
    for id in ["auth-core", "search-off", "search-on", "search-pinned"] {
        install_module(root.path(), id).unwrap();
    }
    let host = host(
        &root,
        StaticModuleFactory::new()
            .with_plugin("auth-core", TestPlugin::new("auth-core").core())
            .with_plugin("search-off", TestPlugin::new("search-off"))
            .with_plugin("search-on", TestPlugin::new("search-on"))
            .with_plugin("search-pinned", TestPlugin::new("search-pinned")),
        MemoryReader::new().with("PLUGIN_SEARCH_PINNED_ENABLED", "yes"),
    );
    host.enable("search-on").unwrap();

    let loaded = host.load_enabled(&CancellationToken::new()).await.unwrap();
    let ids: Vec<&str> = loaded.iter().map(|h| h.id()).collect();
    assert_eq!(ids, ["auth-core", "search-on", "search-pinned"]);

    assert!(matches!(host.disable("auth-core"), Err(PluginHostError::CorePlugin { .. })));
    assert!(matches!(host.disable("search-pinned"), Err(PluginHostError::Locked { .. })));
    host.disable("search-on").unwrap();
    assert!(!host.is_enabled("search-on").unwrap());
}

#[tokio::test]
async fn reload_reinitializes_running_plugin() {
    let root = TempDir::new().unwrap();
    install_module(root.path(), "search-x").unwrap();
    let plugin = TestPlugin::new("search-x");
    let host = host(
        &root,
        StaticModuleFactory::new().with_plugin("search-x", plugin.clone()),
        MemoryReader::new(),
    );
    let cancel = CancellationToken::new();
    host.discover(&cancel).await;
    assert!(host.initialize("search-x", &cancel).await.unwrap().success);

    let result = host.reload("search-x", &cancel).await.unwrap();

    assert!(result.is_some_and(|r| r.success));
    assert_eq!(plugin.initialize_calls(), 2);
    assert_eq!(plugin.shutdown_calls(), 1);
    assert_eq!(host.lifecycle().phase("search-x"), LifecyclePhase::Running);
}

#[tokio::test]
async fn unload_purges_lifecycle_state() {
    let root = TempDir::new().unwrap();
    install_module(root.path(), "search-x").unwrap();
    let host = host(
        &root,
        StaticModuleFactory::new().with_plugin("search-x", TestPlugin::new("search-x")),
        MemoryReader::new(),
    );
    let cancel = CancellationToken::new();
    host.discover(&cancel).await;
    host.initialize("search-x", &cancel).await.unwrap();

    assert!(host.unload("search-x", &cancel).await);
    assert!(host.lifecycle().state("search-x").is_none());
    assert_eq!(host.health("search-x").health, HealthTier::Unknown);
    assert!(!host.unload("search-x", &cancel).await);
}

#[tokio::test]
async fn actions_require_running_plugin_and_record_failures() {
    let root = TempDir::new().unwrap();
    install_module(root.path(), "search-x").unwrap();
    let plugin = TestPlugin::new("search-x");
    let host = host(
        &root,
        StaticModuleFactory::new().with_plugin("search-x", plugin.clone()),
        MemoryReader::new(),
    );
    let cancel = CancellationToken::new();
    host.discover(&cancel).await;

    assert!(matches!(
        host.execute_action("search-x", "ping", &cancel).await,
        Err(PluginHostError::NotInitialized { .. })
    ));

    host.initialize("search-x", &cancel).await.unwrap();
    let output = host.execute_action("search-x", "ping", &cancel).await.unwrap();
    assert_eq!(output.message, "pong");

    let err = host.execute_action("search-x", "explode", &cancel).await.unwrap_err();
    assert!(matches!(err, PluginHostError::Plugin(PluginError::Panicked(_))));
    assert_eq!(host.health("search-x").health, HealthTier::Degraded);

    assert!(matches!(
        host.execute_action("search-x", "missing", &cancel).await,
        Err(PluginHostError::Plugin(PluginError::UnknownAction(_)))
    ));
    assert_eq!(plugin.action_calls(), 2);
}

#[tokio::test]
async fn list_reports_phase_and_enabled_state() {
    let root = TempDir::new().unwrap();
    install_module(root.path(), "search-x").unwrap();
    install_module(root.path(), "auth-core").unwrap();
    let host = host(
        &root,
        StaticModuleFactory::new()
            .with_plugin("search-x", TestPlugin::new("search-x"))
            .with_plugin("auth-core", TestPlugin::new("auth-core").core()),
        MemoryReader::new(),
    );
    let cancel = CancellationToken::new();
    host.discover(&cancel).await;
    host.initialize("auth-core", &cancel).await.unwrap();

    let infos = host.list().unwrap();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].id, "auth-core");
    assert!(infos[0].enabled);
    assert_eq!(infos[0].phase, LifecyclePhase::Running);
    assert_eq!(infos[1].id, "search-x");
    assert!(!infos[1].enabled);
    assert_eq!(infos[1].phase, LifecyclePhase::Loaded);
}
