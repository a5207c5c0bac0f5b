//! Echo Search - a demo search provider for the Squirrel wiki
//!
//! This plugin demonstrates:
//! - Exporting a type with the `export_plugin!` macro
//! - Declaring a configuration schema and reading typed settings
//! - Handling the initialize/shutdown hooks
//! - Exposing a host-invocable action
//!
//! ## Building
//!
//! ```bash
//! cargo build --release
//! ```
//!
//! ## Installing
//!
//! ```bash
//! mkdir -p ~/.config/squirrel/plugins/squirrel.demo.echo-search
//! cp target/release/libecho_search.so ~/.config/squirrel/plugins/squirrel.demo.echo-search/
//! squirrel plugin enable squirrel.demo.echo-search
//! squirrel plugin settings squirrel.demo.echo-search --set IndexPath=/tmp/echo-index
//! squirrel plugin run squirrel.demo.echo-search rebuild-index --yes
//! ```

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use squirrel_plugin_api::helper::get_value;
use squirrel_plugin_api::{
    ActionOutput, CancellationToken, CapabilityType, ConfigurationSchemaItem, Plugin,
    PluginAction, PluginError, PluginMetadata, PluginSettings, ServiceProvider, SettingKind,
    export_plugin,
};

const PLUGIN_ID: &str = "squirrel.demo.echo-search";

/// Search provider that echoes queries back; keeps a counter of index rebuilds.
#[derive(Default)]
pub struct EchoSearch {
    settings: Mutex<PluginSettings>,
    rebuilds: AtomicU64,
}

impl EchoSearch {
    fn setting<T: squirrel_plugin_api::helper::FromSetting>(&self, key: &str, default: T) -> T {
        let settings = self
            .settings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        get_value(&settings, key, default)
    }
}

#[async_trait]
impl Plugin for EchoSearch {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            id: PLUGIN_ID.to_string(),
            name: "Echo search".to_string(),
            version: "0.1.0".to_string(),
            description: "A demo search provider that echoes queries".to_string(),
            author: "squirrel-team".to_string(),
            capability: CapabilityType::SearchProvider,
            requires_configuration: true,
            configuration_schema: vec![
                ConfigurationSchemaItem::new("IndexPath", "Index path", SettingKind::Text)
                    .required()
                    .with_help("Directory holding the search index"),
                ConfigurationSchemaItem::new("MaxResults", "Max results", SettingKind::Number)
                    .with_default("20")
                    .with_pattern("^[1-9][0-9]{0,2}$", "Must be between 1 and 999"),
                ConfigurationSchemaItem::new("ApiKey", "API key", SettingKind::Secret),
            ],
            ..Default::default()
        }
    }

    fn set_configuration(&self, settings: &PluginSettings) {
        *self
            .settings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = settings.clone();
    }

    async fn initialize(
        &self,
        services: &ServiceProvider,
        _cancel: &CancellationToken,
    ) -> Result<(), PluginError> {
        let index_path: String = self.setting("IndexPath", String::new());
        if index_path.trim().is_empty() {
            return Err(PluginError::initialization("IndexPath is not set"));
        }
        let max_results: i32 = self.setting("MaxResults", 20);
        services
            .logger(PLUGIN_ID)
            .info(&format!("Serving {index_path} (max {max_results} results)"));
        Ok(())
    }

    async fn shutdown(&self, _cancel: &CancellationToken) -> Result<(), PluginError> {
        Ok(())
    }

    fn actions(&self) -> Vec<PluginAction> {
        vec![
            PluginAction::new(
                "rebuild-index",
                "Rebuild index",
                "Drop and rebuild the search index",
            )
            .confirmed(),
        ]
    }

    async fn execute_action(
        &self,
        action_id: &str,
        services: &ServiceProvider,
        cancel: &CancellationToken,
    ) -> Result<ActionOutput, PluginError> {
        match action_id {
            "rebuild-index" => {
                if cancel.is_cancelled() {
                    return Err(PluginError::Cancelled);
                }
                let rebuilds = self.rebuilds.fetch_add(1, Ordering::SeqCst) + 1;
                services.logger(PLUGIN_ID).info("Index rebuilt");
                Ok(ActionOutput::ok("Index rebuilt")
                    .with_data("index", self.setting("IndexPath", String::new()))
                    .with_data("rebuilds", rebuilds.to_string()))
            }
            other => Err(PluginError::UnknownAction(other.to_string())),
        }
    }
}

export_plugin!(EchoSearch);
