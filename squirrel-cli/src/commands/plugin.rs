//! Plugin management commands

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use dialoguer::{Confirm, theme::ColorfulTheme};
use std::io::IsTerminal;
use squirrel_core::plugins::{HealthTier, PluginHost, PluginHostConfig, PluginInfo};
use squirrel_plugin_api::{CancellationToken, PluginSettings};

/// Plugin management arguments
#[derive(Args)]
pub struct PluginArgs {
    #[command(subcommand)]
    pub command: PluginCommands,
}

/// Plugin subcommands
#[derive(Subcommand)]
pub enum PluginCommands {
    /// List installed plugins
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show plugin details
    Info {
        /// Plugin id
        id: String,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Initialize plugins and report their health
    Health {
        /// Only this plugin
        id: Option<String>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Enable a plugin
    Enable {
        /// Plugin id to enable
        id: String,
    },
    /// Disable a plugin
    Disable {
        /// Plugin id to disable
        id: String,
    },
    /// Unload and load a plugin again
    Reload {
        /// Plugin id to reload
        id: String,
    },
    /// Validate a plugin's effective settings
    Validate {
        /// Plugin id
        id: String,
    },
    /// Show or change plugin settings
    Settings {
        /// Plugin id
        id: String,
        /// Set a value (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        set: Vec<(String, String)>,
    },
    /// List the actions a plugin offers
    Actions {
        /// Plugin id
        id: String,
    },
    /// Initialize a plugin and run one of its actions
    Run {
        /// Plugin id
        id: String,
        /// Action id
        action: String,
        /// Run actions that ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Run plugin command
pub async fn run(args: PluginArgs, config: PluginHostConfig) -> Result<()> {
    let host = PluginHost::new(config);
    let cancel = CancellationToken::new();

    match args.command {
        PluginCommands::List { json } => list_plugins(&host, &cancel, json).await,
        PluginCommands::Info { id, json } => show_plugin_info(&host, &cancel, &id, json).await,
        PluginCommands::Health { id, json } => show_health(&host, &cancel, id.as_deref(), json).await,
        PluginCommands::Enable { id } => enable_plugin(&host, &id),
        PluginCommands::Disable { id } => disable_plugin(&host, &cancel, &id).await,
        PluginCommands::Reload { id } => reload_plugin(&host, &cancel, &id).await,
        PluginCommands::Validate { id } => validate_plugin(&host, &cancel, &id).await,
        PluginCommands::Settings { id, set } => plugin_settings(&host, &cancel, &id, set).await,
        PluginCommands::Actions { id } => list_actions(&host, &cancel, &id).await,
        PluginCommands::Run { id, action, yes } => {
            run_action(&host, &cancel, &id, &action, yes).await
        }
    }
}

async fn load(host: &PluginHost, cancel: &CancellationToken, id: &str) -> Result<()> {
    host.loader()
        .try_load_one(&host.config().plugin_dir, id, cancel)
        .await
        .with_context(|| format!("loading plugin '{id}'"))?;
    Ok(())
}

async fn list_plugins(host: &PluginHost, cancel: &CancellationToken, json: bool) -> Result<()> {
    host.discover(cancel).await;
    let plugins = host.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plugins)?);
        return Ok(());
    }

    if plugins.is_empty() {
        println!("No plugins installed");
        println!();
        println!("Plugin directory: {}", host.config().plugin_dir.display());
        println!();
        println!("To install a plugin:");
        println!("  1. Create a plugin directory: mkdir -p <plugin dir>/my-plugin");
        println!("  2. Copy the module: cp libmy_plugin.so <plugin dir>/my-plugin/");
        println!("  3. Enable the plugin: squirrel plugin enable my-plugin");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("").fg(Color::Cyan),
        Cell::new("Plugin").fg(Color::Cyan),
        Cell::new("Version").fg(Color::Cyan),
        Cell::new("Capability").fg(Color::Cyan),
        Cell::new("Phase").fg(Color::Cyan),
        Cell::new("Description").fg(Color::Cyan),
    ]);

    for p in plugins {
        let status = if p.enabled { "✓" } else { "○" };
        let name = if p.metadata.is_core_plugin {
            format!("{} [core]", p.id)
        } else {
            p.id.clone()
        };
        let description = if p.metadata.description.is_empty() {
            "No description".to_string()
        } else {
            p.metadata.description.clone()
        };
        table.add_row(vec![
            Cell::new(status),
            Cell::new(name),
            Cell::new(&p.metadata.version),
            Cell::new(p.metadata.capability.to_string()),
            Cell::new(p.phase.to_string()),
            Cell::new(description),
        ]);
    }

    println!("{table}");
    Ok(())
}

fn print_info(info: &PluginInfo) {
    let m = &info.metadata;
    println!("Id:          {}", info.id);
    println!("Name:        {}", m.name);
    println!("Version:     {}", m.version);
    println!("API Version: {}", m.api_version);
    println!("Capability:  {}", m.capability);
    println!("Type:        {}", info.type_name);
    println!(
        "Author:      {}",
        if m.author.is_empty() { "Unknown" } else { &m.author }
    );
    println!(
        "Description: {}",
        if m.description.is_empty() { "No description" } else { &m.description }
    );
    println!("Module:      {}", info.path.display());
    println!("Loaded at:   {}", info.loaded_at.to_rfc3339());
    println!("Core:        {}", if m.is_core_plugin { "yes" } else { "no" });
    println!("Enabled:     {}", if info.enabled { "yes" } else { "no" });

    if !m.configuration_schema.is_empty() {
        println!();
        println!("Settings:");
        for item in &m.configuration_schema {
            let required = if item.required { " (required)" } else { "" };
            println!("  {}{}    {}", item.key, required, item.display_name);
        }
    }
}

async fn show_plugin_info(
    host: &PluginHost,
    cancel: &CancellationToken,
    id: &str,
    json: bool,
) -> Result<()> {
    load(host, cancel, id).await?;
    let info = host.info(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_info(&info);
    }
    Ok(())
}

async fn show_health(
    host: &PluginHost,
    cancel: &CancellationToken,
    id: Option<&str>,
    json: bool,
) -> Result<()> {
    let statuses = match id {
        Some(id) => {
            load(host, cancel, id).await?;
            host.initialize(id, cancel).await?;
            vec![host.health(id)]
        }
        None => {
            host.load_enabled(cancel).await?;
            host.initialize_all(cancel).await;
            host.health_all()
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        for status in &statuses {
            let marker = match status.health {
                HealthTier::Healthy => "✓",
                HealthTier::Degraded => "!",
                HealthTier::Unhealthy => "✗",
                HealthTier::Unknown => "?",
            };
            println!(
                "{} {} {}    {}",
                marker, status.plugin_id, status.health, status.message
            );
        }
    }

    for status in &statuses {
        host.shutdown(&status.plugin_id, cancel).await?;
    }
    Ok(())
}

fn enable_plugin(host: &PluginHost, id: &str) -> Result<()> {
    host.enable(id)?;
    println!("Enabled plugin: {}", id);
    println!("Run 'squirrel plugin health {}' to verify it initializes.", id);
    Ok(())
}

async fn disable_plugin(host: &PluginHost, cancel: &CancellationToken, id: &str) -> Result<()> {
    // Core status is only known once the module is loaded
    if let Err(e) = load(host, cancel, id).await {
        tracing::debug!(plugin = %id, error = %e, "Disabling without loading");
    }
    host.disable(id)?;
    println!("Disabled plugin: {}", id);
    Ok(())
}

async fn reload_plugin(host: &PluginHost, cancel: &CancellationToken, id: &str) -> Result<()> {
    load(host, cancel, id).await?;
    let before = host.info(id)?.loaded_at;

    host.reload(id, cancel).await?;
    let after = host.info(id)?;
    println!("Plugin '{}' reloaded", id);
    println!("Loaded at: {} (was {})", after.loaded_at.to_rfc3339(), before.to_rfc3339());
    Ok(())
}

async fn validate_plugin(host: &PluginHost, cancel: &CancellationToken, id: &str) -> Result<()> {
    load(host, cancel, id).await?;
    let result = host.validate(id)?;

    for (key, messages) in &result.warnings {
        for message in messages {
            println!("warning: {}: {}", key, message);
        }
    }
    for (key, messages) in &result.errors {
        for message in messages {
            println!("error: {}: {}", key, message);
        }
    }

    if !result.is_valid() {
        bail!("{} has {} invalid setting(s)", id, result.error_count());
    }
    println!("Settings for '{}' are valid", id);
    Ok(())
}

async fn plugin_settings(
    host: &PluginHost,
    cancel: &CancellationToken,
    id: &str,
    set: Vec<(String, String)>,
) -> Result<()> {
    load(host, cancel, id).await?;

    if !set.is_empty() {
        let mut settings: PluginSettings = host.stored_settings(id)?;
        for (key, value) in set {
            if host.overrides().is_locked(id, &key) {
                println!("note: {} is pinned by the environment; stored value is ignored", key);
            }
            settings.insert(key, value);
        }
        let result = host.save_settings(id, &settings)?;
        for (key, messages) in &result.warnings {
            for message in messages {
                println!("warning: {}: {}", key, message);
            }
        }
        println!("Saved settings for '{}'", id);
        println!();
    }

    let view = host.display_settings(id)?;
    for (key, value) in view.settings.iter() {
        let locked = if view.locked_keys.iter().any(|k| k.eq_ignore_ascii_case(key)) {
            " (env)"
        } else {
            ""
        };
        println!("{} = {}{}", key, value, locked);
    }
    for key in &view.missing_required {
        println!("{} is required but not set", key);
    }
    Ok(())
}

async fn list_actions(host: &PluginHost, cancel: &CancellationToken, id: &str) -> Result<()> {
    load(host, cancel, id).await?;
    let actions = host.actions(id)?;

    if actions.is_empty() {
        println!("Plugin '{}' has no actions", id);
        return Ok(());
    }
    for action in actions {
        let confirm = if action.requires_confirmation { " [confirm]" } else { "" };
        println!("{} - {}{}    {}", action.id, action.name, confirm, action.description);
    }
    Ok(())
}

fn confirm(action_name: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        bail!("action '{}' asks for confirmation; pass --yes to run it", action_name);
    }
    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Run '{action_name}'?"))
        .default(false)
        .interact()?)
}

async fn run_action(
    host: &PluginHost,
    cancel: &CancellationToken,
    id: &str,
    action_id: &str,
    yes: bool,
) -> Result<()> {
    load(host, cancel, id).await?;

    let action = host
        .actions(id)?
        .into_iter()
        .find(|action| action.id == action_id)
        .ok_or_else(|| anyhow!("plugin '{}' has no action '{}'", id, action_id))?;
    if action.requires_confirmation && !yes && !confirm(&action.name)? {
        println!("Cancelled");
        return Ok(());
    }

    let init = host.initialize(id, cancel).await?;
    if !init.success {
        bail!(
            "plugin '{}' failed to initialize: {}",
            id,
            init.error_message.unwrap_or_default()
        );
    }

    let outcome = host.execute_action(id, action_id, cancel).await;
    host.shutdown(id, cancel).await?;
    let output = outcome?;

    println!("{}", output.message);
    for (key, value) in &output.data {
        println!("  {}: {}", key, value);
    }
    if !output.success {
        bail!("action '{}' reported failure", action_id);
    }
    Ok(())
}
