use std::path::Path;

use anyhow::{Result, bail};
use serde_json::json;
use tabled::{Table, Tabled};

use crate::cli::SettingsAction;
use crate::config::Config;
use crate::storage::Database;
use crate::storage::kv::{ConfigStore, PLUGIN, keys};

#[derive(Tabled)]
struct SettingRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Reject values the jobs would otherwise silently read as 0.
pub fn validate_setting(plugin: &str, name: &str, value: &str) -> Result<()> {
    if plugin != PLUGIN {
        return Ok(());
    }
    match name {
        keys::DISK_QUOTA_GB | keys::MAX_DAILY_USERS => {
            let parsed: f64 = value.trim().parse()
                .map_err(|_| anyhow::anyhow!("{} must be a number, got '{}'", name, value))?;
            if !parsed.is_finite() || parsed < 0.0 {
                bail!("{} must be a non-negative number", name);
            }
        }
        keys::EMAIL => {
            let value = value.trim();
            if !value.is_empty() && !value.contains('@') {
                bail!("'{}' is not an email address", value);
            }
        }
        _ => {}
    }
    Ok(())
}

pub fn apply_settings_action<S: ConfigStore + ?Sized>(store: &S, action: SettingsAction) -> Result<serde_json::Value> {
    match action {
        SettingsAction::Get { name, plugin } => {
            let value = store.get_in(&plugin, &name)?;
            Ok(json!({ "plugin": plugin, "name": name, "value": value }))
        }
        SettingsAction::Set { name, value, plugin } => {
            validate_setting(&plugin, &name, &value)?;
            store.set_in(&plugin, &name, value.trim())?;
            Ok(json!({ "plugin": plugin, "name": name, "value": value.trim() }))
        }
        SettingsAction::Unset { name, plugin } => {
            let removed = store.unset_in(&plugin, &name)?;
            Ok(json!({ "plugin": plugin, "name": name, "removed": removed }))
        }
        SettingsAction::List { plugin } => {
            let entries: serde_json::Map<String, serde_json::Value> = store.list_in(&plugin)?
                .into_iter()
                .map(|(name, value)| (name, serde_json::Value::String(value)))
                .collect();
            Ok(json!({ "plugin": plugin, "settings": entries }))
        }
    }
}

fn render_text(result: &serde_json::Value) -> String {
    if let Some(settings) = result["settings"].as_object() {
        if settings.is_empty() {
            return format!("No settings stored under '{}'.", result["plugin"].as_str().unwrap_or_default());
        }
        let rows: Vec<SettingRow> = settings
            .iter()
            .map(|(name, value)| SettingRow { name: name.clone(), value: value.as_str().unwrap_or_default().to_string() })
            .collect();
        return Table::new(rows).to_string();
    }

    let name = result["name"].as_str().unwrap_or_default();
    if let Some(removed) = result["removed"].as_bool() {
        return if removed { format!("Removed {}", name) } else { format!("{} was not set", name) };
    }
    match result["value"].as_str() {
        Some(value) => format!("{} = {}", name, value),
        None => format!("{} is not set", name),
    }
}

pub fn handle_settings_action(action: SettingsAction, config: &Config, config_path: &Path, json_output: bool) -> Result<()> {
    let database = Database::new(&config.state_db_path(config_path)?)?;
    let result = apply_settings_action(&database, action)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", render_text(&result));
    }
    Ok(())
}
