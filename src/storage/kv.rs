//! Persisted key-value settings.
//!
//! Every value is a string; the typed accessors treat a missing or malformed
//! value as zero/empty so that a fresh install (nothing configured yet) is an
//! ordinary state rather than an error. Only a failing store surfaces as `Err`.

use anyhow::Result;
use std::cell::RefCell;
use std::collections::BTreeMap;
use tracing::debug;

/// Namespace for everything this monitor owns.
pub const PLUGIN: &str = "usage_monitor";
/// Namespace for platform-wide settings shared with the host platform.
pub const CORE: &str = "core";

/// Setting and state key names.
pub mod keys {
    pub const DISK_QUOTA_GB: &str = "disk_quota";
    pub const MAX_DAILY_USERS: &str = "max_daily_users_threshold";
    pub const EMAIL: &str = "email";

    pub const DISK_USAGE_BYTES: &str = "disk_usage_bytes";
    pub const DATABASE_SIZE_BYTES: &str = "database_size_bytes";
    pub const LAST_DISK_SAMPLE_TIME: &str = "last_disk_sample_time";

    pub const USERS_LAST_24H: &str = "users_last_24h";
    pub const LAST_DAILY_USERS_TIME: &str = "last_daily_users_time";

    pub const PEAK_90D_DATE: &str = "peak_90d_date";
    pub const PEAK_90D_USERS: &str = "peak_90d_users";

    pub const LAST_NOTIFICATION_TIME: &str = "last_unified_notification_time";
    pub const LAST_ALERT_LEVEL: &str = "last_alert_level";

    pub const SHELL_EXEC_AVAILABLE: &str = "shell_exec_available";
    pub const DU_COMMAND_AVAILABLE: &str = "du_command_available";
    pub const PRIORITY_TOOLS_AVAILABLE: &str = "priority_tools_available";
    pub const LAST_ENVIRONMENT_CHECK: &str = "last_environment_check";

    /// Lives in the `core` namespace.
    pub const PATH_TO_DU: &str = "pathtodu";
}

pub trait ConfigStore {
    fn get_in(&self, plugin: &str, name: &str) -> Result<Option<String>>;
    fn set_in(&self, plugin: &str, name: &str, value: &str) -> Result<()>;
    fn unset_in(&self, plugin: &str, name: &str) -> Result<bool>;
    fn list_in(&self, plugin: &str) -> Result<Vec<(String, String)>>;

    fn get(&self, name: &str) -> Result<Option<String>> {
        self.get_in(PLUGIN, name)
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.set_in(PLUGIN, name, value)
    }

    fn unset(&self, name: &str) -> Result<bool> {
        self.unset_in(PLUGIN, name)
    }

    /// Trimmed value, empty when unset.
    fn get_string(&self, name: &str) -> Result<String> {
        Ok(self.get(name)?.map(|v| v.trim().to_string()).unwrap_or_default())
    }

    fn get_i64(&self, name: &str) -> Result<i64> {
        Ok(self.get(name)?.map(|v| parse_lenient_i64(name, &v)).unwrap_or(0))
    }

    fn get_u64(&self, name: &str) -> Result<u64> {
        Ok(self.get_i64(name)?.max(0) as u64)
    }

    fn get_f64(&self, name: &str) -> Result<f64> {
        Ok(self.get(name)?.map(|v| match v.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => f,
            _ => 0.0,
        }).unwrap_or(0.0))
    }

    fn get_bool(&self, name: &str) -> Result<Option<bool>> {
        Ok(self.get(name)?.and_then(|v| match v.trim() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" | "" => Some(false),
            _ => None,
        }))
    }

    fn set_i64(&self, name: &str, value: i64) -> Result<()> {
        self.set(name, &value.to_string())
    }

    fn set_bool(&self, name: &str, value: bool) -> Result<()> {
        self.set(name, if value { "1" } else { "0" })
    }
}

fn parse_lenient_i64(name: &str, raw: &str) -> i64 {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return v;
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => v.trunc() as i64,
        _ => {
            debug!(key = name, value = raw, "non-numeric setting treated as 0");
            0
        }
    }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RefCell<BTreeMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn get_in(&self, plugin: &str, name: &str) -> Result<Option<String>> {
        Ok(self.values.borrow().get(&(plugin.to_string(), name.to_string())).cloned())
    }

    fn set_in(&self, plugin: &str, name: &str, value: &str) -> Result<()> {
        self.values
            .borrow_mut()
            .insert((plugin.to_string(), name.to_string()), value.to_string());
        Ok(())
    }

    fn unset_in(&self, plugin: &str, name: &str) -> Result<bool> {
        Ok(self.values.borrow_mut().remove(&(plugin.to_string(), name.to_string())).is_some())
    }

    fn list_in(&self, plugin: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .values
            .borrow()
            .iter()
            .filter(|((p, _), _)| p == plugin)
            .map(|((_, n), v)| (n.clone(), v.clone()))
            .collect())
    }
}
