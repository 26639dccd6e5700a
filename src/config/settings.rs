use serde::{Deserialize, Serialize};
use anyhow::{Result, Context};
use std::path::{Path, PathBuf};
use std::fs;

use crate::alerts::thresholds::{AlertLevel, AlertTier, TierTable, DEFAULT_NORMAL_COOLDOWN_HOURS, default_tiers};
use crate::metrics::peak_window::PEAK_WINDOW_DAYS;
use crate::utils::calendar::parse_timezone;
use crate::utils::date_format::DateFormat;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub storage: StorageConfig,
    pub platform: PlatformConfig,
    pub environment: EnvironmentConfig,
    pub alerts: AlertsConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub site_name: String,
    pub site_url: String,
    pub timezone: String, // e.g., "UTC", "America/Bogota"
    pub date_format: String, // "yyyy-mm-dd", "dd/mm/yyyy", "mm/dd/yyyy"
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Monitor state database; empty means next to the config file
    pub state_db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub db_path: String,
    pub table_prefix: String,
    pub dataroot: String,
    pub dirroot: String,
    pub exclude: String, // glob matched against file names, empty for none
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub allow_exec: bool,
    pub du_timeout_secs: u64,
    pub low_priority: bool, // wrap du in nice/ionice
    pub fast_hour: String,
    pub slow_hour: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub tiers: Vec<AlertTier>,
    pub normal_cooldown_hours: u64,
    pub recent_days: u32,
    pub peak_window_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub smtp_tls: String, // "starttls", "tls", "none"
    pub from_address: String,
    pub from_name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            site_name: "Learning Platform".to_string(),
            site_url: "http://localhost".to_string(),
            timezone: "UTC".to_string(),
            date_format: "dd/mm/yyyy".to_string(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            db_path: "/var/lib/platform/platform.db".to_string(),
            table_prefix: "mdl_".to_string(),
            dataroot: "/var/lib/platform/data".to_string(),
            dirroot: "/var/www/platform".to_string(),
            exclude: String::new(),
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            allow_exec: true,
            du_timeout_secs: 300,
            low_priority: cfg!(target_os = "linux"),
            fast_hour: "*/6".to_string(),
            slow_hour: "12".to_string(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            normal_cooldown_hours: DEFAULT_NORMAL_COOLDOWN_HOURS,
            recent_days: 10,
            peak_window_days: PEAK_WINDOW_DAYS as u32,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_user: String::new(),
            smtp_pass: String::new(),
            smtp_tls: "starttls".to_string(),
            from_address: "noreply@localhost".to_string(),
            from_name: "Usage Monitor".to_string(),
        }
    }
}

/// Expand a leading `~/` against the home directory.
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = dirs::home_dir().context("Failed to determine home directory")?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(raw))
}

fn parse_tiers(value: &str) -> Result<Vec<AlertTier>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let fields: Vec<&str> = part.split(':').map(str::trim).collect();
            if fields.len() != 3 {
                anyhow::bail!("Invalid tier '{}'. Expected percent:level:cooldown_hours", part);
            }
            let min_percent: f64 = fields[0].parse()
                .with_context(|| format!("Invalid tier percent: {}", fields[0]))?;
            let level: AlertLevel = fields[1].parse()?;
            let cooldown_hours: u64 = fields[2].parse()
                .with_context(|| format!("Invalid tier cooldown: {}", fields[2]))?;
            Ok(AlertTier { min_percent, level, cooldown_hours })
        })
        .collect()
}

fn validate_hour_field(field: &str) -> Result<()> {
    crate::scheduler::registry::CronField::parse(field, 0, 23)
        .map(|_| ())
        .with_context(|| format!("Invalid hour field: {}", field))
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::default_path()?;
        Self::load_from(&config_path)
    }

    /// Reads `path`, writing the defaults there first if it does not exist.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let contents = self.to_commented_toml()?;

        fs::write(config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        parse_timezone(&self.general.timezone)?;
        DateFormat::from_config_str(&self.general.date_format)?;
        self.tier_table()?;
        validate_hour_field(&self.environment.fast_hour)?;
        validate_hour_field(&self.environment.slow_hour)?;
        if !["starttls", "tls", "none"].contains(&self.mail.smtp_tls.as_str()) {
            anyhow::bail!("Invalid smtp_tls: {}. Must be 'starttls', 'tls', or 'none'", self.mail.smtp_tls);
        }
        Ok(())
    }

    pub fn tier_table(&self) -> Result<TierTable> {
        TierTable::new(self.alerts.tiers.clone(), self.alerts.normal_cooldown_hours)
    }

    pub fn timezone(&self) -> Result<chrono_tz::Tz> {
        parse_timezone(&self.general.timezone)
    }

    /// State database location, defaulting to `state.db` beside `config_path`.
    pub fn state_db_path(&self, config_path: &Path) -> Result<PathBuf> {
        if self.storage.state_db_path.trim().is_empty() {
            let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
            return Ok(dir.join("state.db"));
        }
        expand_path(self.storage.state_db_path.trim())
    }

    /// Generate TOML configuration with comments explaining every option
    pub fn to_commented_toml(&self) -> Result<String> {
        let mut output = String::new();

        output.push_str("# usage-monitor Configuration File\n");
        output.push_str("#\n");
        output.push_str("# Deployment settings for the platform usage monitor.\n");
        output.push_str("# Runtime settings (disk quota, daily user threshold, alert email) live in\n");
        output.push_str("# the state database; manage them with `usage-monitor settings`.\n");
        output.push_str("\n");

        output.push_str("# =============================================================================\n");
        output.push_str("# GENERAL SETTINGS\n");
        output.push_str("# =============================================================================\n");
        output.push_str("\n");
        output.push_str("[general]\n");
        output.push_str("# Site name and URL shown in alert emails\n");
        output.push_str(&format!("site_name = {}\n", toml_string(&self.general.site_name)));
        output.push_str(&format!("site_url = {}\n", toml_string(&self.general.site_url)));
        output.push_str("\n");
        output.push_str("# Timezone that defines calendar days and task schedules\n");
        output.push_str("# Examples: \"UTC\", \"America/Bogota\", \"Europe/Madrid\"\n");
        output.push_str(&format!("timezone = {}\n", toml_string(&self.general.timezone)));
        output.push_str("\n");
        output.push_str("# Date style for reports: \"yyyy-mm-dd\", \"dd/mm/yyyy\" or \"mm/dd/yyyy\"\n");
        output.push_str(&format!("date_format = {}\n", toml_string(&self.general.date_format)));
        output.push_str("\n");

        output.push_str("# =============================================================================\n");
        output.push_str("# STORAGE SETTINGS\n");
        output.push_str("# =============================================================================\n");
        output.push_str("\n");
        output.push_str("[storage]\n");
        output.push_str("# Monitor state database (settings, top daily users, task schedules)\n");
        output.push_str("# Empty: state.db next to this file\n");
        output.push_str(&format!("state_db_path = {}\n", toml_string(&self.storage.state_db_path)));
        output.push_str("\n");

        output.push_str("# =============================================================================\n");
        output.push_str("# PLATFORM SETTINGS\n");
        output.push_str("# =============================================================================\n");
        output.push_str("\n");
        output.push_str("[platform]\n");
        output.push_str("# Platform database, opened read-only\n");
        output.push_str(&format!("db_path = {}\n", toml_string(&self.platform.db_path)));
        output.push_str("\n");
        output.push_str("# Prefix of the platform tables (e.g. mdl_logstore_standard_log)\n");
        output.push_str(&format!("table_prefix = {}\n", toml_string(&self.platform.table_prefix)));
        output.push_str("\n");
        output.push_str("# Directories counted towards disk usage\n");
        output.push_str(&format!("dataroot = {}\n", toml_string(&self.platform.dataroot)));
        output.push_str(&format!("dirroot = {}\n", toml_string(&self.platform.dirroot)));
        output.push_str("\n");
        output.push_str("# Glob of file names left out of the disk usage total, empty for none\n");
        output.push_str(&format!("exclude = {}\n", toml_string(&self.platform.exclude)));
        output.push_str("\n");

        output.push_str("# =============================================================================\n");
        output.push_str("# ENVIRONMENT SETTINGS\n");
        output.push_str("# =============================================================================\n");
        output.push_str("\n");
        output.push_str("[environment]\n");
        output.push_str("# Allow running external commands (du, which, nice, ionice)\n");
        output.push_str("# false - always size directories with the built-in walk\n");
        output.push_str(&format!("allow_exec = {}\n", self.environment.allow_exec));
        output.push_str("\n");
        output.push_str("# Seconds before a running du is killed and the walk takes over\n");
        output.push_str(&format!("du_timeout_secs = {}\n", self.environment.du_timeout_secs));
        output.push_str("\n");
        output.push_str("# Run du through `nice -n 19 ionice -c3` (Linux)\n");
        output.push_str(&format!("low_priority = {}\n", self.environment.low_priority));
        output.push_str("\n");
        output.push_str("# Hour field of the disk-usage schedule when du is usable / not usable\n");
        output.push_str(&format!("fast_hour = {}\n", toml_string(&self.environment.fast_hour)));
        output.push_str(&format!("slow_hour = {}\n", toml_string(&self.environment.slow_hour)));
        output.push_str("\n");

        output.push_str("# =============================================================================\n");
        output.push_str("# ALERT SETTINGS\n");
        output.push_str("# =============================================================================\n");
        output.push_str("\n");
        output.push_str("[alerts]\n");
        output.push_str("# Cooldown in hours while usage is below every tier\n");
        output.push_str(&format!("normal_cooldown_hours = {}\n", self.alerts.normal_cooldown_hours));
        output.push_str("\n");
        output.push_str("# Days of daily logins listed in alert emails\n");
        output.push_str(&format!("recent_days = {}\n", self.alerts.recent_days));
        output.push_str("\n");
        output.push_str("# Trailing window for the peak daily users figure\n");
        output.push_str(&format!("peak_window_days = {}\n", self.alerts.peak_window_days));
        output.push_str("\n");
        output.push_str("# Tiers: usage percent at or above min_percent maps to level; a\n");
        output.push_str("# notification repeats at most once per cooldown_hours.\n");
        output.push_str("# Levels: \"medium\", \"high\", \"critical\"\n");
        for tier in &self.alerts.tiers {
            output.push_str("[[alerts.tiers]]\n");
            output.push_str(&format!("min_percent = {:?}\n", tier.min_percent));
            output.push_str(&format!("level = \"{}\"\n", tier.level.as_str()));
            output.push_str(&format!("cooldown_hours = {}\n", tier.cooldown_hours));
            output.push_str("\n");
        }

        output.push_str("# =============================================================================\n");
        output.push_str("# MAIL SETTINGS\n");
        output.push_str("# =============================================================================\n");
        output.push_str("\n");
        output.push_str("[mail]\n");
        output.push_str("# SMTP relay; leave smtp_host empty to only log notifications\n");
        output.push_str(&format!("smtp_host = {}\n", toml_string(&self.mail.smtp_host)));
        output.push_str(&format!("smtp_port = {}\n", self.mail.smtp_port));
        output.push_str(&format!("smtp_user = {}\n", toml_string(&self.mail.smtp_user)));
        output.push_str(&format!("smtp_pass = {}\n", toml_string(&self.mail.smtp_pass)));
        output.push_str("\n");
        output.push_str("# Transport security: \"starttls\" (587), \"tls\" (465) or \"none\"\n");
        output.push_str(&format!("smtp_tls = {}\n", toml_string(&self.mail.smtp_tls)));
        output.push_str("\n");
        output.push_str("# Sender shown on alert emails\n");
        output.push_str(&format!("from_address = {}\n", toml_string(&self.mail.from_address)));
        output.push_str(&format!("from_name = {}\n", toml_string(&self.mail.from_name)));
        output.push_str("\n");

        output.push_str("# =============================================================================\n");
        output.push_str("# USAGE NOTES\n");
        output.push_str("# =============================================================================\n");
        output.push_str("#\n");
        output.push_str("# To reset to defaults: usage-monitor config init\n");
        output.push_str("# To modify values:     usage-monitor config set platform.table_prefix mdl_\n");
        output.push_str("# To view current:      usage-monitor config show\n");

        Ok(output)
    }

    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .context("Failed to determine home directory")?;
        Ok(home.join(".config").join("usage-monitor").join("config.toml"))
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "general.site_name" => self.general.site_name = value.to_string(),
            "general.site_url" => self.general.site_url = value.to_string(),
            "general.timezone" => {
                parse_timezone(value)?;
                self.general.timezone = value.trim().to_string();
            }
            "general.date_format" => {
                DateFormat::from_config_str(value)?;
                self.general.date_format = value.trim().to_lowercase();
            }
            "storage.state_db_path" => self.storage.state_db_path = value.to_string(),
            "platform.db_path" => self.platform.db_path = value.to_string(),
            "platform.table_prefix" => self.platform.table_prefix = value.to_string(),
            "platform.dataroot" => self.platform.dataroot = value.to_string(),
            "platform.dirroot" => self.platform.dirroot = value.to_string(),
            "platform.exclude" => self.platform.exclude = value.to_string(),
            "environment.allow_exec" => {
                self.environment.allow_exec = value.parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }
            "environment.du_timeout_secs" => {
                let secs: u64 = value.parse()
                    .with_context(|| format!("Invalid timeout value: {}", value))?;
                if secs == 0 {
                    anyhow::bail!("du timeout must be at least 1 second");
                }
                self.environment.du_timeout_secs = secs;
            }
            "environment.low_priority" => {
                self.environment.low_priority = value.parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }
            "environment.fast_hour" => {
                validate_hour_field(value)?;
                self.environment.fast_hour = value.to_string();
            }
            "environment.slow_hour" => {
                validate_hour_field(value)?;
                self.environment.slow_hour = value.to_string();
            }
            "alerts.tiers" => {
                let tiers = parse_tiers(value)?;
                TierTable::new(tiers.clone(), self.alerts.normal_cooldown_hours)?;
                self.alerts.tiers = tiers;
            }
            "alerts.normal_cooldown_hours" => {
                let hours: u64 = value.parse()
                    .with_context(|| format!("Invalid cooldown value: {}", value))?;
                TierTable::new(self.alerts.tiers.clone(), hours)?;
                self.alerts.normal_cooldown_hours = hours;
            }
            "alerts.recent_days" => {
                let days: u32 = value.parse()
                    .with_context(|| format!("Invalid day count: {}", value))?;
                if days == 0 || days > 90 {
                    anyhow::bail!("recent_days must be between 1 and 90");
                }
                self.alerts.recent_days = days;
            }
            "alerts.peak_window_days" => {
                let days: u32 = value.parse()
                    .with_context(|| format!("Invalid day count: {}", value))?;
                if days == 0 {
                    anyhow::bail!("peak_window_days must be at least 1");
                }
                self.alerts.peak_window_days = days;
            }
            "mail.smtp_host" => self.mail.smtp_host = value.to_string(),
            "mail.smtp_port" => {
                self.mail.smtp_port = value.parse()
                    .with_context(|| format!("Invalid port value: {}", value))?;
            }
            "mail.smtp_user" => self.mail.smtp_user = value.to_string(),
            "mail.smtp_pass" => self.mail.smtp_pass = value.to_string(),
            "mail.smtp_tls" => {
                if !["starttls", "tls", "none"].contains(&value) {
                    anyhow::bail!("Invalid smtp_tls: {}. Must be 'starttls', 'tls', or 'none'", value);
                }
                self.mail.smtp_tls = value.to_string();
            }
            "mail.from_address" => self.mail.from_address = value.to_string(),
            "mail.from_name" => self.mail.from_name = value.to_string(),
            _ => anyhow::bail!("Unknown configuration key: {}", key),
        }
        Ok(())
    }
}

/// Quote a value as a TOML basic string.
fn toml_string(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}
