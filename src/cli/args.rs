use clap::{Parser, Subcommand};

use crate::scheduler::JobKind;

#[derive(Parser)]
#[command(name = "usage-monitor")]
#[command(about = "Disk and daily-user usage monitor for a learning platform")]
#[command(version)]
pub struct Cli {
    /// Custom config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON output format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize fresh configuration
    Init,
    /// Set configuration value
    Set {
        /// Configuration key (e.g., platform.table_prefix)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print one stored setting
    Get {
        name: String,
        /// Settings namespace
        #[arg(long, default_value = "usage_monitor")]
        plugin: String,
    },
    /// Store a setting
    Set {
        name: String,
        value: String,
        #[arg(long, default_value = "usage_monitor")]
        plugin: String,
    },
    /// Remove a setting
    Unset {
        name: String,
        #[arg(long, default_value = "usage_monitor")]
        plugin: String,
    },
    /// List every setting in a namespace
    List {
        #[arg(long, default_value = "usage_monitor")]
        plugin: String,
    },
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single job now
    Run {
        #[arg(value_enum)]
        job: JobKind,
    },

    /// Run every job once, in dependency order
    #[command(name = "run-all")]
    RunAll,

    /// Run every job whose schedule fired since its last run
    Tick,

    /// Show stored metrics, alert state and task schedules
    Status,

    /// Runtime settings kept in the state database
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_job() {
        let cli = Cli::try_parse_from(["usage-monitor", "run", "peak-90-days", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Run { job: JobKind::Peak90Days }));
    }

    #[test]
    fn test_cli_rejects_unknown_job() {
        assert!(Cli::try_parse_from(["usage-monitor", "run", "reindex"]).is_err());
    }

    #[test]
    fn test_settings_default_namespace() {
        let cli = Cli::try_parse_from(["usage-monitor", "settings", "set", "disk_quota", "10"]).unwrap();
        match cli.command {
            Commands::Settings { action: SettingsAction::Set { name, value, plugin } } => {
                assert_eq!(name, "disk_quota");
                assert_eq!(value, "10");
                assert_eq!(plugin, "usage_monitor");
            }
            _ => panic!("expected settings set"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["usage-monitor", "tick", "--config", "/tmp/c.toml", "-v"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("/tmp/c.toml"));
        assert!(cli.verbose);
    }
}
