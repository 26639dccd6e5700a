// usage-monitor: disk and daily-user usage monitor
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use usage_monitor::cli::{Cli, Commands};
use usage_monitor::commands::{
    RunMode, handle_config_action, handle_run_command, handle_settings_action, handle_status_command,
};
use usage_monitor::config::{Config, expand_path};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "usage_monitor=debug" } else { "usage_monitor=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so --json output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config_path(cli: &Cli) -> anyhow::Result<PathBuf> {
    match &cli.config {
        Some(path) => expand_path(path),
        None => Config::default_path(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = resolve_config_path(&cli)?;

    // Config commands manage the file themselves
    if let Commands::Config { action } = cli.command {
        handle_config_action(action, &config_path, cli.json);
        return Ok(());
    }

    // Load configuration
    let config = match Config::load_from(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: Failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    let mode = match cli.command {
        Commands::Run { job } => RunMode::One(job),
        Commands::RunAll => RunMode::All,
        Commands::Tick => RunMode::Tick,
        Commands::Status => return handle_status_command(&config, &config_path, cli.json),
        Commands::Settings { action } => return handle_settings_action(action, &config, &config_path, cli.json),
        Commands::Config { .. } => return Ok(()),
    };

    let all_ok = handle_run_command(mode, &config, &config_path, cli.json)?;
    if !all_ok {
        std::process::exit(1);
    }
    Ok(())
}
