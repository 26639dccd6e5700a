use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, warn};

use crate::alerts::notifications::{Mailer, mailer_from_config};
use crate::config::{Config, expand_path};
use crate::environment::SystemHost;
use crate::metrics::source::{MetricsSource, SqlitePlatformSource};
use crate::output::{JobReportRow, OutputFormat};
use crate::scheduler::{JobContext, JobKind, JobResult, run_all, run_job, tick};
use crate::storage::Database;

#[derive(Debug, Clone, Copy)]
pub enum RunMode {
    One(JobKind),
    All,
    Tick,
}

/// Long-lived collaborators for one CLI invocation.
pub struct Runtime {
    pub database: Database,
    pub source: Option<SqlitePlatformSource>,
    pub mailer: Box<dyn Mailer>,
    pub host: SystemHost,
}

impl Runtime {
    pub fn open(config: &Config, config_path: &Path) -> Result<Self> {
        let db_path = config.state_db_path(config_path)?;
        debug!(path = %db_path.display(), "opening state database");
        let database = Database::new(&db_path)?;

        let source = match open_source(config) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "platform database unavailable, dependent jobs will fail");
                None
            }
        };

        let mailer = mailer_from_config(&config.mail).context("Failed to configure mail delivery")?;

        Ok(Self { database, source, mailer, host: SystemHost })
    }

    pub fn context<'a>(&'a self, config: &'a Config) -> JobContext<'a> {
        JobContext {
            store: &self.database,
            source: self.source.as_ref().map(|s| s as &dyn MetricsSource),
            mailer: self.mailer.as_ref(),
            host: &self.host,
            config,
            now: Utc::now(),
        }
    }
}

fn open_source(config: &Config) -> Result<SqlitePlatformSource> {
    let raw = config.platform.db_path.trim();
    if raw.is_empty() {
        anyhow::bail!("platform.db_path is not configured");
    }
    let path = expand_path(raw)?;
    SqlitePlatformSource::open(&path, &config.platform.table_prefix, config.timezone()?)
}

/// Runs the requested jobs and prints one row per job. Returns whether every
/// job succeeded.
pub fn handle_run_command(mode: RunMode, config: &Config, config_path: &Path, json_output: bool) -> Result<bool> {
    let runtime = Runtime::open(config, config_path)?;
    let ctx = runtime.context(config);

    let results: Vec<JobResult> = match mode {
        RunMode::One(kind) => vec![run_job(&ctx, kind)],
        RunMode::All => run_all(&ctx),
        RunMode::Tick => tick(&ctx)?,
    };

    let rows: Vec<JobReportRow> = results.iter().map(JobReportRow::from_result).collect();
    if json_output {
        println!("{}", rows.to_json()?);
    } else {
        println!("{}", rows.to_table());
    }

    Ok(results.iter().all(JobResult::is_ok))
}
