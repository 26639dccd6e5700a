use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::alerts::gate::{self, evaluate, record_sent, should_notify};
use crate::alerts::notifications::{Mailer, build_alert_email};
use crate::config::{Config, expand_path};
use crate::environment::probe::{self, ProbeHost, recorded_du_path};
use crate::error::JobError;
use crate::metrics::directory_size::{DirectorySizer, select_sizer};
use crate::metrics::peak_window::compute_peak;
use crate::metrics::snapshot;
use crate::metrics::source::MetricsSource;
use crate::metrics::top_k::{DailyUserRecord, TopKStore, TopKTracker};
use crate::scheduler::registry::TaskRegistry;
use crate::storage::kv::{CORE, ConfigStore, keys};
use crate::utils::calendar::{local_today, local_yesterday};
use crate::utils::date_format::DateFormatter;
use crate::utils::size::format_bytes;

/// Everything a job persists to.
pub trait StateStore: ConfigStore + TopKStore + TaskRegistry {}

impl<T: ConfigStore + TopKStore + TaskRegistry + ?Sized> StateStore for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    DiskUsage,
    RecentUsers,
    DailyUsers,
    #[value(name = "peak-90-days")]
    #[serde(rename = "peak-90-days")]
    Peak90Days,
    Notify,
    ProbeEnv,
}

impl JobKind {
    /// Run order for `run-all` and `tick`: probe first, notify last.
    pub const ALL: [JobKind; 6] = [
        JobKind::ProbeEnv,
        JobKind::DiskUsage,
        JobKind::RecentUsers,
        JobKind::DailyUsers,
        JobKind::Peak90Days,
        JobKind::Notify,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::DiskUsage => "disk-usage",
            JobKind::RecentUsers => "recent-users",
            JobKind::DailyUsers => "daily-users",
            JobKind::Peak90Days => "peak-90-days",
            JobKind::Notify => "notify",
            JobKind::ProbeEnv => "probe-env",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, JobError> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| JobError::UnknownJob(name.to_string()))
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Collaborators and clock for one invocation.
pub struct JobContext<'a> {
    pub store: &'a dyn StateStore,
    /// `None` when the platform database could not be opened.
    pub source: Option<&'a dyn MetricsSource>,
    pub mailer: &'a dyn Mailer,
    pub host: &'a dyn ProbeHost,
    pub config: &'a Config,
    pub now: DateTime<Utc>,
}

impl<'a> JobContext<'a> {
    fn source(&self, job: &'static str) -> Result<&'a dyn MetricsSource, JobError> {
        self.source.ok_or_else(|| JobError::query(job, anyhow::anyhow!("platform database is not available")))
    }

    fn timezone(&self, job: &'static str) -> Result<chrono_tz::Tz, JobError> {
        self.config.timezone().map_err(|e| JobError::query(job, e))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job: JobKind,
    pub message: String,
}

impl JobOutcome {
    fn new(job: JobKind, message: impl Into<String>) -> Self {
        Self { job, message: message.into() }
    }
}

/// Result of one job as reported to the CLI.
#[derive(Debug)]
pub struct JobResult {
    pub job: String,
    pub outcome: Result<JobOutcome, JobError>,
}

impl JobResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

fn disk_usage(ctx: &JobContext) -> Result<JobOutcome, JobError> {
    const JOB: &str = "disk-usage";
    let env = &ctx.config.environment;

    let du_path = if env.allow_exec {
        recorded_du_path(ctx.store, ctx.host).map_err(|e| JobError::query(JOB, e))?
    } else {
        None
    };
    let low_priority = env.low_priority
        && du_path.is_some()
        && ctx.store.get_bool(keys::PRIORITY_TOOLS_AVAILABLE).map_err(|e| JobError::store(JOB, e))?.unwrap_or(false);
    let sizer = select_sizer(du_path.as_deref(), low_priority, StdDuration::from_secs(env.du_timeout_secs.max(1)));

    let exclude = Some(ctx.config.platform.exclude.as_str()).filter(|e| !e.trim().is_empty());
    let mut filesystem: u64 = 0;
    for root in [&ctx.config.platform.dataroot, &ctx.config.platform.dirroot] {
        if root.trim().is_empty() {
            continue;
        }
        let path = expand_path(root.trim()).map_err(|e| JobError::query(JOB, e))?;
        let bytes = size_root(sizer.as_ref(), &path, exclude).map_err(|e| JobError::query(JOB, e))?;
        debug!(path = %path.display(), bytes, sizer = sizer.name(), "sized directory");
        filesystem = filesystem.saturating_add(bytes);
    }

    let database = ctx.source(JOB)?
        .database_size()
        .map_err(|e| JobError::query(JOB, e))?
        .unwrap_or_else(|| {
            warn!("platform database size unavailable, counting 0");
            0
        });

    let write = || -> anyhow::Result<()> {
        ctx.store.set(keys::DISK_USAGE_BYTES, &filesystem.to_string())?;
        ctx.store.set(keys::DATABASE_SIZE_BYTES, &database.to_string())?;
        ctx.store.set_i64(keys::LAST_DISK_SAMPLE_TIME, ctx.now.timestamp())?;
        Ok(())
    };
    write().map_err(|e| JobError::store(JOB, e))?;

    info!(filesystem, database, sizer = sizer.name(), "disk usage sampled");
    Ok(JobOutcome::new(
        JobKind::DiskUsage,
        format!("files {} + database {} (via {})", format_bytes(filesystem), format_bytes(database), sizer.name()),
    ))
}

fn size_root(sizer: &dyn DirectorySizer, path: &Path, exclude: Option<&str>) -> anyhow::Result<u64> {
    sizer.size(path, exclude)
        .with_context(|| format!("Failed to size {}", path.display()))
}

fn recent_users(ctx: &JobContext) -> Result<JobOutcome, JobError> {
    const JOB: &str = "recent-users";
    let since = (ctx.now - Duration::hours(24)).timestamp();

    let count = ctx.source(JOB)?
        .users_active_since(since)
        .map_err(|e| JobError::query(JOB, e))?;

    ctx.store.set(keys::USERS_LAST_24H, &count.to_string())
        .map_err(|e| JobError::store(JOB, e))?;

    info!(count, "recent users sampled");
    Ok(JobOutcome::new(JobKind::RecentUsers, format!("{} users active in the last 24h", count)))
}

fn daily_users(ctx: &JobContext) -> Result<JobOutcome, JobError> {
    const JOB: &str = "daily-users";
    let tz = ctx.timezone(JOB)?;
    let yesterday = local_yesterday(ctx.now, tz);

    let count = ctx.source(JOB)?
        .logins_on(yesterday)
        .map_err(|e| JobError::query(JOB, e))?;

    let candidate = DailyUserRecord { date: yesterday, count };
    let action = TopKTracker::new()
        .update(ctx.store, candidate)
        .map_err(|e| JobError::store(JOB, e))?;

    ctx.store.set_i64(keys::LAST_DAILY_USERS_TIME, ctx.now.timestamp())
        .map_err(|e| JobError::store(JOB, e))?;

    info!(date = %yesterday, count, ?action, "daily users recorded");
    Ok(JobOutcome::new(JobKind::DailyUsers, format!("{} users on {} ({:?})", count, yesterday, action)))
}

fn peak_90_days(ctx: &JobContext) -> Result<JobOutcome, JobError> {
    const JOB: &str = "peak-90-days";
    let tz = ctx.timezone(JOB)?;
    let today = local_today(ctx.now, tz);
    let window = ctx.config.alerts.peak_window_days.max(1) as i64;

    let records = ctx.source(JOB)?
        .daily_logins(today - Duration::days(window), today)
        .map_err(|e| JobError::query(JOB, e))?;

    match compute_peak(&records, window, today) {
        Some(peak) => {
            let write = || -> anyhow::Result<()> {
                ctx.store.set(keys::PEAK_90D_DATE, &peak.date.format("%Y-%m-%d").to_string())?;
                ctx.store.set(keys::PEAK_90D_USERS, &peak.count.to_string())?;
                Ok(())
            };
            write().map_err(|e| JobError::store(JOB, e))?;

            info!(date = %peak.date, count = peak.count, "peak daily users recomputed");
            Ok(JobOutcome::new(JobKind::Peak90Days, format!("peak {} users on {}", peak.count, peak.date)))
        }
        None => {
            let clear = || -> anyhow::Result<()> {
                ctx.store.unset(keys::PEAK_90D_DATE)?;
                ctx.store.unset(keys::PEAK_90D_USERS)?;
                Ok(())
            };
            clear().map_err(|e| JobError::store(JOB, e))?;

            info!("no logins in the peak window");
            Ok(JobOutcome::new(JobKind::Peak90Days, "not yet calculated"))
        }
    }
}

fn notify(ctx: &JobContext) -> Result<JobOutcome, JobError> {
    const JOB: &str = "notify";
    let tz = ctx.timezone(JOB)?;
    let today = local_today(ctx.now, tz);
    let table = ctx.config.tier_table().map_err(|e| JobError::query(JOB, e))?;

    let snapshot = snapshot::collect(ctx.store, ctx.source(JOB)?, today, ctx.config.alerts.recent_days)
        .map_err(|e| JobError::query(JOB, e))?;
    let evaluation = evaluate(&table, snapshot.disk_percent, snapshot.user_percent);
    let last_sent = gate::last_sent_at(ctx.store).map_err(|e| JobError::query(JOB, e))?;

    debug!(
        disk_percent = snapshot.disk_percent,
        user_percent = snapshot.user_percent,
        level = %evaluation.level,
        cooldown_hours = evaluation.cooldown.num_hours(),
        "evaluated usage"
    );

    if !should_notify(evaluation.level, evaluation.cooldown, last_sent, ctx.now) {
        return Ok(JobOutcome::new(JobKind::Notify, format!("level {}, no notification due", evaluation.level)));
    }

    let recipient = ctx.store.get_string(keys::EMAIL).map_err(|e| JobError::query(JOB, e))?;
    if recipient.is_empty() {
        warn!(level = %evaluation.level, "notification due but no alert email configured");
        return Ok(JobOutcome::new(JobKind::Notify, format!("level {}, no recipient configured", evaluation.level)));
    }

    let formatter = DateFormatter::new(&ctx.config.general.date_format, tz)
        .map_err(|e| JobError::query(JOB, e))?;

    let sent = build_alert_email(&snapshot, &evaluation, &ctx.config.general, &ctx.config.mail, &formatter, &recipient)
        .and_then(|email| ctx.mailer.send(&email));

    // The attempt counts against the cooldown even when delivery failed
    record_sent(ctx.store, ctx.now, evaluation.level).map_err(|e| JobError::store(JOB, e))?;

    match sent {
        Ok(()) => {
            info!(level = %evaluation.level, to = %recipient, "usage notification sent");
            Ok(JobOutcome::new(JobKind::Notify, format!("level {}, notification sent", evaluation.level)))
        }
        Err(e) => {
            warn!(level = %evaluation.level, error = %format!("{e:#}"), "usage notification failed");
            Ok(JobOutcome::new(JobKind::Notify, format!("level {}, notification failed: {e}", evaluation.level)))
        }
    }
}

fn probe_env(ctx: &JobContext) -> Result<JobOutcome, JobError> {
    const JOB: &str = "probe-env";

    let configured = ctx.store.get_in(CORE, keys::PATH_TO_DU).map_err(|e| JobError::query(JOB, e))?;
    let status = probe::probe(ctx.host, ctx.config.environment.allow_exec, configured.as_deref());

    probe::persist(ctx.store, &status, ctx.now).map_err(|e| JobError::store(JOB, e))?;
    let rescheduled = probe::apply_schedule_feedback(ctx.store, &status, &ctx.config.environment)
        .map_err(|e| JobError::store(JOB, e))?;

    info!(exec = status.exec_capable, du = status.du_available, rescheduled, "environment probed");
    Ok(JobOutcome::new(
        JobKind::ProbeEnv,
        format!(
            "exec {}, du {}{}",
            if status.exec_capable { "available" } else { "unavailable" },
            match &status.du_path {
                Some(path) if status.du_available => path.display().to_string(),
                _ => "unavailable".to_string(),
            },
            if rescheduled { ", disk-usage rescheduled" } else { "" },
        ),
    ))
}

fn dispatch(ctx: &JobContext, kind: JobKind) -> Result<JobOutcome, JobError> {
    match kind {
        JobKind::DiskUsage => disk_usage(ctx),
        JobKind::RecentUsers => recent_users(ctx),
        JobKind::DailyUsers => daily_users(ctx),
        JobKind::Peak90Days => peak_90_days(ctx),
        JobKind::Notify => notify(ctx),
        JobKind::ProbeEnv => probe_env(ctx),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one job behind a panic boundary and record `last_run` on success.
pub fn run_job(ctx: &JobContext, kind: JobKind) -> JobResult {
    info!(job = %kind, "job started");

    let outcome = match catch_unwind(AssertUnwindSafe(|| dispatch(ctx, kind))) {
        Ok(outcome) => outcome,
        Err(payload) => Err(JobError::Panicked { job: kind.name(), message: panic_message(payload.as_ref()) }),
    };

    let outcome = match outcome {
        Ok(done) => match ctx.store.mark_run(kind.name(), ctx.now.timestamp()) {
            Ok(()) => Ok(done),
            Err(e) => Err(JobError::store(kind.name(), e)),
        },
        Err(e) => Err(e),
    };

    match &outcome {
        Ok(done) => info!(job = %kind, result = %done.message, "job finished"),
        Err(e) => error!(job = %kind, kind = e.kind(), error = %e, "job failed"),
    }

    JobResult { job: kind.name().to_string(), outcome }
}

pub fn run_all(ctx: &JobContext) -> Vec<JobResult> {
    JobKind::ALL.iter().map(|kind| run_job(ctx, *kind)).collect()
}

/// Run every registered job whose schedule fired since its last run.
pub fn tick(ctx: &JobContext) -> anyhow::Result<Vec<JobResult>> {
    let tz = ctx.config.timezone()?;
    let tasks = ctx.store.list_tasks().context("Failed to list scheduled tasks")?;

    let mut due = Vec::new();
    for task in tasks {
        match task.is_due(ctx.now, tz) {
            Ok(true) => due.push(task.name),
            Ok(false) => debug!(task = %task.name, "not due"),
            Err(e) => warn!(task = %task.name, error = %format!("{e:#}"), "skipping task with invalid schedule"),
        }
    }

    // Keep the run-all ordering among due jobs
    let mut results = Vec::new();
    for kind in JobKind::ALL {
        if let Some(pos) = due.iter().position(|name| name == kind.name()) {
            due.remove(pos);
            results.push(run_job(ctx, kind));
        }
    }
    for unknown in due {
        results.push(JobResult { job: unknown.clone(), outcome: Err(JobError::UnknownJob(unknown)) });
    }

    Ok(results)
}
