use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::alerts::gate;
use crate::alerts::thresholds::percent;
use crate::config::Config;
use crate::metrics::snapshot::{stored_disk_usage, stored_peak};
use crate::metrics::top_k::TopKStore;
use crate::output::{MetricRow, OutputFormat, StatusReport, TaskRow, TopDayRow, format_number};
use crate::scheduler::{StateStore, TaskRegistry};
use crate::storage::Database;
use crate::storage::kv::{ConfigStore, keys};
use crate::utils::date_format::DateFormatter;
use crate::utils::size::{format_bytes, format_percent, gb_to_bytes};

fn yes_no(flag: bool) -> String {
    let text = if flag { "yes" } else { "no" };
    text.to_string()
}

fn metric(name: &str, value: String, level: &str) -> MetricRow {
    MetricRow { metric: name.to_string(), value, level: level.to_string() }
}

/// Assemble the status report from stored state only; the platform database
/// is not consulted.
pub fn build_status<S: StateStore + ?Sized>(store: &S, config: &Config, now: DateTime<Utc>) -> Result<StatusReport> {
    let tz = config.timezone()?;
    let formatter = DateFormatter::new(&config.general.date_format, tz)?;
    let table = config.tier_table()?;

    let (disk_usage, database_size) = stored_disk_usage(store)?;
    let quota = gb_to_bytes(store.get_u64(keys::DISK_QUOTA_GB)?);
    let disk_percent = percent(disk_usage as f64, quota as f64);
    let (disk_level, _) = table.classify(disk_percent);

    let threshold = store.get_u64(keys::MAX_DAILY_USERS)?;
    let top = store.top_records()?;

    let mut metrics = vec![
        metric("Disk usage", format!("{} of {} ({})", format_bytes(disk_usage), format_bytes(quota), format_percent(disk_percent)), disk_level.as_str()),
        metric("Database size", format_bytes(database_size), ""),
        metric("Disk sampled", formatter.format_timestamp(store.get_i64(keys::LAST_DISK_SAMPLE_TIME)?), ""),
        metric("Daily user threshold", format_number(threshold), ""),
        metric("Users last 24h", format_number(store.get_u64(keys::USERS_LAST_24H)?), ""),
    ];

    let latest = top.iter().max_by_key(|r| r.date);
    match latest {
        Some(record) => {
            let (level, _) = table.classify(percent(record.count as f64, threshold as f64));
            metrics.push(metric(
                "Latest recorded day",
                format!("{} users on {}", format_number(record.count), formatter.format_date(&record.date)),
                level.as_str(),
            ));
        }
        None => metrics.push(metric("Latest recorded day", "none".to_string(), "")),
    }

    let peak = match stored_peak(store)? {
        Some(peak) => format!("{} users on {}", format_number(peak.count), formatter.format_date(&peak.date)),
        None => "not yet calculated".to_string(),
    };
    metrics.push(metric("Peak (90 days)", peak, ""));

    let last_sent = gate::last_sent_at(store)?;
    metrics.push(metric(
        "Last notification",
        last_sent.map(|at| formatter.format_timestamp(at.timestamp())).unwrap_or_else(|| "never".to_string()),
        gate::last_level(store)?.map(|l| l.as_str()).unwrap_or(""),
    ));

    let recipient = store.get_string(keys::EMAIL)?;
    metrics.push(metric("Alert email", if recipient.is_empty() { "not configured".to_string() } else { recipient }, ""));
    metrics.push(metric("Command execution", yes_no(store.get_bool(keys::SHELL_EXEC_AVAILABLE)?.unwrap_or(false)), ""));
    metrics.push(metric("Native du", yes_no(store.get_bool(keys::DU_COMMAND_AVAILABLE)?.unwrap_or(false)), ""));
    metrics.push(metric("nice/ionice", yes_no(store.get_bool(keys::PRIORITY_TOOLS_AVAILABLE)?.unwrap_or(false)), ""));

    let top_days = top
        .iter()
        .enumerate()
        .map(|(i, r)| TopDayRow { rank: i + 1, date: formatter.format_date(&r.date), users: format_number(r.count) })
        .collect();

    let mut tasks = Vec::new();
    for task in store.list_tasks()? {
        let due = match task.is_due(now, tz) {
            Ok(due) => yes_no(due),
            Err(_) => "invalid schedule".to_string(),
        };
        tasks.push(TaskRow {
            task: task.name.clone(),
            schedule: task.schedule.to_string(),
            enabled: yes_no(!task.disabled),
            last_run: formatter.format_timestamp(task.last_run.unwrap_or(0)),
            due,
        });
    }

    Ok(StatusReport {
        site_name: config.general.site_name.clone(),
        timezone: config.general.timezone.clone(),
        metrics,
        top_days,
        tasks,
    })
}

pub fn handle_status_command(config: &Config, config_path: &Path, json_output: bool) -> Result<()> {
    let database = Database::new(&config.state_db_path(config_path)?)?;
    let report = build_status(&database, config, Utc::now())?;

    if json_output {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.to_table());
    }
    Ok(())
}
