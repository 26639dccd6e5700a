use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::alerts::thresholds::percent;
use crate::metrics::peak_window::PeakWindowRecord;
use crate::metrics::source::MetricsSource;
use crate::metrics::top_k::{DailyUserRecord, TopKStore};
use crate::storage::kv::{ConfigStore, keys};
use crate::utils::size::gb_to_bytes;

/// Everything an alert or status report shows, gathered at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub report_date: NaiveDate,
    pub disk_usage_bytes: u64,
    pub disk_quota_bytes: u64,
    pub disk_percent: f64,
    pub database_size_bytes: u64,
    pub user_count: u64,
    pub user_threshold: u64,
    pub user_percent: f64,
    pub users_last_24h: u64,
    pub course_count: u64,
    pub recent_logins: Vec<DailyUserRecord>,
    pub top_records: Vec<DailyUserRecord>,
    pub peak_90d: Option<PeakWindowRecord>,
    pub last_disk_sample_time: i64,
}

/// Peak stored by the last 90-day job, `None` until it has run.
pub fn stored_peak<S: ConfigStore + ?Sized>(store: &S) -> Result<Option<PeakWindowRecord>> {
    let raw_date = store.get_string(keys::PEAK_90D_DATE)?;
    if raw_date.is_empty() {
        return Ok(None);
    }
    let date = match NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => return Ok(None),
    };
    Ok(Some(PeakWindowRecord {
        date,
        count: store.get_u64(keys::PEAK_90D_USERS)?,
    }))
}

/// Disk usage as stored by the disk job: filesystem plus database.
pub fn stored_disk_usage<S: ConfigStore + ?Sized>(store: &S) -> Result<(u64, u64)> {
    let filesystem = store.get_u64(keys::DISK_USAGE_BYTES)?;
    let database = store.get_u64(keys::DATABASE_SIZE_BYTES)?;
    Ok((filesystem.saturating_add(database), database))
}

pub fn collect<S, M>(store: &S, source: &M, today: NaiveDate, recent_days: u32) -> Result<MetricsSnapshot>
where
    S: ConfigStore + TopKStore + ?Sized,
    M: MetricsSource + ?Sized,
{
    let report_date = today - Duration::days(1);

    let (disk_usage_bytes, database_size_bytes) = stored_disk_usage(store)?;
    let disk_quota_bytes = gb_to_bytes(store.get_u64(keys::DISK_QUOTA_GB)?);
    let user_threshold = store.get_u64(keys::MAX_DAILY_USERS)?;

    let user_count = source.logins_on(report_date)
        .context("Failed to read yesterday's logins")?;

    let recent_from = today - Duration::days(recent_days.max(1) as i64);
    let recent_logins = source.daily_logins(recent_from, report_date)
        .context("Failed to read recent daily logins")?;

    let course_count = source.course_count()?;

    Ok(MetricsSnapshot {
        report_date,
        disk_usage_bytes,
        disk_quota_bytes,
        disk_percent: percent(disk_usage_bytes as f64, disk_quota_bytes as f64),
        database_size_bytes,
        user_count,
        user_threshold,
        user_percent: percent(user_count as f64, user_threshold as f64),
        users_last_24h: store.get_u64(keys::USERS_LAST_24H)?,
        course_count,
        recent_logins,
        top_records: store.top_records()?,
        peak_90d: stored_peak(store)?,
        last_disk_sample_time: store.get_i64(keys::LAST_DISK_SAMPLE_TIME)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::source::SqlitePlatformSource;
    use crate::metrics::source::fixtures::*;
    use crate::storage::Database;
    use crate::utils::size::BYTES_PER_GB;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_collect_combines_store_and_source() {
        let db = Database::open_in_memory().unwrap();
        db.set_i64(keys::DISK_QUOTA_GB, 10).unwrap();
        db.set_i64(keys::DISK_USAGE_BYTES, (9 * BYTES_PER_GB) as i64).unwrap();
        db.set_i64(keys::DATABASE_SIZE_BYTES, (BYTES_PER_GB / 2) as i64).unwrap();
        db.set_i64(keys::MAX_DAILY_USERS, 4).unwrap();
        db.set(keys::PEAK_90D_DATE, "2024-05-20").unwrap();
        db.set_i64(keys::PEAK_90D_USERS, 9).unwrap();

        let conn = platform_connection();
        let yesterday = Utc.with_ymd_and_hms(2024, 6, 9, 10, 0, 0).unwrap().timestamp();
        log_event(&conn, 1, "loggedin", yesterday);
        log_event(&conn, 2, "loggedin", yesterday);
        log_event(&conn, 3, "loggedin", yesterday);
        add_course(&conn, 1);
        let source = SqlitePlatformSource::from_connection(conn, PREFIX, chrono_tz::UTC).unwrap();

        let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let snapshot = collect(&db, &source, today, 10).unwrap();

        assert_eq!(snapshot.report_date, NaiveDate::from_ymd_opt(2024, 6, 9).unwrap());
        assert_eq!(snapshot.disk_usage_bytes, 9 * BYTES_PER_GB + BYTES_PER_GB / 2);
        assert!((snapshot.disk_percent - 95.0).abs() < 1e-9);
        assert_eq!(snapshot.user_count, 3);
        assert!((snapshot.user_percent - 75.0).abs() < 1e-9);
        assert_eq!(snapshot.recent_logins.len(), 1);
        assert_eq!(snapshot.course_count, 1);
        assert_eq!(snapshot.peak_90d.unwrap().count, 9);
    }

    #[test]
    fn test_unconfigured_store_yields_zero_percentages() {
        let db = Database::open_in_memory().unwrap();
        let source = SqlitePlatformSource::from_connection(platform_connection(), PREFIX, chrono_tz::UTC).unwrap();

        let snapshot = collect(&db, &source, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(), 10).unwrap();
        assert_eq!(snapshot.disk_percent, 0.0);
        assert_eq!(snapshot.user_percent, 0.0);
        assert!(snapshot.peak_90d.is_none());
        assert!(snapshot.top_records.is_empty());
    }

    #[test]
    fn test_malformed_peak_date_is_none() {
        let db = Database::open_in_memory().unwrap();
        db.set(keys::PEAK_90D_DATE, "yesterday").unwrap();
        assert!(stored_peak(&db).unwrap().is_none());
    }
}
