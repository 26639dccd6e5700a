use std::path::Path;
use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use chrono_tz::Tz;
use regex::Regex;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::debug;

use crate::metrics::top_k::DailyUserRecord;
use crate::utils::calendar::{day_bounds, days_descending};

/// Read-only queries against the monitored platform.
///
/// Days are calendar days in the site timezone. A day without logins is
/// simply absent from `daily_logins` and counts as 0 in `logins_on`.
pub trait MetricsSource {
    /// Distinct users that logged in during `day`.
    fn logins_on(&self, day: NaiveDate) -> Result<u64>;
    /// Per-day distinct logins for `from..=to`, newest first, zero days omitted.
    fn daily_logins(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyUserRecord>>;
    /// Size of the platform database, `None` when it cannot be determined.
    fn database_size(&self) -> Result<Option<u64>>;
    /// Distinct users whose last access is at or after `since` (unix seconds).
    fn users_active_since(&self, since: i64) -> Result<u64>;
    fn course_count(&self) -> Result<u64>;
}

/// Platform database in the standard `logstore_standard_log` / `user` /
/// `course` layout, opened read-only.
pub struct SqlitePlatformSource {
    connection: Connection,
    prefix: String,
    timezone: Tz,
}

impl std::fmt::Debug for SqlitePlatformSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePlatformSource")
            .field("prefix", &self.prefix)
            .field("timezone", &self.timezone)
            .finish()
    }
}

fn validate_prefix(prefix: &str) -> Result<()> {
    let re = Regex::new(r"^[A-Za-z0-9_]*$").context("Failed to compile prefix pattern")?;
    if !re.is_match(prefix) {
        bail!("Invalid table prefix '{}': only letters, digits and '_' are allowed", prefix);
    }
    Ok(())
}

impl SqlitePlatformSource {
    pub fn open(path: &Path, prefix: &str, timezone: Tz) -> Result<Self> {
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        ).with_context(|| format!("Failed to open platform database at: {}", path.display()))?;

        Self::from_connection(connection, prefix, timezone)
    }

    pub fn from_connection(connection: Connection, prefix: &str, timezone: Tz) -> Result<Self> {
        validate_prefix(prefix)?;
        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            timezone,
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn count_logins_between(&self, start: i64, end: i64) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(DISTINCT userid) FROM {} WHERE action = 'loggedin' AND timecreated >= ?1 AND timecreated < ?2",
            self.table("logstore_standard_log")
        );

        let count: i64 = self.connection
            .query_row(&sql, [start, end], |row| row.get(0))
            .context("Failed to count daily logins")?;

        Ok(count.max(0) as u64)
    }
}

impl MetricsSource for SqlitePlatformSource {
    fn logins_on(&self, day: NaiveDate) -> Result<u64> {
        let (start, end) = day_bounds(day, self.timezone);
        self.count_logins_between(start, end)
            .with_context(|| format!("Failed to count logins on {}", day))
    }

    fn daily_logins(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyUserRecord>> {
        let mut records = Vec::new();

        for day in days_descending(from, to) {
            let count = self.logins_on(day)?;
            if count > 0 {
                records.push(DailyUserRecord { date: day, count });
            }
        }

        debug!(%from, %to, days = records.len(), "collected daily logins");
        Ok(records)
    }

    fn database_size(&self) -> Result<Option<u64>> {
        let size: Option<i64> = self.connection
            .query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query platform database size")?;

        Ok(size.filter(|s| *s >= 0).map(|s| s as u64))
    }

    fn users_active_since(&self, since: i64) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(DISTINCT id) FROM {} WHERE lastaccess >= ?1",
            self.table("user")
        );

        let count: i64 = self.connection
            .query_row(&sql, [since], |row| row.get(0))
            .context("Failed to count recently active users")?;

        Ok(count.max(0) as u64)
    }

    fn course_count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table("course"));

        let count: i64 = self.connection
            .query_row(&sql, [], |row| row.get(0))
            .context("Failed to count courses")?;

        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use rusqlite::{Connection, params};

    pub const PREFIX: &str = "mdl_";

    /// In-memory platform database with the tables the source reads.
    pub fn platform_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("
            CREATE TABLE mdl_logstore_standard_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                userid INTEGER NOT NULL,
                action TEXT NOT NULL,
                timecreated INTEGER NOT NULL
            );
            CREATE TABLE mdl_user (id INTEGER PRIMARY KEY, lastaccess INTEGER NOT NULL DEFAULT 0);
            CREATE TABLE mdl_course (id INTEGER PRIMARY KEY, fullname TEXT);
        ").unwrap();
        conn
    }

    pub fn log_event(conn: &Connection, userid: i64, action: &str, at: i64) {
        conn.execute(
            "INSERT INTO mdl_logstore_standard_log (userid, action, timecreated) VALUES (?1, ?2, ?3)",
            params![userid, action, at],
        ).unwrap();
    }

    pub fn add_user(conn: &Connection, id: i64, lastaccess: i64) {
        conn.execute("INSERT INTO mdl_user (id, lastaccess) VALUES (?1, ?2)", params![id, lastaccess]).unwrap();
    }

    pub fn add_course(conn: &Connection, id: i64) {
        conn.execute("INSERT INTO mdl_course (id, fullname) VALUES (?1, 'Course')", params![id]).unwrap();
    }
}
