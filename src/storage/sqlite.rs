use std::path::Path;
use std::time::Duration;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use anyhow::{Result, Context};
use chrono::NaiveDate;
use crate::metrics::top_k::{DailyUserRecord, TopKStore};
use crate::scheduler::registry::{ScheduleExpr, TaskRegistry, TaskSchedule};
use crate::storage::kv::ConfigStore;
use crate::storage::migrations::apply_migrations;

const DAY_FORMAT: &str = "%Y-%m-%d";

pub struct Database {
    connection: Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connection", &"<SQLite Connection>")
            .finish()
    }
}

impl Database {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
        }

        let connection = Connection::open(path)
            .with_context(|| format!("Failed to open database at: {}", path.display()))?;

        // Concurrent runs of the same job wait on the row lock instead of failing
        connection.busy_timeout(Duration::from_secs(10))
            .context("Failed to set busy timeout")?;

        connection.execute_batch("
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = 1000;
            PRAGMA temp_store = memory;
        ").context("Failed to configure SQLite pragmas")?;

        let db = Database { connection };
        db.init_schema()?;

        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()
            .context("Failed to open in-memory database")?;
        let db = Database { connection };
        db.init_schema()?;
        Ok(db)
    }

    pub fn init_schema(&self) -> Result<()> {
        apply_migrations(&self.connection)
            .context("Failed to apply database migrations")
    }
}

fn format_day(date: NaiveDate) -> String {
    date.format(DAY_FORMAT).to_string()
}

fn parse_day(raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DAY_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl ConfigStore for Database {
    fn get_in(&self, plugin: &str, name: &str) -> Result<Option<String>> {
        self.connection.query_row(
            "SELECT value FROM config_kv WHERE plugin = ?1 AND name = ?2",
            [plugin, name],
            |row| row.get::<_, String>(0)
        ).optional()
        .with_context(|| format!("Failed to read setting {plugin}/{name}"))
    }

    fn set_in(&self, plugin: &str, name: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();

        self.connection.execute(
            "INSERT INTO config_kv (plugin, name, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(plugin, name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            [plugin, name, value, &now]
        ).with_context(|| format!("Failed to write setting {plugin}/{name}"))?;

        Ok(())
    }

    fn unset_in(&self, plugin: &str, name: &str) -> Result<bool> {
        let rows_affected = self.connection.execute(
            "DELETE FROM config_kv WHERE plugin = ?1 AND name = ?2",
            [plugin, name]
        ).with_context(|| format!("Failed to unset setting {plugin}/{name}"))?;

        Ok(rows_affected > 0)
    }

    fn list_in(&self, plugin: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self.connection.prepare(
            "SELECT name, value FROM config_kv WHERE plugin = ?1 ORDER BY name"
        ).context("Failed to prepare settings query")?;

        let rows = stmt.query_map([plugin], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        }).context("Failed to execute settings query")?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.context("Failed to parse settings row")?);
        }

        Ok(results)
    }
}

impl TopKStore for Database {
    fn top_records(&self) -> Result<Vec<DailyUserRecord>> {
        let mut stmt = self.connection.prepare(
            "SELECT day, user_count FROM daily_user_top ORDER BY user_count DESC, day DESC"
        ).context("Failed to prepare top users query")?;

        let rows = stmt.query_map([], |row| {
            let day: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok(DailyUserRecord {
                date: parse_day(&day)?,
                count: count.max(0) as u64,
            })
        }).context("Failed to execute top users query")?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.context("Failed to parse top users row")?);
        }

        Ok(results)
    }

    fn insert_record(&self, record: &DailyUserRecord) -> Result<()> {
        // Keyed on the day: a second insert for the same day becomes an update
        self.connection.execute(
            "INSERT INTO daily_user_top (day, user_count) VALUES (?1, ?2)
             ON CONFLICT(day) DO UPDATE SET user_count = excluded.user_count",
            params![format_day(record.date), record.count as i64]
        ).context("Failed to insert top users record")?;

        Ok(())
    }

    fn replace_record(&self, target: NaiveDate, record: &DailyUserRecord) -> Result<()> {
        let rows_affected = self.connection.execute(
            "UPDATE daily_user_top SET day = ?1, user_count = ?2 WHERE day = ?3",
            params![format_day(record.date), record.count as i64, format_day(target)]
        ).context("Failed to replace top users record")?;

        if rows_affected == 0 {
            anyhow::bail!("Top users record for {} vanished before replacement", target);
        }

        Ok(())
    }

    fn update_count(&self, record: &DailyUserRecord) -> Result<()> {
        self.connection.execute(
            "UPDATE daily_user_top SET user_count = ?1 WHERE day = ?2",
            params![record.count as i64, format_day(record.date)]
        ).context("Failed to update top users record")?;

        Ok(())
    }

    fn atomically(&self, body: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        // Already inside a transaction: join it
        if !self.connection.is_autocommit() {
            return body();
        }

        // Write lock is taken before the read; a second writer waits on busy_timeout
        let tx = Transaction::new_unchecked(&self.connection, TransactionBehavior::Immediate)
            .context("Failed to begin top users transaction")?;
        body()?;
        tx.commit().context("Failed to commit top users transaction")
    }
}

fn schedule_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskSchedule> {
    Ok(TaskSchedule {
        name: row.get(0)?,
        schedule: ScheduleExpr {
            minute: row.get(1)?,
            hour: row.get(2)?,
            day: row.get(3)?,
            month: row.get(4)?,
            day_of_week: row.get(5)?,
        },
        disabled: row.get::<_, i64>(6)? != 0,
        last_run: row.get(7)?,
    })
}

impl TaskRegistry for Database {
    fn get_task(&self, name: &str) -> Result<Option<TaskSchedule>> {
        self.connection.query_row(
            "SELECT task_name, minute, hour, day, month, day_of_week, disabled, last_run FROM task_schedule WHERE task_name = ?1",
            [name],
            schedule_from_row
        ).optional()
        .with_context(|| format!("Failed to read schedule for task {name}"))
    }

    fn list_tasks(&self) -> Result<Vec<TaskSchedule>> {
        let mut stmt = self.connection.prepare(
            "SELECT task_name, minute, hour, day, month, day_of_week, disabled, last_run FROM task_schedule ORDER BY task_name"
        ).context("Failed to prepare task schedule query")?;

        let rows = stmt.query_map([], schedule_from_row)
            .context("Failed to execute task schedule query")?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.context("Failed to parse task schedule row")?);
        }

        Ok(results)
    }

    fn set_task_schedule(&self, name: &str, schedule: &ScheduleExpr) -> Result<bool> {
        let rows_affected = self.connection.execute(
            "UPDATE task_schedule SET minute = ?1, hour = ?2, day = ?3, month = ?4, day_of_week = ?5 WHERE task_name = ?6",
            params![schedule.minute, schedule.hour, schedule.day, schedule.month, schedule.day_of_week, name]
        ).with_context(|| format!("Failed to update schedule for task {name}"))?;

        Ok(rows_affected > 0)
    }

    fn mark_run(&self, name: &str, at: i64) -> Result<()> {
        self.connection.execute(
            "UPDATE task_schedule SET last_run = ?1 WHERE task_name = ?2",
            params![at, name]
        ).with_context(|| format!("Failed to record run of task {name}"))?;

        Ok(())
    }
}
