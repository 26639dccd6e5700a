use std::collections::BTreeSet;
use std::fmt;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// Longest gap `is_due` looks back over for a missed firing.
const CATCH_UP_WINDOW_DAYS: i64 = 8;

/// One field of a five-field cron expression, expanded to its values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronField {
    values: BTreeSet<u32>,
}

impl CronField {
    /// Accepts `*`, `n`, `a-b`, `*/s`, `a-b/s` and comma lists thereof.
    pub fn parse(field: &str, min: u32, max: u32) -> Result<Self> {
        let field = field.trim();
        if field.is_empty() {
            bail!("empty cron field");
        }

        let mut values = BTreeSet::new();
        for part in field.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step.parse().with_context(|| format!("invalid step '{}'", step))?;
                    if step == 0 {
                        bail!("step cannot be zero in '{}'", part);
                    }
                    (range, step)
                }
                None => (part, 1),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                let a: u32 = a.parse().with_context(|| format!("invalid value '{}'", a))?;
                let b: u32 = b.parse().with_context(|| format!("invalid value '{}'", b))?;
                (a, b)
            } else {
                let v: u32 = range.parse().with_context(|| format!("invalid value '{}'", range))?;
                // `5/10` means from 5 to the end in steps of 10
                if step > 1 { (v, max) } else { (v, v) }
            };

            if start < min || end > max || start > end {
                bail!("'{}' is outside {}-{}", part, min, max);
            }

            values.extend((start..=end).step_by(step as usize));
        }

        Ok(Self { values })
    }

    pub fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

/// The five schedule fields as stored, e.g. `0 */6 * * *`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleExpr {
    pub minute: String,
    pub hour: String,
    pub day: String,
    pub month: String,
    pub day_of_week: String,
}

impl ScheduleExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            bail!("Schedule '{}' must have 5 fields", expr);
        }
        let schedule = Self {
            minute: fields[0].to_string(),
            hour: fields[1].to_string(),
            day: fields[2].to_string(),
            month: fields[3].to_string(),
            day_of_week: fields[4].to_string(),
        };
        schedule.compile()?;
        Ok(schedule)
    }

    pub fn with_hour(&self, hour: &str) -> Self {
        Self { hour: hour.to_string(), ..self.clone() }
    }

    pub fn compile(&self) -> Result<CompiledSchedule> {
        Ok(CompiledSchedule {
            minute: CronField::parse(&self.minute, 0, 59).context("minute")?,
            hour: CronField::parse(&self.hour, 0, 23).context("hour")?,
            day: CronField::parse(&self.day, 1, 31).context("day")?,
            month: CronField::parse(&self.month, 1, 12).context("month")?,
            // 7 is accepted as Sunday
            day_of_week: CronField::parse(&self.day_of_week, 0, 7).context("day of week")?,
            day_restricted: self.day.trim() != "*",
            dow_restricted: self.day_of_week.trim() != "*",
        })
    }
}

impl fmt::Display for ScheduleExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {} {}", self.minute, self.hour, self.day, self.month, self.day_of_week)
    }
}

#[derive(Debug, Clone)]
pub struct CompiledSchedule {
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    day_of_week: CronField,
    day_restricted: bool,
    dow_restricted: bool,
}

impl CompiledSchedule {
    /// Whether the schedule fires in the minute containing `at`, read in `tz`.
    pub fn matches(&self, at: DateTime<Utc>, tz: Tz) -> bool {
        let local = at.with_timezone(&tz);
        let dow = local.weekday().num_days_from_sunday();

        let day_ok = self.day.matches(local.day());
        let dow_ok = self.day_of_week.matches(dow) || (dow == 0 && self.day_of_week.matches(7));
        // Classic cron: when both day fields are restricted either may match
        let date_ok = match (self.day_restricted, self.dow_restricted) {
            (true, true) => day_ok || dow_ok,
            (true, false) => day_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        };

        date_ok
            && self.month.matches(local.month())
            && self.hour.matches(local.hour())
            && self.minute.matches(local.minute())
    }

    /// Most recent firing minute in `(after, now]`, if any.
    pub fn last_fire_between(&self, after: DateTime<Utc>, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let mut cursor = now.duration_trunc(Duration::minutes(1)).ok()?;
        let floor = after.max(now - Duration::days(CATCH_UP_WINDOW_DAYS));

        while cursor > floor {
            if self.matches(cursor, tz) {
                return Some(cursor);
            }
            cursor -= Duration::minutes(1);
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSchedule {
    pub name: String,
    pub schedule: ScheduleExpr,
    pub disabled: bool,
    /// Unix seconds of the last completed run.
    pub last_run: Option<i64>,
}

impl TaskSchedule {
    /// Due when enabled and the schedule fired since the last run.
    /// A task that never ran is due immediately.
    pub fn is_due(&self, now: DateTime<Utc>, tz: Tz) -> Result<bool> {
        if self.disabled {
            return Ok(false);
        }

        let last_run = match self.last_run.and_then(|ts| DateTime::from_timestamp(ts, 0)) {
            Some(last_run) => last_run,
            None => return Ok(true),
        };

        let compiled = self.schedule.compile()
            .with_context(|| format!("Invalid schedule for task {}: {}", self.name, self.schedule))?;
        Ok(compiled.last_fire_between(last_run, now, tz).is_some())
    }
}

/// Persisted per-task cadence.
pub trait TaskRegistry {
    fn get_task(&self, name: &str) -> Result<Option<TaskSchedule>>;
    fn list_tasks(&self) -> Result<Vec<TaskSchedule>>;
    /// `false` when no task of that name exists.
    fn set_task_schedule(&self, name: &str, schedule: &ScheduleExpr) -> Result<bool>;
    fn mark_run(&self, name: &str, at: i64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, h, m, 0).unwrap()
    }

    fn task(expr: &str, last_run: Option<DateTime<Utc>>) -> TaskSchedule {
        TaskSchedule {
            name: "disk-usage".to_string(),
            schedule: ScheduleExpr::parse(expr).unwrap(),
            disabled: false,
            last_run: last_run.map(|t| t.timestamp()),
        }
    }

    #[test]
    fn test_cron_field_forms() {
        let f = CronField::parse("*/6", 0, 23).unwrap();
        assert!(f.matches(0) && f.matches(6) && f.matches(18));
        assert!(!f.matches(5));

        let f = CronField::parse("1-5,10", 0, 23).unwrap();
        assert!(f.matches(3) && f.matches(10));
        assert!(!f.matches(6));

        let f = CronField::parse("12", 0, 23).unwrap();
        assert!(f.matches(12) && !f.matches(0));

        assert!(CronField::parse("24", 0, 23).is_err());
        assert!(CronField::parse("*/0", 0, 23).is_err());
        assert!(CronField::parse("x", 0, 23).is_err());
        assert!(CronField::parse("", 0, 23).is_err());
    }

    #[test]
    fn test_schedule_parse_and_display() {
        let expr = ScheduleExpr::parse("0 */2 * * *").unwrap();
        assert_eq!(expr.hour, "*/2");
        assert_eq!(expr.to_string(), "0 */2 * * *");
        assert_eq!(expr.with_hour("12").to_string(), "0 12 * * *");
        assert!(ScheduleExpr::parse("0 12 * *").is_err());
    }

    #[test]
    fn test_matches_in_site_timezone() {
        let compiled = ScheduleExpr::parse("0 8 * * *").unwrap().compile().unwrap();
        let tz: Tz = "America/Bogota".parse().unwrap();

        // 13:00 UTC is 08:00 in UTC-5
        assert!(compiled.matches(at(13, 0), tz));
        assert!(!compiled.matches(at(8, 0), tz));
        assert!(compiled.matches(at(8, 0), chrono_tz::UTC));
    }

    #[test]
    fn test_day_of_week_sunday_alias() {
        let compiled = ScheduleExpr::parse("0 0 * * 7").unwrap().compile().unwrap();
        // 2024-06-02 is a Sunday
        let sunday = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();
        assert!(compiled.matches(sunday, chrono_tz::UTC));
        assert!(!compiled.matches(at(0, 0), chrono_tz::UTC));
    }

    #[test]
    fn test_never_run_is_due() {
        assert!(task("0 12 * * *", None).is_due(at(1, 0), chrono_tz::UTC).unwrap());
    }

    #[test]
    fn test_due_only_after_fire_time() {
        let t = task("0 12 * * *", Some(at(0, 0) - Duration::hours(1)));
        assert!(!t.is_due(at(11, 59), chrono_tz::UTC).unwrap());
        assert!(t.is_due(at(12, 0), chrono_tz::UTC).unwrap());
        assert!(t.is_due(at(15, 30), chrono_tz::UTC).unwrap());

        let ran_after_fire = task("0 12 * * *", Some(at(12, 5)));
        assert!(!ran_after_fire.is_due(at(15, 30), chrono_tz::UTC).unwrap());
    }

    #[test]
    fn test_disabled_never_due() {
        let mut t = task("* * * * *", None);
        t.disabled = true;
        assert!(!t.is_due(at(12, 0), chrono_tz::UTC).unwrap());
    }
}
