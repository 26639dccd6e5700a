use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::alerts::thresholds::{AlertLevel, TierTable};
use crate::storage::kv::{ConfigStore, keys};

/// Combined disk and user classification driving one notification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub disk_level: AlertLevel,
    pub user_level: AlertLevel,
    pub level: AlertLevel,
    #[serde(skip)]
    pub cooldown: Duration,
}

pub fn evaluate(table: &TierTable, disk_percent: f64, user_percent: f64) -> Evaluation {
    let (disk_level, _) = table.classify(disk_percent);
    let (user_level, _) = table.classify(user_percent);
    let level = disk_level.max(user_level);

    Evaluation {
        disk_level,
        user_level,
        level,
        cooldown: table.cooldown_for(level),
    }
}

/// Fires for any level above normal once `cooldown` has elapsed since the
/// previous send. A missing previous send counts as elapsed.
pub fn should_notify(level: AlertLevel, cooldown: Duration, last_sent_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    if level == AlertLevel::Normal {
        return false;
    }

    match last_sent_at {
        Some(last) => now.signed_duration_since(last) >= cooldown,
        None => true,
    }
}

pub fn last_sent_at<S: ConfigStore + ?Sized>(store: &S) -> Result<Option<DateTime<Utc>>> {
    let ts = store.get_i64(keys::LAST_NOTIFICATION_TIME)?;
    if ts <= 0 {
        return Ok(None);
    }
    Ok(DateTime::from_timestamp(ts, 0))
}

pub fn last_level<S: ConfigStore + ?Sized>(store: &S) -> Result<Option<AlertLevel>> {
    let raw = store.get_string(keys::LAST_ALERT_LEVEL)?;
    Ok(raw.parse().ok())
}

/// Persist the send. Never cleared when usage drops back to normal.
pub fn record_sent<S: ConfigStore + ?Sized>(store: &S, now: DateTime<Utc>, level: AlertLevel) -> Result<()> {
    store.set_i64(keys::LAST_NOTIFICATION_TIME, now.timestamp())
        .context("Failed to record notification time")?;
    store.set(keys::LAST_ALERT_LEVEL, level.as_str())
        .context("Failed to record notification level")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_cooldown_gating() {
        let cooldown = Duration::hours(12);
        let sent_11h_ago = Some(now() - Duration::hours(11));
        let sent_13h_ago = Some(now() - Duration::hours(13));

        assert!(!should_notify(AlertLevel::Critical, cooldown, sent_11h_ago, now()));
        assert!(should_notify(AlertLevel::Critical, cooldown, sent_13h_ago, now()));
        assert!(should_notify(AlertLevel::Critical, cooldown, Some(now() - cooldown), now()));
    }

    #[test]
    fn test_normal_never_fires() {
        assert!(!should_notify(AlertLevel::Normal, Duration::zero(), None, now()));
    }

    #[test]
    fn test_first_send_fires() {
        assert!(should_notify(AlertLevel::Medium, Duration::days(3), None, now()));
    }

    #[test]
    fn test_unified_evaluation_takes_worst_metric() {
        let table = TierTable::default();

        let eval = evaluate(&table, 96.0, 40.0);
        assert_eq!(eval.level, AlertLevel::Critical);
        assert_eq!(eval.user_level, AlertLevel::Normal);
        assert_eq!(eval.cooldown, Duration::hours(12));

        let eval = evaluate(&table, 10.0, 85.0);
        assert_eq!(eval.level, AlertLevel::Medium);
        assert_eq!(eval.cooldown, Duration::days(3));

        let eval = evaluate(&table, 10.0, 0.0);
        assert_eq!(eval.level, AlertLevel::Normal);
        assert_eq!(eval.cooldown, Duration::days(7));
    }

    #[test]
    fn test_record_sent_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(last_sent_at(&store).unwrap(), None);
        assert_eq!(last_level(&store).unwrap(), None);

        record_sent(&store, now(), AlertLevel::High).unwrap();

        assert_eq!(last_sent_at(&store).unwrap(), Some(now()));
        assert_eq!(last_level(&store).unwrap(), Some(AlertLevel::High));
    }
}
