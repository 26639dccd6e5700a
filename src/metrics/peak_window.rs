use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::metrics::top_k::DailyUserRecord;

pub const PEAK_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakWindowRecord {
    pub date: NaiveDate,
    pub count: u64,
}

/// Highest daily count within `[today - window_days, today]`.
///
/// Ties go to the most recent day. `None` when nothing falls inside the
/// window, which callers report as "not yet calculated".
pub fn compute_peak(records: &[DailyUserRecord], window_days: i64, today: NaiveDate) -> Option<PeakWindowRecord> {
    let start = today - Duration::days(window_days);

    records
        .iter()
        .filter(|r| r.date >= start && r.date <= today)
        .max_by(|a, b| a.count.cmp(&b.count).then(a.date.cmp(&b.date)))
        .map(|r| PeakWindowRecord { date: r.date, count: r.count })
}
