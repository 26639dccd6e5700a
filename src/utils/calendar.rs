use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Parse an IANA zone name such as `America/Bogota`.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| anyhow!("Invalid timezone '{}': {}", name, e))
}

/// Calendar day of `now` in `tz`.
pub fn local_today(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

pub fn local_yesterday(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    local_today(now, tz) - Duration::days(1)
}

fn resolve_local(tz: Tz, naive: NaiveDateTime) -> i64 {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.timestamp(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp(),
        // Midnight skipped by a DST jump: the day starts at the first valid instant after it
        LocalResult::None => {
            let mut probe = naive;
            for _ in 0..24 {
                probe += Duration::minutes(30);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    return dt.timestamp();
                }
            }
            Utc.from_utc_datetime(&naive).timestamp()
        }
    }
}

/// Unix-second bounds `[start, end)` of `day` in `tz`.
pub fn day_bounds(day: NaiveDate, tz: Tz) -> (i64, i64) {
    let start = resolve_local(tz, day.and_time(NaiveTime::MIN));
    let end = resolve_local(tz, (day + Duration::days(1)).and_time(NaiveTime::MIN));
    (start, end)
}

/// Inclusive list of days from `from` to `to`, newest first.
pub fn days_descending(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = to;
    while current >= from {
        days.push(current);
        current -= Duration::days(1);
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timezone() {
        assert!(parse_timezone("UTC").is_ok());
        assert!(parse_timezone(" America/Bogota ").is_ok());
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_local_today_crosses_midnight() {
        let tz = parse_timezone("America/Bogota").unwrap();
        // 03:00 UTC is still the previous evening in UTC-5
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 3, 0, 0).unwrap();
        assert_eq!(local_today(now, tz), NaiveDate::from_ymd_opt(2024, 3, 14).unwrap());
        assert_eq!(local_yesterday(now, tz), NaiveDate::from_ymd_opt(2024, 3, 13).unwrap());
    }

    #[test]
    fn test_day_bounds_utc() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let (start, end) = day_bounds(day, chrono_tz::UTC);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap().timestamp());
        assert_eq!(end - start, 86_400);
    }

    #[test]
    fn test_day_bounds_dst_day_is_short() {
        let tz = parse_timezone("Europe/Madrid").unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let (start, end) = day_bounds(day, tz);
        assert_eq!(end - start, 23 * 3600);
    }

    #[test]
    fn test_days_descending() {
        let from = NaiveDate::from_ymd_opt(2024, 2, 28).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let days = days_descending(from, to);
        assert_eq!(days.len(), 3);
        assert_eq!(days[0], to);
        assert_eq!(days[2], from);
        assert!(days_descending(to, from).is_empty());
    }
}
