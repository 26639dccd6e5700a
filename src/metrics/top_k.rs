use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of highest-count days retained over the lifetime of the store.
pub const TOP_K_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUserRecord {
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopKAction {
    /// The day is already tracked; overwrite its count.
    UpdateInPlace(NaiveDate),
    Insert,
    /// Evict the record for this day and store the candidate in its place.
    ReplaceMin(NaiveDate),
    NoOp,
}

/// Persisted lifetime table of daily user counts.
pub trait TopKStore {
    /// Records ordered by count descending, most recent day first on ties.
    fn top_records(&self) -> Result<Vec<DailyUserRecord>>;
    fn insert_record(&self, record: &DailyUserRecord) -> Result<()>;
    fn replace_record(&self, target: NaiveDate, record: &DailyUserRecord) -> Result<()>;
    fn update_count(&self, record: &DailyUserRecord) -> Result<()>;

    /// Runs `body` so that no other writer interleaves with it. Stores
    /// without transactions just call it.
    fn atomically(&self, body: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        body()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TopKTracker {
    capacity: usize,
}

impl Default for TopKTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TopKTracker {
    pub fn new() -> Self {
        Self { capacity: TOP_K_CAPACITY }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn decide(&self, candidate: &DailyUserRecord, current_top: &[DailyUserRecord]) -> TopKAction {
        if current_top.iter().any(|r| r.date == candidate.date) {
            return TopKAction::UpdateInPlace(candidate.date);
        }

        if current_top.len() < self.capacity {
            return TopKAction::Insert;
        }

        // Lowest count loses; among equal counts the oldest day goes first
        let min = current_top
            .iter()
            .min_by(|a, b| a.count.cmp(&b.count).then(a.date.cmp(&b.date)));

        match min {
            Some(min) if candidate.count >= min.count => TopKAction::ReplaceMin(min.date),
            _ => TopKAction::NoOp,
        }
    }

    pub fn apply<S: TopKStore + ?Sized>(&self, store: &S, candidate: &DailyUserRecord, action: TopKAction) -> Result<()> {
        match action {
            TopKAction::UpdateInPlace(_) => store
                .update_count(candidate)
                .with_context(|| format!("Failed to update top users count for {}", candidate.date)),
            TopKAction::Insert => store
                .insert_record(candidate)
                .with_context(|| format!("Failed to insert top users record for {}", candidate.date)),
            TopKAction::ReplaceMin(target) => store
                .replace_record(target, candidate)
                .with_context(|| format!("Failed to replace top users record {} with {}", target, candidate.date)),
            TopKAction::NoOp => Ok(()),
        }
    }

    /// Reads the current table, decides and writes in one transaction.
    pub fn update<S: TopKStore + ?Sized>(&self, store: &S, candidate: DailyUserRecord) -> Result<TopKAction> {
        let mut action = TopKAction::NoOp;
        store.atomically(&mut || {
            let current = store.top_records().context("Failed to read top users table")?;
            action = self.decide(&candidate, &current);
            debug!(date = %candidate.date, count = candidate.count, ?action, "top users decision");
            self.apply(store, &candidate, action)
        })?;
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::Duration;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
    }

    fn record(offset: i64, count: u64) -> DailyUserRecord {
        DailyUserRecord { date: day(offset), count }
    }

    fn full_table() -> Vec<DailyUserRecord> {
        (0..10).map(|i| record(i, 10 + i as u64)).collect()
    }

    #[test]
    fn test_empty_store_inserts() {
        let tracker = TopKTracker::new();
        assert_eq!(tracker.decide(&record(0, 0), &[]), TopKAction::Insert);
    }

    #[test]
    fn test_existing_day_updates_in_place() {
        let tracker = TopKTracker::new();
        let table = full_table();
        assert_eq!(tracker.decide(&record(3, 1), &table), TopKAction::UpdateInPlace(day(3)));
    }

    #[test]
    fn test_full_table_replaces_min_on_tie() {
        let tracker = TopKTracker::new();
        let table = full_table();
        // day(0) holds the minimum of 10
        assert_eq!(tracker.decide(&record(20, 10), &table), TopKAction::ReplaceMin(day(0)));
        assert_eq!(tracker.decide(&record(20, 9), &table), TopKAction::NoOp);
    }

    #[test]
    fn test_tied_minimum_evicts_oldest_day() {
        let tracker = TopKTracker::new();
        let mut table = full_table();
        table[4].count = 10;
        table[0].count = 10;

        assert_eq!(tracker.decide(&record(30, 50), &table), TopKAction::ReplaceMin(day(0)));
    }

    #[test]
    fn test_sequence_keeps_ten_highest() {
        let db = Database::open_in_memory().unwrap();
        let tracker = TopKTracker::new();

        let counts = [5u64, 3, 8, 1, 9, 2, 7, 4, 6, 10, 0];
        for (i, count) in counts.iter().enumerate() {
            tracker.update(&db, record(i as i64, *count)).unwrap();
            assert!(db.top_records().unwrap().len() <= TOP_K_CAPACITY);
        }

        let mut stored: Vec<u64> = db.top_records().unwrap().iter().map(|r| r.count).collect();
        stored.sort_unstable();
        assert_eq!(stored, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_rerun_same_day_keeps_unique_dates() {
        let db = Database::open_in_memory().unwrap();
        let tracker = TopKTracker::new();

        assert_eq!(tracker.update(&db, record(0, 12)).unwrap(), TopKAction::Insert);
        assert_eq!(tracker.update(&db, record(0, 15)).unwrap(), TopKAction::UpdateInPlace(day(0)));

        let records = db.top_records().unwrap();
        assert_eq!(records, vec![record(0, 15)]);
    }

    #[test]
    fn test_long_run_never_exceeds_capacity() {
        let db = Database::open_in_memory().unwrap();
        let tracker = TopKTracker::new();

        for i in 0..60i64 {
            let count = ((i * 37) % 23) as u64;
            tracker.update(&db, record(i, count)).unwrap();
        }

        let records = db.top_records().unwrap();
        assert_eq!(records.len(), TOP_K_CAPACITY);
        let mut dates: Vec<NaiveDate> = records.iter().map(|r| r.date).collect();
        dates.sort();
        dates.dedup();
        assert_eq!(dates.len(), TOP_K_CAPACITY);
    }
}
