// Persisted monitor state: settings, top-K table, task schedules
pub mod kv;
pub mod sqlite;
pub mod migrations;

pub use kv::{ConfigStore, MemoryStore};
pub use sqlite::Database;
