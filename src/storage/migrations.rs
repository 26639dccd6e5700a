use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: include_str!("../../migrations/001_initial.sql"),
    },
];

pub fn get_schema_version(connection: &Connection) -> Result<i32> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    ).context("Failed to create schema_version table")?;

    let version = connection.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get::<_, i32>(0)
    ).context("Failed to read schema version")?;

    Ok(version)
}

/// Applies pending migrations in order. Each one commits together with its
/// version row, so a failed migration leaves the previous version intact.
pub fn apply_migrations(connection: &Connection) -> Result<()> {
    let current_version = get_schema_version(connection)?;

    let pending = MIGRATIONS.iter().filter(|m| m.version > current_version);
    for migration in pending {
        info!(version = migration.version, name = migration.name, "applying migration");

        let tx = connection.unchecked_transaction()
            .context("Failed to start migration transaction")?;

        tx.execute_batch(migration.sql)
            .with_context(|| format!("Failed to apply migration {} ({})", migration.version, migration.name))?;

        tx.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            [migration.version],
        ).with_context(|| format!("Failed to update schema version to {}", migration.version))?;

        tx.commit()
            .with_context(|| format!("Failed to commit migration {}", migration.version))?;
    }

    Ok(())
}
