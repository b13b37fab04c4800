//! Versioned schema migrations.
//!
//! Applied versions are recorded in `_migrations`. Each migration and its
//! version row commit together, so a failed step is retried on next open.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "create_jobs_indexes",
        sql: include_str!("sql/002_create_jobs_indexes.sql"),
    },
];

/// Highest applied version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}

pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied = current_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        log::info!(
            "Applying schema v{} ({})",
            migration.version,
            migration.description
        );

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}
