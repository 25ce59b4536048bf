//! Schema migrations.
//!
//! Each migration runs inside its own transaction together with the bump of
//! SQLite's `user_version`, so a failed migration leaves the previous
//! version intact.

use rusqlite::Connection;
use tracing::info;

use crate::errors::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "resolutions, command watermarks and audit log",
        sql: r#"
        CREATE TABLE IF NOT EXISTS resolutions (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            repo                TEXT    NOT NULL,
            pr_number           INTEGER NOT NULL,
            filename            TEXT    NOT NULL,
            resolved_code       TEXT    NOT NULL,
            confirmed           INTEGER NOT NULL DEFAULT 0,
            applied             INTEGER NOT NULL DEFAULT 0,
            applied_commit_sha  TEXT,
            base_content        TEXT,
            ours_content        TEXT,
            theirs_content      TEXT,
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL,
            UNIQUE (repo, pr_number, filename)
        );

        CREATE INDEX IF NOT EXISTS idx_resolutions_pr ON resolutions (repo, pr_number);

        CREATE TABLE IF NOT EXISTS command_watermarks (
            repo                TEXT    NOT NULL,
            pr_number           INTEGER NOT NULL,
            last_processed_at   TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL,
            PRIMARY KEY (repo, pr_number)
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT    NOT NULL,
            repo        TEXT    NOT NULL,
            pr_number   INTEGER NOT NULL,
            details     TEXT,
            success     INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_log_pr ON audit_log (repo, pr_number);
        "#,
    },
    Migration {
        version: 2,
        description: "per pull request run leases",
        sql: r#"
        CREATE TABLE IF NOT EXISTS pr_locks (
            repo         TEXT    NOT NULL,
            pr_number    INTEGER NOT NULL,
            owner        TEXT    NOT NULL,
            acquired_at  TEXT    NOT NULL,
            PRIMARY KEY (repo, pr_number)
        );
        "#,
    },
];

/// Version the schema reaches once every migration has run.
pub const SCHEMA_VERSION: u32 = 2;

/// Apply every migration newer than the database's `user_version`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current = current_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        let failed = |e: rusqlite::Error| DatabaseError::MigrationFailed {
            version: migration.version,
            detail: e.to_string(),
        };
        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.pragma_update(None, "user_version", migration.version)
            .map_err(failed)?;
        tx.commit().map_err(failed)?;
    }
    Ok(())
}

/// The schema version recorded in `user_version`.
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
