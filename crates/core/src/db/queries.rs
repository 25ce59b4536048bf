//! Typed query helpers for every table in the conflictbot database.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{AuditEntry, NewResolution, Resolution};
use crate::store::ResolutionStore;

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub repo: String,
    pub pr_number: u64,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Timestamp encoding
// ---------------------------------------------------------------------------

/// Fixed-width RFC 3339 so stored timestamps compare lexicographically.
fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(column: &str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidValue {
            column: column.to_string(),
            detail: format!("'{value}': {e}"),
        })
}

fn resolution_from_row(row: &Row<'_>) -> rusqlite::Result<Resolution> {
    Ok(Resolution {
        repo: row.get(0)?,
        pr_number: row.get::<_, i64>(1)? as u64,
        filename: row.get(2)?,
        resolved_code: row.get(3)?,
        confirmed: row.get(4)?,
        applied: row.get(5)?,
        applied_commit_sha: row.get(6)?,
        base_content: row.get(7)?,
        ours_content: row.get(8)?,
        theirs_content: row.get(9)?,
    })
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    /// List recent audit-log entries for a pull request, newest first.
    pub fn list_audit_log(
        &self,
        repo: &str,
        pr_number: u64,
        limit: u32,
    ) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, repo, pr_number, details, success, created_at
             FROM audit_log WHERE repo = ?1 AND pr_number = ?2
             ORDER BY id DESC LIMIT ?3",
        )?;
        let entries = stmt
            .query_map(params![repo, pr_number as i64, limit], |row| {
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    repo: row.get(2)?,
                    pr_number: row.get::<_, i64>(3)? as u64,
                    details: row.get(4)?,
                    success: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

impl ResolutionStore for Database {
    // -- resolutions --------------------------------------------------------

    fn save_resolution(&self, r: &NewResolution) -> Result<(), DatabaseError> {
        let now = encode_ts(&Utc::now());
        let conn = self.conn();
        conn.execute(
            "INSERT INTO resolutions
                 (repo, pr_number, filename, resolved_code, confirmed, applied,
                  applied_commit_sha, base_content, ours_content, theirs_content,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, 0, NULL, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(repo, pr_number, filename) DO UPDATE SET
                 resolved_code = excluded.resolved_code,
                 confirmed = 0,
                 applied = 0,
                 applied_commit_sha = NULL,
                 base_content = excluded.base_content,
                 ours_content = excluded.ours_content,
                 theirs_content = excluded.theirs_content,
                 updated_at = excluded.updated_at",
            params![
                r.repo,
                r.pr_number as i64,
                r.filename,
                r.resolved_code,
                r.base_content,
                r.ours_content,
                r.theirs_content,
                now
            ],
        )?;
        debug!(repo = %r.repo, pr_number = r.pr_number, filename = %r.filename, "saved resolution");
        Ok(())
    }

    fn list_resolutions(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<Resolution>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT repo, pr_number, filename, resolved_code, confirmed, applied,
                    applied_commit_sha, base_content, ours_content, theirs_content
             FROM resolutions WHERE repo = ?1 AND pr_number = ?2
             ORDER BY filename",
        )?;
        let rows = stmt
            .query_map(params![repo, pr_number as i64], resolution_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn confirm_all(&self, repo: &str, pr_number: u64) -> Result<usize, DatabaseError> {
        let now = encode_ts(&Utc::now());
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE resolutions SET confirmed = 1, updated_at = ?3
             WHERE repo = ?1 AND pr_number = ?2 AND confirmed = 0",
            params![repo, pr_number as i64, now],
        )?;
        debug!(repo, pr_number, changed, "confirmed resolutions");
        Ok(changed)
    }

    fn mark_applied(
        &self,
        repo: &str,
        pr_number: u64,
        filename: &str,
        commit_sha: &str,
    ) -> Result<(), DatabaseError> {
        let now = encode_ts(&Utc::now());
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE resolutions SET applied = 1, applied_commit_sha = ?4, updated_at = ?5
             WHERE repo = ?1 AND pr_number = ?2 AND filename = ?3",
            params![repo, pr_number as i64, filename, commit_sha, now],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "resolution".into(),
                id: format!("{repo}#{pr_number}:{filename}"),
            });
        }
        debug!(repo, pr_number, filename, commit_sha, "marked resolution applied");
        Ok(())
    }

    fn mark_all_not_applied(&self, repo: &str, pr_number: u64) -> Result<usize, DatabaseError> {
        let now = encode_ts(&Utc::now());
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE resolutions SET applied = 0, applied_commit_sha = NULL, updated_at = ?3
             WHERE repo = ?1 AND pr_number = ?2 AND applied = 1",
            params![repo, pr_number as i64, now],
        )?;
        debug!(repo, pr_number, changed, "reset applied resolutions");
        Ok(changed)
    }

    // -- command_watermarks -------------------------------------------------

    fn get_watermark(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let conn = self.conn();
        let value: Option<String> = conn
            .query_row(
                "SELECT last_processed_at FROM command_watermarks
                 WHERE repo = ?1 AND pr_number = ?2",
                params![repo, pr_number as i64],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|v| decode_ts("last_processed_at", &v))
            .transpose()
    }

    fn set_watermark(
        &self,
        repo: &str,
        pr_number: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let value = encode_ts(&timestamp);
        let now = encode_ts(&Utc::now());
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT INTO command_watermarks (repo, pr_number, last_processed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(repo, pr_number) DO UPDATE SET
                 last_processed_at = excluded.last_processed_at,
                 updated_at = excluded.updated_at
             WHERE excluded.last_processed_at > command_watermarks.last_processed_at",
            params![repo, pr_number as i64, value, now],
        )?;
        debug!(repo, pr_number, watermark = %value, advanced = changed > 0, "set watermark");
        Ok(changed > 0)
    }

    // -- pr_locks -----------------------------------------------------------

    fn try_acquire_lease(
        &self,
        repo: &str,
        pr_number: u64,
        owner: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, DatabaseError> {
        let stale_before = encode_ts(&(now - ttl));
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT INTO pr_locks (repo, pr_number, owner, acquired_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(repo, pr_number) DO UPDATE SET
                 owner = excluded.owner,
                 acquired_at = excluded.acquired_at
             WHERE pr_locks.acquired_at < ?5",
            params![repo, pr_number as i64, owner, encode_ts(&now), stale_before],
        )?;
        debug!(repo, pr_number, owner, acquired = changed > 0, "acquire lease");
        Ok(changed > 0)
    }

    fn release_lease(
        &self,
        repo: &str,
        pr_number: u64,
        owner: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute(
            "DELETE FROM pr_locks WHERE repo = ?1 AND pr_number = ?2 AND owner = ?3",
            params![repo, pr_number as i64, owner],
        )?;
        Ok(changed > 0)
    }

    fn lease_holder(&self, repo: &str, pr_number: u64) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT owner FROM pr_locks WHERE repo = ?1 AND pr_number = ?2",
                params![repo, pr_number as i64],
                |row| row.get(0),
            )
            .optional()?)
    }

    // -- audit_log ----------------------------------------------------------

    fn record_audit(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, repo, pr_number, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.action,
                entry.repo,
                entry.pr_number as i64,
                entry.details,
                entry.success,
                encode_ts(&entry.created_at)
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action = %entry.action, "inserted audit_log entry");
        Ok(())
    }
}
