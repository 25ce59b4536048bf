//! Persistence boundary for resolutions, command watermarks and per-PR
//! run leases.
//!
//! [`ResolutionStore`] is implemented by the SQLite [`Database`] and by
//! [`MemoryResolutionStore`], an in-memory fake used by tests and dry runs.
//!
//! [`Database`]: crate::db::Database

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::errors::DatabaseError;
use crate::models::{AuditEntry, NewResolution, Resolution};

/// Storage for resolutions, keyed by `(repo, pr_number, filename)`, and the
/// per-pull-request command watermark.
pub trait ResolutionStore: Send + Sync {
    /// Insert or replace a resolution. Replacing resets `confirmed` and
    /// `applied`.
    fn save_resolution(&self, resolution: &NewResolution) -> Result<(), DatabaseError>;

    /// All resolutions of a pull request, ordered by filename.
    fn list_resolutions(&self, repo: &str, pr_number: u64)
        -> Result<Vec<Resolution>, DatabaseError>;

    /// Confirm every unconfirmed resolution. Returns how many changed.
    fn confirm_all(&self, repo: &str, pr_number: u64) -> Result<usize, DatabaseError>;

    /// Record that `filename` was written in `commit_sha`.
    fn mark_applied(
        &self,
        repo: &str,
        pr_number: u64,
        filename: &str,
        commit_sha: &str,
    ) -> Result<(), DatabaseError>;

    /// Reset every resolution of the pull request to unapplied. Returns how
    /// many changed.
    fn mark_all_not_applied(&self, repo: &str, pr_number: u64) -> Result<usize, DatabaseError>;

    fn get_watermark(&self, repo: &str, pr_number: u64)
        -> Result<Option<DateTime<Utc>>, DatabaseError>;

    /// Advance the watermark. A timestamp at or before the stored one is
    /// ignored; returns whether the watermark moved.
    fn set_watermark(
        &self,
        repo: &str,
        pr_number: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Take the run lease of a pull request for `owner`. A lease held by
    /// anyone, `owner` included, blocks unless it was acquired more than
    /// `ttl` before `now`. Returns whether the lease was taken.
    fn try_acquire_lease(
        &self,
        repo: &str,
        pr_number: u64,
        owner: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, DatabaseError>;

    /// Drop the lease if `owner` still holds it. Returns whether it did.
    fn release_lease(&self, repo: &str, pr_number: u64, owner: &str)
        -> Result<bool, DatabaseError>;

    fn lease_holder(&self, repo: &str, pr_number: u64) -> Result<Option<String>, DatabaseError>;

    /// Append to the audit log.
    fn record_audit(&self, _entry: &AuditEntry) -> Result<(), DatabaseError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory fake
// ---------------------------------------------------------------------------

type ResolutionKey = (String, u64, String);

#[derive(Debug, Default)]
struct MemoryState {
    resolutions: BTreeMap<ResolutionKey, Resolution>,
    watermarks: HashMap<(String, u64), DateTime<Utc>>,
    leases: HashMap<(String, u64), (String, DateTime<Utc>)>,
    audit: Vec<AuditEntry>,
}

/// In-memory [`ResolutionStore`] backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemoryResolutionStore {
    state: Mutex<MemoryState>,
}

impl MemoryResolutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit entries recorded so far, oldest first.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state().audit.clone()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn in_pr<'a>(
    state: &'a mut MemoryState,
    repo: &'a str,
    pr_number: u64,
) -> impl Iterator<Item = &'a mut Resolution> + 'a {
    state
        .resolutions
        .values_mut()
        .filter(move |r| r.repo == repo && r.pr_number == pr_number)
}

impl ResolutionStore for MemoryResolutionStore {
    fn save_resolution(&self, r: &NewResolution) -> Result<(), DatabaseError> {
        let key = (r.repo.clone(), r.pr_number, r.filename.clone());
        self.state().resolutions.insert(
            key,
            Resolution {
                repo: r.repo.clone(),
                pr_number: r.pr_number,
                filename: r.filename.clone(),
                resolved_code: r.resolved_code.clone(),
                confirmed: false,
                applied: false,
                applied_commit_sha: None,
                base_content: r.base_content.clone(),
                ours_content: r.ours_content.clone(),
                theirs_content: r.theirs_content.clone(),
            },
        );
        Ok(())
    }

    fn list_resolutions(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<Resolution>, DatabaseError> {
        Ok(self
            .state()
            .resolutions
            .values()
            .filter(|r| r.repo == repo && r.pr_number == pr_number)
            .cloned()
            .collect())
    }

    fn confirm_all(&self, repo: &str, pr_number: u64) -> Result<usize, DatabaseError> {
        let mut state = self.state();
        let mut changed = 0;
        for r in in_pr(&mut state, repo, pr_number).filter(|r| !r.confirmed) {
            r.confirmed = true;
            changed += 1;
        }
        Ok(changed)
    }

    fn mark_applied(
        &self,
        repo: &str,
        pr_number: u64,
        filename: &str,
        commit_sha: &str,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state();
        let key = (repo.to_string(), pr_number, filename.to_string());
        let r = state
            .resolutions
            .get_mut(&key)
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "resolution".into(),
                id: format!("{repo}#{pr_number}:{filename}"),
            })?;
        r.applied = true;
        r.applied_commit_sha = Some(commit_sha.to_string());
        Ok(())
    }

    fn mark_all_not_applied(&self, repo: &str, pr_number: u64) -> Result<usize, DatabaseError> {
        let mut state = self.state();
        let mut changed = 0;
        for r in in_pr(&mut state, repo, pr_number).filter(|r| r.applied) {
            r.applied = false;
            r.applied_commit_sha = None;
            changed += 1;
        }
        Ok(changed)
    }

    fn get_watermark(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        Ok(self
            .state()
            .watermarks
            .get(&(repo.to_string(), pr_number))
            .copied())
    }

    fn set_watermark(
        &self,
        repo: &str,
        pr_number: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state();
        let slot = state
            .watermarks
            .entry((repo.to_string(), pr_number))
            .or_insert(DateTime::<Utc>::MIN_UTC);
        if timestamp > *slot {
            *slot = timestamp;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn try_acquire_lease(
        &self,
        repo: &str,
        pr_number: u64,
        owner: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state();
        let key = (repo.to_string(), pr_number);
        if let Some((_, acquired_at)) = state.leases.get(&key) {
            if *acquired_at >= now - ttl {
                return Ok(false);
            }
        }
        state.leases.insert(key, (owner.to_string(), now));
        Ok(true)
    }

    fn release_lease(
        &self,
        repo: &str,
        pr_number: u64,
        owner: &str,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state();
        let key = (repo.to_string(), pr_number);
        if state.leases.get(&key).is_some_and(|(held_by, _)| held_by == owner) {
            state.leases.remove(&key);
            return Ok(true);
        }
        Ok(false)
    }

    fn lease_holder(&self, repo: &str, pr_number: u64) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .state()
            .leases
            .get(&(repo.to_string(), pr_number))
            .map(|(owner, _)| owner.clone()))
    }

    fn record_audit(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        self.state().audit.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_resolution(filename: &str) -> NewResolution {
        NewResolution {
            repo: "acme/widgets".into(),
            pr_number: 4,
            filename: filename.into(),
            resolved_code: format!("resolved {filename}"),
            base_content: Some("base".into()),
            ours_content: Some("ours".into()),
            theirs_content: None,
        }
    }

    #[test]
    fn test_save_is_upsert_and_resets_flags() {
        let store = MemoryResolutionStore::new();
        store.save_resolution(&new_resolution("a.rs")).unwrap();
        store.confirm_all("acme/widgets", 4).unwrap();
        store.mark_applied("acme/widgets", 4, "a.rs", "c1").unwrap();

        store.save_resolution(&new_resolution("a.rs")).unwrap();
        let all = store.list_resolutions("acme/widgets", 4).unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].confirmed);
        assert!(!all[0].applied);
        assert_eq!(all[0].applied_commit_sha, None);
    }

    #[test]
    fn test_confirm_and_reset_are_scoped_to_pr() {
        let store = MemoryResolutionStore::new();
        store.save_resolution(&new_resolution("b.rs")).unwrap();
        store.save_resolution(&new_resolution("a.rs")).unwrap();
        let mut other = new_resolution("a.rs");
        other.pr_number = 5;
        store.save_resolution(&other).unwrap();

        assert_eq!(store.confirm_all("acme/widgets", 4).unwrap(), 2);
        assert_eq!(store.confirm_all("acme/widgets", 4).unwrap(), 0);
        store.mark_applied("acme/widgets", 4, "a.rs", "c1").unwrap();
        assert_eq!(store.mark_all_not_applied("acme/widgets", 4).unwrap(), 1);

        let listed = store.list_resolutions("acme/widgets", 4).unwrap();
        let names: Vec<_> = listed.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["a.rs", "b.rs"]);
        assert!(listed.iter().all(Resolution::is_pending));
        assert!(!store.list_resolutions("acme/widgets", 5).unwrap()[0].confirmed);
    }

    #[test]
    fn test_mark_applied_unknown_file() {
        let store = MemoryResolutionStore::new();
        let result = store.mark_applied("acme/widgets", 4, "missing.rs", "c1");
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[test]
    fn test_watermark_is_monotonic() {
        let store = MemoryResolutionStore::new();
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();

        assert_eq!(store.get_watermark("acme/widgets", 4).unwrap(), None);
        assert!(store.set_watermark("acme/widgets", 4, t1).unwrap());
        assert!(!store.set_watermark("acme/widgets", 4, t0).unwrap());
        assert!(!store.set_watermark("acme/widgets", 4, t1).unwrap());
        assert_eq!(store.get_watermark("acme/widgets", 4).unwrap(), Some(t1));
    }

    #[test]
    fn test_lease_blocks_until_released_or_stale() {
        let store = MemoryResolutionStore::new();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let ttl = Duration::minutes(30);

        assert!(store.try_acquire_lease("acme/widgets", 4, "a", t0, ttl).unwrap());
        assert!(!store.try_acquire_lease("acme/widgets", 4, "b", t0, ttl).unwrap());
        assert!(!store.try_acquire_lease("acme/widgets", 4, "a", t0, ttl).unwrap());
        assert!(store.try_acquire_lease("acme/widgets", 5, "b", t0, ttl).unwrap());

        assert!(!store.release_lease("acme/widgets", 4, "b").unwrap());
        assert!(store.release_lease("acme/widgets", 4, "a").unwrap());
        assert_eq!(store.lease_holder("acme/widgets", 4).unwrap(), None);

        assert!(store.try_acquire_lease("acme/widgets", 4, "a", t0, ttl).unwrap());
        let later = t0 + Duration::minutes(31);
        assert!(store.try_acquire_lease("acme/widgets", 4, "b", later, ttl).unwrap());
        assert_eq!(store.lease_holder("acme/widgets", 4).unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_audit_entries_are_kept() {
        let store = MemoryResolutionStore::new();
        store
            .record_audit(&AuditEntry::success("propose", "acme/widgets", 4, "2 files"))
            .unwrap();
        assert_eq!(store.audit_entries().len(), 1);
    }
}
