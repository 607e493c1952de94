use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::data::{AssetId, Decision, DecisionLookup, DecisionStats};
use super::persist::{self, PersistedDecisions};
use crate::error::Result;

/// The DecisionStore owns every keep/delete decision ever made.
///
/// Decisions live in two buckets (kept and deleted); anything in neither
/// is `Unset`. Every mutation is written to disk before it returns. A
/// failed write is logged and returned, but the in-memory state keeps the
/// mutation and the next save writes everything again.
pub struct DecisionStore {
    path: PathBuf,
    kept: HashSet<AssetId>,
    deleted: HashSet<AssetId>,
    total_items_purged: u64,
    total_bytes_freed: u64,
    /// Derived; reset to `None` whenever the kept set changes membership
    kept_storage_bytes: Option<u64>,
    /// Bumped on every kept membership change, used to reject stale scans
    kept_generation: u64,
    /// Last save failed, so the next call must save even without a change
    dirty: bool,
}

/// Snapshot of the kept set handed to a background size computation
#[derive(Debug, Clone)]
pub struct KeptStorageScan {
    pub generation: u64,
    pub ids: Vec<AssetId>,
}

/// What reconciliation removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed_kept: Vec<AssetId>,
    pub removed_deleted: Vec<AssetId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.removed_kept.is_empty() && self.removed_deleted.is_empty()
    }

    /// Every identifier that vanished, from either bucket
    pub fn removed(&self) -> impl Iterator<Item = &AssetId> {
        self.removed_kept.iter().chain(self.removed_deleted.iter())
    }
}

impl DecisionStore {
    /// Open the store backed by `path`, loading whatever is there.
    ///
    /// A missing or corrupt file is not an error: the store starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let record = persist::load(&path);

        let mut deleted: HashSet<AssetId> = record.deleted_ids.into_iter().collect();
        let kept: HashSet<AssetId> = record.kept_ids.into_iter().collect();

        // A hand-edited file can list an item in both buckets; keeping wins
        let before = deleted.len();
        deleted.retain(|id| !kept.contains(id));
        if deleted.len() != before {
            warn!(
                count = before - deleted.len(),
                "Items were both kept and deleted on disk, treating them as kept"
            );
        }

        Self {
            path,
            kept,
            deleted,
            total_items_purged: record.total_items_purged,
            total_bytes_freed: record.total_bytes_freed,
            kept_storage_bytes: record.cached_kept_storage_bytes,
            kept_generation: 0,
            dirty: false,
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========== Mutations ==========

    pub fn mark_kept(&mut self, id: &str) -> Result<()> {
        let released = self.deleted.remove(id);
        let added = self.kept.insert(id.to_string());
        if added {
            self.kept_membership_changed();
        }
        debug!(id, "marked kept");
        self.persist_if(added || released)
    }

    pub fn mark_deleted(&mut self, id: &str) -> Result<()> {
        let was_kept = self.kept.remove(id);
        if was_kept {
            self.kept_membership_changed();
        }
        let added = self.deleted.insert(id.to_string());
        debug!(id, "marked deleted");
        self.persist_if(added || was_kept)
    }

    pub fn clear_decision(&mut self, id: &str) -> Result<()> {
        let was_kept = self.kept.remove(id);
        if was_kept {
            self.kept_membership_changed();
        }
        let was_deleted = self.deleted.remove(id);
        debug!(id, "decision cleared");
        self.persist_if(was_kept || was_deleted)
    }

    /// Apply any decision, dispatching to the matching mutation
    pub fn set_decision(&mut self, id: &str, decision: Decision) -> Result<()> {
        match decision {
            Decision::Kept => self.mark_kept(id),
            Decision::Deleted => self.mark_deleted(id),
            Decision::Unset => self.clear_decision(id),
        }
    }

    /// Record a purge the asset source has confirmed.
    ///
    /// Clears the deleted status of exactly `purged`, adds the totals, then
    /// drops kept items `still_exists` no longer reports. Replaying the same
    /// set is a no-op: totals are only added if at least one identifier in
    /// `purged` was still marked deleted. Returns whether anything was applied.
    pub fn commit_purge(
        &mut self,
        purged: &HashSet<AssetId>,
        items_purged: u64,
        bytes_freed: u64,
        still_exists: impl Fn(&str) -> bool,
    ) -> bool {
        let cleared = purged.iter().filter(|id| self.deleted.remove(*id)).count();
        if cleared == 0 {
            debug!("Purge already committed, nothing to apply");
            self.persist_quietly(false);
            return false;
        }

        self.total_items_purged += items_purged;
        self.total_bytes_freed += bytes_freed;
        info!(
            items = items_purged,
            bytes = bytes_freed,
            "🗑️  Committed purge of {} items",
            cleared
        );

        self.remove_vanished_kept(&still_exists);
        self.persist_quietly(true);
        true
    }

    /// Drop every decided identifier `still_exists` no longer reports.
    ///
    /// This is how items removed outside the engine fall out of the store.
    pub fn reconcile(&mut self, still_exists: impl Fn(&str) -> bool) -> ReconcileReport {
        let removed_kept = self.remove_vanished_kept(&still_exists);

        let removed_deleted: Vec<AssetId> = self
            .deleted
            .iter()
            .filter(|id| !still_exists(id.as_str()))
            .cloned()
            .collect();
        for id in &removed_deleted {
            self.deleted.remove(id);
        }

        let report = ReconcileReport {
            removed_kept,
            removed_deleted,
        };
        if !report.is_empty() {
            info!(
                kept = report.removed_kept.len(),
                deleted = report.removed_deleted.len(),
                "🔄 Reconciled decisions against vanished items"
            );
        }
        self.persist_quietly(!report.is_empty());
        report
    }

    fn remove_vanished_kept(&mut self, still_exists: &impl Fn(&str) -> bool) -> Vec<AssetId> {
        let vanished: Vec<AssetId> = self
            .kept
            .iter()
            .filter(|id| !still_exists(id.as_str()))
            .cloned()
            .collect();
        for id in &vanished {
            self.kept.remove(id);
        }
        if !vanished.is_empty() {
            self.kept_membership_changed();
        }
        vanished
    }

    // ========== Kept storage ==========

    /// Start a kept-storage computation, or `None` if the value is known
    pub fn begin_kept_storage_scan(&self) -> Option<KeptStorageScan> {
        if self.kept_storage_bytes.is_some() {
            return None;
        }
        let mut ids: Vec<AssetId> = self.kept.iter().cloned().collect();
        ids.sort();
        Some(KeptStorageScan {
            generation: self.kept_generation,
            ids,
        })
    }

    /// Store the result of a scan started with [`begin_kept_storage_scan`].
    ///
    /// If the kept set changed since the scan started the total is stale;
    /// it is dropped and the value stays unknown. Returns whether it was stored.
    ///
    /// [`begin_kept_storage_scan`]: DecisionStore::begin_kept_storage_scan
    pub fn finish_kept_storage_scan(&mut self, generation: u64, bytes: u64) -> bool {
        if generation != self.kept_generation {
            debug!(
                scan = generation,
                current = self.kept_generation,
                "Discarding stale kept storage total"
            );
            return false;
        }
        self.kept_storage_bytes = Some(bytes);
        self.persist_quietly(true);
        true
    }

    /// Synchronous recompute for callers that already have sizes at hand
    pub fn recompute_kept_storage(&mut self, byte_size: impl Fn(&str) -> Option<u64>) -> bool {
        let Some(scan) = self.begin_kept_storage_scan() else {
            return false;
        };
        let total = scan.ids.iter().filter_map(|id| byte_size(id.as_str())).sum();
        self.finish_kept_storage_scan(scan.generation, total)
    }

    fn kept_membership_changed(&mut self) {
        self.kept_storage_bytes = None;
        self.kept_generation += 1;
    }

    // ========== Queries ==========

    pub fn is_kept(&self, id: &str) -> bool {
        self.kept.contains(id)
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.deleted.contains(id)
    }

    /// Identifiers currently waiting for a purge
    pub fn deleted_ids(&self) -> HashSet<AssetId> {
        self.deleted.clone()
    }

    pub fn kept_ids(&self) -> Vec<AssetId> {
        self.kept.iter().cloned().collect()
    }

    /// Every identifier with a decision, kept first
    pub fn decided_ids(&self) -> Vec<AssetId> {
        self.kept.iter().chain(self.deleted.iter()).cloned().collect()
    }

    pub fn stats(&self) -> DecisionStats {
        DecisionStats {
            kept_count: self.kept.len(),
            deleted_count: self.deleted.len(),
            total_items_purged: self.total_items_purged,
            total_bytes_freed: self.total_bytes_freed,
            kept_storage_bytes: self.kept_storage_bytes,
        }
    }

    // ========== Persistence ==========

    fn persist_if(&mut self, changed: bool) -> Result<()> {
        if !changed && !self.dirty {
            return Ok(());
        }
        self.save()
    }

    /// For operations whose result is a report rather than a `Result`:
    /// `save` already logged the failure and the next save retries it.
    fn persist_quietly(&mut self, changed: bool) {
        self.persist_if(changed).ok();
    }

    /// Write the full state to disk now
    pub fn save(&mut self) -> Result<()> {
        let record = self.to_record();
        match persist::save(&self.path, &record) {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to save decisions, keeping them in memory"
                );
                self.dirty = true;
                Err(e)
            }
        }
    }

    /// True while the most recent save attempt failed
    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty
    }

    fn to_record(&self) -> PersistedDecisions {
        PersistedDecisions {
            kept_ids: self.kept.iter().cloned().collect(),
            deleted_ids: self.deleted.iter().cloned().collect(),
            last_updated: Utc::now(),
            total_items_purged: self.total_items_purged,
            total_bytes_freed: self.total_bytes_freed,
            cached_kept_storage_bytes: self.kept_storage_bytes,
        }
    }
}

impl DecisionLookup for DecisionStore {
    fn decision(&self, id: &str) -> Decision {
        if self.kept.contains(id) {
            Decision::Kept
        } else if self.deleted.contains(id) {
            Decision::Deleted
        } else {
            Decision::Unset
        }
    }
}

// Implement Debug without dumping every identifier
impl std::fmt::Debug for DecisionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionStore")
            .field("path", &self.path)
            .field("kept", &self.kept.len())
            .field("deleted", &self.deleted.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, DecisionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DecisionStore::open(dir.path().join("decisions.json"));
        (dir, store)
    }

    fn set(ids: &[&str]) -> HashSet<AssetId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_last_write_wins() {
        let (_dir, mut store) = store();
        store.mark_deleted("x").unwrap();
        store.mark_kept("x").unwrap();
        assert!(store.is_kept("x"));
        assert!(!store.is_deleted("x"));

        store.mark_deleted("x").unwrap();
        assert!(store.is_deleted("x"));
        assert!(!store.is_kept("x"));
    }

    #[test]
    fn test_clear_after_keep_is_undecided() {
        let (_dir, mut store) = store();
        store.mark_kept("x").unwrap();
        store.clear_decision("x").unwrap();
        assert!(!store.is_decided("x"));
        assert_eq!(store.decision("x"), Decision::Unset);
    }

    #[test]
    fn test_kept_storage_invalidated_only_on_membership_change() {
        let (_dir, mut store) = store();
        store.mark_kept("a").unwrap();
        assert!(store.recompute_kept_storage(|_| Some(10)));
        assert_eq!(store.stats().kept_storage_bytes, Some(10));

        // Already kept: no membership change
        store.mark_kept("a").unwrap();
        assert_eq!(store.stats().kept_storage_bytes, Some(10));

        // Deleting an item that was never kept leaves the kept set alone
        store.mark_deleted("b").unwrap();
        assert_eq!(store.stats().kept_storage_bytes, Some(10));

        store.mark_deleted("a").unwrap();
        assert_eq!(store.stats().kept_storage_bytes, None);
    }

    #[test]
    fn test_stale_scan_is_discarded() {
        let (_dir, mut store) = store();
        store.mark_kept("a").unwrap();
        let scan = store.begin_kept_storage_scan().unwrap();
        assert_eq!(scan.ids, vec!["a".to_string()]);

        // Kept set changes while the scan is running
        store.mark_kept("b").unwrap();
        assert!(!store.finish_kept_storage_scan(scan.generation, 100));
        assert_eq!(store.stats().kept_storage_bytes, None);

        let scan = store.begin_kept_storage_scan().unwrap();
        assert!(store.finish_kept_storage_scan(scan.generation, 200));
        assert_eq!(store.stats().kept_storage_bytes, Some(200));
        assert!(store.begin_kept_storage_scan().is_none());
    }

    #[test]
    fn test_commit_purge_applies_once() {
        let (_dir, mut store) = store();
        store.mark_deleted("a").unwrap();
        store.mark_deleted("b").unwrap();
        store.mark_deleted("c").unwrap();

        let purged = set(&["a", "b"]);
        assert!(store.commit_purge(&purged, 2, 2048, |_| true));
        assert!(!store.commit_purge(&purged, 2, 2048, |_| true));

        let stats = store.stats();
        assert_eq!(stats.total_items_purged, 2);
        assert_eq!(stats.total_bytes_freed, 2048);
        assert_eq!(stats.deleted_count, 1);
        assert!(store.is_deleted("c"));
    }

    #[test]
    fn test_commit_purge_reconciles_kept() {
        let (_dir, mut store) = store();
        store.mark_kept("keep").unwrap();
        store.mark_kept("gone").unwrap();
        store.mark_deleted("d").unwrap();

        assert!(store.commit_purge(&set(&["d"]), 1, 10, |id| id != "gone"));
        assert!(store.is_kept("keep"));
        assert!(!store.is_kept("gone"));
        assert_eq!(store.stats().kept_storage_bytes, None);
    }

    #[test]
    fn test_reconcile_removes_vanished() {
        let (_dir, mut store) = store();
        for id in ["a", "b", "c"] {
            store.mark_kept(id).unwrap();
        }
        store.mark_deleted("z").unwrap();
        store.recompute_kept_storage(|_| Some(1));

        let exists = set(&["a", "c"]);
        let report = store.reconcile(|id| exists.contains(id));

        assert_eq!(report.removed_kept, vec!["b".to_string()]);
        assert_eq!(report.removed_deleted, vec!["z".to_string()]);
        assert!(store.is_kept("a"));
        assert!(store.is_kept("c"));
        assert!(!store.is_kept("b"));
        assert_eq!(store.stats().kept_storage_bytes, None);
    }

    #[test]
    fn test_reconcile_without_removals_keeps_cache() {
        let (_dir, mut store) = store();
        store.mark_kept("a").unwrap();
        store.recompute_kept_storage(|_| Some(5));

        let report = store.reconcile(|_| true);
        assert!(report.is_empty());
        assert_eq!(store.stats().kept_storage_bytes, Some(5));
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.json");
        {
            let mut store = DecisionStore::open(&path);
            store.mark_kept("k").unwrap();
            store.mark_deleted("d").unwrap();
            store.mark_deleted("p").unwrap();
            store.commit_purge(&set(&["p"]), 1, 512, |_| true);
        }

        let store = DecisionStore::open(&path);
        assert!(store.is_kept("k"));
        assert!(store.is_deleted("d"));
        assert!(!store.is_decided("p"));
        assert_eq!(store.stats().total_items_purged, 1);
        assert_eq!(store.stats().total_bytes_freed, 512);
    }

    #[test]
    fn test_item_in_both_buckets_loads_as_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.json");
        std::fs::write(&path, r#"{ "keptIDs": ["x"], "deletedIDs": ["x", "y"] }"#).unwrap();

        let store = DecisionStore::open(&path);
        assert!(store.is_kept("x"));
        assert!(!store.is_deleted("x"));
        assert!(store.is_deleted("y"));
    }

    #[test]
    fn test_failed_save_keeps_memory_state_and_heals() {
        let dir = tempfile::tempdir().unwrap();
        // Parent is a regular file, so creating the directory fails
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let mut store = DecisionStore::open(blocker.join("decisions.json"));

        let err = store.mark_kept("a").unwrap_err();
        assert!(err.is_persistence());
        assert!(store.is_kept("a"));
        assert!(store.has_unsaved_changes());

        std::fs::remove_file(&blocker).unwrap();
        // No-op mutation still flushes the pending state
        store.mark_kept("a").unwrap();
        assert!(!store.has_unsaved_changes());
        assert!(DecisionStore::open(blocker.join("decisions.json")).is_kept("a"));
    }
}
