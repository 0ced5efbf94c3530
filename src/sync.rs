//! Sync orchestration.
//!
//! [`Syncer`] drives the reconciliation engine once per direction: it pulls
//! the two snapshots, diffs them, applies the diff through the store that
//! owns the destination side, and persists the watermark. Per-entry apply
//! failures are logged and excluded from the returned counts; they never
//! abort the remaining entries. Snapshot failures and invariant violations
//! abort the direction with the watermark untouched.
//!
//! `pull` and `push` must not run concurrently against the same mirror file;
//! the CSV adapter has no cross-handle consistency guarantee.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{StoreError, SyncError};
use crate::reconcile::{reconcile, ReconcileOptions, ReconcileResult};
use crate::store::forms::FormsStore;
use crate::store::sheet::SheetStore;
use crate::store::{MirrorStore, RecordStore};
use crate::watermark::WatermarkFile;

/// Entries for which the destination-store call succeeded, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    pub updated: usize,
    pub inserted: usize,
    pub deleted: usize,
}

/// Diagnostic snapshot for the `status` command. Unreachable sides read as
/// `None` rather than failing the report.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub last_sync: Option<DateTime<Utc>>,
    pub mirror_exists: bool,
    pub mirror_rows: Option<usize>,
    pub remote_entries: Option<usize>,
}

pub struct Syncer {
    remote: Box<dyn RecordStore>,
    mirror: Box<dyn MirrorStore>,
    watermark: WatermarkFile,
}

impl Syncer {
    pub fn new(
        remote: Box<dyn RecordStore>,
        mirror: Box<dyn MirrorStore>,
        watermark: WatermarkFile,
    ) -> Self {
        Self {
            remote,
            mirror,
            watermark,
        }
    }

    /// Wire up the production adapters from configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !config.forms.api_key.is_empty(),
            "form API key not configured; run `formsheet setup --api-key <KEY>`"
        );
        anyhow::ensure!(
            !config.sheet.path.is_empty(),
            "spreadsheet path not configured; run `formsheet setup --sheet-path <PATH>`"
        );

        let remote = FormsStore::new(
            &config.forms.api_key,
            &config.forms.form_id,
            &config.forms.base_url,
        );
        let mirror = SheetStore::new(&config.sheet.path);
        let watermark = WatermarkFile::for_mirror(mirror.path());

        Ok(Self::new(Box::new(remote), Box::new(mirror), watermark))
    }

    /// Remote -> mirror. Baseline is the mirror, candidate the complete
    /// remote set. Rows whose identifier disappeared upstream are removed
    /// from the mirror, which is exactly why the candidate snapshot is never
    /// watermark-filtered here.
    pub async fn pull(&self) -> Result<SyncCounts, SyncError> {
        // Watermark is stamped at orchestration start so entries modified
        // during a long sync are not missed by the next one.
        let started = Utc::now();
        let since = self.watermark.load().map_err(SyncError::State)?;

        let options = ReconcileOptions {
            delete_on_absence: true,
            honor_soft_delete: false,
            compare_status: true,
        };

        let baseline = self
            .mirror
            .list_records()
            .await
            .map_err(|e| self.unavailable(self.mirror.store_name(), e))?;
        // Absence-deletion reads a missing identifier as a deletion, so it
        // needs the complete remote set; a watermark-filtered snapshot would
        // read every unmodified entry as deleted.
        let candidate = if options.delete_on_absence {
            self.remote.list_records().await
        } else {
            self.remote.list_records_since(since).await
        }
        .map_err(|e| self.unavailable(self.remote.store_name(), e))?;

        let diff = reconcile(&baseline, &candidate, options)?;
        info!(
            updated = diff.updated.len(),
            inserted = diff.inserted.len(),
            deleted = diff.deleted.len(),
            "pull diff computed"
        );

        let counts = self.apply_to_mirror(&diff).await;
        self.watermark.store(started).map_err(SyncError::State)?;
        Ok(counts)
    }

    /// Mirror -> remote. Baseline is the remote set, candidate the mirror.
    /// Remote deletions are driven only by rows the user marked with the
    /// soft-delete sentinel, never by rows missing from the mirror.
    pub async fn push(&self) -> Result<SyncCounts, SyncError> {
        let started = Utc::now();

        let baseline = self
            .remote
            .list_records()
            .await
            .map_err(|e| self.unavailable(self.remote.store_name(), e))?;
        let candidate = self
            .mirror
            .list_records()
            .await
            .map_err(|e| self.unavailable(self.mirror.store_name(), e))?;

        let diff = reconcile(
            &baseline,
            &candidate,
            ReconcileOptions {
                delete_on_absence: false,
                honor_soft_delete: true,
                // Store-assigned on the remote; a patch carrying it would
                // never land and the push would re-count it forever.
                compare_status: false,
            },
        )?;
        info!(
            updated = diff.updated.len(),
            inserted = diff.inserted.len(),
            deleted = diff.deleted.len(),
            "push diff computed"
        );

        let mut counts = SyncCounts::default();

        for patch in &diff.updated {
            match self.remote.apply_patch(&patch.id, &patch.changes).await {
                Ok(()) => counts.updated += 1,
                Err(e) => warn!(id = %patch.id, error = %e, "failed to update remote entry"),
            }
        }

        for record in &diff.inserted {
            let id = match self.remote.insert_record(record).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "failed to create remote entry");
                    continue;
                }
            };
            counts.inserted += 1;
            // Without the writeback the next pull cannot match this row and
            // would create a duplicate upstream.
            match record.row() {
                Some(row) => {
                    if let Err(e) = self.mirror.bind_identifier(row, &id).await {
                        warn!(
                            row,
                            id = %id,
                            error = %e,
                            "created remote entry but could not write its identifier to the mirror"
                        );
                    }
                }
                None => warn!(id = %id, "created remote entry has no originating mirror row"),
            }
        }

        for id in &diff.deleted {
            match self.remote.delete_record(id).await {
                Ok(()) => counts.deleted += 1,
                Err(e) => warn!(id = %id, error = %e, "failed to delete remote entry"),
            }
        }

        self.watermark.store(started).map_err(SyncError::State)?;
        Ok(counts)
    }

    /// Best-effort report for the `status` command.
    pub async fn status(&self) -> SyncStatus {
        let last_sync = self.watermark.load().ok().flatten();
        let mirror_rows = self.mirror.list_records().await.ok().map(|s| s.len());
        let remote_entries = self.remote.list_records().await.ok().map(|s| s.len());
        SyncStatus {
            last_sync,
            mirror_exists: self.mirror.exists(),
            mirror_rows,
            remote_entries,
        }
    }

    async fn apply_to_mirror(&self, diff: &ReconcileResult) -> SyncCounts {
        let mut counts = SyncCounts::default();

        for patch in &diff.updated {
            match self.mirror.apply_patch(&patch.id, &patch.changes).await {
                Ok(()) => counts.updated += 1,
                Err(e) => warn!(id = %patch.id, error = %e, "failed to update mirror row"),
            }
        }
        for record in &diff.inserted {
            match self.mirror.insert_record(record).await {
                Ok(_) => counts.inserted += 1,
                Err(e) => warn!(error = %e, "failed to append mirror row"),
            }
        }
        for id in &diff.deleted {
            match self.mirror.delete_record(id).await {
                Ok(()) => counts.deleted += 1,
                Err(e) => warn!(id = %id, error = %e, "failed to delete mirror row"),
            }
        }
        counts
    }

    fn unavailable(&self, store: &str, source: StoreError) -> SyncError {
        SyncError::StoreUnavailable {
            store: store.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::record::{
        FieldChanges, FieldValue, Record, RecordSet, FIELD_ID, FIELD_STATUS, STATUS_DELETED,
    };

    /// In-memory store fake. `mint_ids` makes it behave like the remote
    /// (assigning identifiers on insert); without it, like the mirror.
    struct MemoryStore {
        name: &'static str,
        records: Mutex<Vec<Record>>,
        mint_ids: bool,
        next_id: Mutex<u32>,
        fail_list: bool,
        /// Honor the `since` filter by returning nothing once a watermark
        /// exists, as a backend with server-side filtering would when no
        /// entry changed.
        honor_since: bool,
        /// Inserts fail for records whose `Name` field matches.
        fail_insert_names: Vec<String>,
    }

    impl MemoryStore {
        fn new(name: &'static str, records: Vec<Record>) -> Self {
            Self {
                name,
                records: Mutex::new(records),
                mint_ids: false,
                next_id: Mutex::new(0),
                fail_list: false,
                honor_since: false,
                fail_insert_names: Vec::new(),
            }
        }

        fn minting(mut self) -> Self {
            self.mint_ids = true;
            self
        }

        fn failing_list(mut self) -> Self {
            self.fail_list = true;
            self
        }

        fn filtering_since(mut self) -> Self {
            self.honor_since = true;
            self
        }

        fn failing_inserts_named(mut self, name: &str) -> Self {
            self.fail_insert_names.push(name.to_string());
            self
        }

        fn snapshot(&self) -> Vec<Record> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordStore for Arc<MemoryStore> {
        fn store_name(&self) -> &str {
            self.name
        }

        async fn list_records(&self) -> Result<RecordSet, StoreError> {
            if self.fail_list {
                return Err(StoreError::Api {
                    status: 503,
                    body: "down".to_string(),
                });
            }
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .enumerate()
                .map(|(i, r)| r.clone().at_row(i))
                .collect())
        }

        async fn list_records_since(
            &self,
            since: Option<DateTime<Utc>>,
        ) -> Result<RecordSet, StoreError> {
            if self.honor_since && since.is_some() {
                return Ok(RecordSet::new());
            }
            self.list_records().await
        }

        async fn apply_patch(&self, id: &str, changes: &FieldChanges) -> Result<(), StoreError> {
            let mut records = self.records.lock().unwrap();
            let target = records
                .iter_mut()
                .find(|r| r.id() == Some(id))
                .ok_or_else(|| StoreError::RowNotFound(id.to_string()))?;
            for (name, value) in changes {
                target.set(name.clone(), value.clone());
            }
            Ok(())
        }

        async fn insert_record(&self, record: &Record) -> Result<String, StoreError> {
            if let FieldValue::Text(name) = record.get("Name") {
                if self.fail_insert_names.contains(name) {
                    return Err(StoreError::Api {
                        status: 500,
                        body: "rejected".to_string(),
                    });
                }
            }
            let mut stored = record.clone();
            let id = if self.mint_ids {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                let id = format!("r{next}");
                stored.set(FIELD_ID, FieldValue::text(id.clone()));
                id
            } else {
                record
                    .id()
                    .ok_or(StoreError::MissingIdentifier)?
                    .to_string()
            };
            self.records.lock().unwrap().push(stored);
            Ok(id)
        }

        async fn delete_record(&self, id: &str) -> Result<(), StoreError> {
            let mut records = self.records.lock().unwrap();
            records.retain(|r| r.id() != Some(id));
            Ok(())
        }
    }

    #[async_trait]
    impl MirrorStore for Arc<MemoryStore> {
        fn exists(&self) -> bool {
            true
        }

        async fn bind_identifier(&self, row: usize, id: &str) -> Result<(), StoreError> {
            let mut records = self.records.lock().unwrap();
            let target = records.get_mut(row).ok_or(StoreError::RowOutOfRange(row))?;
            target.set(FIELD_ID, FieldValue::text(id));
            Ok(())
        }
    }

    struct Fixture {
        remote: Arc<MemoryStore>,
        mirror: Arc<MemoryStore>,
        syncer: Syncer,
        _dir: TempDir,
    }

    impl Fixture {
        fn new(remote: MemoryStore, mirror: MemoryStore) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let watermark = WatermarkFile::new(dir.path().join("state.toml"));
            let remote = Arc::new(remote);
            let mirror = Arc::new(mirror);
            let syncer = Syncer::new(
                Box::new(remote.clone()),
                Box::new(mirror.clone()),
                watermark.clone(),
            );
            Self {
                remote,
                mirror,
                syncer,
                _dir: dir,
            }
        }

        fn watermark(&self) -> WatermarkFile {
            WatermarkFile::new(self._dir.path().join("state.toml"))
        }
    }

    fn booking(id: &str, name: &str, guests: f64) -> Record {
        Record::with_id(id)
            .field("Name", FieldValue::text(name))
            .field("Guests", FieldValue::Number(guests))
    }

    #[tokio::test]
    async fn test_pull_populates_empty_mirror() {
        let fx = Fixture::new(
            MemoryStore::new("forms", vec![booking("1", "A", 4.0), booking("2", "B", 8.0)]),
            MemoryStore::new("sheet", vec![]),
        );

        let counts = fx.syncer.pull().await.unwrap();
        assert_eq!(
            counts,
            SyncCounts {
                updated: 0,
                inserted: 2,
                deleted: 0
            }
        );
        assert_eq!(fx.mirror.snapshot().len(), 2);
        assert!(fx.watermark().load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pull_updates_and_deletes_by_absence() {
        let fx = Fixture::new(
            MemoryStore::new("forms", vec![booking("1", "A", 12.0)]),
            MemoryStore::new("sheet", vec![booking("1", "A", 4.0), booking("2", "B", 8.0)]),
        );

        let counts = fx.syncer.pull().await.unwrap();
        assert_eq!(
            counts,
            SyncCounts {
                updated: 1,
                inserted: 0,
                deleted: 1
            }
        );

        let mirror = fx.mirror.snapshot();
        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror[0].id(), Some("1"));
        assert_eq!(*mirror[0].get("Guests"), FieldValue::Number(12.0));
    }

    #[tokio::test]
    async fn test_push_insert_binds_remote_identifier() {
        let fx = Fixture::new(
            MemoryStore::new("forms", vec![]).minting(),
            MemoryStore::new(
                "sheet",
                vec![Record::new().field("Name", FieldValue::text("Walk-in"))],
            ),
        );

        let counts = fx.syncer.push().await.unwrap();
        assert_eq!(counts.inserted, 1);

        let remote = fx.remote.snapshot();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].id(), Some("r1"));

        // The mirror row received the remote-assigned identifier, so the
        // next pull matches it instead of duplicating it.
        let mirror = fx.mirror.snapshot();
        assert_eq!(mirror[0].id(), Some("r1"));
    }

    #[tokio::test]
    async fn test_push_deletes_only_soft_deleted_rows() {
        let fx = Fixture::new(
            MemoryStore::new("forms", vec![booking("1", "A", 4.0), booking("2", "B", 8.0)]),
            MemoryStore::new(
                "sheet",
                vec![booking("1", "A", 4.0).field(FIELD_STATUS, FieldValue::text(STATUS_DELETED))],
            ),
        );

        let counts = fx.syncer.push().await.unwrap();
        assert_eq!(counts.deleted, 1);
        assert_eq!(counts.updated, 0);

        // "1" deleted via the sentinel; "2" kept despite being absent from
        // the mirror.
        let remote = fx.remote.snapshot();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].id(), Some("2"));
    }

    #[tokio::test]
    async fn test_partial_insert_failure_still_counts_and_advances_watermark() {
        let fx = Fixture::new(
            MemoryStore::new(
                "forms",
                vec![
                    booking("1", "A", 1.0),
                    booking("2", "poison", 2.0),
                    booking("3", "C", 3.0),
                ],
            ),
            MemoryStore::new("sheet", vec![]).failing_inserts_named("poison"),
        );

        let counts = fx.syncer.pull().await.unwrap();
        assert_eq!(counts.inserted, 2);
        assert_eq!(fx.mirror.snapshot().len(), 2);
        assert!(fx.watermark().load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_identifier_aborts_without_watermark() {
        let fx = Fixture::new(
            MemoryStore::new("forms", vec![booking("7", "A", 1.0), booking("7", "B", 2.0)]),
            MemoryStore::new("sheet", vec![]),
        );

        let err = fx.syncer.pull().await.unwrap_err();
        assert!(matches!(err, SyncError::Reconcile(_)));
        assert!(fx.mirror.snapshot().is_empty());
        assert!(fx.watermark().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_remote_aborts_without_watermark() {
        let fx = Fixture::new(
            MemoryStore::new("forms", vec![]).failing_list(),
            MemoryStore::new("sheet", vec![booking("1", "A", 1.0)]),
        );

        let err = fx.syncer.pull().await.unwrap_err();
        match err {
            SyncError::StoreUnavailable { store, .. } => assert_eq!(store, "forms"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(fx.watermark().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_ignores_mirror_status_edits() {
        let fx = Fixture::new(
            MemoryStore::new(
                "forms",
                vec![booking("1", "A", 4.0).field(FIELD_STATUS, FieldValue::text("Submitted"))],
            ),
            MemoryStore::new(
                "sheet",
                vec![booking("1", "A", 4.0).field(FIELD_STATUS, FieldValue::text("Confirmed"))],
            ),
        );

        // The remote assigns Status, so a mirror-side edit to it must not
        // count as an update on every push.
        let counts = fx.syncer.push().await.unwrap();
        assert_eq!(counts, SyncCounts::default());
        assert_eq!(
            *fx.remote.snapshot()[0].get(FIELD_STATUS),
            FieldValue::text("Submitted")
        );
    }

    #[tokio::test]
    async fn test_pull_deletion_scan_uses_full_remote_listing() {
        let fx = Fixture::new(
            MemoryStore::new("forms", vec![booking("1", "A", 4.0)]).filtering_since(),
            MemoryStore::new("sheet", vec![]),
        );

        fx.syncer.pull().await.unwrap();

        // Nothing changed upstream; a watermark-filtered snapshot must not
        // read the unmodified entry as deleted.
        let counts = fx.syncer.pull().await.unwrap();
        assert_eq!(counts, SyncCounts::default());
        assert_eq!(fx.mirror.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_pull_is_a_noop() {
        let fx = Fixture::new(
            MemoryStore::new("forms", vec![booking("1", "A", 4.0)]),
            MemoryStore::new("sheet", vec![]),
        );

        fx.syncer.pull().await.unwrap();
        let counts = fx.syncer.pull().await.unwrap();
        assert_eq!(counts, SyncCounts::default());
    }

    #[tokio::test]
    async fn test_status_reports_both_sides() {
        let fx = Fixture::new(
            MemoryStore::new("forms", vec![booking("1", "A", 4.0), booking("2", "B", 8.0)]),
            MemoryStore::new("sheet", vec![booking("1", "A", 4.0)]),
        );

        let status = fx.syncer.status().await;
        assert!(status.mirror_exists);
        assert_eq!(status.mirror_rows, Some(1));
        assert_eq!(status.remote_entries, Some(2));
        assert!(status.last_sync.is_none());
    }

    #[tokio::test]
    async fn test_status_degrades_when_remote_is_down() {
        let fx = Fixture::new(
            MemoryStore::new("forms", vec![]).failing_list(),
            MemoryStore::new("sheet", vec![]),
        );

        let status = fx.syncer.status().await;
        assert_eq!(status.remote_entries, None);
        assert_eq!(status.mirror_rows, Some(0));
    }
}
