//! Store adapters for the two sides of a sync.
//!
//! - [`forms::FormsStore`]: the remote form-submission API (HTTP)
//! - [`sheet::SheetStore`]: the local spreadsheet mirror (CSV)
//!
//! The orchestrator holds a `Box<dyn RecordStore>` for the remote side and a
//! `Box<dyn MirrorStore>` for the mirror, and all snapshot/apply traffic goes
//! through these traits.

pub mod forms;
pub mod sheet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::record::{FieldChanges, Record, RecordSet};

/// One side of a sync: full enumeration plus per-entry change application.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Human-readable store name (e.g., "forms", "sheet"), used in logs and
    /// error messages.
    fn store_name(&self) -> &str;

    /// Full snapshot of the store's records.
    async fn list_records(&self) -> Result<RecordSet, StoreError>;

    /// Snapshot filtered to entries modified since `since`, best-effort.
    ///
    /// Backends without server-side filtering return everything; callers must
    /// reconcile correctly against a full set either way. A filtered snapshot
    /// must never feed absence-driven deletion: every entry the filter drops
    /// would read as deleted.
    async fn list_records_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<RecordSet, StoreError> {
        let _ = since;
        self.list_records().await
    }

    /// Field-merge a sparse patch into the identified record. Idempotent when
    /// retried with the same patch.
    async fn apply_patch(&self, id: &str, changes: &FieldChanges) -> Result<(), StoreError>;

    /// Add a record and return the store-assigned identifier.
    async fn insert_record(&self, record: &Record) -> Result<String, StoreError>;

    /// Remove the identified record. Deleting an identifier that does not
    /// exist is a success.
    async fn delete_record(&self, id: &str) -> Result<(), StoreError>;
}

/// Extra surface only the spreadsheet mirror provides.
#[async_trait]
pub trait MirrorStore: RecordStore {
    /// Whether the mirror file exists yet.
    fn exists(&self) -> bool;

    /// Write a remote-assigned identifier onto an existing unidentified data
    /// row. Without this writeback the next pull would fail to match the row
    /// and create a duplicate upstream.
    async fn bind_identifier(&self, row: usize, id: &str) -> Result<(), StoreError>;
}
