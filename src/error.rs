//! Error types for the sync core.

use thiserror::Error;

/// Which input snapshot of a `reconcile` call an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Baseline,
    Candidate,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Baseline => write!(f, "baseline"),
            Side::Candidate => write!(f, "candidate"),
        }
    }
}

/// Errors from the reconciliation engine itself.
///
/// The engine performs no I/O; the only failure is a violated snapshot
/// invariant, which must abort the sync direction rather than be swallowed.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Two records in one snapshot carry the same identifier.
    #[error("duplicate identifier {id:?} in {side} snapshot")]
    DuplicateIdentifier { side: Side, id: String },
}

/// Errors raised by a store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The form API answered with a non-success status.
    #[error("form API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The form API answered 2xx but the payload was not what we expect.
    #[error("unexpected form API payload: {0}")]
    Payload(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Patch target does not exist in the store.
    #[error("no row with identifier {0:?}")]
    RowNotFound(String),

    /// Mirror row handle no longer points at a data row.
    #[error("mirror row {0} is out of range")]
    RowOutOfRange(usize),

    /// The mirror does not mint identifiers; inserting an identifier-less
    /// record into it is a caller bug.
    #[error("record has no identifier")]
    MissingIdentifier,
}

/// Errors fatal to a whole sync direction.
///
/// Per-entry apply failures are *not* represented here: the orchestrator
/// logs them and excludes them from the success counts, but they never abort
/// sibling entries.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// Snapshot listing failed; no partial work is done and the watermark is
    /// left untouched.
    #[error("{store} store unavailable: {source}")]
    StoreUnavailable {
        store: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to persist sync state: {0}")]
    State(#[source] anyhow::Error),
}
