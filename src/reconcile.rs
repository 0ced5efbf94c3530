//! The reconciliation engine.
//!
//! [`reconcile`] compares two snapshots of the same logical record set and
//! produces the minimal set of updates, insertions, and deletions that bring
//! the baseline into agreement with the candidate. It is a pure function:
//! no I/O, no mutation of its inputs, and the only failure mode is a
//! duplicate identifier inside one of the snapshots.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{ReconcileError, Side};
use crate::record::{FieldChanges, FieldValue, Record, RecordSet, FIELD_STATUS, RESERVED_FIELDS};

/// Comparison and deletion policy knobs, scoped per sync direction.
///
/// A pull treats identifier absence upstream as deletion; a push only ever
/// deletes rows the user explicitly marked with the soft-delete sentinel.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Surface baseline identifiers missing from the candidate as deletions.
    pub delete_on_absence: bool,
    /// Surface candidate records whose `Status` is the deletion sentinel as
    /// deletions, and exclude them from updates/insertions.
    pub honor_soft_delete: bool,
    /// Include the `Status` field in field comparison. Disabled on a push,
    /// where the remote store assigns `Status` and a patch carrying it would
    /// never land, so the same patch would be re-emitted on every run.
    pub compare_status: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            delete_on_absence: true,
            honor_soft_delete: false,
            compare_status: true,
        }
    }
}

/// Sparse update for one identified record: only the changed fields.
///
/// Applied by field-merge, never by whole-record overwrite. An
/// [`FieldValue::Absent`] change clears the field.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPatch {
    pub id: String,
    pub changes: FieldChanges,
}

/// The three-way diff produced by [`reconcile`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileResult {
    /// Sparse patches for identified records present on both sides.
    pub updated: Vec<RecordPatch>,
    /// Candidate records unknown to the baseline (or unidentified).
    pub inserted: Vec<Record>,
    /// Identifiers to remove from the baseline side.
    pub deleted: Vec<String>,
}

impl ReconcileResult {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.inserted.is_empty() && self.deleted.is_empty()
    }
}

/// Diff `candidate` against `baseline`.
///
/// Runs in O(|baseline| + |candidate|): one identifier index is built over
/// the baseline, then every candidate record is matched in O(1).
pub fn reconcile(
    baseline: &RecordSet,
    candidate: &RecordSet,
    options: ReconcileOptions,
) -> Result<ReconcileResult, ReconcileError> {
    let baseline_index = index_by_id(baseline, Side::Baseline)?;
    check_unique_ids(candidate, Side::Candidate)?;

    let mut result = ReconcileResult::default();
    let mut deleted_seen: HashSet<&str> = HashSet::new();

    for record in candidate {
        if options.honor_soft_delete && record.marked_deleted() {
            // Marked rows are deletion targets only; an unidentified marked
            // row has nothing to delete and is dropped.
            if let Some(id) = record.id() {
                if deleted_seen.insert(id) {
                    result.deleted.push(id.to_string());
                }
            }
            continue;
        }

        match record.id() {
            Some(id) => match baseline_index.get(id) {
                Some(base) => {
                    let changes = diff_fields(base, record, options);
                    if !changes.is_empty() {
                        result.updated.push(RecordPatch {
                            id: id.to_string(),
                            changes,
                        });
                    }
                }
                None => result.inserted.push(record.clone()),
            },
            None => {
                if !record.is_blank() {
                    result.inserted.push(record.clone());
                }
            }
        }
    }

    if options.delete_on_absence {
        let candidate_ids: HashSet<&str> = candidate.iter().filter_map(Record::id).collect();
        for record in baseline {
            if let Some(id) = record.id() {
                if !candidate_ids.contains(id) && deleted_seen.insert(id) {
                    result.deleted.push(id.to_string());
                }
            }
        }
    }

    Ok(result)
}

/// Compare the union of field names across one identified pair, skipping the
/// reserved bookkeeping columns (and `Status` when the direction excludes
/// it). The patch always carries the candidate's value, normalized to
/// `Absent` when the candidate side is absent-equivalent.
fn diff_fields(baseline: &Record, candidate: &Record, options: ReconcileOptions) -> FieldChanges {
    let names: BTreeSet<&str> = baseline
        .field_names()
        .chain(candidate.field_names())
        .filter(|name| !RESERVED_FIELDS.contains(name))
        .filter(|name| options.compare_status || *name != FIELD_STATUS)
        .collect();

    let mut changes = FieldChanges::new();
    for name in names {
        let before = baseline.get(name);
        let after = candidate.get(name);
        match (before.is_absent(), after.is_absent()) {
            (true, true) => {}
            (_, true) => {
                changes.insert(name.to_string(), FieldValue::Absent);
            }
            (true, false) => {
                changes.insert(name.to_string(), after.clone());
            }
            (false, false) => {
                if before != after {
                    changes.insert(name.to_string(), after.clone());
                }
            }
        }
    }
    changes
}

fn index_by_id(set: &RecordSet, side: Side) -> Result<HashMap<&str, &Record>, ReconcileError> {
    let mut index = HashMap::with_capacity(set.len());
    for record in set {
        if let Some(id) = record.id() {
            if index.insert(id, record).is_some() {
                return Err(ReconcileError::DuplicateIdentifier {
                    side,
                    id: id.to_string(),
                });
            }
        }
    }
    Ok(index)
}

fn check_unique_ids(set: &RecordSet, side: Side) -> Result<(), ReconcileError> {
    let mut seen = HashSet::with_capacity(set.len());
    for record in set {
        if let Some(id) = record.id() {
            if !seen.insert(id) {
                return Err(ReconcileError::DuplicateIdentifier {
                    side,
                    id: id.to_string(),
                });
            }
        }
    }
    Ok(())
}
