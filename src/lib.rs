//! Two-way sync between a form-submission API and a spreadsheet mirror.
//!
//! The crate is built around one pure function, [`reconcile::reconcile`],
//! which diffs two snapshots of the same booking set under a null-aware
//! equality rule. Everything else is plumbing: [`store`] adapters for the
//! two sides, the [`sync::Syncer`] that drives a diff per direction and
//! applies it, and the [`watermark`] file bounding incremental pulls.

pub mod config;
pub mod error;
pub mod reconcile;
pub mod record;
pub mod store;
pub mod sync;
pub mod watermark;
