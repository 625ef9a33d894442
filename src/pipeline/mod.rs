//! Reconciliation pipeline.
//!
//! - `merge`: idempotent event merge
//! - `reconcile`: the periodic job that syncs shipments with carriers

pub mod merge;
pub mod reconcile;

pub use merge::{events_to_write, merge_timeline, sort_timeline};
pub use reconcile::{ReconcileOptions, Reconciler, RunSummary};
