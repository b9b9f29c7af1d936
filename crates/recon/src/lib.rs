//! `gatherstate-recon`: reconciles freshly gathered records against the
//! persisted last-known state.
//!
//! Pure engine crate: receives fresh records and a [`StateStore`] handle,
//! classifies records as added / changed / removed, applies the mutations as
//! two unordered batches and returns the [`DiffResults`]. No CLI or SQL.

pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod measure;
pub mod model;
pub mod record;
pub mod retention;
pub mod store;

pub use config::PassConfig;
pub use diff::{diff_fields, FieldDiff, ValueChange};
pub use engine::{reconcile, Reconciler};
pub use error::{
    BatchFailure, BatchKind, ConfigError, OpFailure, ReconcileError, RecordError, StoreError,
};
pub use hooks::{LogHooks, NoopHooks, PassStats, ReconcileHooks};
pub use measure::measure_json_size;
pub use model::{ChangedRecord, DiffResults, DiffSummary};
pub use record::{identical, FieldMap, IdentityFilter, IdentityIndex, Record};
pub use retention::{is_stale, RetentionPolicy};
pub use store::{BatchSummary, MemoryStore, StateStore, WriteOp};
