//! Package retention journal
//!
//! A machine-wide ledger of cached packages and the deployment tasks using
//! them, persisted as one JSON document and mutated only under the
//! cross-process journal lock.

pub mod identity;
pub mod manager;
pub mod model;
pub mod repository;

pub use identity::{PackageIdentity, PackageVersion, VersionFormat};
pub use manager::{PackageJournal, RetentionReport, DEFAULT_LOCK_NAME};
pub use model::{
    DeploymentTaskId, Journal, JournalEntry, UsageLock, JOURNAL_SCHEMA_VERSION, TASK_ID_ENV,
};
pub use repository::{JournalRepository, JsonJournalRepository};
