//! Durable storage for run history, test cases and step evidence.
//!
//! - `SqliteRunStore`: authoritative run / step / suite-run history
//! - `SqliteCaseCatalog`: read access to test cases and suite membership
//! - `FsEvidenceSink`: step screenshots on disk

mod catalog;
mod evidence;
mod sqlite;
mod traits;

pub use catalog::SqliteCaseCatalog;
pub use evidence::{EvidenceRef, EvidenceSink, FsEvidenceSink};
pub use sqlite::SqliteRunStore;
pub use traits::{CaseSource, DurableStore, RunFilter, StoreError, TestCase};
