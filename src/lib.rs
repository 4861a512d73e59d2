//! Account balance ledger over interchangeable storage backends.

pub mod config;
pub mod events;
pub mod ledger;
pub mod migration;
pub mod policy;
pub mod txlog;

pub use econ_core::{BackendKind, StorageBackend, StorageError};
pub use events::{EventSink, LedgerEvent, TracingEventSink};
pub use ledger::{AccountId, LedgerResult, LedgerService, Outcome};
pub use migration::{bootstrap, MigrationReport, Migrator};
pub use policy::{BackendSelection, Policy, Rejection};
pub use txlog::{TransactionKind, TransactionLog};
