use std::fmt::Display;

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt data file: {0}")]
    Corrupt(String),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    File,
    Sqlite,
    Postgres,
}

impl BackendKind {
    /// SQL backends are read and written per operation; nothing is cached in process.
    pub fn is_sql(&self) -> bool {
        matches!(self, BackendKind::Sqlite | BackendKind::Postgres)
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BackendKind::File => "file",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Postgres => "postgres",
        })
    }
}

/// A single `(id, balance)` row as returned by a full scan.
pub type AccountRecord = (String, Decimal);

/// Uniform account-store contract shared by every persistence engine.
///
/// Implementations never apply limits or rounding policy of their own; values are
/// stored as handed over. Absence of a record is `Ok(None)`, never an error.
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Creates the table or file if absent. Returns `true` only when the store was
    /// freshly created by this call.
    fn ensure_schema(&self) -> Result<bool, StorageError>;

    fn get(&self, id: &str) -> Result<Option<Decimal>, StorageError>;
    fn set(&self, id: &str, value: Decimal) -> Result<(), StorageError>;
    fn delete(&self, id: &str) -> Result<(), StorageError>;
    fn wipe(&self) -> Result<(), StorageError>;

    /// Applies `value += delta` to every record and returns the number of records.
    fn bulk_adjust(&self, delta: Decimal) -> Result<u64, StorageError>;
    /// Overwrites every record with `value` and returns the number of records.
    fn bulk_set(&self, value: Decimal) -> Result<u64, StorageError>;

    /// Full scan, for startup sweeps only.
    fn read_all(&self) -> Result<Vec<AccountRecord>, StorageError>;

    /// Persists pending changes. Stores that write through on every call have
    /// nothing to do here.
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
