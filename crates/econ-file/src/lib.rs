//! Structured data-file backend.
//!
//! The whole account set lives in an in-memory map which is the object of record
//! for the process lifetime. It is written to disk only on [`StorageBackend::flush`],
//! and only when something changed since the last write.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use econ_core::{AccountRecord, BackendKind, StorageBackend, StorageError};
use econ_core::{from_f64, to_f64};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredBalances {
    #[serde(rename = "Balances")]
    balances: BTreeMap<String, f64>,
}

/// Every layout the data file has had, newest first.
#[derive(Debug)]
enum DataFile {
    Current(StoredBalances),
    NumericKeyed(BTreeMap<u64, f64>),
}

impl DataFile {
    fn parse(contents: &str) -> Result<Self, StorageError> {
        if contents.trim().is_empty() {
            return Ok(DataFile::Current(StoredBalances::default()));
        }
        match serde_json::from_str::<StoredBalances>(contents) {
            Ok(stored) => Ok(DataFile::Current(stored)),
            Err(current_err) => serde_json::from_str::<BTreeMap<u64, f64>>(contents)
                .map(DataFile::NumericKeyed)
                .map_err(|_| StorageError::Corrupt(current_err.to_string())),
        }
    }

    /// Rewrites any older layout into string-keyed balances.
    fn into_balances(self) -> Result<(BTreeMap<String, Decimal>, bool), StorageError> {
        match self {
            DataFile::Current(stored) => {
                let mut balances = BTreeMap::new();
                for (id, value) in stored.balances {
                    balances.insert(id, from_f64(value)?);
                }
                Ok((balances, false))
            }
            DataFile::NumericKeyed(old) => {
                let migrated = !old.is_empty();
                let mut balances = BTreeMap::new();
                for (id, value) in old {
                    balances.entry(id.to_string()).or_insert(from_f64(value)?);
                }
                Ok((balances, migrated))
            }
        }
    }
}

pub struct FileStorage {
    path: PathBuf,
    balances: RwLock<BTreeMap<String, Decimal>>,
    dirty: AtomicBool,
    legacy_format: bool,
}

impl FileStorage {
    /// Loads the data file at `path`, or starts empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let (balances, legacy_format) = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            DataFile::parse(&contents)?.into_balances()?
        } else {
            (BTreeMap::new(), false)
        };

        if legacy_format {
            tracing::info!(path = %path.display(), accounts = balances.len(), "Migrated numeric-keyed data file");
        }

        Ok(Self {
            path,
            balances: RwLock::new(balances),
            // a migrated file must be rewritten in the current layout
            dirty: AtomicBool::new(legacy_format),
            legacy_format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file on disk was in the old numeric-keyed layout.
    pub fn legacy_format(&self) -> bool {
        self.legacy_format
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.balances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.read().is_empty()
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn write_file(&self) -> Result<(), StorageError> {
        let stored = {
            let balances = self.balances.read();
            let mut out = BTreeMap::new();
            for (id, value) in balances.iter() {
                out.insert(id.clone(), to_f64(*value)?);
            }
            StoredBalances { balances: out }
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&stored)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StorageBackend for FileStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn ensure_schema(&self) -> Result<bool, StorageError> {
        if self.path.exists() {
            return Ok(false);
        }
        self.write_file()?;
        tracing::debug!(path = %self.path.display(), "Created data file");
        Ok(true)
    }

    fn get(&self, id: &str) -> Result<Option<Decimal>, StorageError> {
        Ok(self.balances.read().get(id).copied())
    }

    fn set(&self, id: &str, value: Decimal) -> Result<(), StorageError> {
        self.balances.write().insert(id.to_string(), value);
        self.mark_dirty();
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        if self.balances.write().remove(id).is_some() {
            self.mark_dirty();
        }
        Ok(())
    }

    fn wipe(&self) -> Result<(), StorageError> {
        self.balances.write().clear();
        self.mark_dirty();
        Ok(())
    }

    fn bulk_adjust(&self, delta: Decimal) -> Result<u64, StorageError> {
        let mut balances = self.balances.write();
        let mut adjusted = Vec::with_capacity(balances.len());
        for (id, value) in balances.iter() {
            let next = value
                .checked_add(delta)
                .ok_or_else(|| StorageError::InvalidValue(format!("{} + {} overflows", id, delta)))?;
            adjusted.push(next);
        }
        for (value, next) in balances.values_mut().zip(adjusted) {
            *value = next;
        }
        if !balances.is_empty() {
            self.mark_dirty();
        }
        Ok(balances.len() as u64)
    }

    fn bulk_set(&self, value: Decimal) -> Result<u64, StorageError> {
        let mut balances = self.balances.write();
        for stored in balances.values_mut() {
            *stored = value;
        }
        if !balances.is_empty() {
            self.mark_dirty();
        }
        Ok(balances.len() as u64)
    }

    fn read_all(&self) -> Result<Vec<AccountRecord>, StorageError> {
        Ok(self
            .balances
            .read()
            .iter()
            .map(|(id, value)| (id.clone(), *value))
            .collect())
    }

    fn flush(&self) -> Result<(), StorageError> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(accounts = self.len(), path = %self.path.display(), "Saving balances");
        if let Err(e) = self.write_file() {
            self.mark_dirty();
            return Err(e);
        }
        Ok(())
    }
}
