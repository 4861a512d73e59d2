//! Startup reconciliation between the data file and the configured store.
//!
//! Runs once before the ledger serves requests:
//!
//! * **file store**: load the data file (rewriting the old numeric-keyed layout),
//!   cap over-limit balances, prune unused accounts.
//! * **SQL store, fresh table**: load the data file the same way and import it.
//! * **SQL store, existing table**: prune unused rows if configured. The table
//!   stays the only copy; nothing is cached.

use std::{path::Path, sync::Arc};

use econ_core::{StorageBackend, StorageError};
use econ_file::FileStorage;
use econ_postgres::{PostgresOptions, PostgresStorage};
use econ_sqlite::SqliteStorage;

use crate::{
    config::Config,
    policy::{BackendSelection, Policy},
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// The store had to be created by this run.
    pub freshly_created: bool,
    /// The data file was in the old numeric-keyed layout.
    pub legacy_format: bool,
    pub imported: usize,
    /// Import rows whose id already existed in the SQL table.
    pub skipped: usize,
    pub clamped: usize,
    pub pruned: usize,
}

/// Opens the store named by the policy without touching its contents.
pub fn open_storage(config: &Config, policy: &Policy) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let storage: Arc<dyn StorageBackend> = match &policy.backend {
        BackendSelection::File { path } => Arc::new(FileStorage::open(path)?),
        BackendSelection::Sqlite { path } => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Arc::new(SqliteStorage::new(&path.to_string_lossy())?)
        }
        BackendSelection::NetworkSql(net) => Arc::new(PostgresStorage::new(&PostgresOptions {
            server: net.server.clone(),
            user: net.user.clone(),
            pass: net.pass.clone(),
            database: net.database.clone(),
            connect_timeout: config.sql_connect_timeout(),
            statement_timeout: config.sql_statement_timeout(),
            max_lifetime: config.sql_max_connection_lifetime(),
        })?),
    };
    tracing::info!(backend = %storage.kind(), "Opened balance store");
    Ok(storage)
}

/// Opens the configured store and runs the startup migration on it.
pub fn bootstrap(config: &Config, policy: &Policy) -> Result<(Arc<dyn StorageBackend>, MigrationReport), StorageError> {
    let data_file = config.data_file();
    let migrator = Migrator::new(policy, &data_file);

    if let BackendSelection::File { path } = &policy.backend {
        let storage = FileStorage::open(path)?;
        let report = migrator.run_file(&storage)?;
        return Ok((Arc::new(storage), report));
    }

    let storage = open_storage(config, policy)?;
    let report = migrator.run(storage.as_ref())?;
    Ok((storage, report))
}

pub struct Migrator<'a> {
    policy: &'a Policy,
    data_file: &'a Path,
}

impl<'a> Migrator<'a> {
    /// `data_file` is the structured data file, used as the import source for a
    /// fresh SQL table.
    pub fn new(policy: &'a Policy, data_file: &'a Path) -> Self {
        Self { policy, data_file }
    }

    pub fn run(&self, storage: &dyn StorageBackend) -> Result<MigrationReport, StorageError> {
        let report = if storage.kind().is_sql() {
            self.reconcile_sql(storage)?
        } else {
            self.sweep_file(storage)?
        };
        Self::log_report(storage, &report);
        Ok(report)
    }

    /// Same as [`Self::run`] for a file store, also reporting whether its data
    /// file had to be converted from the numeric-keyed layout.
    pub fn run_file(&self, storage: &FileStorage) -> Result<MigrationReport, StorageError> {
        let mut report = self.sweep_file(storage)?;
        report.legacy_format = storage.legacy_format();
        Self::log_report(storage, &report);
        Ok(report)
    }

    fn log_report(storage: &dyn StorageBackend, report: &MigrationReport) {
        tracing::info!(
            backend = %storage.kind(),
            fresh = report.freshly_created,
            legacy_format = report.legacy_format,
            imported = report.imported,
            skipped = report.skipped,
            clamped = report.clamped,
            pruned = report.pruned,
            "Startup migration finished"
        );
    }

    fn sweep_file(&self, storage: &dyn StorageBackend) -> Result<MigrationReport, StorageError> {
        let mut report = MigrationReport {
            freshly_created: storage.ensure_schema()?,
            ..MigrationReport::default()
        };
        self.normalise(storage, &mut report)?;
        Ok(report)
    }

    fn reconcile_sql(&self, storage: &dyn StorageBackend) -> Result<MigrationReport, StorageError> {
        let mut report = MigrationReport {
            freshly_created: storage.ensure_schema()?,
            ..MigrationReport::default()
        };

        if report.freshly_created {
            let source = FileStorage::open(self.data_file)?;
            report.legacy_format = source.legacy_format();
            self.normalise(&source, &mut report)?;

            for (id, value) in source.read_all()? {
                if storage.get(&id)?.is_some() {
                    report.skipped += 1;
                    continue;
                }
                storage.set(&id, value)?;
                report.imported += 1;
            }
            tracing::info!(
                imported = report.imported,
                path = %self.data_file.display(),
                "Imported data file into SQL store"
            );
        } else if self.policy.remove_unused {
            report.pruned = self.prune(storage)?;
        }

        Ok(report)
    }

    /// Caps over-limit balances, then prunes unused accounts if configured.
    fn normalise(&self, storage: &dyn StorageBackend, report: &mut MigrationReport) -> Result<(), StorageError> {
        for (id, value) in storage.read_all()? {
            if let Some(capped) = self.policy.cap(value) {
                storage.set(&id, capped)?;
                report.clamped += 1;
            }
        }
        if self.policy.remove_unused {
            report.pruned = self.prune(storage)?;
        }
        Ok(())
    }

    fn prune(&self, storage: &dyn StorageBackend) -> Result<usize, StorageError> {
        let mut pruned = 0;
        for (id, value) in storage.read_all()? {
            if self.policy.is_unused(value) {
                storage.delete(&id)?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::info!(pruned, "Removed unused accounts");
        }
        Ok(pruned)
    }
}
