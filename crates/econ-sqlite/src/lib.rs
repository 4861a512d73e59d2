use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

pub use econ_core::{AccountRecord, BackendKind, StorageBackend, StorageError};
use econ_core::{from_f64, to_f64};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Embedded SQL store over a single `balances(playerid, value)` table.
///
/// One connection is opened at construction and held for the lifetime of the
/// store; every operation is a single statement against it.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

impl SqliteStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        tracing::debug!(path, "Opened SQLite database");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn count(conn: &Connection) -> Result<u64, StorageError> {
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM balances", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

impl StorageBackend for SqliteStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn ensure_schema(&self) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'balances'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?
            .is_some();
        if found {
            return Ok(false);
        }

        conn.execute_batch(
            "
            DROP TABLE IF EXISTS balances;
            CREATE TABLE balances (playerid VARCHAR(32), value DOUBLE DEFAULT 0);
            ",
        )
        .map_err(db_err)?;
        tracing::info!("Created SQLite balances table");
        Ok(true)
    }

    fn get(&self, id: &str) -> Result<Option<Decimal>, StorageError> {
        let conn = self.conn.lock();
        let value: Option<Option<f64>> = conn
            .query_row(
                "SELECT value FROM balances WHERE playerid = ?1 LIMIT 1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        // a NULL value reads as 0, matching the column default
        value.map(|v| from_f64(v.unwrap_or(0.0))).transpose()
    }

    fn set(&self, id: &str, value: Decimal) -> Result<(), StorageError> {
        let value = to_f64(value)?;
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE balances SET value = ?1 WHERE playerid = ?2",
                params![value, id],
            )
            .map_err(db_err)?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO balances (playerid, value) VALUES (?1, ?2)",
                params![id, value],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM balances WHERE playerid = ?1", params![id])
            .map_err(db_err)?;
        Ok(())
    }

    fn wipe(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM balances", []).map_err(db_err)?;
        Ok(())
    }

    fn bulk_adjust(&self, delta: Decimal) -> Result<u64, StorageError> {
        let delta = to_f64(delta)?;
        let conn = self.conn.lock();
        conn.execute("UPDATE balances SET value = value + ?1", params![delta])
            .map_err(db_err)?;
        Self::count(&conn)
    }

    fn bulk_set(&self, value: Decimal) -> Result<u64, StorageError> {
        let value = to_f64(value)?;
        let conn = self.conn.lock();
        conn.execute("UPDATE balances SET value = ?1", params![value])
            .map_err(db_err)?;
        Self::count(&conn)
    }

    fn read_all(&self) -> Result<Vec<AccountRecord>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT playerid, value FROM balances")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<f64>>(1)?))
            })
            .map_err(db_err)?;

        let mut result = Vec::new();
        for row in rows {
            if let (Some(id), value) = row.map_err(db_err)? {
                result.push((id, from_f64(value.unwrap_or(0.0))?));
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn storage() -> SqliteStorage {
        let storage = SqliteStorage::new(":memory:").unwrap();
        storage.ensure_schema().unwrap();
        storage
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let storage = SqliteStorage::new(":memory:").unwrap();
        assert!(storage.ensure_schema().unwrap());
        assert!(!storage.ensure_schema().unwrap());

        let conn = storage.conn.lock();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'balances'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[test]
    fn test_ensure_schema_reports_existing_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("economics.db");
        let path = path.to_str().unwrap();

        assert!(SqliteStorage::new(path).unwrap().ensure_schema().unwrap());
        assert!(!SqliteStorage::new(path).unwrap().ensure_schema().unwrap());
    }

    #[test]
    fn test_set_upserts_without_duplicating_rows() {
        let storage = storage();
        assert_eq!(storage.get("a").unwrap(), None);

        storage.set("a", dec!(10.5)).unwrap();
        storage.set("a", dec!(12.25)).unwrap();
        assert_eq!(storage.get("a").unwrap(), Some(dec!(12.25)));
        assert_eq!(storage.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_ids_are_bound_not_interpolated() {
        let storage = storage();
        let hostile = "x'; DROP TABLE balances; --";
        storage.set(hostile, dec!(1)).unwrap();
        storage.set("o'brien", dec!(2)).unwrap();

        assert_eq!(storage.get(hostile).unwrap(), Some(dec!(1)));
        assert_eq!(storage.get("o'brien").unwrap(), Some(dec!(2)));
        storage.delete("o'brien").unwrap();
        assert_eq!(storage.get("o'brien").unwrap(), None);
        assert!(!storage.ensure_schema().unwrap(), "table must still exist");
    }

    #[test]
    fn test_bulk_operations_on_empty_table() {
        let storage = storage();
        assert_eq!(storage.bulk_adjust(dec!(20)).unwrap(), 0);
        assert_eq!(storage.bulk_set(dec!(5)).unwrap(), 0);
        assert!(storage.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_bulk_adjust_and_set_report_row_count() {
        let storage = storage();
        storage.set("a", dec!(90)).unwrap();
        storage.set("b", dec!(99)).unwrap();

        assert_eq!(storage.bulk_adjust(dec!(20)).unwrap(), 2);
        assert_eq!(storage.get("a").unwrap(), Some(dec!(110)));
        assert_eq!(storage.get("b").unwrap(), Some(dec!(119)));

        assert_eq!(storage.bulk_adjust(dec!(-0.1)).unwrap(), 2);
        assert_eq!(storage.get("a").unwrap(), Some(dec!(109.9)));

        assert_eq!(storage.bulk_set(dec!(7)).unwrap(), 2);
        assert_eq!(storage.get("b").unwrap(), Some(dec!(7)));
    }

    #[test]
    fn test_null_columns_read_like_postgres() {
        let storage = storage();
        storage
            .conn
            .lock()
            .execute_batch(
                "INSERT INTO balances (playerid, value) VALUES (NULL, 5);
                 INSERT INTO balances (playerid, value) VALUES ('n', NULL);",
            )
            .unwrap();

        assert_eq!(storage.get("n").unwrap(), Some(dec!(0)));
        assert_eq!(storage.read_all().unwrap(), vec![("n".to_string(), dec!(0))]);
    }

    #[test]
    fn test_wipe_removes_all_rows() {
        let storage = storage();
        storage.set("a", dec!(1)).unwrap();
        storage.set("b", dec!(2)).unwrap();
        storage.wipe().unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
        assert!(storage.read_all().unwrap().is_empty());
    }
}
