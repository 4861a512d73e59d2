use std::time::{Duration, Instant};

use parking_lot::Mutex;
use postgres::{Client, NoTls};
use rust_decimal::Decimal;

pub use econ_core::{AccountRecord, BackendKind, StorageBackend, StorageError};
use econ_core::{from_f64, to_f64};

/// Connection parameters for the networked store.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// `host` or `host:port`.
    pub server: String,
    pub user: String,
    pub pass: String,
    pub database: String,
    pub connect_timeout: Duration,
    pub statement_timeout: Duration,
    /// Connections older than this are dropped and re-established on next use.
    pub max_lifetime: Duration,
}

impl PostgresOptions {
    fn to_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        let host_port = self
            .server
            .rsplit_once(':')
            .and_then(|(host, port)| port.parse::<u16>().ok().map(|port| (host, port)));
        match host_port {
            Some((host, port)) => {
                config.host(host).port(port);
            }
            None => {
                config.host(&self.server);
            }
        }
        config
            .user(&self.user)
            .password(&self.pass)
            .dbname(&self.database)
            .connect_timeout(self.connect_timeout)
            .options(&format!(
                "-c statement_timeout={}",
                self.statement_timeout.as_millis()
            ));
        config
    }
}

struct PooledClient {
    client: Client,
    opened_at: Instant,
}

/// Networked SQL store over a single `balances(playerid, value)` table.
///
/// Holds at most one live connection, opened lazily and replaced once it closes
/// or outlives `max_lifetime`. Each operation is one round trip on that connection.
pub struct PostgresStorage {
    config: postgres::Config,
    max_lifetime: Duration,
    slot: Mutex<Option<PooledClient>>,
}

fn db_err(e: postgres::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

impl PostgresStorage {
    /// Connects eagerly so that bad credentials surface at startup.
    pub fn new(options: &PostgresOptions) -> Result<Self, StorageError> {
        let storage = Self::from_config(options.to_config(), options.max_lifetime);
        storage.with_client(|_| Ok(()))?;
        tracing::info!(server = %options.server, database = %options.database, "Connected to PostgreSQL");
        Ok(storage)
    }

    pub fn connect(connection_string: &str, max_lifetime: Duration) -> Result<Self, StorageError> {
        let config: postgres::Config = connection_string
            .parse()
            .map_err(|e: postgres::Error| StorageError::Connection(e.to_string()))?;
        let storage = Self::from_config(config, max_lifetime);
        storage.with_client(|_| Ok(()))?;
        Ok(storage)
    }

    fn from_config(config: postgres::Config, max_lifetime: Duration) -> Self {
        Self {
            config,
            max_lifetime,
            slot: Mutex::new(None),
        }
    }

    fn with_client<T>(
        &self,
        f: impl FnOnce(&mut Client) -> Result<T, postgres::Error>,
    ) -> Result<T, StorageError> {
        let mut slot = self.slot.lock();
        let stale = match slot.as_ref() {
            Some(pooled) => {
                pooled.client.is_closed() || pooled.opened_at.elapsed() >= self.max_lifetime
            }
            None => true,
        };
        if stale {
            let client = self
                .config
                .connect(NoTls)
                .map_err(|e| StorageError::Connection(format!("PostgreSQL connection failed: {}", e)))?;
            tracing::debug!("Opened PostgreSQL connection");
            *slot = Some(PooledClient {
                client,
                opened_at: Instant::now(),
            });
        }

        match slot.as_mut() {
            Some(pooled) => f(&mut pooled.client).map_err(db_err),
            None => Err(StorageError::Connection("no PostgreSQL connection".to_string())),
        }
    }

    fn count(client: &mut Client) -> Result<u64, postgres::Error> {
        let row = client.query_one("SELECT COUNT(*) FROM balances", &[])?;
        let n: i64 = row.get(0);
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

impl StorageBackend for PostgresStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn ensure_schema(&self) -> Result<bool, StorageError> {
        let created = self.with_client(|client| {
            let found = client
                .query_opt(
                    "SELECT 1 FROM information_schema.tables
                     WHERE table_schema = current_schema() AND table_name = 'balances'
                     LIMIT 1",
                    &[],
                )?
                .is_some();
            if found {
                return Ok(false);
            }
            client.batch_execute(
                "
                DROP TABLE IF EXISTS balances;
                CREATE TABLE balances (playerid VARCHAR(32), value DOUBLE PRECISION DEFAULT 0);
                ",
            )?;
            Ok(true)
        })?;
        if created {
            tracing::info!("Created PostgreSQL balances table");
        }
        Ok(created)
    }

    fn get(&self, id: &str) -> Result<Option<Decimal>, StorageError> {
        let value: Option<f64> = self.with_client(|client| {
            let row = client.query_opt(
                "SELECT value FROM balances WHERE playerid = $1 LIMIT 1",
                &[&id],
            )?;
            Ok(row.map(|r| r.get::<_, Option<f64>>(0).unwrap_or(0.0)))
        })?;
        value.map(from_f64).transpose()
    }

    fn set(&self, id: &str, value: Decimal) -> Result<(), StorageError> {
        let value = to_f64(value)?;
        self.with_client(|client| {
            let updated = client.execute(
                "UPDATE balances SET value = $1 WHERE playerid = $2",
                &[&value, &id],
            )?;
            if updated == 0 {
                client.execute(
                    "INSERT INTO balances (playerid, value) VALUES ($1, $2)",
                    &[&id, &value],
                )?;
            }
            Ok(())
        })
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.with_client(|client| {
            client.execute("DELETE FROM balances WHERE playerid = $1", &[&id])?;
            Ok(())
        })
    }

    fn wipe(&self) -> Result<(), StorageError> {
        self.with_client(|client| {
            client.execute("DELETE FROM balances", &[])?;
            Ok(())
        })
    }

    fn bulk_adjust(&self, delta: Decimal) -> Result<u64, StorageError> {
        let delta = to_f64(delta)?;
        self.with_client(|client| {
            client.execute("UPDATE balances SET value = value + $1", &[&delta])?;
            Self::count(client)
        })
    }

    fn bulk_set(&self, value: Decimal) -> Result<u64, StorageError> {
        let value = to_f64(value)?;
        self.with_client(|client| {
            client.execute("UPDATE balances SET value = $1", &[&value])?;
            Self::count(client)
        })
    }

    fn read_all(&self) -> Result<Vec<AccountRecord>, StorageError> {
        let rows = self.with_client(|client| {
            client.query("SELECT DISTINCT playerid, value FROM balances", &[])
        })?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Option<String> = row.get(0);
            let value: Option<f64> = row.get(1);
            if let Some(id) = id {
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

    fn options(server: &str) -> PostgresOptions {
        PostgresOptions {
            server: server.to_string(),
            user: "econ".to_string(),
            pass: "secret".to_string(),
            database: "economics".to_string(),
            connect_timeout: Duration::from_secs(3),
            statement_timeout: Duration::from_secs(2),
            max_lifetime: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_server_with_port_is_split() {
        let config = options("db.internal:6543").to_config();
        assert_eq!(config.get_ports(), &[6543]);
        assert_eq!(config.get_dbname(), Some("economics"));
        assert_eq!(config.get_user(), Some("econ"));
        assert_eq!(config.get_connect_timeout(), Some(&Duration::from_secs(3)));
        assert_eq!(config.get_options(), Some("-c statement_timeout=2000"));
    }

    #[test]
    fn test_server_without_port_uses_default() {
        let config = options("localhost").to_config();
        assert!(config.get_ports().is_empty());
        assert_eq!(config.get_hosts().len(), 1);
    }

    // Requires a reachable server, e.g.
    // ECON_TEST_POSTGRES_URL="host=localhost user=postgres password=postgres dbname=econ_test"
    #[test]
    #[ignore]
    fn test_postgres_round_trip() {
        let url = std::env::var("ECON_TEST_POSTGRES_URL").unwrap();
        let storage = PostgresStorage::connect(&url, Duration::from_secs(60)).unwrap();
        storage.ensure_schema().unwrap();
        assert!(!storage.ensure_schema().unwrap());
        storage.wipe().unwrap();

        storage.set("o'brien", dec!(123.46)).unwrap();
        storage.set("o'brien", dec!(90)).unwrap();
        storage.set("b", dec!(99)).unwrap();
        assert_eq!(storage.get("o'brien").unwrap(), Some(dec!(90)));
        assert_eq!(storage.bulk_adjust(dec!(20)).unwrap(), 2);
        assert_eq!(storage.get("b").unwrap(), Some(dec!(119)));
        assert_eq!(storage.bulk_set(dec!(1)).unwrap(), 2);
        storage.delete("b").unwrap();
        assert_eq!(storage.read_all().unwrap(), vec![("o'brien".to_string(), dec!(1))]);
        storage.wipe().unwrap();
        assert_eq!(storage.bulk_adjust(dec!(5)).unwrap(), 0);
    }
}
