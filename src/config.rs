use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "econ", about = "Account balance ledger")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "econ.toml")]
    pub config: String,

    /// Log level or filter directive (overrides RUST_LOG)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Data directory (overrides config file)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the balance of an account
    Balance { id: String },
    /// Credit an account
    Deposit { id: String, amount: String },
    /// Debit an account
    Withdraw { id: String, amount: String },
    /// Overwrite the balance of an account
    SetBalance { id: String, amount: String },
    /// Move money between two accounts
    Transfer { from: String, to: String, amount: String },
    /// Move money from one account, split evenly between several recipients
    TransferSplit {
        from: String,
        amount: String,
        #[arg(required = true)]
        to: Vec<String>,
    },
    /// Credit every stored account
    DepositAll { amount: String },
    /// Debit every stored account
    WithdrawAll { amount: String },
    /// Overwrite every stored account
    SetAll { amount: String },
    /// Delete all accounts
    Wipe,
    /// Signal that the host started a new save
    NewSave,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Older key names, applied top to bottom onto the raw table before
/// deserialization. An alias never replaces a key that is already present.
pub const LEGACY_KEYS: &[(&str, &str)] = &[
    ("Allow negative balance for accounts", "allow_negative_balance"),
    ("AllowNegativeBalance", "allow_negative_balance"),
    ("Balance limit for accounts (0 to disable)", "balance_limit"),
    ("Maximum balance for accounts (0 to disable)", "balance_limit"),
    ("BalanceLimit", "balance_limit"),
    ("Negative balance limit for accounts (0 to disable)", "negative_balance_limit"),
    ("NegativeBalanceLimit", "negative_balance_limit"),
    ("Remove unused accounts", "remove_unused"),
    ("RemoveUnused", "remove_unused"),
    ("Log transactions to file", "log_transactions"),
    ("LogTransactions", "log_transactions"),
    ("Starting account balance (0 or higher)", "starting_balance"),
    ("Starting money amount (0 or higher)", "starting_balance"),
    ("StartingBalance", "starting_balance"),
    ("Wipe balances on new save file", "wipe_on_new_save"),
    ("WipeOnNewSave", "wipe_on_new_save"),
    ("Store data in sqlite instead of data files", "use_sqlite"),
    ("useSQLite", "use_sqlite"),
    ("Store data in MySQL instead of data files", "use_network_sql"),
    ("useMySQL", "use_network_sql"),
    ("MySQL configuration, if using MySQL", "network_sql"),
    ("mysql", "network_sql"),
];

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub allow_negative_balance: bool,

    /// 0 disables the upper limit.
    #[serde(default)]
    pub balance_limit: i64,

    /// 0 disables the lower limit; otherwise expected to be negative.
    #[serde(default)]
    pub negative_balance_limit: i64,

    #[serde(default = "default_true")]
    pub remove_unused: bool,

    #[serde(default)]
    pub log_transactions: bool,

    #[serde(default = "default_starting_balance")]
    pub starting_balance: i64,

    #[serde(default)]
    pub wipe_on_new_save: bool,

    #[serde(default)]
    pub use_sqlite: bool,

    #[serde(default)]
    pub use_network_sql: bool,

    #[serde(default)]
    pub network_sql: NetworkSqlConfig,

    /// Reads from SQL stores never report less than the starting balance.
    #[serde(default = "default_true")]
    pub floor_sql_reads_to_starting_balance: bool,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Defaults to `<data_dir>/transactions.log`.
    #[serde(default)]
    pub transaction_log: Option<PathBuf>,

    #[serde(default = "default_sql_timeout_secs")]
    pub sql_connect_timeout_secs: u64,

    #[serde(default = "default_sql_timeout_secs")]
    pub sql_statement_timeout_secs: u64,

    #[serde(default = "default_sql_max_connection_lifetime_secs")]
    pub sql_max_connection_lifetime_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct NetworkSqlConfig {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub database: String,
}

fn default_true() -> bool {
    true
}

fn default_starting_balance() -> i64 {
    1000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_sql_timeout_secs() -> u64 {
    5
}

fn default_sql_max_connection_lifetime_secs() -> u64 {
    1800
}

impl Default for Config {
    fn default() -> Self {
        Config {
            allow_negative_balance: false,
            balance_limit: 0,
            negative_balance_limit: 0,
            remove_unused: default_true(),
            log_transactions: false,
            starting_balance: default_starting_balance(),
            wipe_on_new_save: false,
            use_sqlite: false,
            use_network_sql: false,
            network_sql: NetworkSqlConfig::default(),
            floor_sql_reads_to_starting_balance: default_true(),
            data_dir: default_data_dir(),
            transaction_log: None,
            sql_connect_timeout_secs: default_sql_timeout_secs(),
            sql_statement_timeout_secs: default_sql_timeout_secs(),
            sql_max_connection_lifetime_secs: default_sql_max_connection_lifetime_secs(),
        }
    }
}

/// Renames legacy keys in place. Returns the legacy keys that were applied.
pub fn apply_legacy_keys(table: &mut toml::Table) -> Vec<&'static str> {
    let mut applied = Vec::new();
    for (old, new) in LEGACY_KEYS {
        if let Some(value) = table.remove(*old) {
            if !table.contains_key(*new) {
                table.insert(new.to_string(), value);
                applied.push(*old);
            }
        }
    }
    applied
}

impl Config {
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut table: toml::Table = toml::from_str(contents)?;
        let applied = apply_legacy_keys(&mut table);
        if !applied.is_empty() {
            tracing::warn!(keys = ?applied, "Configuration uses outdated keys");
        }
        Ok(Config::deserialize(toml::Value::Table(table))?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Never fails: a missing file means defaults, an unreadable one means
    /// defaults plus a warning.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            return Config::default();
        }
        Self::from_file(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Configuration file is invalid; using defaults");
            Config::default()
        })
    }

    pub fn load(cli: &CliArgs) -> Self {
        let mut config = Self::load_or_default(&cli.config);

        // CLI overrides
        if let Some(ref dir) = cli.data_dir {
            config.data_dir = dir.clone();
        }

        config
    }

    pub fn data_file(&self) -> PathBuf {
        self.data_dir.join("economics.json")
    }

    pub fn sqlite_file(&self) -> PathBuf {
        self.data_dir.join("economics.db")
    }

    pub fn transaction_log_file(&self) -> PathBuf {
        self.transaction_log
            .clone()
            .unwrap_or_else(|| self.data_dir.join("transactions.log"))
    }

    pub fn sql_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.sql_connect_timeout_secs)
    }

    pub fn sql_statement_timeout(&self) -> Duration {
        Duration::from_secs(self.sql_statement_timeout_secs)
    }

    pub fn sql_max_connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.sql_max_connection_lifetime_secs)
    }
}
