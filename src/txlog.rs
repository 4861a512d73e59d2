//! Append-only transaction log. One line per applied mutation.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::Path,
};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Deposit,
    SetBalance,
    Withdraw,
    Transfer,
}

impl TransactionKind {
    fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::SetBalance => "set_balance",
            TransactionKind::Withdraw => "withdraw",
            TransactionKind::Transfer => "transfer",
        }
    }
}

pub struct TransactionLog {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl TransactionLog {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
        }
    }

    /// Opens `path` for appending, creating it and its directory if needed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }

    /// Writes `[<timestamp>] <kind> <amount> <ids...>`. A failed write is logged and
    /// dropped; the ledger mutation it describes has already happened.
    pub fn record(&self, kind: TransactionKind, amount: Decimal, ids: &[&str]) {
        let line = format!(
            "[{}] {} {:.2} {}\n",
            OffsetDateTime::now_utc(),
            kind.as_str(),
            amount,
            ids.join(" ")
        );
        let mut sink = self.sink.lock();
        if let Err(e) = sink.write_all(line.as_bytes()).and_then(|_| sink.flush()) {
            tracing::warn!(error = %e, "Failed to write transaction log");
        }
    }
}
