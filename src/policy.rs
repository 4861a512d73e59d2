//! Balance limits and the negative-balance rule.
//!
//! [`Policy`] is built once from a [`Config`] and is then read-only. Every
//! single-account write goes through [`Policy::clamp`] before it reaches storage.

use std::{fmt::Display, path::PathBuf};

use econ_core::round_cents;
use rust_decimal::Decimal;

use crate::config::{Config, NetworkSqlConfig};

/// Why a ledger operation was refused. These are ordinary outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingAccountId,
    NonPositiveAmount,
    NegativeBalance,
    InsufficientFunds,
    /// The resulting balance does not fit the decimal range.
    AmountOutOfRange,
}

impl Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Rejection::MissingAccountId => "missing account id",
            Rejection::NonPositiveAmount => "amount must be above zero",
            Rejection::NegativeBalance => "balance can not be negative",
            Rejection::InsufficientFunds => "insufficient funds",
            Rejection::AmountOutOfRange => "amount is out of range",
        })
    }
}

/// Which store is authoritative.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendSelection {
    File { path: PathBuf },
    Sqlite { path: PathBuf },
    NetworkSql(NetworkSqlConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub allow_negative: bool,
    /// Zero means no upper limit.
    pub balance_limit: Decimal,
    /// Zero means no lower limit; otherwise negative.
    pub negative_balance_limit: Decimal,
    pub starting_balance: Decimal,
    pub remove_unused: bool,
    pub wipe_on_new_save: bool,
    pub log_transactions: bool,
    /// SQL reads report `max(stored, starting_balance)`. The file store never floors.
    pub floor_sql_reads: bool,
    pub backend: BackendSelection,
}

impl Default for Policy {
    fn default() -> Self {
        Policy::from_config(&Config::default())
    }
}

impl Policy {
    /// Normalises raw configuration, logging a warning for every value it has to fix.
    pub fn from_config(config: &Config) -> Self {
        let mut starting_balance = config.starting_balance;
        if starting_balance < 0 {
            tracing::warn!(starting_balance, "Starting balance can not be negative; using 0");
            starting_balance = 0;
        }

        let mut balance_limit = config.balance_limit;
        if balance_limit < 0 {
            tracing::warn!(balance_limit, "Balance limit can not be negative; disabling it");
            balance_limit = 0;
        }

        let mut negative_balance_limit = config.negative_balance_limit;
        if negative_balance_limit > 0 {
            tracing::warn!(negative_balance_limit, "Negative balance limit must be 0 or below; negating it");
            negative_balance_limit = -negative_balance_limit;
        }

        // sqlite takes precedence when both are switched on
        let backend = if config.use_sqlite {
            BackendSelection::Sqlite {
                path: config.sqlite_file(),
            }
        } else if config.use_network_sql {
            BackendSelection::NetworkSql(config.network_sql.clone())
        } else {
            BackendSelection::File {
                path: config.data_file(),
            }
        };

        Policy {
            allow_negative: config.allow_negative_balance,
            balance_limit: Decimal::from(balance_limit),
            negative_balance_limit: Decimal::from(negative_balance_limit),
            starting_balance: Decimal::from(starting_balance),
            remove_unused: config.remove_unused,
            wipe_on_new_save: config.wipe_on_new_save,
            log_transactions: config.log_transactions,
            floor_sql_reads: config.floor_sql_reads_to_starting_balance,
            backend,
        }
    }

    pub fn has_balance_limit(&self) -> bool {
        self.balance_limit > Decimal::ZERO
    }

    pub fn has_negative_limit(&self) -> bool {
        self.negative_balance_limit < Decimal::ZERO
    }

    /// Rounds a proposed balance to cents and pulls it inside the configured
    /// limits. Negative values are refused outright when negative balances are
    /// not allowed.
    pub fn clamp(&self, proposed: Decimal) -> Result<Decimal, Rejection> {
        if proposed < Decimal::ZERO && !self.allow_negative {
            return Err(Rejection::NegativeBalance);
        }

        let value = round_cents(proposed);
        if self.has_balance_limit() && value > self.balance_limit {
            Ok(self.balance_limit)
        } else if self.allow_negative && self.has_negative_limit() && value < self.negative_balance_limit {
            Ok(self.negative_balance_limit)
        } else {
            Ok(value)
        }
    }

    /// Whether `balance - amount` is an acceptable result of a withdrawal.
    pub fn can_withdraw(&self, balance: Decimal, amount: Decimal) -> bool {
        if balance >= amount {
            return true;
        }
        if !self.allow_negative {
            return false;
        }
        if !self.has_negative_limit() {
            return true;
        }
        balance
            .checked_sub(amount)
            .map_or(false, |rest| rest > self.negative_balance_limit)
    }

    /// Over-limit stored balances are pulled down to the limit at startup.
    pub fn cap(&self, stored: Decimal) -> Option<Decimal> {
        (self.has_balance_limit() && stored > self.balance_limit).then_some(self.balance_limit)
    }

    /// An account sitting exactly at the starting balance carries no information.
    pub fn is_unused(&self, stored: Decimal) -> bool {
        stored == self.starting_balance
    }
}
