//! The ledger service: single-account and bulk balance operations on top of a
//! [`StorageBackend`], with [`Policy`] applied to every write.
//!
//! Validation failures come back as [`Outcome::Rejected`]; storage failures are
//! returned as `Err` and are not recovered here.

use std::{fmt::Display, sync::Arc};

use econ_core::{round_cents, StorageBackend, StorageError};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::{
    events::{EventSink, LedgerEvent, TracingEventSink},
    policy::{Policy, Rejection},
    txlog::{TransactionKind, TransactionLog},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Applied(T),
    Rejected(Rejection),
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(v) => Some(v),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Outcome::Applied(_) => None,
            Outcome::Rejected(r) => Some(*r),
        }
    }
}

pub type LedgerResult<T> = Result<Outcome<T>, StorageError>;

/// An account identifier. Numeric ids are stringified the same way everywhere,
/// so `AccountId::from(7u64)` and `AccountId::from("7")` name the same account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<u64> for AccountId {
    fn from(id: u64) -> Self {
        AccountId(id.to_string())
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        AccountId(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        AccountId(id)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct LedgerService {
    storage: Arc<dyn StorageBackend>,
    policy: Policy,
    events: Arc<dyn EventSink>,
    txlog: Option<TransactionLog>,
    // at most one mutation in flight per store
    write_lock: Mutex<()>,
}

impl LedgerService {
    pub fn new(storage: Arc<dyn StorageBackend>, policy: Policy) -> Self {
        Self {
            storage,
            policy,
            events: Arc::new(TracingEventSink),
            txlog: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The log is only written to when `log_transactions` is on.
    pub fn with_transaction_log(mut self, txlog: TransactionLog) -> Self {
        self.txlog = Some(txlog);
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    fn emit(&self, event: LedgerEvent) {
        self.events.emit(&event);
    }

    fn log(&self, kind: TransactionKind, amount: Decimal, ids: &[&str]) {
        if !self.policy.log_transactions {
            return;
        }
        if let Some(txlog) = &self.txlog {
            txlog.record(kind, amount, ids);
        }
    }

    /// Stored balance, or the starting balance when there is no record.
    ///
    /// SQL stores additionally never report less than the starting balance while
    /// `floor_sql_reads` is set; the file store returns what is stored.
    pub fn balance(&self, id: &str) -> Result<Decimal, StorageError> {
        if id.is_empty() {
            tracing::warn!("Balance called without a valid account id");
            return Ok(Decimal::ZERO);
        }

        let starting = self.policy.starting_balance;
        match self.storage.get(id)? {
            Some(stored) if self.storage.kind().is_sql() && self.policy.floor_sql_reads => {
                Ok(stored.max(starting))
            }
            Some(stored) => Ok(stored),
            None => Ok(starting),
        }
    }

    pub fn deposit(&self, id: &str, amount: Decimal) -> LedgerResult<Decimal> {
        let _guard = self.write_lock.lock();
        self.deposit_locked(id, amount)
    }

    pub fn set_balance(&self, id: &str, amount: Decimal) -> LedgerResult<Decimal> {
        let _guard = self.write_lock.lock();
        self.set_balance_locked(id, amount)
    }

    pub fn withdraw(&self, id: &str, amount: Decimal) -> LedgerResult<Decimal> {
        let _guard = self.write_lock.lock();
        self.withdraw_locked(id, amount)
    }

    /// Withdraw from `from`, then deposit into `to`. The two steps are independent:
    /// when the deposit is refused the withdrawn amount is not returned to `from`.
    /// Applied value is the new balance of `from`.
    pub fn transfer(&self, from: &str, to: &str, amount: Decimal) -> LedgerResult<Decimal> {
        let _guard = self.write_lock.lock();
        if from.is_empty() || to.is_empty() {
            tracing::warn!("Transfer called without a valid account id");
            return Ok(Outcome::Rejected(Rejection::MissingAccountId));
        }

        let remaining = match self.withdraw_locked(from, amount)? {
            Outcome::Applied(balance) => balance,
            rejected => return Ok(rejected),
        };
        if let Outcome::Rejected(reason) = self.deposit_locked(to, amount)? {
            tracing::warn!(from, to, %amount, %reason, "Transfer deposit refused after withdrawal");
            return Ok(Outcome::Rejected(reason));
        }

        self.emit(LedgerEvent::Transfer {
            from: from.to_string(),
            to: to.to_string(),
            amount,
        });
        self.log(TransactionKind::Transfer, amount, &[to, from]);
        Ok(Outcome::Applied(remaining))
    }

    /// Withdraws `amount` from `from` once, then deposits an equal share into each
    /// recipient. Applied value is the number of recipients credited. As with
    /// [`Self::transfer`], shares refused by a recipient are not returned.
    pub fn transfer_split(&self, from: &str, recipients: &[&str], amount: Decimal) -> LedgerResult<u64> {
        let _guard = self.write_lock.lock();
        if from.is_empty() || recipients.is_empty() || recipients.iter().any(|to| to.is_empty()) {
            tracing::warn!("Split transfer called without valid account ids");
            return Ok(Outcome::Rejected(Rejection::MissingAccountId));
        }
        if amount <= Decimal::ZERO {
            return Ok(Outcome::Rejected(Rejection::NonPositiveAmount));
        }

        if let Outcome::Rejected(reason) = self.withdraw_locked(from, amount)? {
            return Ok(Outcome::Rejected(reason));
        }

        let share = amount / Decimal::from(recipients.len());
        let mut receivers = 0;
        for &to in recipients {
            match self.deposit_locked(to, share)? {
                Outcome::Applied(_) => {
                    receivers += 1;
                    self.emit(LedgerEvent::Transfer {
                        from: from.to_string(),
                        to: to.to_string(),
                        amount: share,
                    });
                    self.log(TransactionKind::Transfer, share, &[to, from]);
                }
                Outcome::Rejected(reason) => {
                    tracing::warn!(from, to, %share, %reason, "Split transfer share refused after withdrawal");
                }
            }
        }
        tracing::info!(from, %amount, %share, receivers, "Split transfer");
        Ok(Outcome::Applied(receivers))
    }

    fn deposit_locked(&self, id: &str, amount: Decimal) -> LedgerResult<Decimal> {
        if id.is_empty() {
            tracing::warn!("Deposit called without a valid account id");
            return Ok(Outcome::Rejected(Rejection::MissingAccountId));
        }
        if amount <= Decimal::ZERO {
            return Ok(Outcome::Rejected(Rejection::NonPositiveAmount));
        }

        let proposed = match self.balance(id)?.checked_add(amount) {
            Some(proposed) => proposed,
            None => return Ok(Outcome::Rejected(Rejection::AmountOutOfRange)),
        };
        let outcome = self.set_balance_locked(id, proposed)?;
        if outcome.is_applied() {
            self.emit(LedgerEvent::Deposit {
                id: id.to_string(),
                amount,
            });
            self.log(TransactionKind::Deposit, amount, &[id]);
        }
        Ok(outcome)
    }

    fn set_balance_locked(&self, id: &str, amount: Decimal) -> LedgerResult<Decimal> {
        if id.is_empty() {
            tracing::warn!("SetBalance called without a valid account id");
            return Ok(Outcome::Rejected(Rejection::MissingAccountId));
        }

        let value = match self.policy.clamp(amount) {
            Ok(value) => value,
            Err(reason) => return Ok(Outcome::Rejected(reason)),
        };
        self.storage.set(id, value)?;
        tracing::debug!(id, requested = %amount, stored = %value, "Balance set");

        self.emit(LedgerEvent::BalanceUpdated {
            id: id.to_string(),
            balance: value,
        });
        self.emit(LedgerEvent::BalanceChanged {
            id: id.to_string(),
            balance: value,
        });
        self.log(TransactionKind::SetBalance, value, &[id]);
        Ok(Outcome::Applied(value))
    }

    fn withdraw_locked(&self, id: &str, amount: Decimal) -> LedgerResult<Decimal> {
        if id.is_empty() {
            tracing::warn!("Withdraw called without a valid account id");
            return Ok(Outcome::Rejected(Rejection::MissingAccountId));
        }
        if amount < Decimal::ZERO && !self.policy.allow_negative {
            return Ok(Outcome::Rejected(Rejection::NegativeBalance));
        }

        let balance = self.balance(id)?;
        let remaining = match balance.checked_sub(amount) {
            Some(remaining) => remaining,
            None => return Ok(Outcome::Rejected(Rejection::AmountOutOfRange)),
        };
        if !self.policy.can_withdraw(balance, amount) {
            return Ok(Outcome::Rejected(Rejection::InsufficientFunds));
        }

        let outcome = self.set_balance_locked(id, remaining)?;
        if outcome.is_applied() {
            self.emit(LedgerEvent::Withdrawal {
                id: id.to_string(),
                amount,
            });
            self.log(TransactionKind::Withdraw, amount, &[id]);
        }
        Ok(outcome)
    }

    /// Credits every stored account. Applied value is the number of accounts credited.
    ///
    /// SQL stores apply the delta in one statement with no per-account limits; the
    /// file store deposits account by account with full clamping.
    pub fn deposit_all(&self, amount: Decimal) -> LedgerResult<u64> {
        let _guard = self.write_lock.lock();
        if amount <= Decimal::ZERO {
            return Ok(Outcome::Rejected(Rejection::NonPositiveAmount));
        }

        if self.storage.kind().is_sql() {
            let affected = self.storage.bulk_adjust(round_cents(amount))?;
            tracing::info!(%amount, affected, "Deposited to all accounts");
            return Ok(Outcome::Applied(affected));
        }

        let mut receivers = 0;
        for id in self.stored_ids()? {
            if self.deposit_locked(&id, amount)?.is_applied() {
                receivers += 1;
            }
        }
        tracing::info!(%amount, affected = receivers, "Deposited to all accounts");
        Ok(Outcome::Applied(receivers))
    }

    /// Debits every stored account; same backend split as [`Self::deposit_all`].
    pub fn withdraw_all(&self, amount: Decimal) -> LedgerResult<u64> {
        let _guard = self.write_lock.lock();
        if amount <= Decimal::ZERO {
            return Ok(Outcome::Rejected(Rejection::NonPositiveAmount));
        }

        if self.storage.kind().is_sql() {
            let affected = self.storage.bulk_adjust(-round_cents(amount))?;
            tracing::info!(%amount, affected, "Withdrew from all accounts");
            return Ok(Outcome::Applied(affected));
        }

        let mut receivers = 0;
        for id in self.stored_ids()? {
            if self.withdraw_locked(&id, amount)?.is_applied() {
                receivers += 1;
            }
        }
        tracing::info!(%amount, affected = receivers, "Withdrew from all accounts");
        Ok(Outcome::Applied(receivers))
    }

    /// Overwrites every stored account; same backend split as [`Self::deposit_all`].
    pub fn set_all(&self, amount: Decimal) -> LedgerResult<u64> {
        let _guard = self.write_lock.lock();
        if amount < Decimal::ZERO && !self.policy.allow_negative {
            return Ok(Outcome::Rejected(Rejection::NegativeBalance));
        }

        if self.storage.kind().is_sql() {
            let affected = self.storage.bulk_set(round_cents(amount))?;
            tracing::info!(%amount, affected, "Set balance for all accounts");
            return Ok(Outcome::Applied(affected));
        }

        let mut receivers = 0;
        for id in self.stored_ids()? {
            if self.set_balance_locked(&id, amount)?.is_applied() {
                receivers += 1;
            }
        }
        tracing::info!(%amount, affected = receivers, "Set balance for all accounts");
        Ok(Outcome::Applied(receivers))
    }

    fn stored_ids(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .storage
            .read_all()?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// Deletes every account. The file store is saved straight away.
    pub fn wipe(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        self.storage.wipe()?;
        self.storage.flush()?;
        tracing::info!(backend = %self.storage.kind(), "Wiped all balances");
        self.emit(LedgerEvent::DataWiped);
        Ok(())
    }

    /// Host started a new save. Returns whether balances were wiped.
    pub fn on_new_save(&self) -> Result<bool, StorageError> {
        if !self.policy.wipe_on_new_save {
            return Ok(false);
        }
        let _guard = self.write_lock.lock();
        self.storage.wipe()?;
        tracing::info!(backend = %self.storage.kind(), "New save detected; wiped all balances");
        self.emit(LedgerEvent::DataWiped);
        Ok(true)
    }

    /// Host save signal. A no-op unless the file store has unsaved changes.
    pub fn save(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        self.storage.flush()
    }

    pub fn shutdown(self) -> Result<(), StorageError> {
        self.save()
    }
}
