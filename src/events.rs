//! Outward notifications. Fire-and-forget: nothing a sink does can affect the
//! operation that emitted the event.

use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    Deposit { id: String, amount: Decimal },
    BalanceUpdated { id: String, balance: Decimal },
    /// Deprecated alias of `BalanceUpdated`, still emitted for older subscribers.
    BalanceChanged { id: String, balance: Decimal },
    Withdrawal { id: String, amount: Decimal },
    Transfer { from: String, to: String, amount: Decimal },
    DataWiped,
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::Deposit { .. } => "deposit",
            LedgerEvent::BalanceUpdated { .. } => "balance_updated",
            LedgerEvent::BalanceChanged { .. } => "balance_changed",
            LedgerEvent::Withdrawal { .. } => "withdrawal",
            LedgerEvent::Transfer { .. } => "transfer",
            LedgerEvent::DataWiped => "data_wiped",
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LedgerEvent);
}

/// Default sink: events only show up in the debug log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &LedgerEvent) {
        tracing::debug!(target: "econ::events", event = event.name(), ?event);
    }
}
