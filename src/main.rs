use std::{fmt::Display, process::ExitCode, str::FromStr};

use clap::Parser;
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use econ::{
    config::{CliArgs, Command, Config},
    migration, LedgerService, Outcome, Policy, StorageError, TransactionLog,
};

fn init_tracing(cli: &CliArgs) {
    let filter = match &cli.log_level {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let _ = if cli.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn parse_amount(raw: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw.trim()).map_err(|e| format!("invalid amount '{}': {}", raw, e))
}

fn report<T: Display>(outcome: Outcome<T>) -> ExitCode {
    match outcome {
        Outcome::Applied(value) => {
            println!("{}", value);
            ExitCode::SUCCESS
        }
        Outcome::Rejected(reason) => {
            eprintln!("rejected: {}", reason);
            ExitCode::from(2)
        }
    }
}

fn execute(ledger: &LedgerService, command: &Command) -> Result<ExitCode, String> {
    let code = match command {
        Command::Balance { id } => {
            println!("{}", ledger.balance(id).map_err(storage_err)?);
            ExitCode::SUCCESS
        }
        Command::Deposit { id, amount } => report(ledger.deposit(id, parse_amount(amount)?).map_err(storage_err)?),
        Command::Withdraw { id, amount } => report(ledger.withdraw(id, parse_amount(amount)?).map_err(storage_err)?),
        Command::SetBalance { id, amount } => {
            report(ledger.set_balance(id, parse_amount(amount)?).map_err(storage_err)?)
        }
        Command::Transfer { from, to, amount } => {
            report(ledger.transfer(from, to, parse_amount(amount)?).map_err(storage_err)?)
        }
        Command::TransferSplit { from, amount, to } => {
            let recipients: Vec<&str> = to.iter().map(String::as_str).collect();
            report(
                ledger
                    .transfer_split(from, &recipients, parse_amount(amount)?)
                    .map_err(storage_err)?,
            )
        }
        Command::DepositAll { amount } => report(ledger.deposit_all(parse_amount(amount)?).map_err(storage_err)?),
        Command::WithdrawAll { amount } => report(ledger.withdraw_all(parse_amount(amount)?).map_err(storage_err)?),
        Command::SetAll { amount } => report(ledger.set_all(parse_amount(amount)?).map_err(storage_err)?),
        Command::Wipe => {
            ledger.wipe().map_err(storage_err)?;
            println!("wiped");
            ExitCode::SUCCESS
        }
        Command::NewSave => {
            let wiped = ledger.on_new_save().map_err(storage_err)?;
            println!("{}", if wiped { "wiped" } else { "unchanged" });
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

fn storage_err(e: StorageError) -> String {
    format!("storage error: {}", e)
}

fn main() -> ExitCode {
    let cli = CliArgs::parse();
    init_tracing(&cli);

    let config = Config::load(&cli);
    let policy = Policy::from_config(&config);

    let (storage, report) = match migration::bootstrap(&config, &policy) {
        Ok(opened) => opened,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open balance store");
            eprintln!("failed to open balance store: {}", e);
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?report, "Store ready");

    let mut ledger = LedgerService::new(storage, policy);
    if config.log_transactions {
        let path = config.transaction_log_file();
        match TransactionLog::open(&path) {
            Ok(txlog) => ledger = ledger.with_transaction_log(txlog),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Transaction log disabled"),
        }
    }

    let code = match execute(&ledger, &cli.command) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    };

    if let Err(e) = ledger.shutdown() {
        tracing::error!(error = %e, "Failed to save balances");
        eprintln!("failed to save balances: {}", e);
        return ExitCode::FAILURE;
    }
    code
}
