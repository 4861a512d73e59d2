use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use econ::{config::Config, LedgerService, Policy, StorageBackend};
use econ_file::FileStorage;
use econ_sqlite::SqliteStorage;
use rust_decimal::Decimal;

fn file_ledger(dir: &tempfile::TempDir) -> LedgerService {
    let storage = FileStorage::open(dir.path().join("economics.json")).unwrap();
    LedgerService::new(Arc::new(storage), Policy::from_config(&Config::default()))
}

fn sqlite_ledger() -> LedgerService {
    let storage = SqliteStorage::new(":memory:").unwrap();
    storage.ensure_schema().unwrap();
    LedgerService::new(Arc::new(storage), Policy::from_config(&Config::default()))
}

fn seed_accounts(ledger: &LedgerService, count: u64) {
    for i in 0..count {
        let id = econ::AccountId::from(76561197960265728 + i);
        ledger.set_balance(id.as_str(), Decimal::new(150_000 + i as i64, 2)).unwrap();
    }
}

fn bench_single_account(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let file = file_ledger(&dir);
    let sqlite = sqlite_ledger();
    seed_accounts(&file, 1000);
    seed_accounts(&sqlite, 1000);

    let amount = Decimal::new(1_25, 2);
    c.bench_function("file_deposit", |b| {
        b.iter(|| file.deposit(black_box("76561197960265800"), black_box(amount)).unwrap())
    });
    c.bench_function("sqlite_deposit", |b| {
        b.iter(|| sqlite.deposit(black_box("76561197960265800"), black_box(amount)).unwrap())
    });

    c.bench_function("file_balance", |b| {
        b.iter(|| file.balance(black_box("76561197960265900")).unwrap())
    });
    c.bench_function("sqlite_balance", |b| {
        b.iter(|| sqlite.balance(black_box("76561197960265900")).unwrap())
    });
}

fn bench_transfer(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let file = file_ledger(&dir);
    seed_accounts(&file, 2);

    // alternate direction so neither account runs dry
    let amount = Decimal::new(1, 2);
    c.bench_function("file_transfer", |b| {
        b.iter(|| {
            file.transfer("76561197960265728", "76561197960265729", black_box(amount)).unwrap();
            file.transfer("76561197960265729", "76561197960265728", black_box(amount)).unwrap()
        })
    });
}

fn bench_bulk(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let file = file_ledger(&dir);
    let sqlite = sqlite_ledger();
    seed_accounts(&file, 1000);
    seed_accounts(&sqlite, 1000);

    let amount = Decimal::new(1, 0);
    c.bench_function("file_deposit_all_1000", |b| {
        b.iter(|| file.deposit_all(black_box(amount)).unwrap())
    });
    c.bench_function("sqlite_deposit_all_1000", |b| {
        b.iter(|| sqlite.deposit_all(black_box(amount)).unwrap())
    });
}

fn bench_save(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let file = file_ledger(&dir);
    seed_accounts(&file, 1000);

    c.bench_function("file_save_1000", |b| {
        b.iter(|| {
            file.deposit("76561197960265728", Decimal::ONE).unwrap();
            file.save().unwrap()
        })
    });
}

criterion_group!(benches, bench_single_account, bench_transfer, bench_bulk, bench_save);
criterion_main!(benches);
