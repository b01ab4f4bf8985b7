// Ledger and vault throughput benchmarks.
//
// Covers the raw share-conversion math, a deposit into a vault backed by the
// in-memory adapter, and a full deposit/withdraw round through the backend.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use aion_vault::ledger::{assets_for_redeem, shares_for_deposit, ShareLedger};
use aion_vault::{Address, AssetId, InMemoryAdapter, Vault};

fn funded_vault() -> (Vault, Address) {
    let owner = Address::derive("owner");
    let vault = Vault::with_defaults(owner);
    let adapter = Arc::new(InMemoryAdapter::new("bench", AssetId::Native, 2));
    let record = vault
        .register_adapter(&owner, adapter, "Bench")
        .expect("register");
    vault
        .set_active_adapter(&owner, &record.id)
        .expect("activate");
    vault
        .deposit(&Address::derive("seed"), 1_000_000_000)
        .expect("seed deposit");
    (vault, owner)
}

fn bench_share_math(c: &mut Criterion) {
    c.bench_function("ledger/shares_for_deposit", |b| {
        b.iter(|| shares_for_deposit(black_box(1_000), black_box(1_909), black_box(2_100)));
    });
    c.bench_function("ledger/assets_for_redeem", |b| {
        b.iter(|| assets_for_redeem(black_box(1_000), black_box(2_100), black_box(1_909)));
    });
}

fn bench_ledger_mint(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger/mint");
    for holders in [10usize, 1_000, 10_000] {
        let depositors: Vec<Address> = (0..holders)
            .map(|i| Address::derive(&format!("holder-{i}")))
            .collect();
        group.throughput(Throughput::Elements(holders as u64));
        group.bench_with_input(BenchmarkId::from_parameter(holders), &depositors, |b, depositors| {
            b.iter(|| {
                let mut ledger = ShareLedger::new();
                for depositor in depositors {
                    ledger.mint(depositor, 100, 100).expect("mint");
                }
                ledger
            });
        });
    }
    group.finish();
}

fn bench_vault_deposit(c: &mut Criterion) {
    let (vault, _) = funded_vault();
    let depositor = Address::derive("alice");
    c.bench_function("vault/deposit", |b| {
        b.iter(|| vault.deposit(&depositor, black_box(1_000)).expect("deposit"));
    });
}

fn bench_vault_round_trip(c: &mut Criterion) {
    let (vault, _) = funded_vault();
    let depositor = Address::derive("bob");
    c.bench_function("vault/deposit_withdraw", |b| {
        b.iter(|| {
            let shares = vault.deposit(&depositor, black_box(5_000)).expect("deposit");
            vault.withdraw(&depositor, shares).expect("withdraw")
        });
    });
}

criterion_group!(
    benches,
    bench_share_math,
    bench_ledger_mint,
    bench_vault_deposit,
    bench_vault_round_trip,
);
criterion_main!(benches);
