//! Integration tests for the liquidity pool adapter.

use aion_adapters::liquidity_pool::{LiquidityPoolAdapter, LiquidityPoolConfig};
use aion_vault::{Adapter, AdapterError, Funding};

/// Helper: a pool already holding `seed` of outside liquidity.
fn pool_with_seed(seed: u64, exit_fee_bps: u64) -> LiquidityPoolAdapter {
    LiquidityPoolAdapter::new(LiquidityPoolConfig {
        name: "pool".into(),
        seed_liquidity: seed,
        exit_fee_bps,
        ..LiquidityPoolConfig::default()
    })
    .unwrap()
}

// ---------------------------------------------------------------------------
// Share Accounting
// ---------------------------------------------------------------------------

#[test]
fn lp_shares_follow_reserves() {
    let pool = pool_with_seed(100_000, 30);
    assert_eq!(pool.deposit(Funding::Native(50_000)).unwrap(), 50_000);

    pool.collect_fees(15_000);
    assert_eq!(pool.reserves(), 165_000);
    // A third of the LP supply.
    assert_eq!(pool.total_assets().unwrap(), 55_000);

    // Later liquidity buys fewer shares per unit.
    assert_eq!(pool.deposit(Funding::Native(11_000)).unwrap(), 10_000);
}

#[test]
fn exit_fee_stays_with_remaining_lps() {
    let pool = pool_with_seed(100_000, 30);
    pool.deposit(Funding::Native(50_000)).unwrap();
    pool.collect_fees(15_000);

    assert_eq!(pool.withdraw(50_000).unwrap(), 54_835);
    assert_eq!(pool.reserves(), 110_165);
    assert_eq!(pool.total_shares().unwrap(), 0);
    assert_eq!(pool.total_assets().unwrap(), 0);
}

#[test]
fn drained_reserves_hit_every_lp() {
    let pool = pool_with_seed(0, 0);
    pool.deposit(Funding::Native(1_000)).unwrap();
    pool.drain(250);
    assert_eq!(pool.total_assets().unwrap(), 750);
    assert_eq!(pool.withdraw(1_000).unwrap(), 750);
}

#[test]
fn burning_unheld_shares_is_rejected() {
    let pool = pool_with_seed(10_000, 0);
    pool.deposit(Funding::Native(100)).unwrap();
    assert!(matches!(pool.withdraw(101), Err(AdapterError::Rejected(_))));
}

#[test]
fn zero_liquidity_is_rejected() {
    let pool = pool_with_seed(0, 0);
    assert!(pool.deposit(Funding::Native(0)).is_err());
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[test]
fn pool_below_minimum_liquidity_reports_unhealthy() {
    let pool = LiquidityPoolAdapter::new(LiquidityPoolConfig {
        seed_liquidity: 5_000,
        min_liquidity: 4_000,
        ..LiquidityPoolConfig::default()
    })
    .unwrap();
    assert!(pool.is_healthy().unwrap());

    pool.drain(1_500);
    let snapshot = pool.protocol_snapshot().unwrap();
    assert!(!snapshot.is_healthy);
    assert_eq!(snapshot.tvl, 3_500);
    assert_eq!(snapshot.apy_bps, 800);
}
