//! # Liquidity Pool Adapter
//!
//! A simulated native-asset liquidity pool. The vault adds liquidity and
//! receives LP shares proportional to the pool's reserves. Trading fees
//! grow the reserves; exits pay a fee that stays with the remaining LPs.
//!
//! The pool reports unhealthy while its reserves sit below the configured
//! minimum, so a thin pool cannot be activated or receive vault deposits.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use aion_vault::adapter::{Adapter, AdapterError, Funding, ProtocolSnapshot};
use aion_vault::config::BPS_DENOMINATOR;
use aion_vault::{Address, AssetId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the liquidity pool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Only the native asset can be added.
    #[error("pool accepts native value only, got {0}")]
    WrongAsset(AssetId),

    /// Adding nothing.
    #[error("zero liquidity")]
    ZeroLiquidity,

    /// Burning more LP shares than the vault holds.
    #[error("burning {requested} LP shares, vault holds {held}")]
    InsufficientShares {
        /// Shares the caller tried to burn.
        requested: u64,
        /// Shares held.
        held: u64,
    },

    /// The exit would pay out more than the pool holds.
    #[error("pool reserves {reserves} cannot cover {requested}")]
    Drained {
        /// Payout requested.
        requested: u64,
        /// Reserves left.
        reserves: u64,
    },

    /// The configuration is inconsistent.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Integer arithmetic would overflow.
    #[error("arithmetic overflow")]
    Overflow,
}

impl From<PoolError> for AdapterError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Drained {
                requested,
                reserves,
            } => AdapterError::InsufficientLiquidity {
                requested,
                available: reserves,
            },
            other => AdapterError::Rejected(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Parameters of one simulated pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityPoolConfig {
    /// Pool name. The adapter id is derived from it.
    pub name: String,
    pub risk_level: u8,
    /// Fee charged on exit, left in the pool.
    pub exit_fee_bps: u64,
    /// Reserves below which the pool reports unhealthy.
    pub min_liquidity: u64,
    /// Liquidity already provided by other LPs.
    pub seed_liquidity: u64,
    /// Fee yield quoted to the vault.
    pub fee_apy_bps: u64,
}

impl Default for LiquidityPoolConfig {
    fn default() -> Self {
        Self {
            name: "liquidity-pool".into(),
            risk_level: 5,
            exit_fee_bps: 30,
            min_liquidity: 0,
            seed_liquidity: 0,
            fee_apy_bps: 800,
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PoolState {
    reserves: u64,
    total_lp: u64,
    vault_lp: u64,
}

impl PoolState {
    fn value_of(&self, lp: u64) -> Result<u64, PoolError> {
        if self.total_lp == 0 {
            return Ok(0);
        }
        u64::try_from(lp as u128 * self.reserves as u128 / self.total_lp as u128)
            .map_err(|_| PoolError::Overflow)
    }
}

/// A native-asset liquidity pool adapter.
#[derive(Debug)]
pub struct LiquidityPoolAdapter {
    id: Address,
    config: LiquidityPoolConfig,
    state: Mutex<PoolState>,
}

impl LiquidityPoolAdapter {
    /// Opens a pool holding the configured outside liquidity.
    pub fn new(config: LiquidityPoolConfig) -> Result<Self, PoolError> {
        if config.exit_fee_bps > BPS_DENOMINATOR {
            return Err(PoolError::InvalidConfig(format!(
                "exit fee {} bps exceeds 10000",
                config.exit_fee_bps
            )));
        }
        let state = PoolState {
            reserves: config.seed_liquidity,
            total_lp: config.seed_liquidity,
            vault_lp: 0,
        };
        Ok(Self {
            id: Address::derive(&config.name),
            config,
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &LiquidityPoolConfig {
        &self.config
    }

    pub fn reserves(&self) -> u64 {
        self.state.lock().reserves
    }

    /// Trading fees earned by the pool.
    pub fn collect_fees(&self, amount: u64) {
        let mut state = self.state.lock();
        state.reserves = state.reserves.saturating_add(amount);
    }

    /// Value leaving the pool without burning LP shares (impermanent loss,
    /// an exploit). Every LP absorbs it pro rata.
    pub fn drain(&self, amount: u64) {
        let mut state = self.state.lock();
        state.reserves = state.reserves.saturating_sub(amount);
    }

    fn healthy_locked(&self, state: &PoolState) -> bool {
        state.reserves >= self.config.min_liquidity
    }
}

impl Adapter for LiquidityPoolAdapter {
    fn id(&self) -> Address {
        self.id
    }

    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn deposit(&self, funding: Funding) -> Result<u64, AdapterError> {
        let amount = match funding {
            Funding::Native(amount) => amount,
            other => return Err(PoolError::WrongAsset(other.asset()).into()),
        };
        if amount == 0 {
            return Err(PoolError::ZeroLiquidity.into());
        }

        let mut state = self.state.lock();
        let minted = if state.total_lp == 0 || state.reserves == 0 {
            amount
        } else {
            u64::try_from(amount as u128 * state.total_lp as u128 / state.reserves as u128)
                .map_err(|_| PoolError::Overflow)?
        };
        state.reserves = state.reserves.checked_add(amount).ok_or(PoolError::Overflow)?;
        state.total_lp = state.total_lp.checked_add(minted).ok_or(PoolError::Overflow)?;
        state.vault_lp += minted;
        Ok(minted)
    }

    fn withdraw(&self, shares: u64) -> Result<u64, AdapterError> {
        let mut state = self.state.lock();
        if shares > state.vault_lp {
            return Err(PoolError::InsufficientShares {
                requested: shares,
                held: state.vault_lp,
            }
            .into());
        }
        if shares == 0 {
            return Ok(0);
        }
        let gross = state.value_of(shares)?;
        let fee = (gross as u128 * self.config.exit_fee_bps as u128 / BPS_DENOMINATOR as u128) as u64;
        let payout = gross - fee;
        if payout > state.reserves {
            return Err(PoolError::Drained {
                requested: payout,
                reserves: state.reserves,
            }
            .into());
        }
        state.reserves -= payout;
        state.total_lp -= shares;
        state.vault_lp -= shares;
        Ok(payout)
    }

    fn total_assets(&self) -> Result<u64, AdapterError> {
        let state = self.state.lock();
        Ok(state.value_of(state.vault_lp)?)
    }

    fn total_shares(&self) -> Result<u64, AdapterError> {
        Ok(self.state.lock().vault_lp)
    }

    fn estimated_apy_bps(&self) -> Result<u64, AdapterError> {
        Ok(self.config.fee_apy_bps)
    }

    fn is_healthy(&self) -> Result<bool, AdapterError> {
        let state = self.state.lock();
        Ok(self.healthy_locked(&state))
    }

    fn protocol_snapshot(&self) -> Result<ProtocolSnapshot, AdapterError> {
        let state = self.state.lock();
        Ok(ProtocolSnapshot {
            apy_bps: self.config.fee_apy_bps,
            tvl: state.reserves,
            liquidity: state.reserves,
            utilization_bps: 0,
            is_healthy: self.healthy_locked(&state),
            protocol_name: self.config.name.clone(),
            last_update: Utc::now(),
        })
    }

    fn underlying(&self) -> AssetId {
        AssetId::Native
    }

    fn risk_level(&self) -> u8 {
        self.config.risk_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_refused() {
        let pool = LiquidityPoolAdapter::new(LiquidityPoolConfig::default()).unwrap();
        let funding = Funding::Token {
            asset: Address::derive("usdc"),
            amount: 10,
        };
        assert!(matches!(
            pool.deposit(funding),
            Err(AdapterError::Rejected(_))
        ));
    }

    #[test]
    fn exit_fee_above_one_hundred_percent_is_rejected() {
        let config = LiquidityPoolConfig {
            exit_fee_bps: 10_001,
            ..LiquidityPoolConfig::default()
        };
        assert!(LiquidityPoolAdapter::new(config).is_err());
    }

    #[test]
    fn thin_pool_is_unhealthy() {
        let config = LiquidityPoolConfig {
            min_liquidity: 1_000,
            ..LiquidityPoolConfig::default()
        };
        let pool = LiquidityPoolAdapter::new(config).unwrap();
        assert!(!pool.is_healthy().unwrap());
        pool.deposit(Funding::Native(1_000)).unwrap();
        assert!(pool.is_healthy().unwrap());
    }
}
