//! # Lending Market Adapter
//!
//! A simulated over-collateralized lending market. The vault supplies the
//! base asset and receives receipt shares; borrowers draw down the market's
//! cash and pay interest that accrues to suppliers.
//!
//! ## Rate Model
//!
//! Borrow rates follow a kinked utilization curve:
//!
//! ```text
//!   rate
//!    │                          ╱ slope2
//!    │                        ╱
//!    │              ______──╱   ← kink
//!    │      ____────  slope1
//!    │ base
//!    └──────────────────────┴────── utilization
//!                          kink
//! ```
//!
//! Suppliers earn `borrow_rate * utilization * (1 - reserve_factor)`. The
//! reserve cut stays in the market and is never withdrawable by suppliers.
//!
//! ## Liquidity
//!
//! A withdrawal can only be paid out of idle cash. When borrowers hold most
//! of the supply, withdrawals fail with `InsufficientLiquidity` and the
//! market reports unhealthy once utilization crosses its ceiling.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use aion_vault::adapter::{Adapter, AdapterError, Funding, ProtocolSnapshot};
use aion_vault::config::BPS_DENOMINATOR;
use aion_vault::{Address, AssetId};

/// Seconds in the 365-day year interest is quoted against.
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the lending market.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LendingError {
    /// The market is frozen and accepts no new supply or borrows.
    #[error("market is frozen")]
    Frozen,

    /// Not enough idle cash to honour the request.
    #[error("insufficient cash: requested {requested}, available {available}")]
    InsufficientCash {
        /// Value requested.
        requested: u64,
        /// Idle cash in the market.
        available: u64,
    },

    /// Repaying more than is borrowed.
    #[error("repayment {attempted} exceeds outstanding borrows {outstanding}")]
    ExcessRepayment {
        /// Amount offered.
        attempted: u64,
        /// Amount outstanding.
        outstanding: u64,
    },

    /// Redeeming more receipts than the vault holds.
    #[error("redeeming {requested} receipts, vault holds {held}")]
    ExcessRedemption {
        /// Receipts the caller tried to redeem.
        requested: u64,
        /// Receipts held.
        held: u64,
    },

    /// The deposit carries the wrong asset or no value.
    #[error("invalid funding: {0}")]
    InvalidFunding(String),

    /// The configuration is inconsistent.
    #[error("invalid market configuration: {0}")]
    InvalidConfig(String),

    /// Integer arithmetic would overflow.
    #[error("arithmetic overflow")]
    Overflow,
}

impl From<LendingError> for AdapterError {
    fn from(err: LendingError) -> Self {
        match err {
            LendingError::InsufficientCash {
                requested,
                available,
            } => AdapterError::InsufficientLiquidity {
                requested,
                available,
            },
            other => AdapterError::Rejected(other.to_string()),
        }
    }
}

fn mul_div(a: u64, b: u64, c: u64) -> Result<u64, LendingError> {
    if c == 0 {
        return Err(LendingError::Overflow);
    }
    u64::try_from(a as u128 * b as u128 / c as u128).map_err(|_| LendingError::Overflow)
}

// ---------------------------------------------------------------------------
// Rate Model
// ---------------------------------------------------------------------------

/// Kinked utilization rate curve, all values in basis points per year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateModel {
    /// Borrow rate at zero utilization.
    pub base_rate_bps: u64,
    /// Rate added between zero and the kink.
    pub slope1_bps: u64,
    /// Rate added between the kink and full utilization.
    pub slope2_bps: u64,
    /// Utilization where the slope changes.
    pub kink_bps: u64,
}

impl Default for RateModel {
    fn default() -> Self {
        Self {
            base_rate_bps: 200,
            slope1_bps: 400,
            slope2_bps: 6_000,
            kink_bps: 8_000,
        }
    }
}

impl RateModel {
    /// Annual borrow rate at `utilization_bps`.
    pub fn borrow_rate_bps(&self, utilization_bps: u64) -> u64 {
        let utilization = utilization_bps.min(BPS_DENOMINATOR);
        if self.kink_bps == 0 || utilization <= self.kink_bps {
            let slope = if self.kink_bps == 0 {
                0
            } else {
                self.slope1_bps * utilization / self.kink_bps
            };
            return self.base_rate_bps + slope;
        }
        let above = utilization - self.kink_bps;
        let span = BPS_DENOMINATOR - self.kink_bps;
        self.base_rate_bps + self.slope1_bps + self.slope2_bps * above / span.max(1)
    }

    /// Annual supply rate at `utilization_bps` after the reserve cut.
    pub fn supply_rate_bps(&self, utilization_bps: u64, reserve_factor_bps: u64) -> u64 {
        let gross = self.borrow_rate_bps(utilization_bps) as u128 * utilization_bps.min(BPS_DENOMINATOR) as u128
            / BPS_DENOMINATOR as u128;
        let keep = BPS_DENOMINATOR.saturating_sub(reserve_factor_bps) as u128;
        (gross * keep / BPS_DENOMINATOR as u128) as u64
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Parameters of one simulated market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LendingMarketConfig {
    /// Market name. The adapter id is derived from it.
    pub name: String,
    /// Asset supplied and borrowed.
    pub underlying: AssetId,
    /// Declared risk level.
    pub risk_level: u8,
    pub rate_model: RateModel,
    /// Share of borrow interest kept by the market.
    pub reserve_factor_bps: u64,
    /// Utilization above which the market reports unhealthy.
    pub max_utilization_bps: u64,
    /// Supply already in the market from other lenders.
    pub seed_supply: u64,
    /// Outstanding borrows at start. Must not exceed `seed_supply`.
    pub seed_borrows: u64,
}

impl Default for LendingMarketConfig {
    fn default() -> Self {
        Self {
            name: "lending-market".into(),
            underlying: AssetId::Native,
            risk_level: 3,
            rate_model: RateModel::default(),
            reserve_factor_bps: 1_000,
            max_utilization_bps: 9_500,
            seed_supply: 0,
            seed_borrows: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MarketState {
    cash: u64,
    borrows: u64,
    reserves: u64,
    /// Receipts held by every supplier, the vault included.
    total_receipts: u64,
    vault_receipts: u64,
    frozen: bool,
}

impl MarketState {
    fn supply_value(&self) -> u64 {
        self.cash
            .saturating_add(self.borrows)
            .saturating_sub(self.reserves)
    }

    fn utilization_bps(&self) -> u64 {
        let total = self.cash as u128 + self.borrows as u128;
        if total == 0 {
            return 0;
        }
        (self.borrows as u128 * BPS_DENOMINATOR as u128 / total) as u64
    }

    fn vault_value(&self) -> Result<u64, LendingError> {
        if self.total_receipts == 0 {
            return Ok(0);
        }
        mul_div(self.vault_receipts, self.supply_value(), self.total_receipts)
    }
}

/// A lending market adapter.
#[derive(Debug)]
pub struct LendingMarketAdapter {
    id: Address,
    config: LendingMarketConfig,
    state: Mutex<MarketState>,
}

impl LendingMarketAdapter {
    /// Opens a market seeded with outside supply and borrows.
    ///
    /// # Errors
    ///
    /// [`LendingError::InvalidConfig`] if seed borrows exceed seed supply or a
    /// basis-point field exceeds 100%.
    pub fn new(config: LendingMarketConfig) -> Result<Self, LendingError> {
        if config.seed_borrows > config.seed_supply {
            return Err(LendingError::InvalidConfig(format!(
                "seed borrows {} exceed seed supply {}",
                config.seed_borrows, config.seed_supply
            )));
        }
        if config.reserve_factor_bps > BPS_DENOMINATOR
            || config.max_utilization_bps > BPS_DENOMINATOR
            || config.rate_model.kink_bps > BPS_DENOMINATOR
        {
            return Err(LendingError::InvalidConfig(
                "basis-point field exceeds 10000".into(),
            ));
        }
        let state = MarketState {
            cash: config.seed_supply - config.seed_borrows,
            borrows: config.seed_borrows,
            reserves: 0,
            total_receipts: config.seed_supply,
            vault_receipts: 0,
            frozen: false,
        };
        Ok(Self {
            id: Address::derive(&config.name),
            config,
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &LendingMarketConfig {
        &self.config
    }

    pub fn cash(&self) -> u64 {
        self.state.lock().cash
    }

    pub fn borrows(&self) -> u64 {
        self.state.lock().borrows
    }

    pub fn reserves(&self) -> u64 {
        self.state.lock().reserves
    }

    pub fn utilization_bps(&self) -> u64 {
        self.state.lock().utilization_bps()
    }

    /// Value of one receipt, scaled by [`aion_vault::config::PRECISION`].
    pub fn supply_index(&self) -> u128 {
        let state = self.state.lock();
        if state.total_receipts == 0 {
            return aion_vault::config::PRECISION;
        }
        state.supply_value() as u128 * aion_vault::config::PRECISION / state.total_receipts as u128
    }

    /// An outside borrower draws `amount` of cash.
    pub fn borrow(&self, amount: u64) -> Result<(), LendingError> {
        let mut state = self.state.lock();
        if state.frozen {
            return Err(LendingError::Frozen);
        }
        if amount > state.cash {
            return Err(LendingError::InsufficientCash {
                requested: amount,
                available: state.cash,
            });
        }
        state.cash -= amount;
        state.borrows += amount;
        Ok(())
    }

    /// An outside borrower repays `amount`.
    pub fn repay(&self, amount: u64) -> Result<(), LendingError> {
        let mut state = self.state.lock();
        if amount > state.borrows {
            return Err(LendingError::ExcessRepayment {
                attempted: amount,
                outstanding: state.borrows,
            });
        }
        state.borrows -= amount;
        state.cash = state.cash.checked_add(amount).ok_or(LendingError::Overflow)?;
        Ok(())
    }

    /// Accrues `elapsed_secs` of borrow interest. Returns the interest added.
    pub fn accrue(&self, elapsed_secs: u64) -> u64 {
        let mut state = self.state.lock();
        let rate = self.config.rate_model.borrow_rate_bps(state.utilization_bps());
        let interest = state.borrows as u128 * rate as u128 * elapsed_secs as u128
            / (BPS_DENOMINATOR as u128 * SECONDS_PER_YEAR as u128);
        let interest = u64::try_from(interest).unwrap_or(u64::MAX);
        let reserve_cut = (interest as u128 * self.config.reserve_factor_bps as u128
            / BPS_DENOMINATOR as u128) as u64;
        state.borrows = state.borrows.saturating_add(interest);
        state.reserves = state.reserves.saturating_add(reserve_cut);
        tracing::debug!(market = %self.config.name, rate, interest, "interest accrued");
        interest
    }

    /// Writes off bad debt. Suppliers absorb the loss.
    pub fn write_off(&self, amount: u64) {
        let mut state = self.state.lock();
        state.borrows = state.borrows.saturating_sub(amount);
    }

    /// Freezes or unfreezes the market.
    pub fn set_frozen(&self, frozen: bool) {
        self.state.lock().frozen = frozen;
    }

    fn is_healthy_locked(&self, state: &MarketState) -> bool {
        !state.frozen && state.utilization_bps() <= self.config.max_utilization_bps
    }
}

impl Adapter for LendingMarketAdapter {
    fn id(&self) -> Address {
        self.id
    }

    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn deposit(&self, funding: Funding) -> Result<u64, AdapterError> {
        let mut state = self.state.lock();
        if state.frozen {
            return Err(LendingError::Frozen.into());
        }
        if funding.asset() != self.config.underlying {
            return Err(LendingError::InvalidFunding(format!(
                "market takes {}, got {}",
                self.config.underlying,
                funding.asset()
            ))
            .into());
        }
        let amount = funding.amount();
        if amount == 0 {
            return Err(LendingError::InvalidFunding("zero amount".into()).into());
        }

        let supply_value = state.supply_value();
        let minted = if state.total_receipts == 0 || supply_value == 0 {
            amount
        } else {
            mul_div(amount, state.total_receipts, supply_value)?
        };
        state.cash = state.cash.checked_add(amount).ok_or(LendingError::Overflow)?;
        state.total_receipts = state
            .total_receipts
            .checked_add(minted)
            .ok_or(LendingError::Overflow)?;
        state.vault_receipts += minted;
        Ok(minted)
    }

    fn withdraw(&self, shares: u64) -> Result<u64, AdapterError> {
        let mut state = self.state.lock();
        if shares > state.vault_receipts {
            return Err(LendingError::ExcessRedemption {
                requested: shares,
                held: state.vault_receipts,
            }
            .into());
        }
        if shares == 0 {
            return Ok(0);
        }
        let value = mul_div(shares, state.supply_value(), state.total_receipts)?;
        if value > state.cash {
            return Err(LendingError::InsufficientCash {
                requested: value,
                available: state.cash,
            }
            .into());
        }
        state.cash -= value;
        state.total_receipts -= shares;
        state.vault_receipts -= shares;
        Ok(value)
    }

    fn total_assets(&self) -> Result<u64, AdapterError> {
        Ok(self.state.lock().vault_value()?)
    }

    fn total_shares(&self) -> Result<u64, AdapterError> {
        Ok(self.state.lock().vault_receipts)
    }

    fn estimated_apy_bps(&self) -> Result<u64, AdapterError> {
        let utilization = self.state.lock().utilization_bps();
        Ok(self
            .config
            .rate_model
            .supply_rate_bps(utilization, self.config.reserve_factor_bps))
    }

    fn is_healthy(&self) -> Result<bool, AdapterError> {
        let state = self.state.lock();
        Ok(self.is_healthy_locked(&state))
    }

    fn protocol_snapshot(&self) -> Result<ProtocolSnapshot, AdapterError> {
        let state = self.state.lock();
        let utilization_bps = state.utilization_bps();
        Ok(ProtocolSnapshot {
            apy_bps: self
                .config
                .rate_model
                .supply_rate_bps(utilization_bps, self.config.reserve_factor_bps),
            tvl: state.supply_value(),
            liquidity: state.cash,
            utilization_bps,
            is_healthy: self.is_healthy_locked(&state),
            protocol_name: self.config.name.clone(),
            last_update: Utc::now(),
        })
    }

    fn underlying(&self) -> AssetId {
        self.config.underlying
    }

    fn risk_level(&self) -> u8 {
        self.config.risk_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> LendingMarketAdapter {
        LendingMarketAdapter::new(LendingMarketConfig::default()).unwrap()
    }

    #[test]
    fn rate_curve_has_a_kink() {
        let model = RateModel::default();
        assert_eq!(model.borrow_rate_bps(0), 200);
        assert_eq!(model.borrow_rate_bps(4_000), 400);
        assert_eq!(model.borrow_rate_bps(8_000), 600);
        assert_eq!(model.borrow_rate_bps(9_000), 3_600);
        assert_eq!(model.borrow_rate_bps(10_000), 6_600);
    }

    #[test]
    fn supply_rate_applies_utilization_and_reserves() {
        let model = RateModel::default();
        // 600 * 0.8 * 0.9
        assert_eq!(model.supply_rate_bps(8_000, 1_000), 432);
        assert_eq!(model.supply_rate_bps(0, 1_000), 0);
    }

    #[test]
    fn seed_borrows_cannot_exceed_supply() {
        let config = LendingMarketConfig {
            seed_supply: 10,
            seed_borrows: 11,
            ..LendingMarketConfig::default()
        };
        assert!(matches!(
            LendingMarketAdapter::new(config),
            Err(LendingError::InvalidConfig(_))
        ));
    }

    #[test]
    fn frozen_market_rejects_supply() {
        let market = market();
        market.set_frozen(true);
        assert!(market.deposit(Funding::Native(10)).is_err());
        assert!(!market.is_healthy().unwrap());
    }

    #[test]
    fn receipts_track_supply_index() {
        let market = market();
        assert_eq!(market.deposit(Funding::Native(10_000)).unwrap(), 10_000);
        assert_eq!(market.supply_index(), aion_vault::config::PRECISION);
        market.borrow(8_000).unwrap();
        market.accrue(SECONDS_PER_YEAR);
        assert!(market.supply_index() > aion_vault::config::PRECISION);
    }
}
