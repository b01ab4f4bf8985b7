//! In-memory reference backend.
//!
//! Behaves like a well-mannered share-based yield protocol: deposits mint
//! shares at the current exchange rate, withdrawals redeem at it. Every
//! failure mode the vault must survive can be switched on at runtime, which
//! makes it the workhorse of the test suite and of the node's simulation mode.

use chrono::Utc;
use parking_lot::Mutex;

use super::{Adapter, AdapterError, Funding, ProtocolSnapshot};
use crate::config::BPS_DENOMINATOR;
use crate::types::{Address, AssetId};

#[derive(Debug, Default)]
struct MemoryState {
    assets: u64,
    shares: u64,
    apy_bps: u64,
    withdrawal_fee_bps: u64,
    forced_unhealthy: bool,
    fail_deposits: bool,
    fail_withdrawals: bool,
    fail_queries: bool,
}

/// A share-based backend held entirely in memory.
#[derive(Debug)]
pub struct InMemoryAdapter {
    id: Address,
    name: String,
    underlying: AssetId,
    risk_level: u8,
    state: Mutex<MemoryState>,
}

impl InMemoryAdapter {
    /// Creates an empty adapter whose id is derived from `name`.
    pub fn new(name: &str, underlying: AssetId, risk_level: u8) -> Self {
        Self {
            id: Address::derive(name),
            name: name.to_string(),
            underlying,
            risk_level,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Overrides the derived id.
    pub fn with_id(mut self, id: Address) -> Self {
        self.id = id;
        self
    }

    /// Sets the advertised APY.
    pub fn with_apy_bps(self, apy_bps: u64) -> Self {
        self.state.lock().apy_bps = apy_bps;
        self
    }

    /// Sets a fee charged on every withdrawal, in basis points.
    pub fn with_withdrawal_fee_bps(self, fee_bps: u64) -> Self {
        self.state.lock().withdrawal_fee_bps = fee_bps.min(BPS_DENOMINATOR);
        self
    }

    /// Adds yield: the managed value grows, the share count does not.
    pub fn accrue(&self, gain: u64) {
        let mut state = self.state.lock();
        state.assets = state.assets.saturating_add(gain);
    }

    /// Removes value, as a hack or bad debt would.
    pub fn realize_loss(&self, loss: u64) {
        let mut state = self.state.lock();
        state.assets = state.assets.saturating_sub(loss);
    }

    /// Forces the health verdict to unhealthy (or back).
    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.state.lock().forced_unhealthy = unhealthy;
    }

    /// Makes every deposit fail.
    pub fn fail_deposits(&self, fail: bool) {
        self.state.lock().fail_deposits = fail;
    }

    /// Makes every withdrawal fail.
    pub fn fail_withdrawals(&self, fail: bool) {
        self.state.lock().fail_withdrawals = fail;
    }

    /// Makes every read-only query fail.
    pub fn fail_queries(&self, fail: bool) {
        self.state.lock().fail_queries = fail;
    }

    fn check_queries(state: &MemoryState) -> Result<(), AdapterError> {
        if state.fail_queries {
            return Err(AdapterError::Unavailable("query endpoint down".into()));
        }
        Ok(())
    }
}

impl Adapter for InMemoryAdapter {
    fn id(&self) -> Address {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn deposit(&self, funding: Funding) -> Result<u64, AdapterError> {
        let mut state = self.state.lock();
        if state.fail_deposits {
            return Err(AdapterError::Unavailable("deposit endpoint down".into()));
        }
        if funding.asset() != self.underlying {
            return Err(AdapterError::Rejected(format!(
                "expected {}, got {}",
                self.underlying,
                funding.asset()
            )));
        }
        let amount = funding.amount();
        if amount == 0 {
            return Err(AdapterError::Rejected("zero deposit".into()));
        }

        let minted = if state.shares == 0 || state.assets == 0 {
            amount
        } else {
            let minted = amount as u128 * state.shares as u128 / state.assets as u128;
            u64::try_from(minted).map_err(|_| AdapterError::Rejected("share overflow".into()))?
        };

        state.assets = state
            .assets
            .checked_add(amount)
            .ok_or_else(|| AdapterError::Rejected("asset overflow".into()))?;
        state.shares = state
            .shares
            .checked_add(minted)
            .ok_or_else(|| AdapterError::Rejected("share overflow".into()))?;
        Ok(minted)
    }

    fn withdraw(&self, shares: u64) -> Result<u64, AdapterError> {
        let mut state = self.state.lock();
        if state.fail_withdrawals {
            return Err(AdapterError::Unavailable("withdraw endpoint down".into()));
        }
        if shares > state.shares {
            return Err(AdapterError::Rejected(format!(
                "redeeming {} of {} shares",
                shares, state.shares
            )));
        }
        if shares == 0 {
            return Ok(0);
        }

        let gross = (shares as u128 * state.assets as u128 / state.shares as u128) as u64;
        let fee = (gross as u128 * state.withdrawal_fee_bps as u128
            / BPS_DENOMINATOR as u128) as u64;

        state.shares -= shares;
        state.assets -= gross;
        // The fee leaves the protocol entirely.
        Ok(gross - fee)
    }

    fn total_assets(&self) -> Result<u64, AdapterError> {
        let state = self.state.lock();
        Self::check_queries(&state)?;
        Ok(state.assets)
    }

    fn total_shares(&self) -> Result<u64, AdapterError> {
        let state = self.state.lock();
        Self::check_queries(&state)?;
        Ok(state.shares)
    }

    fn estimated_apy_bps(&self) -> Result<u64, AdapterError> {
        let state = self.state.lock();
        Self::check_queries(&state)?;
        Ok(state.apy_bps)
    }

    fn is_healthy(&self) -> Result<bool, AdapterError> {
        let state = self.state.lock();
        Self::check_queries(&state)?;
        Ok(!state.forced_unhealthy)
    }

    fn protocol_snapshot(&self) -> Result<ProtocolSnapshot, AdapterError> {
        let state = self.state.lock();
        Self::check_queries(&state)?;
        Ok(ProtocolSnapshot {
            apy_bps: state.apy_bps,
            tvl: state.assets,
            liquidity: state.assets,
            utilization_bps: 0,
            is_healthy: !state.forced_unhealthy,
            protocol_name: self.name.clone(),
            last_update: Utc::now(),
        })
    }

    fn underlying(&self) -> AssetId {
        self.underlying
    }

    fn risk_level(&self) -> u8 {
        self.risk_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_deposit_mints_one_to_one() {
        let adapter = InMemoryAdapter::new("mem", AssetId::Native, 2);
        assert_eq!(adapter.deposit(Funding::Native(500)).unwrap(), 500);
        assert_eq!(adapter.total_assets().unwrap(), 500);
        assert_eq!(adapter.total_shares().unwrap(), 500);
    }

    #[test]
    fn accrual_changes_exchange_rate() {
        let adapter = InMemoryAdapter::new("mem", AssetId::Native, 2);
        adapter.deposit(Funding::Native(1_000)).unwrap();
        adapter.accrue(1_000);
        // 1000 assets now buy 500 shares.
        assert_eq!(adapter.deposit(Funding::Native(1_000)).unwrap(), 500);
        assert_eq!(adapter.withdraw(500).unwrap(), 1_000);
    }

    #[test]
    fn withdrawal_fee_reduces_realized_amount() {
        let adapter = InMemoryAdapter::new("mem", AssetId::Native, 2).with_withdrawal_fee_bps(100);
        adapter.deposit(Funding::Native(10_000)).unwrap();
        assert_eq!(adapter.withdraw(10_000).unwrap(), 9_900);
        assert_eq!(adapter.total_assets().unwrap(), 0);
    }

    #[test]
    fn wrong_asset_is_rejected() {
        let token = Address::derive("usdc");
        let adapter = InMemoryAdapter::new("mem", AssetId::Token(token), 2);
        assert!(matches!(
            adapter.deposit(Funding::Native(10)),
            Err(AdapterError::Rejected(_))
        ));
        assert!(adapter
            .deposit(Funding::Token {
                asset: token,
                amount: 10
            })
            .is_ok());
    }

    #[test]
    fn fault_switches_apply() {
        let adapter = InMemoryAdapter::new("mem", AssetId::Native, 2);
        adapter.fail_deposits(true);
        assert!(adapter.deposit(Funding::Native(1)).is_err());
        adapter.fail_deposits(false);
        adapter.deposit(Funding::Native(10)).unwrap();
        adapter.fail_withdrawals(true);
        assert!(adapter.withdraw(5).is_err());
        adapter.set_unhealthy(true);
        assert!(!adapter.is_healthy().unwrap());
    }

    #[test]
    fn over_redeem_is_rejected() {
        let adapter = InMemoryAdapter::new("mem", AssetId::Native, 2);
        adapter.deposit(Funding::Native(10)).unwrap();
        assert!(adapter.withdraw(11).is_err());
    }
}
