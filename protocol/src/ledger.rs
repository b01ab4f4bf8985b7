//! # Share Ledger
//!
//! Owns the share supply and every depositor's record. The ledger never talks
//! to a backend: it is handed a pool valuation and does integer math against
//! it.
//!
//! ## Rounding Policy
//!
//! All conversions floor. Two explicit one-unit floors stop a positive intent
//! from rounding to nothing:
//!
//! * a positive deposit always mints at least one share;
//! * a positive redemption against a positive pool always pays at least one
//!   unit.
//!
//! ## Invariant
//!
//! `sum(record.shares) == total_shares` after every mutation. Mint and burn
//! are the only writers and they update both sides together.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::PRECISION;
use crate::error::VaultError;
use crate::types::Address;

// ---------------------------------------------------------------------------
// Conversion math
// ---------------------------------------------------------------------------

/// `floor(a * b / c)` computed in 128 bits.
///
/// # Errors
///
/// [`VaultError::Overflow`] if `c` is zero or the result exceeds `u64`.
pub fn mul_div_floor(a: u64, b: u64, c: u64) -> Result<u64, VaultError> {
    if c == 0 {
        return Err(VaultError::Overflow);
    }
    let wide = a as u128 * b as u128 / c as u128;
    u64::try_from(wide).map_err(|_| VaultError::Overflow)
}

/// `ceil(a * b / c)` computed in 128 bits.
///
/// # Errors
///
/// [`VaultError::Overflow`] if `c` is zero or the result exceeds `u64`.
pub fn mul_div_ceil(a: u64, b: u64, c: u64) -> Result<u64, VaultError> {
    if c == 0 {
        return Err(VaultError::Overflow);
    }
    let c = c as u128;
    let wide = (a as u128 * b as u128).div_ceil(c);
    u64::try_from(wide).map_err(|_| VaultError::Overflow)
}

/// Shares minted for a deposit of `amount` into a pool valued `total_assets`.
///
/// An empty supply or a zero-valued pool bootstraps at 1:1 (the second case
/// is the emergency reset after a total loss).
pub fn shares_for_deposit(
    amount: u64,
    total_shares: u64,
    total_assets: u64,
) -> Result<u64, VaultError> {
    if total_shares == 0 || total_assets == 0 {
        return Ok(amount);
    }
    let shares = mul_div_floor(amount, total_shares, total_assets)?;
    if shares == 0 && amount > 0 {
        return Ok(1);
    }
    Ok(shares)
}

/// Value paid for redeeming `shares` out of `total_shares`.
pub fn assets_for_redeem(
    shares: u64,
    total_assets: u64,
    total_shares: u64,
) -> Result<u64, VaultError> {
    if total_shares == 0 || total_assets == 0 {
        return Ok(0);
    }
    let amount = mul_div_floor(shares, total_assets, total_shares)?;
    if amount == 0 && shares > 0 {
        return Ok(1);
    }
    Ok(amount)
}

/// Shares to burn for an amount-based withdrawal.
pub fn shares_for_amount(
    amount: u64,
    total_shares: u64,
    total_assets: u64,
) -> Result<u64, VaultError> {
    if total_assets == 0 {
        return Err(VaultError::NoAssetsToWithdraw);
    }
    let shares = mul_div_floor(amount, total_shares, total_assets)?;
    if shares == 0 && amount > 0 {
        return Ok(1);
    }
    Ok(shares)
}

/// Pool value per share, scaled by [`PRECISION`]. Unity for an empty supply.
pub fn price_per_share(total_assets: u64, total_shares: u64) -> u128 {
    if total_shares == 0 {
        return PRECISION;
    }
    total_assets as u128 * PRECISION / total_shares as u128
}

// ---------------------------------------------------------------------------
// DepositorRecord
// ---------------------------------------------------------------------------

/// One depositor's position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositorRecord {
    /// Vault shares held.
    pub shares: u64,
    /// Contributed value still attributed to the position. Display only.
    pub principal: u64,
}

// ---------------------------------------------------------------------------
// ShareLedger
// ---------------------------------------------------------------------------

/// Share supply and per-depositor records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShareLedger {
    total_shares: u64,
    records: BTreeMap<Address, DepositorRecord>,
}

impl ShareLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total shares outstanding.
    pub fn total_shares(&self) -> u64 {
        self.total_shares
    }

    /// Shares held by `depositor`.
    pub fn shares_of(&self, depositor: &Address) -> u64 {
        self.records.get(depositor).map(|r| r.shares).unwrap_or(0)
    }

    /// Principal attributed to `depositor`.
    pub fn principal_of(&self, depositor: &Address) -> u64 {
        self.records.get(depositor).map(|r| r.principal).unwrap_or(0)
    }

    /// Full record, if the depositor has ever deposited.
    pub fn record(&self, depositor: &Address) -> Option<DepositorRecord> {
        self.records.get(depositor).copied()
    }

    /// Depositors with a nonzero share balance.
    pub fn holders(&self) -> impl Iterator<Item = (&Address, &DepositorRecord)> {
        self.records.iter().filter(|(_, r)| r.shares > 0)
    }

    /// Number of depositors holding shares.
    pub fn holder_count(&self) -> usize {
        self.holders().count()
    }

    /// Credits `shares` and `principal` to `depositor`.
    ///
    /// # Errors
    ///
    /// [`VaultError::Overflow`] if any counter would wrap; nothing changes.
    pub fn mint(
        &mut self,
        depositor: &Address,
        shares: u64,
        principal: u64,
    ) -> Result<(), VaultError> {
        let current = self.record(depositor).unwrap_or_default();
        let next = DepositorRecord {
            shares: current
                .shares
                .checked_add(shares)
                .ok_or(VaultError::Overflow)?,
            principal: current
                .principal
                .checked_add(principal)
                .ok_or(VaultError::Overflow)?,
        };
        let total = self
            .total_shares
            .checked_add(shares)
            .ok_or(VaultError::Overflow)?;

        self.records.insert(*depositor, next);
        self.total_shares = total;
        Ok(())
    }

    /// Burns `shares` from `depositor` and reduces principal proportionally.
    ///
    /// Returns the principal released. When the balance reaches zero the
    /// principal is zeroed exactly.
    ///
    /// # Errors
    ///
    /// [`VaultError::InsufficientShares`] if the depositor holds fewer shares.
    pub fn burn(&mut self, depositor: &Address, shares: u64) -> Result<u64, VaultError> {
        let current = self.record(depositor).unwrap_or_default();
        if current.shares < shares {
            return Err(VaultError::InsufficientShares {
                requested: shares,
                available: current.shares,
            });
        }

        let remaining = current.shares - shares;
        let released = if remaining == 0 {
            current.principal
        } else {
            // remaining + shares is the pre-burn balance.
            mul_div_floor(current.principal, shares, current.shares)?
        };

        self.records.insert(
            *depositor,
            DepositorRecord {
                shares: remaining,
                principal: current.principal - released,
            },
        );
        self.total_shares -= shares;
        Ok(released)
    }

    /// Recomputes the share sum from the records.
    pub fn sum_of_balances(&self) -> u64 {
        self.records.values().map(|r| r.shares).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(label: &str) -> Address {
        Address::derive(label)
    }

    #[test]
    fn bootstrap_mints_one_to_one() {
        assert_eq!(shares_for_deposit(1_000, 0, 0).unwrap(), 1_000);
        // Emergency reset: shares exist but the pool is worthless.
        assert_eq!(shares_for_deposit(1_000, 500, 0).unwrap(), 1_000);
    }

    #[test]
    fn proportional_mint_floors() {
        assert_eq!(shares_for_deposit(1_000, 1_000, 1_100).unwrap(), 909);
    }

    #[test]
    fn dust_deposit_mints_one_share() {
        assert_eq!(shares_for_deposit(1, 1_000, u64::MAX / 2).unwrap(), 1);
    }

    #[test]
    fn dust_redemption_pays_one_unit() {
        assert_eq!(assets_for_redeem(1, 1, 1_000_000).unwrap(), 1);
        assert_eq!(assets_for_redeem(1, 0, 1_000_000).unwrap(), 0);
    }

    #[test]
    fn redemption_matches_worked_example() {
        assert_eq!(assets_for_redeem(1_000, 2_100, 1_909).unwrap(), 1_100);
    }

    #[test]
    fn price_per_share_defaults_to_unity() {
        assert_eq!(price_per_share(0, 0), PRECISION);
        assert_eq!(price_per_share(1_000, 1_000), PRECISION);
        assert_eq!(price_per_share(1_100, 1_000), PRECISION * 11 / 10);
    }

    #[test]
    fn mul_div_ceil_rounds_up() {
        assert_eq!(mul_div_ceil(577, 1_000, 1_100).unwrap(), 525);
        assert_eq!(mul_div_ceil(1_100, 1_000, 1_100).unwrap(), 1_000);
        assert!(mul_div_ceil(1, 1, 0).is_err());
    }

    #[test]
    fn overflow_is_reported() {
        assert!(matches!(
            mul_div_floor(u64::MAX, u64::MAX, 1),
            Err(VaultError::Overflow)
        ));
    }

    #[test]
    fn mint_and_burn_preserve_sum_invariant() {
        let mut ledger = ShareLedger::new();
        ledger.mint(&addr("a"), 1_000, 1_000).unwrap();
        ledger.mint(&addr("b"), 909, 1_000).unwrap();
        ledger.burn(&addr("a"), 400).unwrap();
        assert_eq!(ledger.total_shares(), 1_509);
        assert_eq!(ledger.sum_of_balances(), ledger.total_shares());
    }

    #[test]
    fn partial_burn_reduces_principal_proportionally() {
        let mut ledger = ShareLedger::new();
        let a = addr("a");
        ledger.mint(&a, 1_000, 3_000).unwrap();
        let released = ledger.burn(&a, 250).unwrap();
        assert_eq!(released, 750);
        assert_eq!(ledger.principal_of(&a), 2_250);
    }

    #[test]
    fn full_burn_zeroes_principal_exactly() {
        let mut ledger = ShareLedger::new();
        let a = addr("a");
        ledger.mint(&a, 3, 1_000).unwrap();
        ledger.burn(&a, 1).unwrap();
        ledger.burn(&a, 2).unwrap();
        assert_eq!(ledger.shares_of(&a), 0);
        assert_eq!(ledger.principal_of(&a), 0);
        assert_eq!(ledger.holder_count(), 0);
    }

    #[test]
    fn over_burn_is_rejected_without_change() {
        let mut ledger = ShareLedger::new();
        let a = addr("a");
        ledger.mint(&a, 10, 10).unwrap();
        assert!(matches!(
            ledger.burn(&a, 11),
            Err(VaultError::InsufficientShares {
                requested: 11,
                available: 10
            })
        ));
        assert_eq!(ledger.shares_of(&a), 10);
        assert_eq!(ledger.total_shares(), 10);
    }

    #[test]
    fn amount_to_shares_requires_value() {
        assert!(matches!(
            shares_for_amount(10, 10, 0),
            Err(VaultError::NoAssetsToWithdraw)
        ));
        assert_eq!(shares_for_amount(550, 1_000, 1_100).unwrap(), 500);
    }
}
