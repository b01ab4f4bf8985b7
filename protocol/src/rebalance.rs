//! # Rebalance Orchestrator
//!
//! Moves capital from one adapter to another without touching vault shares.
//!
//! ```text
//!   from.total_assets / total_shares ─► redeem floor(amount * shares / value)
//!                                        │
//!                     realized ◄─────────┘
//!                        │  slippage check against the shares' value
//!                        ▼
//!   to.deposit(Funding::for_asset(to.underlying(), realized))
//! ```
//!
//! The realized amount, never the requested one, is what gets deposited and
//! what the caller should record in registry statistics. If the slippage check
//! or the destination deposit fails, the realized funds are put back into the
//! source. Only when that compensation fails too does value leave both
//! adapters; the caller receives it as `parked` and must hold it idle.

use serde::{Deserialize, Serialize};

use crate::adapter::{Adapter, AdapterError, Funding};
use crate::config::BPS_DENOMINATOR;
use crate::error::VaultError;
use crate::ledger::mul_div_floor;
use crate::types::Address;

/// A completed move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceOutcome {
    pub from: Address,
    pub to: Address,
    /// Value the operator asked to move.
    pub requested: u64,
    /// Source adapter shares redeemed.
    pub redeemed_shares: u64,
    /// Value the source actually released and the destination received.
    pub realized: u64,
    /// Destination adapter shares minted.
    pub minted_shares: u64,
}

/// A move that failed after value had left the source.
#[derive(Debug)]
pub struct Aborted {
    /// Why the move failed.
    pub error: VaultError,
    /// Value that could not be returned to the source.
    pub parked: u64,
    /// Why compensation failed, if it did.
    pub compensation_error: Option<AdapterError>,
}

impl From<VaultError> for Aborted {
    fn from(error: VaultError) -> Self {
        Self {
            error,
            parked: 0,
            compensation_error: None,
        }
    }
}

fn adapter_error(adapter: &dyn Adapter) -> impl FnOnce(AdapterError) -> VaultError + '_ {
    move |source| VaultError::Adapter {
        adapter: adapter.id(),
        source,
    }
}

/// Smallest realized amount accepted for an expected release of `expected`.
pub fn minimum_realized(expected: u64, slippage_tolerance_bps: u64) -> Result<u64, VaultError> {
    let keep = BPS_DENOMINATOR.saturating_sub(slippage_tolerance_bps);
    mul_div_floor(expected, keep, BPS_DENOMINATOR)
}

/// Value `redeemed_shares` should release at the source's current rate.
///
/// A request larger than the source holds is clamped by [`shares_to_redeem`],
/// so the slippage floor is taken from this figure rather than the request.
pub fn expected_release(
    redeemed_shares: u64,
    from_value: u64,
    from_shares: u64,
) -> Result<u64, VaultError> {
    if from_shares == 0 {
        return Ok(redeemed_shares);
    }
    mul_div_floor(redeemed_shares, from_value, from_shares)
}

/// Adapter shares to redeem from `from` to release roughly `amount`.
///
/// `floor(amount * shares / value)`, or `amount` itself for an adapter that
/// reports no shares, clamped to the shares held.
pub fn shares_to_redeem(amount: u64, from_value: u64, from_shares: u64) -> Result<u64, VaultError> {
    if from_shares == 0 {
        return Ok(amount);
    }
    if from_value == 0 {
        return Err(VaultError::InsufficientBalance {
            requested: amount,
            available: 0,
        });
    }
    Ok(mul_div_floor(amount, from_shares, from_value)?.min(from_shares))
}

/// Executes the move. Validation of registry state, health and authority is
/// the caller's job; this function only talks to the two adapters.
///
/// # Errors
///
/// * Failures before the source withdrawal (queries, dust) leave both
///   adapters untouched.
/// * [`VaultError::SlippageExceeded`] or a destination [`VaultError::Adapter`]
///   error after compensation was attempted; see [`Aborted::parked`].
pub fn execute(
    from: &dyn Adapter,
    to: &dyn Adapter,
    amount: u64,
    slippage_tolerance_bps: u64,
) -> Result<RebalanceOutcome, Aborted> {
    let from_value = from.total_assets().map_err(adapter_error(from))?;
    let from_shares = from.total_shares().map_err(adapter_error(from))?;
    let redeemed_shares = shares_to_redeem(amount, from_value, from_shares)?;
    if redeemed_shares == 0 {
        return Err(VaultError::ZeroAmount.into());
    }
    let expected = expected_release(redeemed_shares, from_value, from_shares)?;
    let minimum = minimum_realized(expected, slippage_tolerance_bps)?;

    let realized = from.withdraw(redeemed_shares).map_err(adapter_error(from))?;
    tracing::debug!(
        from = %from.id(),
        redeemed_shares,
        realized,
        "rebalance source released"
    );

    if realized < minimum {
        return Err(compensate(
            from,
            realized,
            VaultError::SlippageExceeded { minimum, realized },
        ));
    }

    let minted_shares = match to.deposit(Funding::for_asset(to.underlying(), realized)) {
        Ok(minted) => minted,
        Err(source) => {
            return Err(compensate(
                from,
                realized,
                VaultError::Adapter {
                    adapter: to.id(),
                    source,
                },
            ))
        }
    };

    Ok(RebalanceOutcome {
        from: from.id(),
        to: to.id(),
        requested: amount,
        redeemed_shares,
        realized,
        minted_shares,
    })
}

fn compensate(from: &dyn Adapter, realized: u64, error: VaultError) -> Aborted {
    if realized == 0 {
        return error.into();
    }
    match from.deposit(Funding::for_asset(from.underlying(), realized)) {
        Ok(_) => {
            tracing::warn!(from = %from.id(), realized, error = %error, "rebalance rolled back");
            error.into()
        }
        Err(e) => {
            tracing::warn!(
                from = %from.id(),
                realized,
                error = %error,
                compensation = %e,
                "rebalance rollback failed, funds parked"
            );
            Aborted {
                error,
                parked: realized,
                compensation_error: Some(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryAdapter;
    use crate::types::AssetId;

    fn funded(name: &str, amount: u64) -> InMemoryAdapter {
        let adapter = InMemoryAdapter::new(name, AssetId::Native, 2);
        adapter.deposit(Funding::Native(amount)).unwrap();
        adapter
    }

    #[test]
    fn moves_realized_amount() {
        let from = funded("from", 1_000);
        from.accrue(1_000); // 2 units per share
        let to = InMemoryAdapter::new("to", AssetId::Native, 2);

        let outcome = execute(&from, &to, 600, 100).unwrap();
        assert_eq!(outcome.redeemed_shares, 300);
        assert_eq!(outcome.realized, 600);
        assert_eq!(from.total_assets().unwrap(), 1_400);
        assert_eq!(to.total_assets().unwrap(), 600);
    }

    #[test]
    fn redemption_is_clamped_to_held_shares() {
        assert_eq!(shares_to_redeem(5_000, 1_000, 1_000).unwrap(), 1_000);
        assert_eq!(shares_to_redeem(70, 0, 0).unwrap(), 70);
    }

    #[test]
    fn oversized_request_drains_the_source() {
        let from = funded("from", 1_000);
        let to = InMemoryAdapter::new("to", AssetId::Native, 2);

        let outcome = execute(&from, &to, 2_000, 100).unwrap();
        assert_eq!(outcome.requested, 2_000);
        assert_eq!(outcome.redeemed_shares, 1_000);
        assert_eq!(outcome.realized, 1_000);
        assert_eq!(from.total_assets().unwrap(), 0);
        assert_eq!(to.total_assets().unwrap(), 1_000);
    }

    #[test]
    fn floor_follows_the_redeemed_shares() {
        assert_eq!(expected_release(1_000, 1_000, 1_000).unwrap(), 1_000);
        assert_eq!(expected_release(300, 2_000, 1_000).unwrap(), 600);
        assert_eq!(expected_release(70, 0, 0).unwrap(), 70);
        assert_eq!(minimum_realized(1_000, 100).unwrap(), 990);
    }

    #[test]
    fn slippage_beyond_tolerance_rolls_back() {
        let from = InMemoryAdapter::new("from", AssetId::Native, 2).with_withdrawal_fee_bps(500);
        from.deposit(Funding::Native(10_000)).unwrap();
        let to = InMemoryAdapter::new("to", AssetId::Native, 2);

        let aborted = execute(&from, &to, 1_000, 100).unwrap_err();
        assert!(matches!(
            aborted.error,
            VaultError::SlippageExceeded {
                minimum: 990,
                realized: 950
            }
        ));
        assert_eq!(aborted.parked, 0);
        // The fee is gone; the rest went back.
        assert_eq!(from.total_assets().unwrap(), 9_950);
        assert_eq!(to.total_assets().unwrap(), 0);
    }

    #[test]
    fn failed_destination_deposit_rolls_back() {
        let from = funded("from", 1_000);
        let to = InMemoryAdapter::new("to", AssetId::Native, 2);
        to.fail_deposits(true);

        let aborted = execute(&from, &to, 400, 100).unwrap_err();
        assert!(matches!(aborted.error, VaultError::Adapter { .. }));
        assert_eq!(from.total_assets().unwrap(), 1_000);
    }

    #[test]
    fn failed_compensation_parks_funds() {
        let from = funded("from", 1_000);
        let to = InMemoryAdapter::new("to", AssetId::Native, 2);
        to.fail_deposits(true);
        from.fail_deposits(true);

        let aborted = execute(&from, &to, 400, 100).unwrap_err();
        assert_eq!(aborted.parked, 400);
        assert!(aborted.compensation_error.is_some());
        assert_eq!(from.total_assets().unwrap(), 600);
    }

    #[test]
    fn token_destination_gets_token_funding() {
        let usdc = Address::derive("usdc");
        let from = InMemoryAdapter::new("from", AssetId::Token(usdc), 2);
        from.deposit(Funding::Token {
            asset: usdc,
            amount: 500,
        })
        .unwrap();
        let to = InMemoryAdapter::new("to", AssetId::Token(usdc), 2);
        let outcome = execute(&from, &to, 500, 0).unwrap();
        assert_eq!(outcome.minted_shares, 500);
    }
}
