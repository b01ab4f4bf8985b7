//! # Vault Configuration & Constants
//!
//! Every fixed-point scale and every tunable threshold of the vault lives
//! here. Share math never touches floating point; the constants below define
//! the integer scales it works in.

use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::types::AssetId;

// ---------------------------------------------------------------------------
// Fixed-Point Scales
// ---------------------------------------------------------------------------

/// Scale for [`crate::Vault::price_per_share`]. A price of exactly
/// `PRECISION` means one share redeems for one unit of the base asset.
pub const PRECISION: u128 = 1_000_000_000_000_000_000;

/// Basis-point denominator. 10 000 bps = 100%.
pub const BPS_DENOMINATOR: u64 = 10_000;

// ---------------------------------------------------------------------------
// Adapter Bounds
// ---------------------------------------------------------------------------

/// Lowest risk level an adapter may declare.
pub const MIN_RISK_LEVEL: u8 = 1;

/// Highest risk level an adapter may declare.
pub const MAX_RISK_LEVEL: u8 = 10;

/// Longest accepted adapter display name, in bytes.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default minimum deposit. One unit: zero is rejected separately.
pub const DEFAULT_MIN_DEPOSIT: u64 = 1;

/// Default minimum withdrawal payout. Zero disables the check.
pub const DEFAULT_MIN_WITHDRAWAL: u64 = 0;

/// Default allocation cap for the active adapter: everything.
pub const DEFAULT_MAX_ALLOCATION_BPS: u64 = BPS_DENOMINATOR;

/// Default rebalance slippage tolerance: 1%.
pub const DEFAULT_SLIPPAGE_TOLERANCE_BPS: u64 = 100;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Backend faults kept in memory; older entries are dropped first.
pub const FAULT_LOG_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// VaultConfig
// ---------------------------------------------------------------------------

/// Tunable parameters of a single vault instance.
///
/// Loaded from the node's JSON config (the `vault` section) or built in code.
/// Operators can change the thresholds at runtime through the vault's
/// operator surface; those setters go through [`VaultConfig::validate`] too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// The single asset this vault accepts.
    pub base_asset: AssetId,

    /// Smallest accepted deposit.
    pub min_deposit: u64,

    /// Smallest accepted withdrawal payout. `0` disables the check.
    pub min_withdrawal: u64,

    /// Upper bound on the active adapter's share of total assets after a
    /// deposit, in basis points.
    pub max_allocation_bps: u64,

    /// Largest shortfall between requested and realized rebalance amounts,
    /// in basis points of the requested amount.
    pub slippage_tolerance_bps: u64,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            base_asset: AssetId::Native,
            min_deposit: DEFAULT_MIN_DEPOSIT,
            min_withdrawal: DEFAULT_MIN_WITHDRAWAL,
            max_allocation_bps: DEFAULT_MAX_ALLOCATION_BPS,
            slippage_tolerance_bps: DEFAULT_SLIPPAGE_TOLERANCE_BPS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl VaultConfig {
    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidConfig`] when a basis-point field exceeds
    /// 100% or the event channel capacity is zero.
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.max_allocation_bps > BPS_DENOMINATOR {
            return Err(VaultError::InvalidConfig(format!(
                "max_allocation_bps {} exceeds {}",
                self.max_allocation_bps, BPS_DENOMINATOR
            )));
        }
        if self.slippage_tolerance_bps > BPS_DENOMINATOR {
            return Err(VaultError::InvalidConfig(format!(
                "slippage_tolerance_bps {} exceeds {}",
                self.slippage_tolerance_bps, BPS_DENOMINATOR
            )));
        }
        if self.event_capacity == 0 {
            return Err(VaultError::InvalidConfig(
                "event_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidConfig`] on malformed JSON or failed
    /// validation.
    pub fn from_json(json: &str) -> Result<Self, VaultError> {
        let config: VaultConfig =
            serde_json::from_str(json).map_err(|e| VaultError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
