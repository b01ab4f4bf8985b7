//! # Adapter Interface
//!
//! An adapter is a pluggable backend that puts pooled capital to work in one
//! external yield protocol. The vault depends only on the [`Adapter`] trait;
//! concrete variants (lending markets, liquidity pools, the in-memory
//! reference backend) live behind it.
//!
//! ## Trust Model
//!
//! Every adapter call is treated as untrusted and fallible. Methods return
//! `Result<_, AdapterError>` and the vault decides per call site what a failure
//! means: valuation treats it as a zero contribution, health gating treats it
//! as unhealthy, rebalancing surfaces it to the operator.
//!
//! ## Shares
//!
//! Adapters keep their own internal share concept (receipt tokens, LP shares).
//! Those are unrelated to vault shares. The vault only uses the adapter's share
//! count for proportional redemption math.

pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Address, AssetId};

pub use memory::InMemoryAdapter;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by adapter calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// The backend could not be reached or answered garbage.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend lacks the liquidity to honour a withdrawal.
    #[error("insufficient liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity {
        /// Value requested.
        requested: u64,
        /// Value the backend can release right now.
        available: u64,
    },

    /// The backend refused the call (wrong asset, paused market, bad amount).
    #[error("rejected: {0}")]
    Rejected(String),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Value handed to an adapter on deposit.
///
/// The caller picks the variant from the adapter's [`Adapter::underlying`]:
/// native value is attached to the call, tokens are transferred first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Funding {
    /// Native asset attached as call value.
    Native(u64),
    /// Token transfer of `amount` units of `asset`.
    Token {
        /// Token contract address.
        asset: Address,
        /// Units transferred.
        amount: u64,
    },
}

impl Funding {
    /// Builds the funding variant matching `asset`.
    pub fn for_asset(asset: AssetId, amount: u64) -> Self {
        match asset {
            AssetId::Native => Funding::Native(amount),
            AssetId::Token(asset) => Funding::Token { asset, amount },
        }
    }

    /// The amount carried, regardless of path.
    pub fn amount(&self) -> u64 {
        match self {
            Funding::Native(amount) => *amount,
            Funding::Token { amount, .. } => *amount,
        }
    }

    /// The asset carried.
    pub fn asset(&self) -> AssetId {
        match self {
            Funding::Native(_) => AssetId::Native,
            Funding::Token { asset, .. } => AssetId::Token(*asset),
        }
    }
}

/// Point-in-time metrics reported by an adapter.
///
/// Read-only input for health gating and APY display. The vault keeps only the
/// most recent snapshot it has seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSnapshot {
    /// Current yield in basis points.
    pub apy_bps: u64,
    /// Total value locked in the protocol.
    pub tvl: u64,
    /// Value withdrawable right now.
    pub liquidity: u64,
    /// Utilization in basis points.
    pub utilization_bps: u64,
    /// Protocol's own health verdict.
    pub is_healthy: bool,
    /// Name of the backing protocol.
    pub protocol_name: String,
    /// When the protocol last updated these figures.
    pub last_update: DateTime<Utc>,
}

impl ProtocolSnapshot {
    /// The snapshot recorded when an adapter cannot be queried: unhealthy,
    /// every metric zeroed.
    pub fn unreachable(protocol_name: impl Into<String>) -> Self {
        Self {
            apy_bps: 0,
            tvl: 0,
            liquidity: 0,
            utilization_bps: 0,
            is_healthy: false,
            protocol_name: protocol_name.into(),
            last_update: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

/// Capability contract every backend satisfies.
///
/// Methods take `&self`: adapters model external systems and own their
/// synchronization. Implementations must be cheap to query and must not call
/// back into the vault's mutating operations (the vault rejects re-entry).
pub trait Adapter: Send + Sync {
    /// Stable identifier used as the registry key.
    fn id(&self) -> Address;

    /// Human-readable name.
    fn name(&self) -> String;

    /// Deposits value and returns the adapter-internal shares minted.
    fn deposit(&self, funding: Funding) -> Result<u64, AdapterError>;

    /// Redeems adapter-internal shares and returns the value realized.
    fn withdraw(&self, shares: u64) -> Result<u64, AdapterError>;

    /// Total value the adapter manages for the vault.
    fn total_assets(&self) -> Result<u64, AdapterError>;

    /// Total adapter-internal shares held by the vault.
    fn total_shares(&self) -> Result<u64, AdapterError>;

    /// Current yield estimate in basis points.
    fn estimated_apy_bps(&self) -> Result<u64, AdapterError>;

    /// Whether the backend is safe to use right now.
    fn is_healthy(&self) -> Result<bool, AdapterError>;

    /// Full metrics snapshot.
    fn protocol_snapshot(&self) -> Result<ProtocolSnapshot, AdapterError>;

    /// Asset the adapter accepts.
    fn underlying(&self) -> AssetId;

    /// Declared risk level, 1 (lowest) to 10.
    fn risk_level(&self) -> u8;
}

/// Shared handle to an adapter.
pub type AdapterHandle = Arc<dyn Adapter>;

/// Health query with the "failure means unhealthy" rule applied.
pub fn healthy_or_false(adapter: &dyn Adapter) -> bool {
    match adapter.is_healthy() {
        Ok(healthy) => healthy,
        Err(e) => {
            tracing::warn!(adapter = %adapter.id(), error = %e, "health query failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funding_follows_the_underlying_asset() {
        let token = Address::derive("usdc");
        assert_eq!(Funding::for_asset(AssetId::Native, 5), Funding::Native(5));
        assert_eq!(
            Funding::for_asset(AssetId::Token(token), 7),
            Funding::Token {
                asset: token,
                amount: 7
            }
        );
        assert_eq!(Funding::Native(9).amount(), 9);
        assert_eq!(
            Funding::Token {
                asset: token,
                amount: 3
            }
            .asset(),
            AssetId::Token(token)
        );
    }

    #[test]
    fn unreachable_snapshot_is_unhealthy_and_zeroed() {
        let snap = ProtocolSnapshot::unreachable("dead");
        assert!(!snap.is_healthy);
        assert_eq!(snap.tvl, 0);
        assert_eq!(snap.liquidity, 0);
        assert_eq!(snap.apy_bps, 0);
    }

    #[test]
    fn failed_health_query_counts_as_unhealthy() {
        let adapter = InMemoryAdapter::new("flaky", AssetId::Native, 3);
        adapter.fail_queries(true);
        assert!(!healthy_or_false(&adapter));
        adapter.fail_queries(false);
        assert!(healthy_or_false(&adapter));
    }
}
