//! # Backend Catalog
//!
//! Serializable descriptions of the backends a node can stand up from its
//! configuration file. Each entry names a kind and carries that kind's
//! parameters:
//!
//! ```json
//! { "display_name": "Blue-chip lending", "kind": "lending_market", "name": "lend-a", "seed_supply": 1000000 }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use aion_vault::{AdapterHandle, AssetId, InMemoryAdapter, InMemoryLegacy, LegacyHandle};

use crate::lending_market::{LendingError, LendingMarketAdapter, LendingMarketConfig};
use crate::liquidity_pool::{LiquidityPoolAdapter, LiquidityPoolConfig, PoolError};

/// Errors raised while building a backend from its description.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("lending market: {0}")]
    Lending(#[from] LendingError),

    #[error("liquidity pool: {0}")]
    Pool(#[from] PoolError),
}

/// The parameters of one adapter, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterSpec {
    /// The in-memory reference backend. It takes the vault's base asset.
    InMemory {
        name: String,
        risk_level: u8,
        #[serde(default)]
        apy_bps: u64,
        #[serde(default)]
        withdrawal_fee_bps: u64,
    },
    LendingMarket(LendingMarketConfig),
    LiquidityPool(LiquidityPoolConfig),
}

impl AdapterSpec {
    /// Name the adapter id is derived from.
    pub fn name(&self) -> &str {
        match self {
            AdapterSpec::InMemory { name, .. } => name,
            AdapterSpec::LendingMarket(config) => &config.name,
            AdapterSpec::LiquidityPool(config) => &config.name,
        }
    }

    /// Instantiates the backend.
    pub fn build(&self, base_asset: AssetId) -> Result<AdapterHandle, CatalogError> {
        let handle: AdapterHandle = match self {
            AdapterSpec::InMemory {
                name,
                risk_level,
                apy_bps,
                withdrawal_fee_bps,
            } => Arc::new(
                InMemoryAdapter::new(name, base_asset, *risk_level)
                    .with_apy_bps(*apy_bps)
                    .with_withdrawal_fee_bps(*withdrawal_fee_bps),
            ),
            AdapterSpec::LendingMarket(config) => Arc::new(LendingMarketAdapter::new(config.clone())?),
            AdapterSpec::LiquidityPool(config) => Arc::new(LiquidityPoolAdapter::new(config.clone())?),
        };
        Ok(handle)
    }
}

/// A configured adapter: its registry display name plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterEntry {
    pub display_name: String,
    #[serde(flatten)]
    pub spec: AdapterSpec,
}

/// The legacy single-backend path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LegacySpec {
    InMemory { name: String },
}

impl LegacySpec {
    pub fn build(&self) -> LegacyHandle {
        match self {
            LegacySpec::InMemory { name } => Arc::new(InMemoryLegacy::new(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_parse_with_flattened_kind() {
        let json = r#"[
            {"display_name": "Reference", "kind": "in_memory", "name": "ref", "risk_level": 2, "apy_bps": 300},
            {"display_name": "Lending", "kind": "lending_market", "name": "lend", "seed_supply": 5000},
            {"display_name": "Pool", "kind": "liquidity_pool", "name": "pool", "exit_fee_bps": 10}
        ]"#;
        let entries: Vec<AdapterEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].spec.name(), "lend");
        match &entries[1].spec {
            AdapterSpec::LendingMarket(config) => {
                assert_eq!(config.seed_supply, 5_000);
                assert_eq!(config.reserve_factor_bps, 1_000);
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn built_adapters_carry_their_names() {
        let spec = AdapterSpec::InMemory {
            name: "ref".into(),
            risk_level: 2,
            apy_bps: 300,
            withdrawal_fee_bps: 0,
        };
        let adapter = spec.build(AssetId::Native).unwrap();
        assert_eq!(adapter.name(), "ref");
        assert_eq!(adapter.estimated_apy_bps().unwrap(), 300);
        assert_eq!(adapter.id(), aion_vault::Address::derive("ref"));
    }

    #[test]
    fn invalid_parameters_surface_as_catalog_errors() {
        let spec = AdapterSpec::LiquidityPool(LiquidityPoolConfig {
            exit_fee_bps: 20_000,
            ..LiquidityPoolConfig::default()
        });
        assert!(matches!(spec.build(AssetId::Native), Err(CatalogError::Pool(_))));
    }

    #[test]
    fn legacy_spec_builds_an_empty_backend() {
        let spec: LegacySpec = serde_json::from_str(r#"{"kind": "in_memory", "name": "old"}"#).unwrap();
        let legacy = spec.build();
        assert_eq!(legacy.name(), "old");
        assert_eq!(legacy.total_balance().unwrap(), 0);
    }
}
