//! # Node Configuration
//!
//! The JSON file `aion-node run` reads at startup: who operates the vault,
//! the vault's own settings, the backends to stand up, and where to listen.
//!
//! ```json
//! {
//!   "owner": "0x…",
//!   "guardians": [],
//!   "vault": { "min_deposit": 1000 },
//!   "adapters": [
//!     { "display_name": "Reference", "kind": "in_memory", "name": "reference", "risk_level": 2 }
//!   ],
//!   "health_check_interval_secs": 30,
//!   "api_port": 9841,
//!   "metrics_port": 9842
//! }
//! ```
//!
//! The first adapter listed becomes the active backend. `owner` and every
//! guardian are key-derived addresses (see [`crate::auth`]); `aion-node init`
//! generates the owner key and writes its address here.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use aion_adapters::catalog::{AdapterEntry, AdapterSpec, LegacySpec};
use aion_adapters::lending_market::LendingMarketConfig;
use aion_vault::{Address, Vault, VaultConfig};

pub const DEFAULT_API_PORT: u16 = 9841;
pub const DEFAULT_METRICS_PORT: u16 = 9842;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Everything the node needs to build and serve a vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Vault owner. Operator API calls must be signed by this address (or a
    /// guardian). Required.
    pub owner: Address,
    pub guardians: Vec<Address>,
    pub vault: VaultConfig,
    /// Backends registered at startup, in order.
    pub adapters: Vec<AdapterEntry>,
    /// Balance-keyed backend used while no adapter is active.
    pub legacy: Option<LegacySpec>,
    pub health_check_interval_secs: u64,
    pub api_port: u16,
    pub metrics_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            owner: Address::ZERO,
            guardians: Vec::new(),
            vault: VaultConfig::default(),
            adapters: Vec::new(),
            legacy: None,
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            api_port: DEFAULT_API_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }
}

impl NodeConfig {
    /// The configuration `aion-node init` writes: a reference backend to
    /// start on and a lending market to rebalance into.
    pub fn starter(owner: Address) -> Self {
        Self {
            owner,
            adapters: vec![
                AdapterEntry {
                    display_name: "Reference".into(),
                    spec: AdapterSpec::InMemory {
                        name: "reference".into(),
                        risk_level: 2,
                        apy_bps: 350,
                        withdrawal_fee_bps: 0,
                    },
                },
                AdapterEntry {
                    display_name: "Lending market".into(),
                    spec: AdapterSpec::LendingMarket(LendingMarketConfig {
                        name: "lending".into(),
                        seed_supply: 1_000_000,
                        seed_borrows: 600_000,
                        ..LendingMarketConfig::default()
                    }),
                },
            ],
            ..Self::default()
        }
    }

    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: NodeConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("failed to encode config")?;
        std::fs::write(path, raw)
            .with_context(|| format!("failed to write config file {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.owner.is_zero() {
            bail!("owner is not set (run `aion-node init` to generate an owner key)");
        }
        self.vault.validate().context("invalid vault section")?;
        if self.health_check_interval_secs == 0 {
            bail!("health_check_interval_secs must be positive");
        }
        if self.api_port == self.metrics_port {
            bail!("api_port and metrics_port must differ (both {})", self.api_port);
        }
        Ok(())
    }

    /// Builds the vault: guardians, the legacy backend, every configured
    /// adapter, and the first adapter activated.
    pub fn build_vault(&self) -> Result<Vault> {
        let vault = Vault::new(self.owner, self.vault.clone()).context("invalid vault configuration")?;

        for guardian in &self.guardians {
            vault.add_guardian(&self.owner, *guardian)?;
        }
        if let Some(legacy) = &self.legacy {
            vault.set_legacy_backend(&self.owner, Some(legacy.build()))?;
        }

        let mut first = None;
        for entry in &self.adapters {
            let handle = entry
                .spec
                .build(self.vault.base_asset)
                .with_context(|| format!("failed to build adapter {}", entry.spec.name()))?;
            let record = vault
                .register_adapter(&self.owner, handle, &entry.display_name)
                .with_context(|| format!("failed to register adapter {}", entry.spec.name()))?;
            tracing::info!(adapter = %record.id, name = %entry.display_name, "adapter registered");
            first.get_or_insert(record.id);
        }
        if let Some(id) = first {
            vault
                .set_active_adapter(&self.owner, &id)
                .with_context(|| format!("failed to activate adapter {id}"))?;
        }
        Ok(vault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Address {
        Address::derive("owner")
    }

    #[test]
    fn starter_config_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aion.json");
        NodeConfig::starter(owner()).save(&path).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.owner, owner());
        assert_eq!(loaded.adapters.len(), 2);
        assert_eq!(loaded.adapters[0].display_name, "Reference");
        assert_eq!(loaded.api_port, DEFAULT_API_PORT);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let raw = format!(r#"{{"owner": "{}", "api_port": 7000}}"#, owner());
        let config: NodeConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(config.api_port, 7000);
        assert_eq!(config.metrics_port, DEFAULT_METRICS_PORT);
        assert!(config.adapters.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn clashing_ports_are_rejected() {
        let config = NodeConfig {
            metrics_port: DEFAULT_API_PORT,
            ..NodeConfig::starter(owner())
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_owner_is_rejected() {
        let err = NodeConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("owner is not set"));
    }

    #[test]
    fn unreadable_file_reports_the_path() {
        let err = NodeConfig::load(Path::new("/nonexistent/aion.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/aion.json"));
    }

    #[test]
    fn starter_vault_activates_the_first_adapter() {
        let config = NodeConfig {
            guardians: vec![Address::derive("guardian")],
            ..NodeConfig::starter(owner())
        };
        let vault = config.build_vault().unwrap();
        assert_eq!(vault.active_adapter(), Some(Address::derive("reference")));
        assert_eq!(vault.adapters().len(), 2);
        assert_eq!(vault.guardians(), vec![Address::derive("guardian")]);
    }

    #[test]
    fn legacy_only_vault_has_no_active_adapter() {
        let config = NodeConfig {
            owner: owner(),
            legacy: Some(LegacySpec::InMemory { name: "old".into() }),
            ..NodeConfig::default()
        };
        let vault = config.build_vault().unwrap();
        assert_eq!(vault.active_adapter(), None);
        assert_eq!(vault.stats().legacy_backend.as_deref(), Some("old"));
    }
}
