//! # Adapter Registry
//!
//! Metadata for every adapter the vault has ever known, plus the ordered list
//! of adapters currently available for use. Deactivation is a soft delete: the
//! record stays addressable so historical statistics remain queryable, but the
//! adapter drops out of iteration.
//!
//! The registry owns metadata only. Which adapter is the current backend is
//! vault state; the registry is told about it when a deactivation must be
//! refused.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adapter::AdapterHandle;
use crate::config::{MAX_DISPLAY_NAME_LENGTH, MAX_RISK_LEVEL, MIN_RISK_LEVEL};
use crate::error::VaultError;
use crate::types::{Address, AssetId};

// ---------------------------------------------------------------------------
// AdapterRecord
// ---------------------------------------------------------------------------

/// Registry metadata for one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterRecord {
    /// Adapter id. Immutable.
    pub id: AdapterId,
    /// Available for use.
    pub active: bool,
    /// First registration time. Immutable.
    pub registered_at: DateTime<Utc>,
    /// Cumulative value routed into the adapter.
    pub total_deposited: u64,
    /// Cumulative value realized out of the adapter.
    pub total_withdrawn: u64,
    /// Operator-chosen display name.
    pub display_name: String,
    /// Risk level read from the adapter at registration.
    pub risk_level: u8,
    /// Asset the adapter accepts, read at registration.
    pub underlying: AssetId,
}

/// Alias kept distinct in signatures for readability.
pub type AdapterId = Address;

struct Entry {
    record: AdapterRecord,
    handle: AdapterHandle,
}

// ---------------------------------------------------------------------------
// AdapterRegistry
// ---------------------------------------------------------------------------

/// All adapters known to one vault.
#[derive(Default)]
pub struct AdapterRegistry {
    entries: HashMap<AdapterId, Entry>,
    /// Active adapters in registration order.
    order: Vec<AdapterId>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("known", &self.entries.len())
            .field("active", &self.order)
            .finish()
    }
}

impl AdapterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under its own id.
    ///
    /// The risk level and underlying asset are read once, here. Registering a
    /// previously deactivated adapter re-activates it, refreshes its name and
    /// risk level, and keeps `registered_at` and the cumulative counters.
    ///
    /// # Errors
    ///
    /// * [`VaultError::InvalidAdapterId`] for the zero id.
    /// * [`VaultError::AdapterAlreadyRegistered`] if the id is already active.
    /// * [`VaultError::InvalidRiskLevel`] if the declared level is outside 1..=10.
    /// * [`VaultError::InvalidConfig`] for an empty or oversized display name.
    pub fn register(
        &mut self,
        handle: AdapterHandle,
        display_name: &str,
    ) -> Result<AdapterRecord, VaultError> {
        let id = handle.id();
        if id.is_zero() {
            return Err(VaultError::InvalidAdapterId);
        }
        if let Some(entry) = self.entries.get(&id) {
            if entry.record.active {
                return Err(VaultError::AdapterAlreadyRegistered(id));
            }
        }

        let risk_level = handle.risk_level();
        if !(MIN_RISK_LEVEL..=MAX_RISK_LEVEL).contains(&risk_level) {
            return Err(VaultError::InvalidRiskLevel(risk_level));
        }
        let display_name = display_name.trim();
        if display_name.is_empty() || display_name.len() > MAX_DISPLAY_NAME_LENGTH {
            return Err(VaultError::InvalidConfig(format!(
                "display name must be 1..={} bytes",
                MAX_DISPLAY_NAME_LENGTH
            )));
        }
        let underlying = handle.underlying();

        let record = match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.record.active = true;
                entry.record.display_name = display_name.to_string();
                entry.record.risk_level = risk_level;
                entry.record.underlying = underlying;
                entry.handle = handle;
                entry.record.clone()
            }
            None => {
                let record = AdapterRecord {
                    id,
                    active: true,
                    registered_at: Utc::now(),
                    total_deposited: 0,
                    total_withdrawn: 0,
                    display_name: display_name.to_string(),
                    risk_level,
                    underlying,
                };
                self.entries.insert(
                    id,
                    Entry {
                        record: record.clone(),
                        handle,
                    },
                );
                record
            }
        };
        self.order.push(id);
        Ok(record)
    }

    /// Soft-deletes an adapter.
    ///
    /// # Errors
    ///
    /// * [`VaultError::AdapterNotRegistered`] for an unknown id.
    /// * [`VaultError::AdapterInUse`] if `id` is `current_backend`.
    /// * [`VaultError::AdapterInactive`] if it is already deactivated.
    pub fn deactivate(
        &mut self,
        id: &AdapterId,
        current_backend: Option<&AdapterId>,
    ) -> Result<(), VaultError> {
        if current_backend == Some(id) {
            return Err(VaultError::AdapterInUse(*id));
        }
        let entry = self
            .entries
            .get_mut(id)
            .ok_or(VaultError::AdapterNotRegistered(*id))?;
        if !entry.record.active {
            return Err(VaultError::AdapterInactive(*id));
        }
        entry.record.active = false;
        self.order.retain(|known| known != id);
        Ok(())
    }

    /// Returns the handle of a registered, active adapter.
    ///
    /// # Errors
    ///
    /// [`VaultError::AdapterNotRegistered`] or [`VaultError::AdapterInactive`].
    pub fn active_handle(&self, id: &AdapterId) -> Result<AdapterHandle, VaultError> {
        let entry = self
            .entries
            .get(id)
            .ok_or(VaultError::AdapterNotRegistered(*id))?;
        if !entry.record.active {
            return Err(VaultError::AdapterInactive(*id));
        }
        Ok(entry.handle.clone())
    }

    /// Returns the handle of any known adapter, active or not.
    pub fn handle(&self, id: &AdapterId) -> Option<AdapterHandle> {
        self.entries.get(id).map(|entry| entry.handle.clone())
    }

    /// Returns the record for any known adapter.
    pub fn record(&self, id: &AdapterId) -> Option<&AdapterRecord> {
        self.entries.get(id).map(|entry| &entry.record)
    }

    /// Returns `true` if `id` is registered and active.
    pub fn is_active(&self, id: &AdapterId) -> bool {
        self.entries
            .get(id)
            .map(|entry| entry.record.active)
            .unwrap_or(false)
    }

    /// Active adapter records in registration order.
    pub fn list(&self) -> Vec<AdapterRecord> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Number of adapters ever registered.
    pub fn known_count(&self) -> usize {
        self.entries.len()
    }

    /// Adds realized value to an adapter's cumulative deposit counter.
    pub fn record_deposit(&mut self, id: &AdapterId, amount: u64) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.record.total_deposited = entry.record.total_deposited.saturating_add(amount);
        }
    }

    /// Adds realized value to an adapter's cumulative withdrawal counter.
    pub fn record_withdrawal(&mut self, id: &AdapterId, amount: u64) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.record.total_withdrawn = entry.record.total_withdrawn.saturating_add(amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryAdapter;
    use std::sync::Arc;

    fn handle(name: &str, risk: u8) -> AdapterHandle {
        Arc::new(InMemoryAdapter::new(name, AssetId::Native, risk))
    }

    #[test]
    fn register_sets_active_and_reads_risk() {
        let mut registry = AdapterRegistry::new();
        let record = registry.register(handle("alpha", 4), "Alpha").unwrap();
        assert!(record.active);
        assert_eq!(record.risk_level, 4);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn duplicate_active_id_rejected() {
        let mut registry = AdapterRegistry::new();
        registry.register(handle("alpha", 4), "Alpha").unwrap();
        assert!(matches!(
            registry.register(handle("alpha", 4), "Alpha again"),
            Err(VaultError::AdapterAlreadyRegistered(_))
        ));
    }

    #[test]
    fn risk_level_out_of_range_rejected() {
        let mut registry = AdapterRegistry::new();
        assert!(matches!(
            registry.register(handle("risky", 11), "Risky"),
            Err(VaultError::InvalidRiskLevel(11))
        ));
        assert!(matches!(
            registry.register(handle("riskless", 0), "Riskless"),
            Err(VaultError::InvalidRiskLevel(0))
        ));
    }

    #[test]
    fn deactivate_removes_from_list_but_keeps_record() {
        let mut registry = AdapterRegistry::new();
        let id = registry.register(handle("alpha", 4), "Alpha").unwrap().id;
        registry.deactivate(&id, None).unwrap();
        assert!(registry.list().is_empty());
        assert!(!registry.record(&id).unwrap().active);
        assert!(matches!(
            registry.active_handle(&id),
            Err(VaultError::AdapterInactive(_))
        ));
    }

    #[test]
    fn cannot_deactivate_current_backend() {
        let mut registry = AdapterRegistry::new();
        let id = registry.register(handle("alpha", 4), "Alpha").unwrap().id;
        assert!(matches!(
            registry.deactivate(&id, Some(&id)),
            Err(VaultError::AdapterInUse(_))
        ));
        assert!(registry.is_active(&id));
    }

    #[test]
    fn reregistration_keeps_history() {
        let mut registry = AdapterRegistry::new();
        let first = registry.register(handle("alpha", 4), "Alpha").unwrap();
        registry.record_deposit(&first.id, 700);
        registry.deactivate(&first.id, None).unwrap();

        let again = registry.register(handle("alpha", 4), "Alpha v2").unwrap();
        assert_eq!(again.registered_at, first.registered_at);
        assert_eq!(again.total_deposited, 700);
        assert_eq!(again.display_name, "Alpha v2");
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn zero_id_rejected() {
        let mut registry = AdapterRegistry::new();
        let zero = Arc::new(InMemoryAdapter::new("zero", AssetId::Native, 1).with_id(Address::ZERO));
        assert!(matches!(
            registry.register(zero, "Zero"),
            Err(VaultError::InvalidAdapterId)
        ));
    }

    #[test]
    fn unknown_adapter_is_not_registered() {
        let registry = AdapterRegistry::new();
        let id = Address::derive("ghost");
        assert!(matches!(
            registry.active_handle(&id),
            Err(VaultError::AdapterNotRegistered(_))
        ));
    }
}
