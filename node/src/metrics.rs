//! # Prometheus Metrics
//!
//! Operational metrics for the vault node, scraped at `/metrics` on the
//! metrics port. Counters are driven by the vault's event stream; gauges are
//! refreshed from [`VaultStats`] after every event and every health check.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] under the `aion`
//! prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use aion_vault::config::PRECISION;
use aion_vault::health::BreakerState;
use aion_vault::{EventRecord, VaultEvent, VaultStats};

/// Prometheus handles for the node.
#[derive(Clone)]
pub struct VaultMetrics {
    registry: Registry,
    pub deposits_total: IntCounter,
    pub withdrawals_total: IntCounter,
    pub claims_total: IntCounter,
    pub rebalances_total: IntCounter,
    pub breaker_trips_total: IntCounter,
    pub backend_faults_total: IntCounter,
    pub health_check_failures_total: IntCounter,
    pub total_assets: IntGauge,
    pub total_shares: IntGauge,
    /// Price per share as a decimal (1.0 at bootstrap).
    pub price_per_share: Gauge,
    pub idle_balance: IntGauge,
    pub pending_claims: IntGauge,
    /// 1 while the breaker is tripped.
    pub breaker_tripped: IntGauge,
    /// 1 while manually paused.
    pub paused: IntGauge,
}

fn register<C: Collector + Clone + 'static>(registry: &Registry, collector: C) -> prometheus::Result<C> {
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl VaultMetrics {
    /// Creates and registers every metric.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("aion".into()), None)?;

        let counter = |name: &str, help: &str| register(&registry, IntCounter::new(name, help)?);
        let gauge = |name: &str, help: &str| register(&registry, IntGauge::new(name, help)?);

        Ok(Self {
            deposits_total: counter("deposits_total", "Deposits accepted")?,
            withdrawals_total: counter("withdrawals_total", "Withdrawals processed")?,
            claims_total: counter("claims_total", "Pending-claim settlements")?,
            rebalances_total: counter("rebalances_total", "Completed rebalances")?,
            breaker_trips_total: counter("breaker_trips_total", "Circuit breaker trips")?,
            backend_faults_total: counter(
                "backend_faults_total",
                "Backend calls that failed after the ledger committed",
            )?,
            health_check_failures_total: counter(
                "health_check_failures_total",
                "Health checks that found the active adapter unhealthy",
            )?,
            total_assets: gauge("total_assets", "Pool valuation")?,
            total_shares: gauge("total_shares", "Outstanding shares")?,
            price_per_share: register(
                &registry,
                Gauge::new("price_per_share", "Value of one share")?,
            )?,
            idle_balance: gauge("idle_balance", "Value held outside any backend")?,
            pending_claims: gauge("pending_claims", "Value owed to depositors as pending claims")?,
            breaker_tripped: gauge("breaker_tripped", "1 while the circuit breaker is tripped")?,
            paused: gauge("paused", "1 while operations are manually paused")?,
            registry,
        })
    }

    /// Counts one vault event.
    pub fn observe(&self, record: &EventRecord) {
        match &record.event {
            VaultEvent::Deposited { .. } => self.deposits_total.inc(),
            VaultEvent::Withdrawn { .. } => self.withdrawals_total.inc(),
            VaultEvent::ClaimSettled { .. } => self.claims_total.inc(),
            VaultEvent::Rebalanced { .. } => self.rebalances_total.inc(),
            VaultEvent::BreakerTripped { .. } => self.breaker_trips_total.inc(),
            VaultEvent::BackendFault { .. } => self.backend_faults_total.inc(),
            VaultEvent::HealthChecked { healthy: false, .. } => self.health_check_failures_total.inc(),
            _ => {}
        }
    }

    /// Sets every gauge from a stats snapshot.
    pub fn refresh(&self, stats: &VaultStats) {
        self.total_assets.set(clamp_i64(stats.total_assets));
        self.total_shares.set(clamp_i64(stats.total_shares));
        self.price_per_share
            .set(stats.price_per_share as f64 / PRECISION as f64);
        self.idle_balance.set(clamp_i64(stats.idle_balance));
        self.pending_claims.set(clamp_i64(stats.pending_claims));
        self.breaker_tripped
            .set(i64::from(stats.breaker == BreakerState::Tripped));
        self.paused.set(i64::from(stats.paused));
    }

    /// Encodes every registered metric in the Prometheus text format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Shared metrics handle passed to axum handlers and background tasks.
pub type SharedMetrics = Arc<VaultMetrics>;

/// `GET /metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aion_vault::{Address, InMemoryAdapter, AssetId, Vault};

    #[test]
    fn events_drive_counters_and_stats_drive_gauges() {
        let metrics = VaultMetrics::new().unwrap();
        let owner = Address::derive("owner");
        let vault = Vault::with_defaults(owner);
        let mut events = vault.subscribe();

        let record = vault
            .register_adapter(&owner, Arc::new(InMemoryAdapter::new("mem", AssetId::Native, 2)), "Mem")
            .unwrap();
        vault.set_active_adapter(&owner, &record.id).unwrap();
        vault.deposit(&Address::derive("alice"), 5_000).unwrap();
        vault.trip_breaker(&owner).unwrap();

        while let Ok(record) = events.try_recv() {
            metrics.observe(&record);
        }
        metrics.refresh(&vault.stats());

        assert_eq!(metrics.deposits_total.get(), 1);
        assert_eq!(metrics.breaker_trips_total.get(), 1);
        assert_eq!(metrics.total_assets.get(), 5_000);
        assert_eq!(metrics.breaker_tripped.get(), 1);
        assert!((metrics.price_per_share.get() - 1.0).abs() < f64::EPSILON);

        let text = metrics.encode().unwrap();
        assert!(text.contains("aion_deposits_total 1"));
        assert!(text.contains("aion_total_assets 5000"));
    }
}
