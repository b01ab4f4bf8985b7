//! # Health Monitor & Circuit Breaker
//!
//! ```text
//!    ┌──────────┐   unhealthy check / trip()   ┌──────────┐
//!    │  Normal  │ ───────────────────────────► │ Tripped  │
//!    └──────────┘ ◄─────────────────────────── └──────────┘
//!                          reset() only
//! ```
//!
//! A passing health check never clears a tripped breaker. Polling is driven
//! from outside: the breaker has no timer and does nothing until asked.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adapter::ProtocolSnapshot;
use crate::types::Address;

/// Why value-moving operations are halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// The circuit breaker is tripped.
    CircuitBreaker,
    /// An operator paused the vault.
    Manual,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseReason::CircuitBreaker => write!(f, "circuit breaker tripped"),
            PauseReason::Manual => write!(f, "paused by operator"),
        }
    }
}

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Operations allowed.
    Normal,
    /// Operations halted until an explicit reset.
    Tripped,
}

impl BreakerState {
    pub fn is_tripped(self) -> bool {
        self == BreakerState::Tripped
    }
}

/// What tripped the breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TripCause {
    /// A health check found the active adapter unhealthy.
    HealthCheck {
        /// The adapter that failed.
        adapter: Address,
    },
    /// An operator tripped it by hand.
    Operator {
        /// Who tripped it.
        caller: Address,
    },
}

/// Result of one health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Adapter checked, `None` in legacy mode.
    pub adapter: Option<Address>,
    /// Verdict.
    pub healthy: bool,
    /// Snapshot read during the check (zeroed if the query failed).
    pub snapshot: Option<ProtocolSnapshot>,
    /// `true` if this check moved the breaker from `Normal` to `Tripped`.
    pub tripped_now: bool,
    /// Breaker position after the check.
    pub breaker: BreakerState,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

/// The breaker plus the memory of the last health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    state: BreakerState,
    tripped_at: Option<DateTime<Utc>>,
    last_cause: Option<TripCause>,
    last_check: Option<DateTime<Utc>>,
    last_snapshot: Option<ProtocolSnapshot>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    /// A breaker in the `Normal` position with no check history.
    pub fn new() -> Self {
        Self {
            state: BreakerState::Normal,
            tripped_at: None,
            last_cause: None,
            last_check: None,
            last_snapshot: None,
        }
    }

    /// Current position.
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// `true` while tripped.
    pub fn is_tripped(&self) -> bool {
        self.state.is_tripped()
    }

    /// When the breaker last tripped.
    pub fn tripped_at(&self) -> Option<DateTime<Utc>> {
        self.tripped_at
    }

    /// Cause of the most recent trip.
    pub fn last_cause(&self) -> Option<&TripCause> {
        self.last_cause.as_ref()
    }

    /// Timestamp of the last health check.
    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.last_check
    }

    /// Last protocol snapshot seen by a health check.
    pub fn last_snapshot(&self) -> Option<&ProtocolSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Records a health observation.
    ///
    /// The timestamp is stored unconditionally. An unhealthy verdict trips a
    /// `Normal` breaker; a healthy one changes nothing.
    pub fn observe(
        &mut self,
        adapter: Option<Address>,
        healthy: bool,
        snapshot: Option<ProtocolSnapshot>,
        now: DateTime<Utc>,
    ) -> HealthReport {
        self.last_check = Some(now);
        if snapshot.is_some() {
            self.last_snapshot = snapshot.clone();
        }

        let mut tripped_now = false;
        if !healthy && !self.is_tripped() {
            if let Some(adapter) = adapter {
                tripped_now = self.trip(TripCause::HealthCheck { adapter }, now);
            }
        }

        HealthReport {
            adapter,
            healthy,
            snapshot,
            tripped_now,
            breaker: self.state,
            checked_at: now,
        }
    }

    /// Moves to `Tripped`. Returns `false` if already tripped.
    pub fn trip(&mut self, cause: TripCause, now: DateTime<Utc>) -> bool {
        if self.is_tripped() {
            return false;
        }
        self.state = BreakerState::Tripped;
        self.tripped_at = Some(now);
        self.last_cause = Some(cause);
        true
    }

    /// Moves back to `Normal`. Returns `false` if it was not tripped.
    pub fn reset(&mut self) -> bool {
        if !self.is_tripped() {
            return false;
        }
        self.state = BreakerState::Normal;
        true
    }
}
