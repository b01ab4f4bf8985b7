//! # Vault Events
//!
//! Every state transition emits a [`VaultEvent`]. Events are logged through
//! `tracing` and fanned out over a broadcast channel; monitoring tools, the
//! node's WebSocket stream and its metrics all subscribe to the same feed.
//!
//! Emission is fire-and-forget. No subscriber, a lagging subscriber, or a
//! full channel never fails the operation that emitted the event.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::health::TripCause;
use crate::types::Address;

/// Which backend a fault concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Backend {
    /// A registered adapter.
    Adapter(Address),
    /// The legacy single-backend path.
    Legacy,
}

/// A backend call that failed after the ledger had committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub backend: Backend,
    /// `deposit`, `withdraw`, `rebalance` ...
    pub operation: String,
    /// Depositor the call was made for, if any.
    pub depositor: Option<Address>,
    pub amount: u64,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// State transitions observable from outside the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEvent {
    /// Shares minted against a deposit.
    Deposited {
        depositor: Address,
        amount: u64,
        shares: u64,
        /// Portion forwarded to the backend.
        forwarded: u64,
    },
    /// Shares burned for a withdrawal.
    Withdrawn {
        depositor: Address,
        shares: u64,
        amount: u64,
        paid: u64,
        deferred: u64,
    },
    /// A deferred payout was settled.
    ClaimSettled {
        depositor: Address,
        paid: u64,
        remaining: u64,
    },
    /// A backend call failed after the ledger had committed.
    BackendFault { fault: FaultRecord },
    AdapterRegistered {
        adapter: Address,
        display_name: String,
        risk_level: u8,
    },
    AdapterDeactivated {
        adapter: Address,
    },
    /// The backend for new deposits and withdrawals changed. No capital moved.
    ActiveAdapterChanged {
        previous: Option<Address>,
        current: Option<Address>,
    },
    Rebalanced {
        from: Address,
        to: Address,
        requested: u64,
        realized: u64,
    },
    HealthChecked {
        adapter: Option<Address>,
        healthy: bool,
        apy_bps: u64,
    },
    BreakerTripped {
        cause: TripCause,
    },
    BreakerReset {
        caller: Address,
    },
    Paused {
        caller: Address,
    },
    Unpaused {
        caller: Address,
    },
    /// An operator changed a threshold or role.
    ConfigUpdated {
        caller: Address,
        field: String,
        value: String,
    },
}

impl VaultEvent {
    /// Short machine name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultEvent::Deposited { .. } => "deposited",
            VaultEvent::Withdrawn { .. } => "withdrawn",
            VaultEvent::ClaimSettled { .. } => "claim_settled",
            VaultEvent::BackendFault { .. } => "backend_fault",
            VaultEvent::AdapterRegistered { .. } => "adapter_registered",
            VaultEvent::AdapterDeactivated { .. } => "adapter_deactivated",
            VaultEvent::ActiveAdapterChanged { .. } => "active_adapter_changed",
            VaultEvent::Rebalanced { .. } => "rebalanced",
            VaultEvent::HealthChecked { .. } => "health_checked",
            VaultEvent::BreakerTripped { .. } => "breaker_tripped",
            VaultEvent::BreakerReset { .. } => "breaker_reset",
            VaultEvent::Paused { .. } => "paused",
            VaultEvent::Unpaused { .. } => "unpaused",
            VaultEvent::ConfigUpdated { .. } => "config_updated",
        }
    }
}

/// An event with its envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique id.
    pub id: Uuid,
    /// Per-vault monotonically increasing sequence number, starting at 1.
    pub sequence: u64,
    /// Emission time.
    pub emitted_at: DateTime<Utc>,
    /// The event.
    pub event: VaultEvent,
}

/// Broadcast fan-out for vault events.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<EventRecord>,
    sequence: AtomicU64,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// New subscription. Receives events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Number of emitted events.
    pub fn emitted(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Logs and broadcasts `event`.
    pub fn emit(&self, event: VaultEvent) -> EventRecord {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let record = EventRecord {
            id: Uuid::new_v4(),
            sequence,
            emitted_at: Utc::now(),
            event,
        };

        match &record.event {
            VaultEvent::BackendFault { .. } | VaultEvent::BreakerTripped { .. } => {
                tracing::warn!(sequence, kind = record.event.kind(), event = ?record.event, "vault event");
            }
            _ => {
                tracing::info!(sequence, kind = record.event.kind(), event = ?record.event, "vault event");
            }
        }

        // No subscribers is fine.
        let _ = self.sender.send(record.clone());
        record
    }
}
