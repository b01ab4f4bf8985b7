// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # AION Vault — Core Library
//!
//! A custodial pooled-fund vault. Depositors hand over a single base asset and
//! receive shares of a common pool; the pool's capital is routed through one
//! pluggable yield backend at a time, and the share math keeps every
//! depositor's claim exact while backends gain, lose, get swapped or fail.
//!
//! ## Architecture
//!
//! - **types** — Addresses and asset identifiers.
//! - **config** — Fixed-point scales, bounds, and the tunable `VaultConfig`.
//! - **error** — The `VaultError` taxonomy.
//! - **adapter** — The capability contract every backend satisfies, plus an
//!   in-memory reference backend.
//! - **registry** — Adapter metadata, soft deletion, cumulative statistics.
//! - **ledger** — Share supply, depositor records, conversion math.
//! - **legacy** — The balance-keyed single-backend path used when no adapter
//!   is active.
//! - **health** — Circuit breaker state machine.
//! - **guard** — The ordered validation pipeline run before every mutation.
//! - **rebalance** — Backend-to-backend capital moves.
//! - **events** — Structured events for every state transition.
//! - **vault** — The `Vault` itself, tying the above together.
//!
//! ## Ground Rules
//!
//! 1. Integer math only. Floor everywhere, with one-unit floors against dust.
//! 2. Ledger state commits before any backend call; backend failures after the
//!    commit are recorded, never rolled back.
//! 3. A backend that cannot be queried is worth zero and is never healthy.
//! 4. One writer at a time; readers never wait on a backend.

pub mod adapter;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod health;
pub mod ledger;
pub mod legacy;
pub mod rebalance;
pub mod registry;
pub mod types;
pub mod vault;

pub use adapter::{Adapter, AdapterError, AdapterHandle, Funding, InMemoryAdapter, ProtocolSnapshot};
pub use config::VaultConfig;
pub use error::VaultError;
pub use events::{EventRecord, VaultEvent};
pub use health::{BreakerState, HealthReport};
pub use legacy::{InMemoryLegacy, LegacyBackend, LegacyHandle};
pub use rebalance::RebalanceOutcome;
pub use registry::{AdapterId, AdapterRecord};
pub use types::{Address, AssetId};
pub use vault::{DepositorView, Vault, VaultStats, Withdrawal};
