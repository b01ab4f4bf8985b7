//! # Vault
//!
//! The pooled-fund vault: one owned state struct, one writer at a time.
//!
//! ## Locking
//!
//! ```text
//!   writer gate (ReentrantMutex<Cell<bool>>)   serializes mutating calls,
//!                                             rejects same-thread re-entry
//!   state (RwLock<VaultState>)                 held for snapshot reads and
//!                                             commits only
//! ```
//!
//! Adapter and legacy calls never run under the state lock. A mutating call
//! takes a snapshot, runs the guard pipeline, commits the ledger change, and
//! only then talks to the backend. A backend failure after the commit is
//! recorded as a fault and never rolls the ledger back.
//!
//! ## Valuation
//!
//! `total_assets = active adapter value + legacy value (no active adapter
//! only) + idle balance - pending claims`. A backend that cannot be queried
//! contributes zero.

use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::adapter::{healthy_or_false, Adapter, AdapterError, AdapterHandle, Funding, ProtocolSnapshot};
use crate::config::{VaultConfig, BPS_DENOMINATOR, FAULT_LOG_CAPACITY};
use crate::error::VaultError;
use crate::events::{Backend, EventBus, EventRecord, FaultRecord, VaultEvent};
use crate::guard::{self, Authority, Check, Gate, Role};
use crate::health::{BreakerState, CircuitBreaker, HealthReport, TripCause};
use crate::ledger::{self, mul_div_ceil, mul_div_floor, ShareLedger};
use crate::legacy::{LegacyHandle, LegacyMirror, Reconciliation};
use crate::rebalance::{self, RebalanceOutcome};
use crate::registry::{AdapterId, AdapterRecord, AdapterRegistry};
use crate::types::Address;

// ---------------------------------------------------------------------------
// Public result types
// ---------------------------------------------------------------------------

/// Result of a withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// Shares burned.
    pub shares: u64,
    /// Value the shares were worth.
    pub amount: u64,
    /// Value paid out now.
    pub paid: u64,
    /// Value owed as a pending claim because the backend could not release it.
    pub deferred: u64,
}

/// A depositor's position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositorView {
    pub address: Address,
    pub shares: u64,
    pub principal: u64,
    /// Current redemption value of the shares.
    pub value: u64,
    /// `value - principal`, floored at zero.
    pub earnings: u64,
    pub pending_claim: u64,
}

/// Vault-wide statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultStats {
    pub total_assets: u64,
    pub total_shares: u64,
    /// Scaled by [`crate::config::PRECISION`].
    pub price_per_share: u128,
    pub idle_balance: u64,
    pub pending_claims: u64,
    pub depositors: usize,
    pub active_adapter: Option<AdapterId>,
    pub legacy_backend: Option<String>,
    pub adapters_known: usize,
    pub adapters_active: usize,
    pub estimated_apy_bps: u64,
    pub breaker: BreakerState,
    pub paused: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub deposit_count: u64,
    pub withdrawal_count: u64,
    pub rebalance_count: u64,
    pub total_deposited: u64,
    pub total_withdrawn: u64,
    pub fault_count: usize,
    pub config: VaultConfig,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    deposits: u64,
    withdrawals: u64,
    rebalances: u64,
    deposited: u64,
    withdrawn: u64,
}

#[derive(Debug)]
struct VaultState {
    config: VaultConfig,
    authority: Authority,
    paused: bool,
    breaker: CircuitBreaker,
    ledger: ShareLedger,
    registry: AdapterRegistry,
    active: Option<AdapterId>,
    legacy: Option<LegacyMirror>,
    /// Value held by the vault itself, outside any backend.
    idle: u64,
    /// Value owed to depositors whose withdrawals could not be paid in full.
    pending: BTreeMap<Address, u64>,
    pending_total: u64,
    faults: VecDeque<FaultRecord>,
    counters: Counters,
}

/// Where value is sourced from and released to.
#[derive(Clone)]
enum Route {
    Adapter(AdapterId, AdapterHandle),
    Legacy(LegacyMirror),
    Idle,
}

/// State copied out under one read lock.
struct Snapshot {
    gate: Gate,
    config: VaultConfig,
    route: Route,
    idle: u64,
    pending_total: u64,
    total_shares: u64,
}

impl Snapshot {
    fn adapter_value(&self) -> u64 {
        match &self.route {
            Route::Adapter(id, handle) => match handle.total_assets() {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(adapter = %id, error = %e, "adapter valuation failed");
                    0
                }
            },
            _ => 0,
        }
    }

    /// Everything the vault holds, before pending claims are netted out.
    fn gross_assets_with(&self, adapter_value: u64) -> u64 {
        let legacy_value = match &self.route {
            Route::Legacy(mirror) => mirror.total_value(),
            _ => 0,
        };
        adapter_value
            .saturating_add(legacy_value)
            .saturating_add(self.idle)
    }

    fn total_assets_with(&self, adapter_value: u64) -> u64 {
        self.gross_assets_with(adapter_value)
            .saturating_sub(self.pending_total)
    }

    /// Fails while pending claims exceed what the vault holds. A zero net
    /// valuation in that state is a shortfall, not an empty pool, so new
    /// shares cannot be priced against it.
    fn ensure_claims_funded(&self, adapter_value: u64) -> Result<(), VaultError> {
        let available = self.gross_assets_with(adapter_value);
        if available < self.pending_total {
            return Err(VaultError::ClaimsUnfunded {
                pending: self.pending_total,
                available,
            });
        }
        Ok(())
    }

    fn total_assets(&self) -> u64 {
        self.total_assets_with(self.adapter_value())
    }

    fn adapter(&self) -> Option<&dyn Adapter> {
        match &self.route {
            Route::Adapter(_, handle) => Some(handle.as_ref()),
            _ => None,
        }
    }
}

/// Marks the writer gate busy for the duration of one mutating call.
struct WriteSession<'a> {
    guard: ReentrantMutexGuard<'a, Cell<bool>>,
}

impl Drop for WriteSession<'_> {
    fn drop(&mut self) {
        self.guard.set(false);
    }
}

fn release_from_adapter(adapter: &dyn Adapter, need: u64) -> Result<u64, AdapterError> {
    let value = adapter.total_assets()?;
    let shares = adapter.total_shares()?;
    if value == 0 {
        return Err(AdapterError::InsufficientLiquidity {
            requested: need,
            available: 0,
        });
    }
    let redeem = if shares == 0 {
        need
    } else {
        mul_div_ceil(need, shares, value)
            .map_err(|e| AdapterError::Rejected(e.to_string()))?
            .min(shares)
    };
    adapter.withdraw(redeem)
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// A single-asset pooled vault.
pub struct Vault {
    state: RwLock<VaultState>,
    writer: ReentrantMutex<Cell<bool>>,
    events: EventBus,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Vault")
            .field("owner", &state.authority.owner())
            .field("total_shares", &state.ledger.total_shares())
            .field("active", &state.active)
            .finish()
    }
}

impl Vault {
    /// Creates an empty vault owned by `owner`.
    ///
    /// # Errors
    ///
    /// [`VaultError::InvalidConfig`] if `config` fails validation.
    pub fn new(owner: Address, config: VaultConfig) -> Result<Self, VaultError> {
        config.validate()?;
        Ok(Self::build(owner, config))
    }

    /// Creates a vault with [`VaultConfig::default`].
    pub fn with_defaults(owner: Address) -> Self {
        Self::build(owner, VaultConfig::default())
    }

    fn build(owner: Address, config: VaultConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            state: RwLock::new(VaultState {
                config,
                authority: Authority::new(owner),
                paused: false,
                breaker: CircuitBreaker::new(),
                ledger: ShareLedger::new(),
                registry: AdapterRegistry::new(),
                active: None,
                legacy: None,
                idle: 0,
                pending: BTreeMap::new(),
                pending_total: 0,
                faults: VecDeque::new(),
                counters: Counters::default(),
            }),
            writer: ReentrantMutex::new(Cell::new(false)),
            events,
        }
    }

    fn begin_write(&self) -> Result<WriteSession<'_>, VaultError> {
        let guard = self.writer.lock();
        if guard.replace(true) {
            return Err(VaultError::Reentrancy);
        }
        Ok(WriteSession { guard })
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        let route = match state.active {
            Some(id) => match state.registry.handle(&id) {
                Some(handle) => Route::Adapter(id, handle),
                None => Route::Idle,
            },
            None => match &state.legacy {
                Some(mirror) => Route::Legacy(mirror.clone()),
                None => Route::Idle,
            },
        };
        Snapshot {
            gate: Gate {
                authority: state.authority.clone(),
                paused: state.paused,
                breaker_tripped: state.breaker.is_tripped(),
            },
            config: state.config.clone(),
            route,
            idle: state.idle,
            pending_total: state.pending_total,
            total_shares: state.ledger.total_shares(),
        }
    }

    fn record_fault(
        &self,
        backend: Backend,
        operation: &str,
        depositor: Option<Address>,
        amount: u64,
        reason: String,
    ) {
        let fault = FaultRecord {
            backend,
            operation: operation.to_string(),
            depositor,
            amount,
            reason,
            at: Utc::now(),
        };
        {
            let mut state = self.state.write();
            if state.faults.len() == FAULT_LOG_CAPACITY {
                state.faults.pop_front();
            }
            state.faults.push_back(fault.clone());
        }
        self.events.emit(VaultEvent::BackendFault { fault });
    }

    // -----------------------------------------------------------------------
    // Depositor surface
    // -----------------------------------------------------------------------

    /// Deposits `amount` for `depositor` and returns the shares minted.
    ///
    /// Shares are minted against the pre-deposit valuation, then the amount
    /// is forwarded to the current backend. If forwarding fails the deposit
    /// still stands and the amount stays in the idle balance.
    ///
    /// # Errors
    ///
    /// `OperationsPaused`, `ZeroAmount`, `BelowMinimum`, `AdapterUnhealthy`,
    /// `ClaimsUnfunded`, `Overflow`, `Reentrancy`. Nothing changes on error.
    pub fn deposit(&self, depositor: &Address, amount: u64) -> Result<u64, VaultError> {
        let _session = self.begin_write()?;
        let snap = self.snapshot();

        let mut checks = vec![
            Check::NotPaused,
            Check::BreakerClear,
            Check::NonZero(amount),
            Check::AtLeast {
                amount,
                minimum: snap.config.min_deposit,
            },
        ];
        if let Some(adapter) = snap.adapter() {
            checks.push(Check::Healthy(adapter));
        }
        guard::run(&checks, &snap.gate)?;

        let adapter_value = snap.adapter_value();
        snap.ensure_claims_funded(adapter_value)?;
        let total_before = snap.total_assets_with(adapter_value);
        let shares = ledger::shares_for_deposit(amount, snap.total_shares, total_before)?;

        let forward = match &snap.route {
            Route::Adapter(..) => {
                let after = total_before.checked_add(amount).ok_or(VaultError::Overflow)?;
                let allowed = mul_div_floor(after, snap.config.max_allocation_bps, BPS_DENOMINATOR)?;
                amount.min(allowed.saturating_sub(adapter_value))
            }
            Route::Legacy(_) => amount,
            Route::Idle => 0,
        };

        {
            let mut state = self.state.write();
            let idle = state.idle.checked_add(amount).ok_or(VaultError::Overflow)?;
            let deposited = state.counters.deposited.saturating_add(amount);
            state.ledger.mint(depositor, shares, amount)?;
            state.idle = idle;
            state.counters.deposits += 1;
            state.counters.deposited = deposited;
        }

        let forwarded = if forward == 0 {
            0
        } else {
            self.forward(&snap.route, depositor, forward)
        };

        tracing::info!(%depositor, amount, shares, forwarded, "deposit");
        self.events.emit(VaultEvent::Deposited {
            depositor: *depositor,
            amount,
            shares,
            forwarded,
        });
        Ok(shares)
    }

    /// Moves `amount` out of the idle balance into the route's backend.
    /// Returns what was moved; a failure is recorded and moves nothing.
    fn forward(&self, route: &Route, depositor: &Address, amount: u64) -> u64 {
        match route {
            Route::Adapter(id, handle) => {
                match handle.deposit(Funding::for_asset(handle.underlying(), amount)) {
                    Ok(_) => {
                        let mut state = self.state.write();
                        state.idle -= amount;
                        state.registry.record_deposit(id, amount);
                        amount
                    }
                    Err(e) => {
                        self.record_fault(
                            Backend::Adapter(*id),
                            "deposit",
                            Some(*depositor),
                            amount,
                            e.to_string(),
                        );
                        0
                    }
                }
            }
            Route::Legacy(mirror) => match mirror.deposit(depositor, amount) {
                Ok(()) => {
                    self.state.write().idle -= amount;
                    amount
                }
                Err(e) => {
                    self.record_fault(Backend::Legacy, "deposit", Some(*depositor), amount, e.to_string());
                    0
                }
            },
            Route::Idle => 0,
        }
    }

    /// Redeems `shares` for `depositor`.
    ///
    /// Shares are burned before any backend call. The payout comes from the
    /// idle balance first, then from the backend; whatever the backend fails
    /// to release becomes a pending claim.
    ///
    /// # Errors
    ///
    /// `OperationsPaused`, `ZeroAmount`, `AdapterUnhealthy`,
    /// `InsufficientShares`, `NoAssetsToWithdraw`, `BelowMinimum`,
    /// `Reentrancy`. Nothing changes on error.
    pub fn withdraw(&self, depositor: &Address, shares: u64) -> Result<Withdrawal, VaultError> {
        let _session = self.begin_write()?;
        self.withdraw_shares(depositor, shares)
    }

    /// Withdraws by value: converts `amount` to shares (floor, at least one)
    /// and redeems them.
    ///
    /// # Errors
    ///
    /// As [`Vault::withdraw`].
    pub fn withdraw_amount(&self, depositor: &Address, amount: u64) -> Result<Withdrawal, VaultError> {
        let _session = self.begin_write()?;
        let snap = self.snapshot();
        guard::run(
            &[Check::NotPaused, Check::BreakerClear, Check::NonZero(amount)],
            &snap.gate,
        )?;
        let shares = ledger::shares_for_amount(amount, snap.total_shares, snap.total_assets())?;
        self.withdraw_shares(depositor, shares)
    }

    fn withdraw_shares(&self, depositor: &Address, shares: u64) -> Result<Withdrawal, VaultError> {
        let snap = self.snapshot();
        let mut checks = vec![Check::NotPaused, Check::BreakerClear, Check::NonZero(shares)];
        if let Some(adapter) = snap.adapter() {
            checks.push(Check::Healthy(adapter));
        }
        guard::run(&checks, &snap.gate)?;

        let held = self.state.read().ledger.shares_of(depositor);
        if held < shares {
            return Err(VaultError::InsufficientShares {
                requested: shares,
                available: held,
            });
        }

        let total_assets = snap.total_assets();
        if total_assets == 0 {
            return Err(VaultError::NoAssetsToWithdraw);
        }
        let amount = ledger::assets_for_redeem(shares, total_assets, snap.total_shares)?;
        if snap.config.min_withdrawal > 0 {
            guard::run(
                &[Check::AtLeast {
                    amount,
                    minimum: snap.config.min_withdrawal,
                }],
                &snap.gate,
            )?;
        }

        let (from_idle, need) = {
            let mut state = self.state.write();
            let pending_total = state
                .pending_total
                .checked_add(amount)
                .ok_or(VaultError::Overflow)?;
            state.ledger.burn(depositor, shares)?;
            let from_idle = state.idle.min(amount);
            let need = amount - from_idle;
            state.idle -= from_idle;
            if need > 0 {
                *state.pending.entry(*depositor).or_insert(0) += need;
                state.pending_total = pending_total - from_idle;
            }
            state.counters.withdrawals += 1;
            state.counters.withdrawn = state.counters.withdrawn.saturating_add(amount);
            (from_idle, need)
        };

        let released = if need > 0 {
            self.release(&snap.route, depositor, need, "withdraw")
        } else {
            0
        };
        let deferred = need - released;

        tracing::info!(%depositor, shares, amount, paid = from_idle + released, deferred, "withdraw");
        self.events.emit(VaultEvent::Withdrawn {
            depositor: *depositor,
            shares,
            amount,
            paid: from_idle + released,
            deferred,
        });
        Ok(Withdrawal {
            shares,
            amount,
            paid: from_idle + released,
            deferred,
        })
    }

    /// Pulls up to `need` out of the route's backend to settle the
    /// depositor's pending claim. Returns the part of the claim settled.
    /// A surplus from share rounding is kept idle.
    fn release(&self, route: &Route, depositor: &Address, need: u64, operation: &str) -> u64 {
        let (backend, result) = match route {
            Route::Adapter(id, handle) => (Backend::Adapter(*id), release_from_adapter(handle.as_ref(), need)),
            Route::Legacy(mirror) => (Backend::Legacy, mirror.release(depositor, need)),
            Route::Idle => (
                Backend::Legacy,
                Err(AdapterError::InsufficientLiquidity {
                    requested: need,
                    available: 0,
                }),
            ),
        };

        let realized = match result {
            Ok(realized) => realized,
            Err(e) => {
                if !matches!(route, Route::Idle) {
                    self.record_fault(backend, operation, Some(*depositor), need, e.to_string());
                }
                return 0;
            }
        };

        let settled = realized.min(need);
        {
            let mut state = self.state.write();
            state.idle = state.idle.saturating_add(realized - settled);
            state.pending_total -= settled;
            let remaining = match state.pending.get_mut(depositor) {
                Some(owed) => {
                    *owed -= settled;
                    *owed
                }
                None => 0,
            };
            if remaining == 0 {
                state.pending.remove(depositor);
            }
            if let Route::Adapter(id, _) = route {
                state.registry.record_withdrawal(id, realized);
            }
        }

        if settled < need {
            self.record_fault(
                backend,
                operation,
                Some(*depositor),
                need - settled,
                format!("released {realized} of {need}"),
            );
        }
        settled
    }

    /// Settles as much of the depositor's pending claim as the idle balance
    /// and the backend allow. Returns the amount paid.
    ///
    /// # Errors
    ///
    /// `OperationsPaused`, `NoPendingClaim`, `Reentrancy`.
    pub fn claim(&self, depositor: &Address) -> Result<u64, VaultError> {
        let _session = self.begin_write()?;
        let snap = self.snapshot();
        guard::run(&[Check::NotPaused, Check::BreakerClear], &snap.gate)?;

        let (from_idle, need) = {
            let mut state = self.state.write();
            let owed = state.pending.get(depositor).copied().unwrap_or(0);
            if owed == 0 {
                return Err(VaultError::NoPendingClaim(*depositor));
            }
            let from_idle = state.idle.min(owed);
            state.idle -= from_idle;
            state.pending_total -= from_idle;
            if let Some(entry) = state.pending.get_mut(depositor) {
                *entry -= from_idle;
            }
            (from_idle, owed - from_idle)
        };

        let released = if need > 0 {
            self.release(&snap.route, depositor, need, "claim")
        } else {
            self.state.write().pending.remove(depositor);
            0
        };
        let paid = from_idle + released;
        let remaining = need - released;

        tracing::info!(%depositor, paid, remaining, "claim");
        self.events.emit(VaultEvent::ClaimSettled {
            depositor: *depositor,
            paid,
            remaining,
        });
        Ok(paid)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current pool valuation. Never fails and never mutates.
    pub fn total_assets(&self) -> u64 {
        self.snapshot().total_assets()
    }

    pub fn total_shares(&self) -> u64 {
        self.state.read().ledger.total_shares()
    }

    /// Value per share scaled by [`crate::config::PRECISION`].
    pub fn price_per_share(&self) -> u128 {
        let snap = self.snapshot();
        ledger::price_per_share(snap.total_assets(), snap.total_shares)
    }

    /// Shares a deposit of `amount` would mint right now.
    pub fn convert_to_shares(&self, amount: u64) -> Result<u64, VaultError> {
        let snap = self.snapshot();
        let adapter_value = snap.adapter_value();
        snap.ensure_claims_funded(adapter_value)?;
        ledger::shares_for_deposit(amount, snap.total_shares, snap.total_assets_with(adapter_value))
    }

    /// Value `shares` would redeem for right now.
    pub fn convert_to_assets(&self, shares: u64) -> Result<u64, VaultError> {
        let snap = self.snapshot();
        ledger::assets_for_redeem(shares, snap.total_assets(), snap.total_shares)
    }

    pub fn shares_of(&self, depositor: &Address) -> u64 {
        self.state.read().ledger.shares_of(depositor)
    }

    pub fn principal_of(&self, depositor: &Address) -> u64 {
        self.state.read().ledger.principal_of(depositor)
    }

    pub fn pending_claim_of(&self, depositor: &Address) -> u64 {
        self.state.read().pending.get(depositor).copied().unwrap_or(0)
    }

    /// Full position of one depositor.
    pub fn depositor(&self, address: &Address) -> DepositorView {
        let snap = self.snapshot();
        let (record, pending_claim) = {
            let state = self.state.read();
            (
                state.ledger.record(address).unwrap_or_default(),
                state.pending.get(address).copied().unwrap_or(0),
            )
        };
        let value = ledger::assets_for_redeem(record.shares, snap.total_assets(), snap.total_shares)
            .unwrap_or(0);
        DepositorView {
            address: *address,
            shares: record.shares,
            principal: record.principal,
            value,
            earnings: value.saturating_sub(record.principal),
            pending_claim,
        }
    }

    /// APY of the active adapter; zero in legacy mode or if the query fails.
    pub fn estimated_apy_bps(&self) -> u64 {
        self.snapshot()
            .adapter()
            .and_then(|adapter| adapter.estimated_apy_bps().ok())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> VaultStats {
        let snap = self.snapshot();
        let total_assets = snap.total_assets();
        let estimated_apy_bps = snap
            .adapter()
            .and_then(|adapter| adapter.estimated_apy_bps().ok())
            .unwrap_or(0);
        let state = self.state.read();
        VaultStats {
            total_assets,
            total_shares: snap.total_shares,
            price_per_share: ledger::price_per_share(total_assets, snap.total_shares),
            idle_balance: snap.idle,
            pending_claims: snap.pending_total,
            depositors: state.ledger.holder_count(),
            active_adapter: state.active,
            legacy_backend: state.legacy.as_ref().map(LegacyMirror::name),
            adapters_known: state.registry.known_count(),
            adapters_active: state.registry.list().len(),
            estimated_apy_bps,
            breaker: state.breaker.state(),
            paused: state.paused,
            last_health_check: state.breaker.last_check(),
            deposit_count: state.counters.deposits,
            withdrawal_count: state.counters.withdrawals,
            rebalance_count: state.counters.rebalances,
            total_deposited: state.counters.deposited,
            total_withdrawn: state.counters.withdrawn,
            fault_count: state.faults.len(),
            config: state.config.clone(),
        }
    }

    /// Active adapters in registration order.
    pub fn adapters(&self) -> Vec<AdapterRecord> {
        self.state.read().registry.list()
    }

    /// Record of any known adapter, active or not.
    pub fn adapter(&self, id: &AdapterId) -> Option<AdapterRecord> {
        self.state.read().registry.record(id).cloned()
    }

    pub fn active_adapter(&self) -> Option<AdapterId> {
        self.state.read().active
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.state.read().breaker.state()
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().paused
    }

    pub fn last_health_check(&self) -> Option<DateTime<Utc>> {
        self.state.read().breaker.last_check()
    }

    pub fn last_snapshot(&self) -> Option<ProtocolSnapshot> {
        self.state.read().breaker.last_snapshot().cloned()
    }

    pub fn config(&self) -> VaultConfig {
        self.state.read().config.clone()
    }

    pub fn owner(&self) -> Address {
        self.state.read().authority.owner()
    }

    pub fn guardians(&self) -> Vec<Address> {
        self.state.read().authority.guardians().copied().collect()
    }

    /// Recorded backend faults, oldest first.
    pub fn faults(&self) -> Vec<FaultRecord> {
        self.state.read().faults.iter().cloned().collect()
    }

    /// `true` if the sum of depositor balances equals the share supply.
    pub fn ledger_is_consistent(&self) -> bool {
        let state = self.state.read();
        state.ledger.sum_of_balances() == state.ledger.total_shares()
    }

    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }

    /// Compares ledger values with legacy balances. Empty without a legacy
    /// backend.
    ///
    /// # Errors
    ///
    /// [`VaultError::Adapter`] if a legacy balance query fails.
    pub fn reconcile_legacy(&self) -> Result<Vec<Reconciliation>, VaultError> {
        let (mirror, ledger) = {
            let state = self.state.read();
            match &state.legacy {
                Some(mirror) => (mirror.clone(), state.ledger.clone()),
                None => return Ok(Vec::new()),
            }
        };
        let total_assets = self.total_assets();
        mirror
            .reconcile(&ledger, total_assets)
            .map_err(|source| VaultError::Adapter {
                adapter: Address::ZERO,
                source,
            })
    }

    // -----------------------------------------------------------------------
    // Health
    // -----------------------------------------------------------------------

    /// Polls the active adapter and feeds the verdict to the circuit breaker.
    ///
    /// A failed health or snapshot query counts as unhealthy with zeroed
    /// metrics. A passing check never clears a tripped breaker. In legacy
    /// mode there is nothing to poll and the check passes.
    pub fn check_health(&self) -> Result<HealthReport, VaultError> {
        let _session = self.begin_write()?;
        let snap = self.snapshot();

        let (adapter, healthy, snapshot) = match &snap.route {
            Route::Adapter(id, handle) => {
                let healthy = healthy_or_false(handle.as_ref());
                let (snapshot, snapshot_ok) = match handle.protocol_snapshot() {
                    Ok(snapshot) => (snapshot, true),
                    Err(e) => {
                        tracing::warn!(adapter = %id, error = %e, "snapshot query failed");
                        (ProtocolSnapshot::unreachable(handle.name()), false)
                    }
                };
                (Some(*id), healthy && snapshot_ok, Some(snapshot))
            }
            _ => (None, true, None),
        };

        let report = self
            .state
            .write()
            .breaker
            .observe(adapter, healthy, snapshot, Utc::now());

        self.events.emit(VaultEvent::HealthChecked {
            adapter,
            healthy,
            apy_bps: report.snapshot.as_ref().map(|s| s.apy_bps).unwrap_or(0),
        });
        if report.tripped_now {
            if let Some(adapter) = adapter {
                self.events.emit(VaultEvent::BreakerTripped {
                    cause: TripCause::HealthCheck { adapter },
                });
            }
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Operator surface
    // -----------------------------------------------------------------------

    fn authorize(&self, caller: &Address, role: Role) -> Result<(WriteSession<'_>, Snapshot), VaultError> {
        let session = self.begin_write()?;
        let snap = self.snapshot();
        guard::run(&[Check::Authorized { caller: *caller, role }], &snap.gate)?;
        Ok((session, snap))
    }

    /// Registers an adapter. Its underlying asset must be the vault's base
    /// asset.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `InvalidConfig`, plus everything
    /// [`AdapterRegistry::register`] returns.
    pub fn register_adapter(
        &self,
        caller: &Address,
        handle: AdapterHandle,
        display_name: &str,
    ) -> Result<AdapterRecord, VaultError> {
        let (_session, snap) = self.authorize(caller, Role::Owner)?;
        if handle.underlying() != snap.config.base_asset {
            return Err(VaultError::InvalidConfig(format!(
                "adapter accepts {}, vault base asset is {}",
                handle.underlying(),
                snap.config.base_asset
            )));
        }
        let record = self.state.write().registry.register(handle, display_name)?;
        self.events.emit(VaultEvent::AdapterRegistered {
            adapter: record.id,
            display_name: record.display_name.clone(),
            risk_level: record.risk_level,
        });
        Ok(record)
    }

    /// Soft-deletes an adapter.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `AdapterInUse`, `AdapterNotRegistered`, `AdapterInactive`.
    pub fn deactivate_adapter(&self, caller: &Address, id: &AdapterId) -> Result<(), VaultError> {
        let (_session, _) = self.authorize(caller, Role::Owner)?;
        {
            let mut state = self.state.write();
            let active = state.active;
            state.registry.deactivate(id, active.as_ref())?;
        }
        self.events.emit(VaultEvent::AdapterDeactivated { adapter: *id });
        Ok(())
    }

    /// Points new deposits and withdrawals at `id`. Moves no capital.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `AdapterNotRegistered`, `AdapterInactive`, and
    /// `AdapterUnhealthy` if the adapter is not healthy right now.
    pub fn set_active_adapter(&self, caller: &Address, id: &AdapterId) -> Result<(), VaultError> {
        let (_session, snap) = self.authorize(caller, Role::Owner)?;
        let handle = self.state.read().registry.active_handle(id)?;
        guard::run(&[Check::Healthy(handle.as_ref())], &snap.gate)?;

        let previous = {
            let mut state = self.state.write();
            state.active.replace(*id)
        };
        if previous != Some(*id) {
            tracing::info!(?previous, current = %id, "active adapter changed");
            self.events.emit(VaultEvent::ActiveAdapterChanged {
                previous,
                current: Some(*id),
            });
        }
        Ok(())
    }

    /// Returns the vault to legacy mode.
    pub fn clear_active_adapter(&self, caller: &Address) -> Result<(), VaultError> {
        let (_session, _) = self.authorize(caller, Role::Owner)?;
        let previous = self.state.write().active.take();
        if previous.is_some() {
            self.events.emit(VaultEvent::ActiveAdapterChanged {
                previous,
                current: None,
            });
        }
        Ok(())
    }

    /// Installs or removes the legacy backend.
    pub fn set_legacy_backend(&self, caller: &Address, backend: Option<LegacyHandle>) -> Result<(), VaultError> {
        let (_session, _) = self.authorize(caller, Role::Owner)?;
        let mirror = backend.map(LegacyMirror::new);
        let value = mirror.as_ref().map(LegacyMirror::name).unwrap_or_else(|| "none".into());
        self.state.write().legacy = mirror;
        self.events.emit(VaultEvent::ConfigUpdated {
            caller: *caller,
            field: "legacy_backend".into(),
            value,
        });
        Ok(())
    }

    /// Moves `amount` of value from `from` to `to`.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `OperationsPaused`, `ZeroAmount`, `SameAdapter`,
    /// `AdapterNotRegistered`, `AdapterInactive`, `AdapterUnhealthy`,
    /// `SlippageExceeded`, `Adapter`. On error no registry statistics change.
    pub fn rebalance(
        &self,
        caller: &Address,
        from: &AdapterId,
        to: &AdapterId,
        amount: u64,
    ) -> Result<RebalanceOutcome, VaultError> {
        let (_session, snap) = self.authorize(caller, Role::Owner)?;
        guard::run(&[Check::BreakerClear, Check::NonZero(amount)], &snap.gate)?;
        if from == to {
            return Err(VaultError::SameAdapter(*from));
        }
        let (from_handle, to_handle) = {
            let state = self.state.read();
            (
                state.registry.active_handle(from)?,
                state.registry.active_handle(to)?,
            )
        };
        guard::run(&[Check::Healthy(to_handle.as_ref())], &snap.gate)?;

        match rebalance::execute(
            from_handle.as_ref(),
            to_handle.as_ref(),
            amount,
            snap.config.slippage_tolerance_bps,
        ) {
            Ok(outcome) => {
                {
                    let mut state = self.state.write();
                    state.registry.record_withdrawal(from, outcome.realized);
                    state.registry.record_deposit(to, outcome.realized);
                    state.counters.rebalances += 1;
                }
                self.events.emit(VaultEvent::Rebalanced {
                    from: *from,
                    to: *to,
                    requested: amount,
                    realized: outcome.realized,
                });
                Ok(outcome)
            }
            Err(aborted) => {
                if aborted.parked > 0 {
                    {
                        let mut state = self.state.write();
                        state.idle = state.idle.saturating_add(aborted.parked);
                    }
                    let reason = aborted
                        .compensation_error
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    self.record_fault(Backend::Adapter(*from), "rebalance", None, aborted.parked, reason);
                }
                Err(aborted.error)
            }
        }
    }

    /// Trips the breaker. Owner or guardian. Returns `false` if it was
    /// already tripped.
    pub fn trip_breaker(&self, caller: &Address) -> Result<bool, VaultError> {
        let (_session, _) = self.authorize(caller, Role::Guardian)?;
        let cause = TripCause::Operator { caller: *caller };
        let tripped = self.state.write().breaker.trip(cause.clone(), Utc::now());
        if tripped {
            self.events.emit(VaultEvent::BreakerTripped { cause });
        }
        Ok(tripped)
    }

    /// Resets the breaker. Owner only. Returns `false` if it was not tripped.
    pub fn reset_breaker(&self, caller: &Address) -> Result<bool, VaultError> {
        let (_session, _) = self.authorize(caller, Role::Owner)?;
        let reset = self.state.write().breaker.reset();
        if reset {
            self.events.emit(VaultEvent::BreakerReset { caller: *caller });
        }
        Ok(reset)
    }

    /// Halts deposits, withdrawals and claims. Owner or guardian.
    pub fn pause(&self, caller: &Address) -> Result<bool, VaultError> {
        let (_session, _) = self.authorize(caller, Role::Guardian)?;
        let changed = !std::mem::replace(&mut self.state.write().paused, true);
        if changed {
            self.events.emit(VaultEvent::Paused { caller: *caller });
        }
        Ok(changed)
    }

    /// Lifts a manual pause. Owner only.
    pub fn unpause(&self, caller: &Address) -> Result<bool, VaultError> {
        let (_session, _) = self.authorize(caller, Role::Owner)?;
        let changed = std::mem::replace(&mut self.state.write().paused, false);
        if changed {
            self.events.emit(VaultEvent::Unpaused { caller: *caller });
        }
        Ok(changed)
    }

    fn update_config(
        &self,
        caller: &Address,
        field: &str,
        value: u64,
        apply: impl FnOnce(&mut VaultConfig),
    ) -> Result<(), VaultError> {
        let (_session, snap) = self.authorize(caller, Role::Owner)?;
        let mut config = snap.config;
        apply(&mut config);
        config.validate()?;
        self.state.write().config = config;
        self.events.emit(VaultEvent::ConfigUpdated {
            caller: *caller,
            field: field.into(),
            value: value.to_string(),
        });
        Ok(())
    }

    pub fn set_min_deposit(&self, caller: &Address, value: u64) -> Result<(), VaultError> {
        self.update_config(caller, "min_deposit", value, |c| c.min_deposit = value)
    }

    pub fn set_min_withdrawal(&self, caller: &Address, value: u64) -> Result<(), VaultError> {
        self.update_config(caller, "min_withdrawal", value, |c| c.min_withdrawal = value)
    }

    /// # Errors
    ///
    /// `InvalidConfig` above 10 000.
    pub fn set_max_allocation_bps(&self, caller: &Address, value: u64) -> Result<(), VaultError> {
        self.update_config(caller, "max_allocation_bps", value, |c| c.max_allocation_bps = value)
    }

    /// # Errors
    ///
    /// `InvalidConfig` above 10 000.
    pub fn set_slippage_tolerance_bps(&self, caller: &Address, value: u64) -> Result<(), VaultError> {
        self.update_config(caller, "slippage_tolerance_bps", value, |c| {
            c.slippage_tolerance_bps = value
        })
    }

    pub fn add_guardian(&self, caller: &Address, guardian: Address) -> Result<bool, VaultError> {
        let (_session, _) = self.authorize(caller, Role::Owner)?;
        let added = self.state.write().authority.add_guardian(guardian);
        if added {
            self.events.emit(VaultEvent::ConfigUpdated {
                caller: *caller,
                field: "guardian_added".into(),
                value: guardian.to_string(),
            });
        }
        Ok(added)
    }

    pub fn remove_guardian(&self, caller: &Address, guardian: &Address) -> Result<bool, VaultError> {
        let (_session, _) = self.authorize(caller, Role::Owner)?;
        let removed = self.state.write().authority.remove_guardian(guardian);
        if removed {
            self.events.emit(VaultEvent::ConfigUpdated {
                caller: *caller,
                field: "guardian_removed".into(),
                value: guardian.to_string(),
            });
        }
        Ok(removed)
    }
}
