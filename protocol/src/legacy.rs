//! # Legacy Single-Backend Path
//!
//! Before adapters existed, the vault mirrored every deposit and withdrawal
//! into one backend that keeps a plain balance per account. That path is
//! still used whenever no adapter is active.
//!
//! The share ledger stays authoritative. Mirror calls happen after the ledger
//! has committed and are best-effort: a failure is reported to the caller as
//! an [`AdapterError`], which the vault records as a fault while keeping the
//! funds in its idle balance. Because the backend is balance-keyed and the
//! ledger is share-keyed, the two can drift apart; [`LegacyMirror::reconcile`]
//! measures that drift per depositor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::adapter::AdapterError;
use crate::ledger::{assets_for_redeem, ShareLedger};
use crate::types::Address;

/// A balance-keyed backend.
pub trait LegacyBackend: Send + Sync {
    /// Human-readable name.
    fn name(&self) -> String;

    /// Credits `amount` to `account`.
    fn deposit(&self, account: &Address, amount: u64) -> Result<(), AdapterError>;

    /// Debits up to `amount` from `account` and returns the amount released.
    fn withdraw(&self, account: &Address, amount: u64) -> Result<u64, AdapterError>;

    /// Balance held for `account`.
    fn balance_of(&self, account: &Address) -> Result<u64, AdapterError>;

    /// Sum of all balances.
    fn total_balance(&self) -> Result<u64, AdapterError>;
}

/// Shared handle to a legacy backend.
pub type LegacyHandle = Arc<dyn LegacyBackend>;

// ---------------------------------------------------------------------------
// InMemoryLegacy
// ---------------------------------------------------------------------------

/// In-memory legacy backend with fault switches.
#[derive(Debug)]
pub struct InMemoryLegacy {
    name: String,
    balances: DashMap<Address, u64>,
    fail_deposits: AtomicBool,
    fail_withdrawals: AtomicBool,
    fail_queries: AtomicBool,
}

impl InMemoryLegacy {
    /// Creates an empty backend.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            balances: DashMap::new(),
            fail_deposits: AtomicBool::new(false),
            fail_withdrawals: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
        }
    }

    /// Adds interest to a single account, as the old backend did.
    pub fn credit(&self, account: &Address, amount: u64) {
        let mut balance = self.balances.entry(*account).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Makes every deposit fail.
    pub fn fail_deposits(&self, fail: bool) {
        self.fail_deposits.store(fail, Ordering::SeqCst);
    }

    /// Makes every withdrawal fail.
    pub fn fail_withdrawals(&self, fail: bool) {
        self.fail_withdrawals.store(fail, Ordering::SeqCst);
    }

    /// Makes every balance query fail.
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    fn check_queries(&self) -> Result<(), AdapterError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable("legacy query endpoint down".into()));
        }
        Ok(())
    }
}

impl LegacyBackend for InMemoryLegacy {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn deposit(&self, account: &Address, amount: u64) -> Result<(), AdapterError> {
        if self.fail_deposits.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable("legacy deposit endpoint down".into()));
        }
        let mut balance = self.balances.entry(*account).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| AdapterError::Rejected("balance overflow".into()))?;
        Ok(())
    }

    fn withdraw(&self, account: &Address, amount: u64) -> Result<u64, AdapterError> {
        if self.fail_withdrawals.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable("legacy withdraw endpoint down".into()));
        }
        let mut balance = self.balances.entry(*account).or_insert(0);
        let released = amount.min(*balance);
        *balance -= released;
        Ok(released)
    }

    fn balance_of(&self, account: &Address) -> Result<u64, AdapterError> {
        self.check_queries()?;
        Ok(self.balances.get(account).map(|b| *b).unwrap_or(0))
    }

    fn total_balance(&self) -> Result<u64, AdapterError> {
        self.check_queries()?;
        Ok(self
            .balances
            .iter()
            .fold(0u64, |acc, entry| acc.saturating_add(*entry.value())))
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Ledger-versus-backend comparison for one depositor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub depositor: Address,
    pub shares: u64,
    /// Value the ledger attributes to the depositor's shares.
    pub ledger_value: u64,
    /// Balance the legacy backend holds for the depositor.
    pub legacy_balance: u64,
    /// `legacy_balance - ledger_value`, saturated to `i64`.
    pub drift: i64,
}

impl Reconciliation {
    /// Whether ledger and backend agree.
    pub fn is_consistent(&self) -> bool {
        self.drift == 0
    }
}

// ---------------------------------------------------------------------------
// LegacyMirror
// ---------------------------------------------------------------------------

/// The vault's view of its legacy backend.
#[derive(Clone)]
pub struct LegacyMirror {
    handle: LegacyHandle,
}

impl std::fmt::Debug for LegacyMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyMirror")
            .field("backend", &self.handle.name())
            .finish()
    }
}

impl LegacyMirror {
    pub fn new(handle: LegacyHandle) -> Self {
        Self { handle }
    }

    pub fn name(&self) -> String {
        self.handle.name()
    }

    /// Mirrors a deposit. Zero is a no-op.
    pub fn deposit(&self, depositor: &Address, amount: u64) -> Result<(), AdapterError> {
        if amount == 0 {
            return Ok(());
        }
        self.handle.deposit(depositor, amount)
    }

    /// Releases up to `need` from the depositor's own balance.
    ///
    /// The backend is balance-keyed, so a depositor whose ledger value has
    /// outgrown their backend balance gets only what the balance covers.
    pub fn release(&self, depositor: &Address, need: u64) -> Result<u64, AdapterError> {
        let available = self.handle.balance_of(depositor)?;
        let take = need.min(available);
        if take == 0 {
            return Ok(0);
        }
        self.handle.withdraw(depositor, take)
    }

    /// Total backend value with the "failure counts as zero" rule applied.
    pub fn total_value(&self) -> u64 {
        match self.handle.total_balance() {
            Ok(total) => total,
            Err(e) => {
                tracing::debug!(backend = %self.handle.name(), error = %e, "legacy valuation failed");
                0
            }
        }
    }

    /// Compares every holder's ledger value with their backend balance.
    ///
    /// # Errors
    ///
    /// The first failed balance query.
    pub fn reconcile(
        &self,
        ledger: &ShareLedger,
        total_assets: u64,
    ) -> Result<Vec<Reconciliation>, AdapterError> {
        let total_shares = ledger.total_shares();
        let mut report = Vec::new();
        for (depositor, record) in ledger.holders() {
            let ledger_value = assets_for_redeem(record.shares, total_assets, total_shares)
                .unwrap_or(u64::MAX);
            let legacy_balance = self.handle.balance_of(depositor)?;
            let drift = legacy_balance as i128 - ledger_value as i128;
            report.push(Reconciliation {
                depositor: *depositor,
                shares: record.shares,
                ledger_value,
                legacy_balance,
                drift: i64::try_from(drift).unwrap_or(if drift < 0 { i64::MIN } else { i64::MAX }),
            });
        }
        Ok(report)
    }
}
