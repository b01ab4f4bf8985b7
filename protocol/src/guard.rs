//! # Guard Pipeline
//!
//! Every mutating vault operation starts by running an ordered list of
//! [`Check`]s. The first failing check's error is returned and nothing has
//! been mutated yet. Keeping the checks in one place keeps the ordering
//! identical across entry points: authorization, then pause state, then
//! amounts, then live adapter health.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::adapter::{healthy_or_false, Adapter};
use crate::error::VaultError;
use crate::health::PauseReason;
use crate::types::Address;

// ---------------------------------------------------------------------------
// Authority
// ---------------------------------------------------------------------------

/// Privilege required by an operator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Governance owner only.
    Owner,
    /// Owner or any guardian.
    Guardian,
}

/// Who may call operator functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    owner: Address,
    guardians: BTreeSet<Address>,
}

impl Authority {
    /// An authority with only an owner.
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            guardians: BTreeSet::new(),
        }
    }

    /// The owner.
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Current guardians.
    pub fn guardians(&self) -> impl Iterator<Item = &Address> {
        self.guardians.iter()
    }

    /// Adds a guardian. Returns `false` if already present.
    pub fn add_guardian(&mut self, guardian: Address) -> bool {
        self.guardians.insert(guardian)
    }

    /// Removes a guardian. Returns `false` if absent.
    pub fn remove_guardian(&mut self, guardian: &Address) -> bool {
        self.guardians.remove(guardian)
    }

    /// Whether `caller` holds `role`.
    pub fn allows(&self, caller: &Address, role: Role) -> bool {
        match role {
            Role::Owner => *caller == self.owner,
            Role::Guardian => *caller == self.owner || self.guardians.contains(caller),
        }
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Gate state the checks are evaluated against. Captured once per call.
#[derive(Debug, Clone)]
pub struct Gate {
    /// Operator authority.
    pub authority: Authority,
    /// Manual pause flag.
    pub paused: bool,
    /// Circuit breaker position.
    pub breaker_tripped: bool,
}

/// A single validation step.
pub enum Check<'a> {
    /// Caller must hold `role`.
    Authorized {
        /// Caller identity.
        caller: Address,
        /// Required role.
        role: Role,
    },
    /// Vault must not be manually paused.
    NotPaused,
    /// Circuit breaker must be in `Normal`.
    BreakerClear,
    /// Value must be positive.
    NonZero(u64),
    /// Value must reach a threshold.
    AtLeast {
        /// Value supplied.
        amount: u64,
        /// Threshold.
        minimum: u64,
    },
    /// Adapter must report healthy right now. A failed query fails the check.
    Healthy(&'a dyn Adapter),
}

impl Check<'_> {
    fn evaluate(&self, gate: &Gate) -> Result<(), VaultError> {
        match self {
            Check::Authorized { caller, role } => {
                if gate.authority.allows(caller, *role) {
                    Ok(())
                } else {
                    Err(VaultError::Unauthorized(*caller))
                }
            }
            Check::NotPaused => {
                if gate.paused {
                    Err(VaultError::OperationsPaused {
                        reason: PauseReason::Manual,
                    })
                } else {
                    Ok(())
                }
            }
            Check::BreakerClear => {
                if gate.breaker_tripped {
                    Err(VaultError::OperationsPaused {
                        reason: PauseReason::CircuitBreaker,
                    })
                } else {
                    Ok(())
                }
            }
            Check::NonZero(value) => {
                if *value == 0 {
                    Err(VaultError::ZeroAmount)
                } else {
                    Ok(())
                }
            }
            Check::AtLeast { amount, minimum } => {
                if amount < minimum {
                    Err(VaultError::BelowMinimum {
                        amount: *amount,
                        minimum: *minimum,
                    })
                } else {
                    Ok(())
                }
            }
            Check::Healthy(adapter) => {
                if healthy_or_false(*adapter) {
                    Ok(())
                } else {
                    Err(VaultError::AdapterUnhealthy(adapter.id()))
                }
            }
        }
    }
}

/// Runs `checks` in order and returns the first failure.
///
/// # Errors
///
/// Whatever the first failing check produces.
pub fn run(checks: &[Check<'_>], gate: &Gate) -> Result<(), VaultError> {
    for check in checks {
        check.evaluate(gate)?;
    }
    Ok(())
}
