//! # Vault Errors
//!
//! One taxonomy for every failure the vault can surface. Validation failures
//! are returned before any state is touched; adapter faults during a value
//! query never reach this type (they degrade to a zero contribution).

use thiserror::Error;

use crate::adapter::AdapterError;
use crate::health::PauseReason;
use crate::types::Address;

/// Errors returned by vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The requested amount or share count is zero.
    #[error("zero-amount operations are not permitted")]
    ZeroAmount,

    /// The amount is below the configured minimum.
    #[error("amount {amount} is below the minimum of {minimum}")]
    BelowMinimum {
        /// Amount the caller asked for.
        amount: u64,
        /// Configured threshold.
        minimum: u64,
    },

    /// The depositor does not hold enough shares.
    #[error("insufficient shares: requested {requested}, available {available}")]
    InsufficientShares {
        /// Shares the caller tried to redeem.
        requested: u64,
        /// Shares the depositor holds.
        available: u64,
    },

    /// A backend or the pool does not hold enough value.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Value requested.
        requested: u64,
        /// Value available.
        available: u64,
    },

    /// The pool is valued at zero, so shares redeem for nothing.
    #[error("vault holds no assets to withdraw")]
    NoAssetsToWithdraw,

    /// The adapter reported unhealthy (or its health query failed).
    #[error("adapter {0} is unhealthy")]
    AdapterUnhealthy(Address),

    /// No adapter with this id exists in the registry.
    #[error("adapter {0} is not registered")]
    AdapterNotRegistered(Address),

    /// The adapter exists but has been deactivated.
    #[error("adapter {0} is not active in the registry")]
    AdapterInactive(Address),

    /// An active adapter with this id is already registered.
    #[error("adapter {0} is already registered")]
    AdapterAlreadyRegistered(Address),

    /// The adapter is the current backend and cannot be deactivated.
    #[error("adapter {0} is the active backend")]
    AdapterInUse(Address),

    /// The null address was supplied as an adapter id.
    #[error("the zero address is not a valid adapter id")]
    InvalidAdapterId,

    /// The adapter declared a risk level outside 1..=10.
    #[error("risk level {0} is outside 1..=10")]
    InvalidRiskLevel(u8),

    /// Source and destination of a rebalance are the same adapter.
    #[error("cannot rebalance adapter {0} into itself")]
    SameAdapter(Address),

    /// Operations are halted by the circuit breaker or a manual pause.
    #[error("operations paused ({reason})")]
    OperationsPaused {
        /// What halted the vault.
        reason: PauseReason,
    },

    /// A rebalance realized less than the tolerated minimum.
    #[error("slippage exceeded: expected at least {minimum}, realized {realized}")]
    SlippageExceeded {
        /// Smallest acceptable realized amount.
        minimum: u64,
        /// Amount actually realized.
        realized: u64,
    },

    /// The caller lacks the role required for this operation.
    #[error("unauthorized caller {0}")]
    Unauthorized(Address),

    /// A mutating operation was re-entered from inside another one.
    #[error("re-entrant call rejected")]
    Reentrancy,

    /// Pending claims exceed everything the vault holds, so new shares
    /// cannot be priced.
    #[error("pending claims of {pending} exceed available value {available}")]
    ClaimsUnfunded {
        /// Value owed to depositors as pending claims.
        pending: u64,
        /// Value held across the backend and the idle balance.
        available: u64,
    },

    /// The depositor has nothing outstanding to claim.
    #[error("no pending claim for {0}")]
    NoPendingClaim(Address),

    /// Integer arithmetic would overflow.
    #[error("arithmetic overflow")]
    Overflow,

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An adapter call failed where the failure must be surfaced.
    #[error("adapter {adapter} call failed: {source}")]
    Adapter {
        /// The adapter that failed.
        adapter: Address,
        /// Underlying adapter error.
        #[source]
        source: AdapterError,
    },
}

impl VaultError {
    /// Returns `true` for the amount-validation family (zero or below minimum).
    pub fn is_invalid_amount(&self) -> bool {
        matches!(self, VaultError::ZeroAmount | VaultError::BelowMinimum { .. })
    }

    /// Returns `true` if the error came from the breaker or a manual pause.
    pub fn is_paused(&self) -> bool {
        matches!(self, VaultError::OperationsPaused { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_family_classification() {
        assert!(VaultError::ZeroAmount.is_invalid_amount());
        assert!(VaultError::BelowMinimum {
            amount: 1,
            minimum: 10
        }
        .is_invalid_amount());
        assert!(!VaultError::Overflow.is_invalid_amount());
    }

    #[test]
    fn paused_message_names_the_reason() {
        let err = VaultError::OperationsPaused {
            reason: PauseReason::CircuitBreaker,
        };
        assert!(err.is_paused());
        assert!(err.to_string().contains("circuit breaker"));
    }
}
