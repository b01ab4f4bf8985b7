//! # AION Backend Adapters
//!
//! Yield backends the vault can route capital through. Each one implements
//! [`aion_vault::Adapter`] over a simulated external market:
//!
//! - **Lending Market** — supply to a pool of borrowers, earn a kinked
//!   utilization rate, withdraw only what idle cash allows.
//! - **Liquidity Pool** — provide native liquidity for LP shares, earn
//!   trading fees, pay an exit fee on the way out.
//! - **Catalog** — serializable descriptions used by the node to stand
//!   these up (and the in-memory references) from configuration.
//!
//! ## Design Principles
//!
//! 1. Every market owns its own lock. The vault never holds its state lock
//!    while calling in here.
//! 2. Market errors are typed locally and mapped to `AdapterError` at the
//!    trait boundary; liquidity shortfalls keep their figures.
//! 3. Query methods report the vault's position only. Outside suppliers and
//!    LPs exist to make the markets realistic.

pub mod catalog;
pub mod lending_market;
pub mod liquidity_pool;

pub use catalog::{AdapterEntry, AdapterSpec, CatalogError, LegacySpec};
pub use lending_market::{LendingError, LendingMarketAdapter, LendingMarketConfig, RateModel};
pub use liquidity_pool::{LiquidityPoolAdapter, LiquidityPoolConfig, PoolError};
