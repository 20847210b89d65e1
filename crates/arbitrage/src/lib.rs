//! Arbitrage detection and execution.
//!
//! - [`pricing`]: mirrored effective prices and the arbitrage predicate
//! - [`types`]: opportunities and execution records
//! - [`scanner`]: periodic deep scan with sweep eviction
//! - [`executor`]: atomic two-leg execution with stale-book aborts
//! - [`rebalancer`]: USDC/token ratio upkeep under a cooldown
//! - [`breaker`]: consecutive-failure circuit breaker
//! - [`engine`]: per-market realtime engine and state machine

pub mod breaker;
pub mod engine;
pub mod executor;
pub mod pricing;
pub mod rebalancer;
pub mod scanner;
pub mod types;

pub use engine::{ArbitrageEngine, MarketState};
pub use executor::{ArbExecutor, ExecutionError, LegExecutor};
pub use pricing::{check_arbitrage, effective_prices, ArbSignal, ArbType, EffectivePrices};
pub use scanner::DeepScanner;
pub use types::{ArbOpportunity, ExecutionRecord, MarketRef};
