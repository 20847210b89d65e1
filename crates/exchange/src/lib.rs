//! Exchange connectivity for the polytrade platform.
//!
//! This crate owns everything that talks to the exchange:
//!
//! - [`rate_limiter`]: per-API-class pacing and bounded concurrency
//! - [`retry`]: shared backoff policy for transient failures
//! - [`models`]: lenient wire models for REST and WebSocket payloads
//! - [`gateway`]: typed REST wrappers (markets, books, trades, activity)
//! - [`auth`]: L1 (EIP-712) and L2 (HMAC) CLOB authentication
//! - [`eip712`]: order hashing, signing, and amount math
//! - [`trading`]: signed order lifecycle against the CLOB
//! - [`websocket`]: multiplexed market-channel subscriptions
//! - [`price_cache`]: latest price/book snapshots keyed by sequence

pub mod auth;
pub mod eip712;
pub mod gateway;
pub mod models;
pub mod orderbook;
pub mod price_cache;
pub mod rate_limiter;
pub mod retry;
pub mod trading;
pub mod websocket;

pub use gateway::{ApiError, HttpGateway};
pub use models::{Market, OutcomeToken, RawOrderbook};
pub use orderbook::NormalizedBook;
pub use price_cache::PriceCache;
pub use rate_limiter::{ApiClass, RateLimiter};
pub use retry::RetryPolicy;
pub use trading::TradingClient;
pub use websocket::{MarketEvent, WebSocketManager};
