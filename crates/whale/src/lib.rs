//! Whale discovery and wallet intelligence.
//!
//! - [`metrics`]: per-window PnL/volume/win-rate/smart-score math
//! - [`cache`]: TTL wallet cache with the no-pollution invariant
//! - [`discovery`]: observation queue, analyzer task, and the persistent
//!   whale index

pub mod cache;
pub mod discovery;
pub mod metrics;

pub use cache::{WalletCache, WalletCacheEntry};
pub use discovery::{WhaleDiscovery, WhaleRecord};
pub use metrics::{classify_window, MetricWindow, WindowMetrics};
