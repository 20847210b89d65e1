//! Core configuration, error taxonomy, and shared primitives.
//!
//! Everything here is consumed by the exchange, arbitrage, whale, follow,
//! and session crates. No network or chain code lives in this crate.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod store;

pub use config::AppConfig;
pub use config_loader::ConfigLoader;
pub use error::{ErrorKind, PlatformError};
pub use store::JsonStore;

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
