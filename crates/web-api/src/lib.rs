//! REST and WebSocket surface for the platform.
//!
//! Handlers stay thin: they validate parameters, call into the service
//! state, and shape responses. Everything with design weight lives in the
//! component crates.

pub mod handlers;
pub mod server;
pub mod state;
pub mod ws;

pub use server::ApiServer;
pub use state::AppState;
