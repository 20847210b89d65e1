//! Strategy session orchestration.
//!
//! Each session is an actor owning one market and one strategy: a single
//! loop consumes a merged stream of book updates and periodic ticks, asks
//! the strategy for signals, and serializes the resulting actions into
//! the executors. Session state persists on a fixed cadence and shutdown
//! quiesces within two seconds.

pub mod actor;
pub mod commands;
pub mod handle;
pub mod registry;
pub mod strategy;

pub use actor::SessionActor;
pub use commands::{SessionCommand, SessionConfig, SessionState, SessionStatus};
pub use handle::SessionHandle;
pub use registry::SessionRegistry;
pub use strategy::{ActionExecutor, SessionEvent, Strategy, StrategySignal};
