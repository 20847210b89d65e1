//! Copy trading: follow another wallet's activity with guardrails.
//!
//! - [`events`]: normalized follow events with stable fingerprints
//! - [`suggestion`]: the filter chain turning events into suggestions
//! - [`runner`]: the polling loop and its bounded history rings
//! - [`autotrader`]: queue/auto execution, sweep walking, paper fills

pub mod autotrader;
pub mod events;
pub mod runner;
pub mod suggestion;

pub use autotrader::{AutoTrader, AutoTraderConfig, SweepStopReason};
pub use events::{FollowEvent, FollowEventType};
pub use runner::FollowRunner;
pub use suggestion::{Suggestion, SuggestionBuilder, SuggestionFilters};
