use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Commands a session actor accepts.
#[derive(Debug)]
pub enum SessionCommand {
    Start,
    Stop,
    UpdateConfig(Box<SessionConfig>),
    GetStatus(oneshot::Sender<SessionStatus>),
    Shutdown,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Stopped,
    Running,
    Stopping,
}

/// Configuration for one strategy session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_id: String,
    pub condition_id: String,
    pub yes_asset_id: String,
    pub no_asset_id: String,
    /// Strategy name, for status display.
    pub strategy: String,
    /// Periodic tick interval, ms.
    pub tick_interval_ms: u64,
    /// State persistence cadence, ms.
    pub persist_interval_ms: u64,
}

impl SessionConfig {
    fn default_intervals() -> (u64, u64) {
        (1_000, 5_000)
    }

    /// A config with the default intervals.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        condition_id: impl Into<String>,
        yes_asset_id: impl Into<String>,
        no_asset_id: impl Into<String>,
        strategy: impl Into<String>,
    ) -> Self {
        let (tick_interval_ms, persist_interval_ms) = Self::default_intervals();
        Self {
            session_id: session_id.into(),
            condition_id: condition_id.into(),
            yes_asset_id: yes_asset_id.into(),
            no_asset_id: no_asset_id.into(),
            strategy: strategy.into(),
            tick_interval_ms,
            persist_interval_ms,
        }
    }
}

/// Persisted and queryable session status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub condition_id: String,
    pub strategy: String,
    pub state: SessionState,
    pub signals_generated: u64,
    pub orders_placed: u64,
    pub orders_cancelled: u64,
    pub rebalances: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_persisted_ms: Option<i64>,
    /// Recent balance snapshots (timestamp ms, free USDC).
    pub balance_snapshots: Vec<(i64, rust_decimal::Decimal)>,
}

impl SessionStatus {
    /// An empty status for a fresh session.
    #[must_use]
    pub fn initial(config: &SessionConfig) -> Self {
        Self {
            session_id: config.session_id.clone(),
            condition_id: config.condition_id.clone(),
            strategy: config.strategy.clone(),
            state: SessionState::Stopped,
            signals_generated: 0,
            orders_placed: 0,
            orders_cancelled: 0,
            rebalances: 0,
            started_at: None,
            last_persisted_ms: None,
            balance_snapshots: Vec::new(),
        }
    }
}
