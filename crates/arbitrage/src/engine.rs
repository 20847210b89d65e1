//! Realtime per-market arbitrage engine.
//!
//! One engine instance consumes the WebSocket event stream and drives a
//! small state machine for every monitored market:
//!
//! ```text
//! idle -> subscribing -> monitoring -> { executing | rebalancing } -> monitoring -> stopping -> idle
//! ```
//!
//! Execution and rebalancing are mutually exclusive per market: a pending
//! execution holds the session lock and rebalance decisions are skipped;
//! a pending rebalance at or above the pause threshold raises the
//! `quotes_paused` flag the strategy layer consults.

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::executor::{ArbExecutor, LegExecutor};
use crate::rebalancer::{RebalanceAction, Rebalancer, RebalancerConfig};
use crate::scanner::DeepScanner;
use crate::types::{ArbOpportunity, ExecutionRecord, MarketRef};
use parking_lot::{Mutex as SyncMutex, RwLock};
use polytrade_core::now_ms;
use polytrade_exchange::websocket::{MarketEvent, WebSocketManager};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

/// Per-market lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    Idle,
    Subscribing,
    Monitoring,
    Executing,
    Rebalancing,
    Stopping,
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Execute opportunities as they appear.
    pub auto_execute: bool,
    /// Rebalance priority at or above which quoting pauses.
    pub pause_threshold: u8,
    /// Execution records kept in the history ring.
    pub history_capacity: usize,
    pub rebalancer: RebalancerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_execute: false,
            pause_threshold: 80,
            history_capacity: 256,
            rebalancer: RebalancerConfig::default(),
        }
    }
}

struct MarketSession {
    market: MarketRef,
    state: MarketState,
    rebalancer: Rebalancer,
    /// Mutual exclusion between executing and rebalancing.
    busy: Arc<Mutex<()>>,
    opportunities_seen: u64,
}

/// Status snapshot for one monitored market.
#[derive(Debug, Clone, Serialize)]
pub struct MarketStatus {
    pub condition_id: String,
    pub state: MarketState,
    pub opportunities_seen: u64,
    pub rebalancer_consecutive: u32,
}

/// Status snapshot for the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub markets: Vec<MarketStatus>,
    pub executions: usize,
    pub quotes_paused: bool,
    pub breaker_open: bool,
}

/// The realtime engine.
#[derive(Clone)]
pub struct ArbitrageEngine {
    ws: WebSocketManager,
    scanner: DeepScanner,
    executor: Arc<ArbExecutor<Arc<dyn LegExecutor>>>,
    config: EngineConfig,
    sessions: Arc<RwLock<HashMap<String, MarketSession>>>,
    /// asset id -> condition id routing for incoming events.
    routes: Arc<RwLock<HashMap<String, String>>>,
    history: Arc<SyncMutex<VecDeque<ExecutionRecord>>>,
    breaker: Arc<SyncMutex<CircuitBreaker>>,
    quotes_paused: Arc<AtomicBool>,
    opportunity_tx: broadcast::Sender<ArbOpportunity>,
}

impl ArbitrageEngine {
    /// Builds an engine over the shared scanner and the leg seam.
    #[must_use]
    pub fn new(
        ws: WebSocketManager,
        scanner: DeepScanner,
        legs: Arc<dyn LegExecutor>,
        executor_config: crate::executor::ExecutorConfig,
        config: EngineConfig,
    ) -> Self {
        let (opportunity_tx, _) = broadcast::channel(256);
        Self {
            ws,
            scanner,
            executor: Arc::new(ArbExecutor::new(legs, executor_config)),
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            routes: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(SyncMutex::new(VecDeque::new())),
            breaker: Arc::new(SyncMutex::new(CircuitBreaker::default())),
            quotes_paused: Arc::new(AtomicBool::new(false)),
            opportunity_tx,
        }
    }

    /// Subscribes to opportunity notifications.
    #[must_use]
    pub fn subscribe_opportunities(&self) -> broadcast::Receiver<ArbOpportunity> {
        self.opportunity_tx.subscribe()
    }

    /// Registers a market session without touching the socket. The caller
    /// is responsible for subscribing (see [`Self::start_market`]).
    pub fn register_market(&self, market: MarketRef) {
        let mut routes = self.routes.write();
        routes.insert(market.yes_asset_id.clone(), market.condition_id.clone());
        routes.insert(market.no_asset_id.clone(), market.condition_id.clone());
        drop(routes);

        self.sessions.write().insert(
            market.condition_id.clone(),
            MarketSession {
                market,
                state: MarketState::Subscribing,
                rebalancer: Rebalancer::new(self.config.rebalancer),
                busy: Arc::new(Mutex::new(())),
                opportunities_seen: 0,
            },
        );
    }

    /// Starts monitoring a market: registers the session and subscribes
    /// both assets on the shared socket.
    pub async fn start_market(&self, market: MarketRef) -> anyhow::Result<()> {
        let assets = vec![market.yes_asset_id.clone(), market.no_asset_id.clone()];
        info!(condition_id = %market.condition_id, "starting market monitor");
        self.register_market(market);
        self.ws.subscribe(assets).await?;
        Ok(())
    }

    /// Stops monitoring a market and unsubscribes its assets.
    pub async fn stop_market(&self, condition_id: &str) -> anyhow::Result<()> {
        let assets = {
            let mut sessions = self.sessions.write();
            let Some(session) = sessions.get_mut(condition_id) else {
                return Ok(());
            };
            session.state = MarketState::Stopping;
            vec![
                session.market.yes_asset_id.clone(),
                session.market.no_asset_id.clone(),
            ]
        };
        self.ws.unsubscribe(assets.clone()).await?;
        {
            let mut routes = self.routes.write();
            for asset in &assets {
                routes.remove(asset);
            }
        }
        self.sessions.write().remove(condition_id);
        info!(condition_id, "market monitor stopped");
        Ok(())
    }

    /// Drives the engine from the WebSocket event stream until the stream
    /// closes.
    pub async fn run(self, mut events: mpsc::Receiver<MarketEvent>) {
        info!("arbitrage engine running");
        while let Some(event) = events.recv().await {
            match event {
                MarketEvent::BookSnapshot { asset_id, .. }
                | MarketEvent::BookDelta { asset_id, .. } => {
                    self.handle_book_change(&asset_id).await;
                }
                MarketEvent::Connected => {
                    // Books reset server-side; sessions fall back to
                    // monitoring and wait for fresh snapshots.
                    let mut sessions = self.sessions.write();
                    for session in sessions.values_mut() {
                        if session.state == MarketState::Subscribing {
                            session.state = MarketState::Monitoring;
                        }
                    }
                }
                MarketEvent::Disconnected { reason } => {
                    debug!(reason, "socket lost; awaiting reconnect");
                }
                MarketEvent::TickSizeChange { .. } | MarketEvent::LastTrade { .. } => {}
            }
        }
        info!("arbitrage engine stopped: event stream closed");
    }

    /// Re-evaluates the market owning `asset_id` after a book change.
    pub async fn handle_book_change(&self, asset_id: &str) {
        let Some(condition_id) = self.routes.read().get(asset_id).cloned() else {
            return;
        };
        let Some((market, busy)) = self.session_parts(&condition_id) else {
            return;
        };

        let cache = self.ws.cache();
        let (Some(yes), Some(no)) = (cache.book(&market.yes_asset_id), cache.book(&market.no_asset_id))
        else {
            return;
        };

        let Some(opportunity) = self.scanner.build_opportunity(&market, &yes, &no) else {
            self.set_state(&condition_id, MarketState::Monitoring);
            return;
        };

        {
            let mut sessions = self.sessions.write();
            if let Some(session) = sessions.get_mut(&condition_id) {
                session.opportunities_seen += 1;
            }
        }
        let _ = self.opportunity_tx.send(opportunity.clone());

        if !self.config.auto_execute {
            return;
        }
        if !self.breaker.lock().allow() {
            debug!(condition_id, "breaker open, skipping execution");
            return;
        }

        // A pending rebalance (or execution) holds the lock; skip rather
        // than queue so the book re-evaluation stays current.
        let Ok(_guard) = busy.try_lock() else {
            return;
        };
        self.set_state(&condition_id, MarketState::Executing);

        let record = self.executor.execute(&opportunity).await;
        let succeeded = matches!(
            record.status,
            crate::types::ExecutionStatus::Completed
        );
        {
            let mut breaker = self.breaker.lock();
            if succeeded {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
        }
        {
            let mut sessions = self.sessions.write();
            if let Some(session) = sessions.get_mut(&condition_id) {
                session.rebalancer.record_other_activity();
            }
        }
        self.push_history(record);
        self.set_state(&condition_id, MarketState::Monitoring);
    }

    /// Runs a rebalance decision for one market. `usdc` and `token_value`
    /// are the session's current balances. Returns the action taken.
    pub async fn maybe_rebalance(
        &self,
        condition_id: &str,
        usdc: Decimal,
        token_value: Decimal,
    ) -> Option<RebalanceAction> {
        let (market, busy) = self.session_parts(condition_id)?;
        let (action, priority) = {
            let sessions = self.sessions.read();
            let session = sessions.get(condition_id)?;
            let action = session.rebalancer.decide(usdc, token_value, now_ms())?;
            (action, session.rebalancer.priority())
        };

        // Execution in flight wins; skip this cycle.
        let Ok(_guard) = busy.try_lock() else {
            debug!(condition_id, "execution pending, rebalance skipped");
            return None;
        };
        self.set_state(condition_id, MarketState::Rebalancing);

        let pause = priority >= self.config.pause_threshold;
        if pause {
            self.quotes_paused.store(true, Ordering::SeqCst);
        }

        let outcome = match &action {
            RebalanceAction::Merge(amount) => {
                self.executor
                    .legs()
                    .merge(condition_id, *amount, market.neg_risk)
                    .await
            }
            RebalanceAction::Split(amount) => {
                self.executor
                    .legs()
                    .split(condition_id, *amount, market.neg_risk)
                    .await
            }
        };

        if pause {
            self.quotes_paused.store(false, Ordering::SeqCst);
        }
        self.set_state(condition_id, MarketState::Monitoring);

        match outcome {
            Ok(_) => {
                let mut sessions = self.sessions.write();
                if let Some(session) = sessions.get_mut(condition_id) {
                    session.rebalancer.record_completed(now_ms());
                }
                info!(condition_id, ?action, "rebalance complete");
                Some(action)
            }
            Err(e) => {
                warn!(condition_id, error = %e, "rebalance failed");
                None
            }
        }
    }

    /// Executes an opportunity on demand (the HTTP execute path), under
    /// the same breaker and history accounting as auto-execution.
    pub async fn execute_opportunity(&self, opportunity: &ArbOpportunity) -> ExecutionRecord {
        let record = self.executor.execute(opportunity).await;
        let succeeded = matches!(record.status, crate::types::ExecutionStatus::Completed);
        {
            let mut breaker = self.breaker.lock();
            if succeeded {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
        }
        self.push_history(record.clone());
        record
    }

    /// Whether strategy quoting should pause.
    #[must_use]
    pub fn quotes_paused(&self) -> bool {
        self.quotes_paused.load(Ordering::SeqCst)
    }

    /// Execution history, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.history.lock().iter().rev().cloned().collect()
    }

    /// Engine status snapshot.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let markets = self
            .sessions
            .read()
            .values()
            .map(|s| MarketStatus {
                condition_id: s.market.condition_id.clone(),
                state: s.state,
                opportunities_seen: s.opportunities_seen,
                rebalancer_consecutive: s.rebalancer.consecutive(),
            })
            .collect();
        EngineStatus {
            markets,
            executions: self.history.lock().len(),
            quotes_paused: self.quotes_paused(),
            breaker_open: self.breaker.lock().state() != BreakerState::Closed,
        }
    }

    fn session_parts(&self, condition_id: &str) -> Option<(MarketRef, Arc<Mutex<()>>)> {
        let sessions = self.sessions.read();
        let session = sessions.get(condition_id)?;
        Some((session.market.clone(), session.busy.clone()))
    }

    fn set_state(&self, condition_id: &str, state: MarketState) {
        if let Some(session) = self.sessions.write().get_mut(condition_id) {
            session.state = state;
        }
    }

    fn push_history(&self, record: ExecutionRecord) {
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > self.config.history_capacity {
            history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutionError, ExecutorConfig, LegFill};
    use crate::scanner::ScannerConfig;
    use crate::types::ExecutionStatus;
    use async_trait::async_trait;
    use polytrade_exchange::gateway::HttpGateway;
    use polytrade_exchange::models::RawOrderbook;
    use polytrade_exchange::orderbook::NormalizedBook;
    use polytrade_exchange::price_cache::PriceCache;
    use polytrade_exchange::rate_limiter::RateLimiter;
    use polytrade_exchange::websocket::{WebSocketManager, WsConfig};
    use rust_decimal_macros::dec;

    struct StubLegs {
        fail: bool,
    }

    #[async_trait]
    impl LegExecutor for StubLegs {
        async fn market_buy(&self, _t: &str, usdc: Decimal) -> Result<LegFill, ExecutionError> {
            if self.fail {
                return Err(ExecutionError::Leg("down".into()));
            }
            Ok(LegFill {
                shares: usdc / dec!(0.5),
                usdc,
            })
        }
        async fn market_sell(&self, _t: &str, shares: Decimal) -> Result<LegFill, ExecutionError> {
            Ok(LegFill {
                shares,
                usdc: shares * dec!(0.5),
            })
        }
        async fn merge(
            &self,
            _c: &str,
            _a: Decimal,
            _n: bool,
        ) -> Result<Decimal, ExecutionError> {
            if self.fail {
                return Err(ExecutionError::Settlement("down".into()));
            }
            Ok(dec!(0.02))
        }
        async fn split(&self, _c: &str, _a: Decimal, _n: bool) -> Result<Decimal, ExecutionError> {
            Ok(dec!(0.02))
        }
    }

    fn market() -> MarketRef {
        MarketRef {
            condition_id: "0xc".into(),
            question: "q?".into(),
            yes_asset_id: "yes".into(),
            no_asset_id: "no".into(),
            neg_risk: false,
        }
    }

    fn book(asset: &str, bid: &str, ask: &str) -> NormalizedBook {
        let raw: RawOrderbook = serde_json::from_value(serde_json::json!({
            "asset_id": asset,
            "bids": [{"price": bid, "size": "100"}],
            "asks": [{"price": ask, "size": "100"}],
        }))
        .unwrap();
        NormalizedBook::from_raw(&raw, now_ms())
    }

    fn engine(auto_execute: bool, fail: bool) -> (ArbitrageEngine, PriceCache) {
        let cache = PriceCache::new();
        let (ws, _rx) = WebSocketManager::start(WsConfig::default(), cache.clone());
        let gateway = HttpGateway::new(RateLimiter::default());
        let scanner = DeepScanner::new(gateway, ScannerConfig::default());
        let legs: Arc<dyn LegExecutor> = Arc::new(StubLegs { fail });
        let engine = ArbitrageEngine::new(
            ws,
            scanner,
            legs,
            ExecutorConfig::default(),
            EngineConfig {
                auto_execute,
                ..EngineConfig::default()
            },
        );
        (engine, cache)
    }

    #[tokio::test]
    async fn book_change_emits_opportunity() {
        let (engine, cache) = engine(false, false);
        engine.register_market(market());
        cache.update_book(book("yes", "0.47", "0.48"), 1);
        cache.update_book(book("no", "0.49", "0.50"), 1);

        let mut rx = engine.subscribe_opportunities();
        engine.handle_book_change("yes").await;

        let opp = rx.try_recv().expect("opportunity emitted");
        assert_eq!(opp.market.condition_id, "0xc");
        assert_eq!(opp.profit_rate, dec!(0.02));
        // Not auto-executing: history stays empty.
        assert!(engine.history().is_empty());
    }

    #[tokio::test]
    async fn auto_execute_records_history_and_state_returns_to_monitoring() {
        let (engine, cache) = engine(true, false);
        engine.register_market(market());
        cache.update_book(book("yes", "0.47", "0.48"), 1);
        cache.update_book(book("no", "0.49", "0.50"), 1);

        engine.handle_book_change("yes").await;

        let history = engine.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Completed);

        let status = engine.status();
        assert_eq!(status.markets[0].state, MarketState::Monitoring);
        assert!(!status.breaker_open);
    }

    #[tokio::test]
    async fn failed_executions_trip_the_breaker() {
        let (engine, cache) = engine(true, true);
        engine.register_market(market());
        cache.update_book(book("yes", "0.47", "0.48"), 1);
        cache.update_book(book("no", "0.49", "0.50"), 1);

        for _ in 0..3 {
            engine.handle_book_change("yes").await;
        }
        assert!(engine.status().breaker_open);

        // Breaker open: further book changes do not execute.
        let before = engine.history().len();
        engine.handle_book_change("yes").await;
        assert_eq!(engine.history().len(), before);
    }

    #[tokio::test]
    async fn fair_books_produce_no_opportunity() {
        let (engine, cache) = engine(true, false);
        engine.register_market(market());
        cache.update_book(book("yes", "0.49", "0.51"), 1);
        cache.update_book(book("no", "0.49", "0.51"), 1);

        let mut rx = engine.subscribe_opportunities();
        engine.handle_book_change("yes").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rebalance_requires_deviation_and_marks_completion() {
        let (engine, _cache) = engine(false, false);
        engine.register_market(market());

        // Balanced: nothing to do.
        assert!(engine
            .maybe_rebalance("0xc", dec!(50), dec!(50))
            .await
            .is_none());

        // Heavy token inventory: merge proposed and executed.
        let action = engine
            .maybe_rebalance("0xc", dec!(10), dec!(90))
            .await
            .expect("rebalance ran");
        assert!(matches!(action, RebalanceAction::Merge(_)));

        // Cooldown now blocks an immediate repeat.
        assert!(engine
            .maybe_rebalance("0xc", dec!(10), dec!(90))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn unknown_assets_are_ignored() {
        let (engine, _cache) = engine(true, false);
        engine.handle_book_change("mystery").await;
        assert!(engine.history().is_empty());
    }
}
