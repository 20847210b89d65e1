//! The session actor: one loop, one market, one strategy.

use crate::commands::{SessionCommand, SessionConfig, SessionState, SessionStatus};
use crate::strategy::{ActionExecutor, SessionEvent, Strategy, StrategyContext, StrategySignal};
use chrono::Utc;
use polytrade_arbitrage::rebalancer::{Rebalancer, RebalancerConfig};
use polytrade_core::{now_ms, JsonStore};
use polytrade_exchange::price_cache::PriceCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Balance snapshots kept on the status.
const MAX_BALANCE_SNAPSHOTS: usize = 120;

/// One session's actor loop.
pub struct SessionActor {
    config: SessionConfig,
    strategy: Box<dyn Strategy>,
    actions: Arc<dyn ActionExecutor>,
    books: PriceCache,
    rebalancer: Rebalancer,
    status: SessionStatus,
    commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::Receiver<SessionEvent>,
    status_tx: watch::Sender<SessionStatus>,
    store: JsonStore,
    /// External probe for the quote-pause flag (the arbitrage engine's
    /// high-priority rebalance raises it); `None` means never paused.
    pause_probe: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl SessionActor {
    /// Creates an actor. `events` carries book updates routed from the
    /// market subscription layer; ticks are generated internally.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        strategy: Box<dyn Strategy>,
        actions: Arc<dyn ActionExecutor>,
        books: PriceCache,
        rebalancer_config: RebalancerConfig,
        commands: mpsc::Receiver<SessionCommand>,
        events: mpsc::Receiver<SessionEvent>,
        status_tx: watch::Sender<SessionStatus>,
        store: JsonStore,
    ) -> Self {
        let status = SessionStatus::initial(&config);
        Self {
            config,
            strategy,
            actions,
            books,
            rebalancer: Rebalancer::new(rebalancer_config),
            status,
            commands,
            events,
            status_tx,
            store,
            pause_probe: None,
        }
    }

    /// Wires the quote-pause probe.
    #[must_use]
    pub fn with_pause_probe(mut self, probe: Arc<dyn Fn() -> bool + Send + Sync>) -> Self {
        self.pause_probe = Some(probe);
        self
    }

    /// Runs the actor until a `Shutdown` command or both channels close.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut tick =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms.max(100)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut persist =
            tokio::time::interval(Duration::from_millis(self.config.persist_interval_ms.max(500)));
        persist.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(session = %self.config.session_id, "session actor started");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Start) => {
                            if self.status.state != SessionState::Running {
                                self.status.state = SessionState::Running;
                                self.status.started_at = Some(Utc::now());
                                info!(session = %self.config.session_id, "session running");
                            }
                        }
                        Some(SessionCommand::Stop) => {
                            self.status.state = SessionState::Stopped;
                            info!(session = %self.config.session_id, "session stopped");
                        }
                        Some(SessionCommand::UpdateConfig(config)) => {
                            self.config = *config;
                        }
                        Some(SessionCommand::GetStatus(reply)) => {
                            let _ = reply.send(self.status.clone());
                        }
                        Some(SessionCommand::Shutdown) | None => {
                            self.status.state = SessionState::Stopping;
                            self.persist();
                            break;
                        }
                    }
                    self.publish();
                }
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    if self.status.state == SessionState::Running {
                        self.handle_event(&event).await;
                        self.publish();
                    }
                }
                _ = tick.tick() => {
                    if self.status.state == SessionState::Running {
                        self.handle_event(&SessionEvent::Tick).await;
                        self.publish();
                    }
                }
                _ = persist.tick() => {
                    self.snapshot_balance().await;
                    self.persist();
                }
            }
        }
        info!(session = %self.config.session_id, "session actor exited");
        Ok(())
    }

    async fn handle_event(&mut self, event: &SessionEvent) {
        let signals = {
            let ctx = StrategyContext {
                books: &self.books,
                yes_asset_id: &self.config.yes_asset_id,
                no_asset_id: &self.config.no_asset_id,
                quotes_paused: self.pause_probe.as_ref().is_some_and(|p| p()),
            };
            self.strategy.on_event(event, &ctx)
        };
        if signals.is_empty() {
            return;
        }
        self.status.signals_generated += signals.len() as u64;

        // Actions run strictly serially, in signal order.
        for signal in signals {
            match signal {
                StrategySignal::PlaceOrder {
                    token_id,
                    side,
                    price,
                    size,
                } => match self.actions.place_order(&token_id, side, price, size).await {
                    Ok(order_id) => {
                        debug!(order_id, "order placed");
                        self.status.orders_placed += 1;
                    }
                    Err(e) => warn!(error = %e, "order placement failed"),
                },
                StrategySignal::CancelOrder { order_id } => {
                    match self.actions.cancel_order(&order_id).await {
                        Ok(()) => self.status.orders_cancelled += 1,
                        Err(e) => warn!(error = %e, order_id, "cancel failed"),
                    }
                }
                StrategySignal::Rebalance => {
                    if !self.rebalancer.cooldown_elapsed(now_ms()) {
                        debug!("rebalance signal inside cooldown, dropped");
                        continue;
                    }
                    match self.actions.rebalance(&self.config.condition_id).await {
                        Ok(true) => {
                            self.rebalancer.record_completed(now_ms());
                            self.status.rebalances += 1;
                        }
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "rebalance failed"),
                    }
                }
            }
        }
    }

    async fn snapshot_balance(&mut self) {
        if self.status.state != SessionState::Running {
            return;
        }
        match self.actions.free_collateral().await {
            Ok(balance) => {
                self.status.balance_snapshots.push((now_ms(), balance));
                while self.status.balance_snapshots.len() > MAX_BALANCE_SNAPSHOTS {
                    self.status.balance_snapshots.remove(0);
                }
            }
            Err(e) => debug!(error = %e, "balance snapshot failed"),
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(&self.status) {
            warn!(error = %e, "session state persist failed");
        } else {
            self.status.last_persisted_ms = Some(now_ms());
        }
    }

    fn publish(&self) {
        let _ = self.status_tx.send(self.status.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use polytrade_exchange::models::Side;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct RecordingExecutor {
        actions: Mutex<Vec<String>>,
        rebalance_acts: bool,
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        async fn place_order(
            &self,
            token_id: &str,
            side: Side,
            price: Decimal,
            _size: Decimal,
        ) -> anyhow::Result<String> {
            self.actions
                .lock()
                .push(format!("place:{token_id}:{}:{price}", side.as_str()));
            Ok("order-1".into())
        }
        async fn cancel_order(&self, order_id: &str) -> anyhow::Result<()> {
            self.actions.lock().push(format!("cancel:{order_id}"));
            Ok(())
        }
        async fn rebalance(&self, condition_id: &str) -> anyhow::Result<bool> {
            self.actions.lock().push(format!("rebalance:{condition_id}"));
            Ok(self.rebalance_acts)
        }
        async fn free_collateral(&self) -> anyhow::Result<Decimal> {
            Ok(dec!(123))
        }
    }

    struct OneShotStrategy {
        signals: Vec<StrategySignal>,
    }

    impl Strategy for OneShotStrategy {
        fn on_event(
            &mut self,
            event: &SessionEvent,
            _ctx: &StrategyContext<'_>,
        ) -> Vec<StrategySignal> {
            match event {
                SessionEvent::BookUpdate { .. } => std::mem::take(&mut self.signals),
                SessionEvent::Tick => Vec::new(),
            }
        }
        fn name(&self) -> &str {
            "one_shot"
        }
    }

    struct Harness {
        commands: mpsc::Sender<SessionCommand>,
        events: mpsc::Sender<SessionEvent>,
        status_rx: watch::Receiver<SessionStatus>,
        executor: Arc<RecordingExecutor>,
        task: tokio::task::JoinHandle<anyhow::Result<()>>,
    }

    fn spawn(signals: Vec<StrategySignal>, rebalance_acts: bool, store: JsonStore) -> Harness {
        let config = SessionConfig {
            tick_interval_ms: 60_000, // keep ticks out of the way
            persist_interval_ms: 60_000,
            ..SessionConfig::new("s1", "0xc", "yes", "no", "one_shot")
        };
        let executor = Arc::new(RecordingExecutor {
            rebalance_acts,
            ..RecordingExecutor::default()
        });
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(SessionStatus::initial(&config));
        let actor = SessionActor::new(
            config,
            Box::new(OneShotStrategy { signals }),
            executor.clone(),
            PriceCache::new(),
            RebalancerConfig::default(),
            cmd_rx,
            event_rx,
            status_tx,
            store,
        );
        let task = tokio::spawn(actor.run());
        Harness {
            commands: cmd_tx,
            events: event_tx,
            status_rx,
            executor,
            task,
        }
    }

    async fn status_of(h: &Harness) -> SessionStatus {
        let (tx, rx) = oneshot::channel();
        h.commands
            .send(SessionCommand::GetStatus(tx))
            .await
            .unwrap();
        rx.await.unwrap()
    }

    /// Commands and events travel on separate channels; poll the status
    /// until `pred` holds (or time out) instead of assuming interleaving.
    async fn wait_until(h: &Harness, pred: impl Fn(&SessionStatus) -> bool) -> SessionStatus {
        for _ in 0..100 {
            let status = status_of(h).await;
            if pred(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn signals_become_serial_actions() {
        let h = spawn(
            vec![
                StrategySignal::CancelOrder {
                    order_id: "old".into(),
                },
                StrategySignal::PlaceOrder {
                    token_id: "yes".into(),
                    side: Side::Buy,
                    price: dec!(0.49),
                    size: dec!(10),
                },
            ],
            false,
            JsonStore::in_memory(),
        );
        h.commands.send(SessionCommand::Start).await.unwrap();
        // Round-trip so the Start is applied before the event lands.
        wait_until(&h, |s| s.state == SessionState::Running).await;
        h.events
            .send(SessionEvent::BookUpdate {
                asset_id: "yes".into(),
            })
            .await
            .unwrap();

        let status = wait_until(&h, |s| s.signals_generated == 2).await;
        assert_eq!(status.orders_placed, 1);
        assert_eq!(status.orders_cancelled, 1);

        let actions = h.executor.actions.lock().clone();
        assert_eq!(actions, vec!["cancel:old", "place:yes:BUY:0.49"]);

        h.commands.send(SessionCommand::Shutdown).await.unwrap();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn events_are_ignored_until_started() {
        let h = spawn(
            vec![StrategySignal::CancelOrder {
                order_id: "x".into(),
            }],
            false,
            JsonStore::in_memory(),
        );
        h.events
            .send(SessionEvent::BookUpdate {
                asset_id: "yes".into(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = status_of(&h).await;
        assert_eq!(status.signals_generated, 0);
        assert!(h.executor.actions.lock().is_empty());

        h.commands.send(SessionCommand::Shutdown).await.unwrap();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn rebalance_cooldown_drops_repeat_signals() {
        let config = SessionConfig {
            tick_interval_ms: 60_000,
            persist_interval_ms: 60_000,
            ..SessionConfig::new("s1", "0xc", "yes", "no", "always_rebalance")
        };

        struct AlwaysRebalance;
        impl Strategy for AlwaysRebalance {
            fn on_event(
                &mut self,
                _event: &SessionEvent,
                _ctx: &StrategyContext<'_>,
            ) -> Vec<StrategySignal> {
                vec![StrategySignal::Rebalance]
            }
            fn name(&self) -> &str {
                "always_rebalance"
            }
        }

        let executor = Arc::new(RecordingExecutor {
            rebalance_acts: true,
            ..RecordingExecutor::default()
        });
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(16);
        let (status_tx, _status_rx) = watch::channel(SessionStatus::initial(&config));
        let actor = SessionActor::new(
            config,
            Box::new(AlwaysRebalance),
            executor.clone(),
            PriceCache::new(),
            RebalancerConfig::default(),
            cmd_rx,
            event_rx,
            status_tx,
            JsonStore::in_memory(),
        );
        let task = tokio::spawn(actor.run());

        cmd_tx.send(SessionCommand::Start).await.unwrap();
        // Confirm the Start applied, then feed the events.
        loop {
            let (tx, rx) = oneshot::channel();
            cmd_tx.send(SessionCommand::GetStatus(tx)).await.unwrap();
            if rx.await.unwrap().state == SessionState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for _ in 0..3 {
            event_tx
                .send(SessionEvent::BookUpdate {
                    asset_id: "yes".into(),
                })
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (tx, rx) = oneshot::channel();
        cmd_tx.send(SessionCommand::GetStatus(tx)).await.unwrap();
        let status = rx.await.unwrap();
        // First rebalance ran; the next two hit the cooldown.
        assert_eq!(status.rebalances, 1);
        assert_eq!(
            executor
                .actions
                .lock()
                .iter()
                .filter(|a| a.starts_with("rebalance"))
                .count(),
            1
        );

        cmd_tx.send(SessionCommand::Shutdown).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_persists_final_state_quickly() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::with_path(dir.path().join("session.json"));
        let h = spawn(vec![], false, store.clone());

        h.commands.send(SessionCommand::Start).await.unwrap();
        let start = std::time::Instant::now();
        h.commands.send(SessionCommand::Shutdown).await.unwrap();
        h.task.await.unwrap().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));

        let persisted: SessionStatus = store.load_required().unwrap();
        assert_eq!(persisted.state, SessionState::Stopping);
        assert_eq!(persisted.session_id, "s1");
        drop(h.status_rx);
    }
}
