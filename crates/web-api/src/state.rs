//! Shared service state behind the HTTP surface.

use parking_lot::Mutex;
use polytrade_accounts::AccountManager;
use polytrade_arbitrage::engine::ArbitrageEngine;
use polytrade_arbitrage::scanner::DeepScanner;
use polytrade_exchange::gateway::HttpGateway;
use polytrade_exchange::price_cache::PriceCache;
use polytrade_exchange::websocket::{MarketEvent, WebSocketManager};
use polytrade_follow::autotrader::AutoTrader;
use polytrade_follow::runner::{ActivitySource, FollowRunner, RunnerConfig};
use polytrade_whale::cache::{ActivityFetcher, WalletCache};
use polytrade_whale::discovery::{WalletAnalyzer, WhaleDiscovery};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::info;

/// Runtime control for the whale discovery loop.
pub struct WhaleControl {
    pub discovery: WhaleDiscovery,
    pub cache: WalletCache,
    analyzer: Arc<dyn WalletAnalyzer>,
    fetcher: Arc<dyn ActivityFetcher>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl WhaleControl {
    /// Wires discovery and its collaborators.
    #[must_use]
    pub fn new(
        discovery: WhaleDiscovery,
        cache: WalletCache,
        analyzer: Arc<dyn WalletAnalyzer>,
        fetcher: Arc<dyn ActivityFetcher>,
    ) -> Self {
        Self {
            discovery,
            cache,
            analyzer,
            fetcher,
            stop_tx: Mutex::new(None),
        }
    }

    /// Starts the discovery and cache-worker tasks. Returns false when
    /// already running.
    pub fn start(&self) -> bool {
        let mut guard = self.stop_tx.lock();
        if guard.is_some() {
            return false;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(
            self.discovery
                .clone()
                .run(self.analyzer.clone(), stop_rx.clone()),
        );
        tokio::spawn(self.cache.clone().run_worker(self.fetcher.clone(), stop_rx));
        *guard = Some(stop_tx);
        info!("whale discovery started");
        true
    }

    /// Signals both tasks to stop. Returns false when not running.
    pub fn stop(&self) -> bool {
        match self.stop_tx.lock().take() {
            Some(stop_tx) => {
                let _ = stop_tx.send(true);
                info!("whale discovery stopping");
                true
            }
            None => false,
        }
    }

    /// Whether the loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.stop_tx.lock().is_some()
    }
}

/// Runtime control for the (single) follow runner.
pub struct FollowControl {
    source: Arc<dyn ActivitySource>,
    pub autotrader: Arc<AutoTrader>,
    runner: Mutex<Option<(FollowRunner, watch::Sender<bool>)>>,
    runner_config: RunnerConfig,
}

impl FollowControl {
    /// Wires the activity source and trader.
    #[must_use]
    pub fn new(
        source: Arc<dyn ActivitySource>,
        autotrader: Arc<AutoTrader>,
        runner_config: RunnerConfig,
    ) -> Self {
        Self {
            source,
            autotrader,
            runner: Mutex::new(None),
            runner_config,
        }
    }

    /// Starts following `target`, replacing any previous runner.
    pub fn start(&self, target: &str) -> FollowRunner {
        self.stop();
        let runner = FollowRunner::new(
            format!("follow-{}", &target.to_lowercase()),
            target,
            self.runner_config.clone(),
        );

        // Executable suggestions flow straight into the auto-trader.
        let (suggestion_tx, mut suggestion_rx) = tokio::sync::mpsc::channel(256);
        runner.set_suggestion_sink(suggestion_tx);
        let trader = self.autotrader.clone();
        tokio::spawn(async move {
            while let Some(suggestion) = suggestion_rx.recv().await {
                let _ = trader.handle(suggestion).await;
            }
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(runner.clone().run(self.source.clone(), stop_rx));
        *self.runner.lock() = Some((runner.clone(), stop_tx));
        runner
    }

    /// Stops the active runner. Returns false when none is running.
    pub fn stop(&self) -> bool {
        match self.runner.lock().take() {
            Some((_, stop_tx)) => {
                let _ = stop_tx.send(true);
                true
            }
            None => false,
        }
    }

    /// The active runner, if any.
    #[must_use]
    pub fn runner(&self) -> Option<FollowRunner> {
        self.runner.lock().as_ref().map(|(r, _)| r.clone())
    }
}

/// Everything the handlers reach for.
pub struct AppState {
    pub gateway: HttpGateway,
    pub scanner: DeepScanner,
    pub engine: ArbitrageEngine,
    pub ws_manager: WebSocketManager,
    pub books: PriceCache,
    /// Market-event fan-out for the UI WebSocket.
    pub market_events: broadcast::Sender<MarketEvent>,
    pub whale: WhaleControl,
    pub follow: FollowControl,
    pub accounts: AccountManager,
}

/// Shared handle.
pub type SharedState = Arc<AppState>;
