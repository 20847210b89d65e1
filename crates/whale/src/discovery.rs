//! Whale discovery: observation queue, analyzer, and the persistent index.
//!
//! Trades stream in from the global feed; wallets that clear the per-trade
//! size gate accumulate observations. A single analyzer task wakes on an
//! interval, pulls a bounded batch of sufficiently-observed wallets, and
//! classifies each against the promotion thresholds. Promoted wallets land
//! in the JSON-backed index and get a cache prefetch queued.

use crate::cache::WalletCache;
use crate::metrics::{classify_window, MetricWindow};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use polytrade_core::config::WhaleConfig;
use polytrade_core::{now_ms, JsonStore};
use polytrade_exchange::gateway::HttpGateway;
use polytrade_exchange::models::TradeRecord;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// A wallet's all-time profile as seen by the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletProfile {
    pub pnl: Decimal,
    pub win_rate: Option<f64>,
    pub volume: Decimal,
    pub trade_count: u32,
    pub smart_score: f64,
}

/// Profile source for the analyzer.
#[async_trait]
pub trait WalletAnalyzer: Send + Sync {
    /// Builds the all-time profile for a wallet.
    async fn analyze(&self, address: &str) -> anyhow::Result<WalletProfile>;
}

/// Live analyzer over the data API.
pub struct GatewayAnalyzer {
    gateway: HttpGateway,
    /// Rows fetched per wallet when profiling.
    pub max_rows: usize,
}

impl GatewayAnalyzer {
    /// Creates an analyzer over the gateway.
    #[must_use]
    pub fn new(gateway: HttpGateway) -> Self {
        Self {
            gateway,
            max_rows: 1_000,
        }
    }
}

#[async_trait]
impl WalletAnalyzer for GatewayAnalyzer {
    async fn analyze(&self, address: &str) -> anyhow::Result<WalletProfile> {
        let rows = self
            .gateway
            .get_all_activity(address, self.max_rows, None)
            .await?;
        let unrealized = match self.gateway.positions(address).await {
            Ok(positions) => positions
                .iter()
                .filter_map(|p| p.cash_pnl)
                .sum::<Decimal>(),
            Err(e) => {
                debug!(address, error = %e, "positions fetch failed; unrealized = 0");
                Decimal::ZERO
            }
        };
        let metrics = classify_window(&rows, MetricWindow::All, unrealized);
        Ok(WalletProfile {
            pnl: metrics.pnl,
            win_rate: metrics.win_rate,
            volume: metrics.volume,
            trade_count: metrics.trade_count,
            smart_score: metrics.smart_score,
        })
    }
}

#[async_trait]
impl crate::cache::ActivityFetcher for HttpGateway {
    async fn fetch_activity(
        &self,
        address: &str,
        max_rows: usize,
    ) -> anyhow::Result<Vec<polytrade_exchange::models::ActivityRecord>> {
        Ok(self.get_all_activity(address, max_rows, None).await?)
    }

    async fn unrealized_pnl(&self, address: &str) -> anyhow::Result<Decimal> {
        let positions = self.positions(address).await?;
        Ok(positions.iter().filter_map(|p| p.cash_pnl).sum())
    }
}

/// A promoted wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleRecord {
    pub address: String,
    pub promoted_at_ms: i64,
    pub pnl: Decimal,
    pub win_rate: f64,
    pub volume: Decimal,
    pub trade_count: u32,
    pub smart_score: f64,
}

#[derive(Debug, Default, Clone)]
struct Observation {
    trades_observed: u32,
    volume_observed: Decimal,
}

/// Discovery status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryStatus {
    pub running: bool,
    pub observed_wallets: usize,
    pub whales: usize,
    pub pending_cache_refreshes: usize,
}

type ObservationMessage = (String, Decimal);

/// The discovery service.
#[derive(Clone)]
pub struct WhaleDiscovery {
    config: Arc<RwLock<WhaleConfig>>,
    observations: Arc<Mutex<HashMap<String, Observation>>>,
    whales: Arc<RwLock<HashMap<String, WhaleRecord>>>,
    store: JsonStore,
    config_store: JsonStore,
    cache: WalletCache,
    tx: mpsc::UnboundedSender<ObservationMessage>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ObservationMessage>>>>,
    running: Arc<RwLock<bool>>,
}

impl WhaleDiscovery {
    /// Creates the service, loading any persisted whale index.
    pub fn new(config: WhaleConfig, store: JsonStore, cache: WalletCache) -> anyhow::Result<Self> {
        let whales: HashMap<String, WhaleRecord> = store.load()?;
        info!(count = whales.len(), "loaded whale index");
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            observations: Arc::new(Mutex::new(HashMap::new())),
            whales: Arc::new(RwLock::new(whales)),
            store,
            config_store: JsonStore::in_memory(),
            cache,
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Persists runtime config updates through `store`, and loads any
    /// previously saved config over the constructor defaults.
    pub fn with_config_store(mut self, store: JsonStore) -> anyhow::Result<Self> {
        if let Ok(saved) = store.load_required::<WhaleConfig>() {
            *self.config.write() = saved;
        }
        self.config_store = store;
        Ok(self)
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> WhaleConfig {
        self.config.read().clone()
    }

    /// Replaces the configuration (the PUT /whale/config path).
    pub fn set_config(&self, config: WhaleConfig) {
        if let Err(e) = self.config_store.save(&config) {
            warn!(error = %e, "config save failed");
        }
        *self.config.write() = config;
    }

    /// Feeds one public trade into the observation pipeline.
    pub fn ingest_trade(&self, trade: &TradeRecord) {
        let Some(wallet) = &trade.wallet else {
            return;
        };
        let usdc = trade.price * trade.size;
        let min = Decimal::from_f64(self.config.read().min_trade_usdc_value)
            .unwrap_or(Decimal::ZERO);
        if usdc < min {
            return;
        }
        self.observe(wallet, usdc);
    }

    /// Records one qualifying observation for a wallet.
    pub fn observe(&self, address: &str, volume: Decimal) {
        let _ = self.tx.send((address.to_lowercase(), volume));
    }

    /// Promoted whales, highest smart score first.
    #[must_use]
    pub fn whales(&self) -> Vec<WhaleRecord> {
        let mut list: Vec<WhaleRecord> = self.whales.read().values().cloned().collect();
        list.sort_by(|a, b| {
            b.smart_score
                .partial_cmp(&a.smart_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        list
    }

    /// Whether an address is a promoted whale.
    #[must_use]
    pub fn is_whale(&self, address: &str) -> bool {
        self.whales.read().contains_key(&address.to_lowercase())
    }

    /// Status snapshot.
    #[must_use]
    pub fn status(&self) -> DiscoveryStatus {
        DiscoveryStatus {
            running: *self.running.read(),
            observed_wallets: self.observations.lock().len(),
            whales: self.whales.read().len(),
            pending_cache_refreshes: self.cache.pending_count(),
        }
    }

    /// Runs the analyzer loop until `shutdown` flips true. A second call
    /// while a loop is active returns immediately.
    pub async fn run(self, analyzer: Arc<dyn WalletAnalyzer>, mut shutdown: watch::Receiver<bool>) {
        let Some(mut rx) = self.rx.lock().take() else {
            warn!("discovery loop already running");
            return;
        };
        *self.running.write() = true;
        info!("whale discovery started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let interval = Duration::from_secs(self.config.read().analysis_interval_secs.max(1));
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.drain_observations(&mut rx);
                    self.analyze_batch(analyzer.as_ref()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Drain what is left so restarts do not lose observations.
        self.drain_observations(&mut rx);
        *self.rx.lock() = Some(rx);
        *self.running.write() = false;
        info!("whale discovery stopped");
    }

    fn drain_observations(&self, rx: &mut mpsc::UnboundedReceiver<ObservationMessage>) {
        let mut observations = self.observations.lock();
        while let Ok((address, volume)) = rx.try_recv() {
            let obs = observations.entry(address).or_default();
            obs.trades_observed += 1;
            obs.volume_observed += volume;
        }
    }

    /// Analyzes one batch of sufficiently-observed wallets.
    pub async fn analyze_batch(&self, analyzer: &dyn WalletAnalyzer) {
        let config = self.config.read().clone();
        let batch: Vec<String> = {
            let observations = self.observations.lock();
            let whales = self.whales.read();
            observations
                .iter()
                .filter(|(address, obs)| {
                    obs.trades_observed >= config.min_trades_observed
                        && !whales.contains_key(*address)
                })
                .map(|(address, _)| address.clone())
                .take(config.max_analysis_per_batch)
                .collect()
        };
        if batch.is_empty() {
            return;
        }
        debug!(count = batch.len(), "analyzing wallet batch");

        for address in batch {
            match analyzer.analyze(&address).await {
                Ok(profile) => {
                    self.observations.lock().remove(&address);
                    if self.meets_thresholds(&profile, &config) {
                        self.promote(&address, &profile);
                    }
                }
                Err(e) => {
                    // Keep the observations; the wallet re-enters a later batch.
                    warn!(address, error = %e, "analysis failed");
                }
            }
        }
    }

    fn meets_thresholds(&self, profile: &WalletProfile, config: &WhaleConfig) -> bool {
        let min_pnl = Decimal::from_f64(config.min_pnl).unwrap_or(Decimal::ZERO);
        let min_volume = Decimal::from_f64(config.min_volume).unwrap_or(Decimal::ZERO);
        profile.pnl >= min_pnl
            && profile.win_rate.unwrap_or(0.0) >= config.min_win_rate
            && profile.volume >= min_volume
    }

    fn promote(&self, address: &str, profile: &WalletProfile) {
        info!(
            address,
            pnl = %profile.pnl,
            win_rate = profile.win_rate.unwrap_or(0.0),
            "wallet promoted to whale"
        );
        let record = WhaleRecord {
            address: address.to_string(),
            promoted_at_ms: now_ms(),
            pnl: profile.pnl,
            win_rate: profile.win_rate.unwrap_or(0.0),
            volume: profile.volume,
            trade_count: profile.trade_count,
            smart_score: profile.smart_score,
        };
        {
            let mut whales = self.whales.write();
            whales.insert(address.to_string(), record);
            if let Err(e) = self.store.save(&*whales) {
                warn!(error = %e, "whale index save failed");
            }
        }
        // Confirmed whales get their performance windows prefetched.
        self.cache.enqueue_refresh(address);
    }
}
