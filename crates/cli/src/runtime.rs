//! Component wiring for the CLI commands.

use anyhow::Context;
use polytrade_accounts::AccountManager;
use polytrade_arbitrage::engine::{ArbitrageEngine, EngineConfig};
use polytrade_arbitrage::executor::{
    DisabledLegExecutor, ExecutorConfig, LegExecutor, LiveLegExecutor,
};
use polytrade_arbitrage::rebalancer::RebalancerConfig;
use polytrade_arbitrage::scanner::{DeepScanner, ScannerConfig};
use polytrade_arbitrage::types::MarketRef;
use polytrade_core::{AppConfig, JsonStore};
use polytrade_exchange::eip712::{address_from_key, SignatureType};
use polytrade_exchange::gateway::HttpGateway;
use polytrade_exchange::models::Side;
use polytrade_exchange::price_cache::PriceCache;
use polytrade_exchange::rate_limiter::RateLimiter;
use polytrade_exchange::trading::{LimitOrderType, SignerConfig, TradingClient};
use polytrade_exchange::websocket::{MarketEvent, WebSocketManager, WsConfig};
use polytrade_follow::autotrader::{AutoTrader, AutoTraderConfig, ClobOrderSink, RejectingSink};
use polytrade_follow::runner::RunnerConfig;
use polytrade_follow::suggestion::SuggestionFilters;
use polytrade_onchain::settlement::{ContractRegistry, SettlementClient, SettlementContext};
use polytrade_onchain::tx::RpcClient;
use polytrade_session::registry::SessionRegistry;
use polytrade_session::strategy::{ActionExecutor, SpreadQuoter};
use polytrade_session::SessionConfig;
use polytrade_web_api::state::{AppState, FollowControl, SharedState, WhaleControl};
use polytrade_web_api::ApiServer;
use polytrade_whale::cache::WalletCache;
use polytrade_whale::discovery::{GatewayAnalyzer, WhaleDiscovery};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

/// Everything `serve` wires up.
pub struct Platform {
    pub state: SharedState,
    pub shutdown: watch::Sender<bool>,
}

struct WalletClients {
    trading: TradingClient,
    settlement: SettlementClient,
}

fn wallet_clients(
    config: &AppConfig,
    limiter: &RateLimiter,
) -> anyhow::Result<Option<WalletClients>> {
    let Some(private_key) = config.wallet.private_key.clone() else {
        return Ok(None);
    };
    let eoa = address_from_key(&private_key).context("deriving wallet address")?;
    let funder = config.wallet.proxy_address.clone().unwrap_or_else(|| eoa.clone());
    let signature_type = SignatureType::from_u8(config.wallet.signature_type)
        .context("signature_type must be 0, 1, or 2")?;

    let trading = TradingClient::new(
        limiter.clone(),
        SignerConfig {
            private_key: private_key.clone(),
            funder_address: funder.clone(),
            signature_type,
            chain_id: 137,
        },
    )?;
    let settlement = SettlementClient::new(
        RpcClient::new(config.rpc.polygon_rpc_url.clone()),
        ContractRegistry::polygon(),
        SettlementContext {
            private_key,
            address: funder,
        },
    );
    Ok(Some(WalletClients {
        trading,
        settlement,
    }))
}

fn scanner_config(config: &AppConfig) -> ScannerConfig {
    let arb = &config.arbitrage;
    ScannerConfig {
        scan_interval: Duration::from_secs(arb.scan_interval_secs),
        max_markets: arb.max_markets,
        min_volume: Decimal::from_f64(arb.min_volume).unwrap_or(Decimal::from(100)),
        chunk_size: arb.chunk_size,
        chunk_pause: Duration::from_millis(arb.chunk_pause_ms),
        epsilon: Decimal::from_f64(arb.profit_threshold).unwrap_or(Decimal::ZERO),
        max_trade_size: Decimal::from_f64(arb.max_trade_size).unwrap_or(Decimal::from(100)),
        size_safety_factor: Decimal::from_f64(arb.size_safety_factor)
            .unwrap_or_else(|| dec!(0.8)),
    }
}

fn executor_config(config: &AppConfig) -> ExecutorConfig {
    let arb = &config.arbitrage;
    ExecutorConfig {
        book_ttl_ms: arb.book_ttl_ms,
        min_trade_size: Decimal::from_f64(arb.min_trade_size).unwrap_or(Decimal::from(5)),
        max_trade_size: Decimal::from_f64(arb.max_trade_size).unwrap_or(Decimal::from(100)),
        size_safety_factor: Decimal::from_f64(arb.size_safety_factor)
            .unwrap_or_else(|| dec!(0.8)),
    }
}

fn rebalancer_config(config: &AppConfig) -> RebalancerConfig {
    let arb = &config.arbitrage;
    RebalancerConfig {
        target_ratio: Decimal::from_f64(arb.rebalance_target_ratio).unwrap_or_else(|| dec!(0.5)),
        tolerance: Decimal::from_f64(arb.rebalance_tolerance).unwrap_or_else(|| dec!(0.15)),
        cooldown_ms: arb.rebalance_cooldown_ms,
        max_consecutive: arb.max_consecutive_rebalances,
        priority: 50,
    }
}

/// Builds the full platform and spawns its background tasks.
pub async fn build(config: AppConfig) -> anyhow::Result<Platform> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state_dir = PathBuf::from(&config.state.dir);

    let limiter = RateLimiter::default();
    let gateway = HttpGateway::new(limiter.clone());

    // Market data plumbing: one upstream socket fans out to the engine and
    // every UI stream.
    let books = PriceCache::new();
    let (ws_manager, mut ws_events) = WebSocketManager::start(WsConfig::default(), books.clone());
    let (market_events_tx, _) = broadcast::channel::<MarketEvent>(1_024);
    let (engine_events_tx, engine_events_rx) = mpsc::channel::<MarketEvent>(1_024);
    {
        let market_events_tx = market_events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = ws_events.recv().await {
                let _ = market_events_tx.send(event.clone());
                if engine_events_tx.send(event).await.is_err() {
                    break;
                }
            }
        });
    }

    let scanner = DeepScanner::new(gateway.clone(), scanner_config(&config));
    tokio::spawn(scanner.clone().run(shutdown_rx.clone()));

    let wallet = wallet_clients(&config, &limiter)?;
    let legs: Arc<dyn LegExecutor> = match &wallet {
        Some(clients) => Arc::new(LiveLegExecutor::new(
            clients.trading.clone(),
            clients.settlement.clone(),
            dec!(0.01),
        )),
        None => {
            warn!("no wallet configured; execution and settlement disabled");
            Arc::new(DisabledLegExecutor)
        }
    };

    let engine = ArbitrageEngine::new(
        ws_manager.clone(),
        scanner.clone(),
        legs,
        executor_config(&config),
        EngineConfig {
            auto_execute: wallet.is_some(),
            pause_threshold: config.arbitrage.pause_threshold,
            history_capacity: 256,
            rebalancer: rebalancer_config(&config),
        },
    );
    tokio::spawn(engine.clone().run(engine_events_rx));

    // Whale intelligence.
    let whale_cache = WalletCache::with_store(
        config.whale.cache_ttl_hours,
        1_000,
        JsonStore::with_path(state_dir.join("whale_cache.json")),
    )?;
    let discovery = WhaleDiscovery::new(
        config.whale.clone(),
        JsonStore::with_path(state_dir.join("watched_addresses.json")),
        whale_cache.clone(),
    )?
    .with_config_store(JsonStore::with_path(state_dir.join("config.json")))?;
    let whale = WhaleControl::new(
        discovery,
        whale_cache,
        Arc::new(GatewayAnalyzer::new(gateway.clone())),
        Arc::new(gateway.clone()),
    );

    // Copy trading.
    let sink: Arc<dyn polytrade_follow::autotrader::OrderSink> = match &wallet {
        Some(clients) => Arc::new(ClobOrderSink::new(clients.trading.clone())),
        None => Arc::new(RejectingSink),
    };
    let autotrader = Arc::new(AutoTrader::new(
        AutoTraderConfig::default(),
        books.clone(),
        sink,
        JsonStore::with_path(state_dir.join("follow-paper-history.json")),
    )?);
    let follow_filters = SuggestionFilters {
        ratio: Decimal::from_f64(config.follow.ratio).unwrap_or_else(|| dec!(0.1)),
        max_usdc_per_order: Decimal::from_f64(config.follow.max_usdc_per_order)
            .unwrap_or(Decimal::from(50)),
        max_usdc_per_day: Decimal::from_f64(config.follow.max_usdc_per_day)
            .unwrap_or(Decimal::from(500)),
        ..SuggestionFilters::default()
    };
    let follow = FollowControl::new(
        Arc::new(gateway.clone()),
        autotrader,
        RunnerConfig {
            poll_ms: config.follow.poll_ms,
            poll_limit: config.follow.poll_limit,
            ring_capacity: config.follow.ring_capacity,
            filters: follow_filters,
        },
    );

    let accounts = AccountManager::open(&state_dir)?;

    let state: SharedState = Arc::new(AppState {
        gateway,
        scanner,
        engine,
        ws_manager,
        books,
        market_events: market_events_tx,
        whale,
        follow,
        accounts,
    });

    Ok(Platform {
        state,
        shutdown: shutdown_tx,
    })
}

/// `polytrade serve`
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let cors = config.server.cors_origin.clone();
    let platform = build(config).await?;

    // Global trade feed into whale observation.
    {
        let state = platform.state.clone();
        let mut shutdown = platform.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                match state.gateway.global_trades(100).await {
                    Ok(trades) => {
                        for trade in &trades {
                            state.whale.discovery.ingest_trade(trade);
                        }
                    }
                    Err(e) => warn!(error = %e, "global trade feed failed"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(10)) => {}
                    _ = shutdown.changed() => {}
                }
            }
        });
    }

    let server = ApiServer::new(platform.state.clone(), cors);
    tokio::select! {
        result = server.serve(&addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    let _ = platform.shutdown.send(true);
    platform.state.whale.stop();
    platform.state.follow.stop();
    let _ = platform.state.ws_manager.shutdown().await;
    Ok(())
}

/// `polytrade scan`
pub async fn scan_once(config: AppConfig, min_profit: f64) -> anyhow::Result<()> {
    let limiter = RateLimiter::default();
    let gateway = HttpGateway::new(limiter);
    let scanner = DeepScanner::new(gateway, scanner_config(&config));

    let (_tx, mut shutdown) = watch::channel(false);
    let found = scanner.scan_once(&mut shutdown).await?;
    info!(found, "scan complete");

    let threshold = Decimal::from_f64(min_profit).unwrap_or(Decimal::ZERO);
    for opportunity in scanner.opportunities() {
        if opportunity.profit_rate < threshold {
            continue;
        }
        println!("{}", serde_json::to_string_pretty(&opportunity)?);
    }
    Ok(())
}

/// `polytrade check`
pub async fn check_readiness(config: AppConfig, min_amount: Decimal) -> anyhow::Result<()> {
    let limiter = RateLimiter::default();
    let clients = wallet_clients(&config, &limiter)?
        .context("POLY_PRIVKEY must be set for the readiness check")?;
    let readiness = clients.settlement.check_ready_for_ctf(min_amount).await?;
    println!("{}", serde_json::to_string_pretty(&readiness)?);
    Ok(())
}

/// Session-side action executor over the live clients.
struct SessionActions {
    trading: TradingClient,
    settlement: SettlementClient,
    engine: ArbitrageEngine,
}

#[async_trait::async_trait]
impl ActionExecutor for SessionActions {
    async fn place_order(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> anyhow::Result<String> {
        let order = self
            .trading
            .create_order(token_id, side, price, size, LimitOrderType::Gtc, None)
            .await?;
        Ok(order.id)
    }

    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<()> {
        Ok(self.trading.cancel_order(order_id).await?)
    }

    async fn rebalance(&self, condition_id: &str) -> anyhow::Result<bool> {
        let usdc = self.settlement.collateral_balance().await?;
        let yes = self
            .settlement
            .position_balance(
                self.settlement.address(),
                condition_id,
                polytrade_onchain::position::OutcomeIndex::Yes,
            )
            .await?;
        let no = self
            .settlement
            .position_balance(
                self.settlement.address(),
                condition_id,
                polytrade_onchain::position::OutcomeIndex::No,
            )
            .await?;
        // Paired inventory is worth $1 per pair.
        let token_value = yes.min(no);
        Ok(self
            .engine
            .maybe_rebalance(condition_id, usdc, token_value)
            .await
            .is_some())
    }

    async fn free_collateral(&self) -> anyhow::Result<Decimal> {
        Ok(self.settlement.collateral_balance().await?)
    }
}

/// `polytrade session`
pub async fn run_session(config: AppConfig, condition_id: String) -> anyhow::Result<()> {
    let state_dir = PathBuf::from(&config.state.dir);
    let rebalancer = rebalancer_config(&config);
    let clients = wallet_clients(&config, &RateLimiter::default())?
        .context("POLY_PRIVKEY must be set to run a session")?;

    let platform = build(config).await?;
    let state = platform.state.clone();

    let market = state.gateway.market(&condition_id).await?;
    let market_ref = MarketRef::from_market(&market)
        .context("market is missing a valid YES/NO pair")?;

    let actions = Arc::new(SessionActions {
        trading: clients.trading,
        settlement: clients.settlement,
        engine: state.engine.clone(),
    });

    state.engine.start_market(market_ref.clone()).await?;

    let pause_engine = state.engine.clone();
    let registry = Arc::new(
        SessionRegistry::new(state.books.clone(), actions, rebalancer, Some(state_dir))
            .with_pause_probe(Arc::new(move || pause_engine.quotes_paused())),
    );
    let session_config = SessionConfig::new(
        format!("session-{condition_id}"),
        market_ref.condition_id.clone(),
        market_ref.yes_asset_id.clone(),
        market_ref.no_asset_id.clone(),
        "spread_quoter",
    );
    let handle = registry
        .spawn_session(
            session_config,
            Box::new(SpreadQuoter::new(dec!(0.01), dec!(10))),
        )
        .await?;
    handle.start().await?;
    info!(condition_id, "session running; ctrl-c to stop");

    // Route book updates from the fan-out into the session loop.
    let mut events = state.market_events.subscribe();
    let router = registry.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MarketEvent::BookSnapshot { asset_id, .. })
                | Ok(MarketEvent::BookDelta { asset_id, .. }) => {
                    router.route_book_update(&asset_id).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("stopping session");
    registry.shutdown_all().await;

    let _ = platform.shutdown.send(true);
    let _ = state.ws_manager.shutdown().await;
    Ok(())
}
