//! Periodic deep scan over the active market universe.
//!
//! Every cycle fetches up to `max_markets` active markets, drops the thin
//! ones, and walks the rest in small chunks; books for one chunk fetch in
//! parallel, then the scanner sleeps before the next chunk to stay inside
//! the CLOB budget. Detected opportunities land in a shared cache; a sweep
//! at the end of the cycle evicts everything that was not re-found, so no
//! entry survives staler than one full scan.

use crate::pricing::{check_books, ArbType};
use crate::types::{ArbOpportunity, MarketRef};
use futures_util::future::join_all;
use parking_lot::RwLock;
use polytrade_core::now_ms;
use polytrade_exchange::gateway::HttpGateway;
use polytrade_exchange::orderbook::NormalizedBook;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Scanner tuning.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub scan_interval: Duration,
    pub max_markets: usize,
    pub min_volume: Decimal,
    pub chunk_size: usize,
    pub chunk_pause: Duration,
    /// Profit threshold passed to the predicate.
    pub epsilon: Decimal,
    /// Hard per-trade cap used for the recommended size.
    pub max_trade_size: Decimal,
    /// Fraction of the computed cap actually recommended.
    pub size_safety_factor: Decimal,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            max_markets: 500,
            min_volume: Decimal::from(100),
            chunk_size: 5,
            chunk_pause: Duration::from_secs(2),
            epsilon: Decimal::ZERO,
            max_trade_size: Decimal::from(100),
            size_safety_factor: Decimal::new(8, 1),
        }
    }
}

/// Page size for the market listing.
const MARKET_PAGE: usize = 100;

/// Background deep scanner with a shared opportunity cache.
#[derive(Clone)]
pub struct DeepScanner {
    gateway: HttpGateway,
    config: ScannerConfig,
    opportunities: Arc<RwLock<HashMap<String, ArbOpportunity>>>,
    /// Balance cap fed in from the account side.
    balance: Arc<RwLock<Decimal>>,
    last_scan_ms: Arc<RwLock<Option<i64>>>,
}

impl DeepScanner {
    /// Creates a scanner over the gateway.
    #[must_use]
    pub fn new(gateway: HttpGateway, config: ScannerConfig) -> Self {
        Self {
            gateway,
            config,
            opportunities: Arc::new(RwLock::new(HashMap::new())),
            balance: Arc::new(RwLock::new(Decimal::from(1_000_000))),
            last_scan_ms: Arc::new(RwLock::new(None)),
        }
    }

    /// Updates the balance cap applied to recommended sizes.
    pub fn set_balance(&self, balance: Decimal) {
        *self.balance.write() = balance;
    }

    /// Cached opportunities, highest profit first.
    #[must_use]
    pub fn opportunities(&self) -> Vec<ArbOpportunity> {
        let mut list: Vec<ArbOpportunity> = self.opportunities.read().values().cloned().collect();
        list.sort_by(|a, b| b.profit_rate.cmp(&a.profit_rate));
        list
    }

    /// One cached opportunity by condition id.
    #[must_use]
    pub fn opportunity(&self, condition_id: &str) -> Option<ArbOpportunity> {
        self.opportunities.read().get(condition_id).cloned()
    }

    /// Completion time of the last scan, ms.
    #[must_use]
    pub fn last_scan_ms(&self) -> Option<i64> {
        *self.last_scan_ms.read()
    }

    /// Runs scan cycles until `shutdown` flips true. The current chunk
    /// finishes before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_s = self.config.scan_interval.as_secs(),
            max_markets = self.config.max_markets,
            "deep scanner started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.scan_once(&mut shutdown).await {
                Ok(found) => debug!(found, "scan cycle complete"),
                Err(e) => warn!(error = %e, "scan cycle failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.scan_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("deep scanner stopped");
    }

    /// One full scan cycle. Returns the number of opportunities found.
    pub async fn scan_once(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<usize> {
        let markets = self.fetch_universe().await?;
        debug!(count = markets.len(), "scanning markets");

        let mut found: HashSet<String> = HashSet::new();
        for (i, chunk) in markets.chunks(self.config.chunk_size.max(1)).enumerate() {
            if *shutdown.borrow() {
                break;
            }
            if i > 0 {
                tokio::time::sleep(self.config.chunk_pause).await;
            }

            let evaluations = join_all(chunk.iter().map(|market| self.evaluate(market))).await;
            for opp in evaluations.into_iter().flatten() {
                found.insert(opp.market.condition_id.clone());
                self.opportunities
                    .write()
                    .insert(opp.market.condition_id.clone(), opp);
            }
        }

        // Sweep eviction: anything not re-found this cycle is gone.
        let evicted: Vec<String> = {
            let mut cache = self.opportunities.write();
            let stale: Vec<String> = cache
                .keys()
                .filter(|id| !found.contains(*id))
                .cloned()
                .collect();
            for id in &stale {
                cache.remove(id);
            }
            stale
        };
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "swept stale opportunities");
        }

        *self.last_scan_ms.write() = Some(now_ms());
        Ok(found.len())
    }

    async fn fetch_universe(&self) -> anyhow::Result<Vec<MarketRef>> {
        let mut markets = Vec::new();
        let mut offset = 0usize;
        while markets.len() < self.config.max_markets {
            let page = self.gateway.active_markets(MARKET_PAGE, offset).await?;
            let raw_count = page.len();
            for market in page {
                let volume_ok = market
                    .volume_24h
                    .is_some_and(|v| v >= self.config.min_volume);
                if !volume_ok || !market.active {
                    continue;
                }
                if let Some(market_ref) = MarketRef::from_market(&market) {
                    markets.push(market_ref);
                    if markets.len() >= self.config.max_markets {
                        break;
                    }
                }
            }
            if raw_count < MARKET_PAGE {
                break;
            }
            offset += MARKET_PAGE;
        }
        Ok(markets)
    }

    async fn evaluate(&self, market: &MarketRef) -> Option<ArbOpportunity> {
        let yes = match self.gateway.processed_book(&market.yes_asset_id).await {
            Ok(book) => book,
            Err(e) => {
                debug!(condition_id = %market.condition_id, error = %e, "yes book fetch failed");
                return None;
            }
        };
        let no = match self.gateway.processed_book(&market.no_asset_id).await {
            Ok(book) => book,
            Err(e) => {
                debug!(condition_id = %market.condition_id, error = %e, "no book fetch failed");
                return None;
            }
        };
        self.build_opportunity(market, &yes, &no)
    }

    /// Evaluates one market from already-fetched books; shared with the
    /// realtime engine.
    #[must_use]
    pub fn build_opportunity(
        &self,
        market: &MarketRef,
        yes: &NormalizedBook,
        no: &NormalizedBook,
    ) -> Option<ArbOpportunity> {
        let signal = check_books(yes, no, self.config.epsilon)?;

        // Depth cap: the side each leg consumes, in USD.
        let max_orderbook_size = match signal.arb_type {
            ArbType::Long => yes.ask_depth_usd().min(no.ask_depth_usd()),
            ArbType::Short => yes.bid_depth_usd().min(no.bid_depth_usd()),
        };
        let max_balance_size = *self.balance.read();
        let recommended_size = max_orderbook_size
            .min(max_balance_size)
            .min(self.config.max_trade_size)
            * self.config.size_safety_factor;

        Some(ArbOpportunity {
            market: market.clone(),
            arb_type: signal.arb_type,
            profit_rate: signal.profit_rate,
            prices: signal.prices,
            recommended_size,
            max_orderbook_size,
            max_balance_size,
            detected_at_ms: now_ms(),
            book_fetched_at_ms: yes.fetched_at_ms.min(no.fetched_at_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polytrade_exchange::rate_limiter::{ClassLimits, RateLimiter, RateLimiterConfig};
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_limiter() -> RateLimiter {
        let limits = ClassLimits {
            max_concurrent: 8,
            min_time: Duration::from_millis(1),
        };
        RateLimiter::new(RateLimiterConfig {
            clob: limits,
            gamma: limits,
            data: limits,
            onchain: limits,
        })
    }

    fn fast_config() -> ScannerConfig {
        ScannerConfig {
            chunk_pause: Duration::from_millis(1),
            ..ScannerConfig::default()
        }
    }

    fn market_json(condition: &str, yes: &str, no: &str, volume: &str) -> serde_json::Value {
        serde_json::json!({
            "conditionId": condition,
            "question": "q?",
            "active": true,
            "volume24hr": volume,
            "tokens": [
                {"token_id": yes, "outcome": "Yes"},
                {"token_id": no, "outcome": "No"}
            ]
        })
    }

    fn book_json(bid: &str, ask: &str) -> serde_json::Value {
        serde_json::json!({
            "bids": [{"price": bid, "size": "100"}],
            "asks": [{"price": ask, "size": "100"}]
        })
    }

    async fn mount_book(server: &MockServer, token: &str, bid: &str, ask: &str) {
        Mock::given(method("GET"))
            .and(path("/book"))
            .and(query_param("token_id", token))
            .respond_with(ResponseTemplate::new(200).set_body_json(book_json(bid, ask)))
            .mount(server)
            .await;
    }

    fn scanner_for(server: &MockServer, config: ScannerConfig) -> DeepScanner {
        let gateway = HttpGateway::new(fast_limiter()).with_base_urls(
            server.uri(),
            server.uri(),
            server.uri(),
        );
        DeepScanner::new(gateway, config)
    }

    #[tokio::test]
    async fn scan_detects_and_caches_long_arb() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                market_json("0xc1", "y1", "n1", "500"),
                market_json("0xthin", "y2", "n2", "5"),
            ])))
            .mount(&server)
            .await;
        // 0.48 + 0.50 = 0.98 long cost.
        mount_book(&server, "y1", "0.47", "0.48").await;
        mount_book(&server, "n1", "0.49", "0.50").await;

        let scanner = scanner_for(&server, fast_config());
        let (_tx, mut shutdown) = watch::channel(false);
        let found = scanner.scan_once(&mut shutdown).await.unwrap();

        assert_eq!(found, 1);
        let opps = scanner.opportunities();
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].market.condition_id, "0xc1");
        assert_eq!(opps[0].profit_rate, dec!(0.02));
        // Depth cap: min(0.48*100, 0.50*100) = 48.
        assert_eq!(opps[0].max_orderbook_size, dec!(48));
        // Recommended: min(48, balance, 100) * 0.8.
        assert_eq!(opps[0].recommended_size, dec!(38.4));
    }

    #[tokio::test]
    async fn thin_markets_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                market_json("0xthin", "y2", "n2", "5"),
            ])))
            .mount(&server)
            .await;

        let scanner = scanner_for(&server, fast_config());
        let (_tx, mut shutdown) = watch::channel(false);
        let found = scanner.scan_once(&mut shutdown).await.unwrap();
        assert_eq!(found, 0);
    }

    #[tokio::test]
    async fn sweep_evicts_opportunities_not_refound() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                market_json("0xc1", "y1", "n1", "500"),
            ])))
            .mount(&server)
            .await;
        mount_book(&server, "y1", "0.47", "0.48").await;
        mount_book(&server, "n1", "0.49", "0.50").await;

        let scanner = scanner_for(&server, fast_config());
        let (_tx, mut shutdown) = watch::channel(false);
        scanner.scan_once(&mut shutdown).await.unwrap();
        assert_eq!(scanner.opportunities().len(), 1);

        // Books move to fair value; next cycle must evict.
        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                market_json("0xc1", "y1", "n1", "500"),
            ])))
            .mount(&server)
            .await;
        mount_book(&server, "y1", "0.49", "0.50").await;
        mount_book(&server, "n1", "0.49", "0.50").await;

        scanner.scan_once(&mut shutdown).await.unwrap();
        assert!(scanner.opportunities().is_empty());
    }

    #[tokio::test]
    async fn balance_caps_recommended_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                market_json("0xc1", "y1", "n1", "500"),
            ])))
            .mount(&server)
            .await;
        mount_book(&server, "y1", "0.47", "0.48").await;
        mount_book(&server, "n1", "0.49", "0.50").await;

        let scanner = scanner_for(&server, fast_config());
        scanner.set_balance(dec!(10));
        let (_tx, mut shutdown) = watch::channel(false);
        scanner.scan_once(&mut shutdown).await.unwrap();

        let opp = scanner.opportunity("0xc1").unwrap();
        assert_eq!(opp.max_balance_size, dec!(10));
        assert_eq!(opp.recommended_size, dec!(8.0));
    }
}
