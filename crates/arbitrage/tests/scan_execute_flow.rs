//! End-to-end flow: deep scan over a mocked exchange, then execution of
//! the detected opportunity through a recording leg seam.

use async_trait::async_trait;
use parking_lot::Mutex;
use polytrade_arbitrage::executor::{
    ArbExecutor, ExecutionError, ExecutorConfig, LegExecutor, LegFill,
};
use polytrade_arbitrage::scanner::{DeepScanner, ScannerConfig};
use polytrade_arbitrage::types::ExecutionStatus;
use polytrade_exchange::gateway::HttpGateway;
use polytrade_exchange::rate_limiter::{ClassLimits, RateLimiter, RateLimiterConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingLegs {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl LegExecutor for RecordingLegs {
    async fn market_buy(&self, token_id: &str, usdc: Decimal) -> Result<LegFill, ExecutionError> {
        self.calls.lock().push(format!("buy:{token_id}"));
        let price = if token_id == "y1" { dec!(0.48) } else { dec!(0.50) };
        Ok(LegFill {
            shares: usdc / price,
            usdc,
        })
    }

    async fn market_sell(
        &self,
        token_id: &str,
        shares: Decimal,
    ) -> Result<LegFill, ExecutionError> {
        self.calls.lock().push(format!("sell:{token_id}"));
        Ok(LegFill {
            shares,
            usdc: shares * dec!(0.5),
        })
    }

    async fn merge(
        &self,
        condition_id: &str,
        amount: Decimal,
        _neg_risk: bool,
    ) -> Result<Decimal, ExecutionError> {
        self.calls.lock().push(format!("merge:{condition_id}:{amount}"));
        Ok(dec!(0.02))
    }

    async fn split(
        &self,
        condition_id: &str,
        amount: Decimal,
        _neg_risk: bool,
    ) -> Result<Decimal, ExecutionError> {
        self.calls.lock().push(format!("split:{condition_id}:{amount}"));
        Ok(dec!(0.02))
    }
}

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

async fn mount_exchange(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/markets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "conditionId": "0xflow",
            "question": "Does the flow work?",
            "active": true,
            "volume24hr": "900",
            "tokens": [
                {"token_id": "y1", "outcome": "Yes"},
                {"token_id": "n1", "outcome": "No"}
            ]
        }])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/book"))
        .and(query_param("token_id", "y1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "bids": [{"price": "0.47", "size": "100"}],
            "asks": [{"price": "0.48", "size": "100"}]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/book"))
        .and(query_param("token_id", "n1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "bids": [{"price": "0.49", "size": "100"}],
            "asks": [{"price": "0.50", "size": "100"}]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn detected_opportunity_executes_long_legs_and_merges() {
    let server = MockServer::start().await;
    mount_exchange(&server).await;

    let gateway = HttpGateway::new(fast_limiter()).with_base_urls(
        server.uri(),
        server.uri(),
        server.uri(),
    );
    let scanner = DeepScanner::new(
        gateway,
        ScannerConfig {
            chunk_pause: Duration::from_millis(1),
            ..ScannerConfig::default()
        },
    );

    let (_tx, mut shutdown) = watch::channel(false);
    let found = scanner.scan_once(&mut shutdown).await.unwrap();
    assert_eq!(found, 1);

    let opportunity = scanner.opportunity("0xflow").expect("cached");
    assert_eq!(opportunity.profit_rate, dec!(0.02));

    let executor = ArbExecutor::new(RecordingLegs::default(), ExecutorConfig::default());
    let record = executor.execute(&opportunity).await;

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert!(record.realized_profit > Decimal::ZERO);
    assert!(record.profit_identity_holds());

    let calls = executor.legs().calls.lock().clone();
    assert_eq!(calls[0], "buy:y1");
    assert_eq!(calls[1], "buy:n1");
    assert!(calls[2].starts_with("merge:0xflow"));
}

#[tokio::test]
async fn opportunity_evicted_after_books_normalize() {
    let server = MockServer::start().await;
    mount_exchange(&server).await;

    let gateway = HttpGateway::new(fast_limiter()).with_base_urls(
        server.uri(),
        server.uri(),
        server.uri(),
    );
    let scanner = DeepScanner::new(
        gateway,
        ScannerConfig {
            chunk_pause: Duration::from_millis(1),
            ..ScannerConfig::default()
        },
    );

    let (_tx, mut shutdown) = watch::channel(false);
    scanner.scan_once(&mut shutdown).await.unwrap();
    assert!(scanner.opportunity("0xflow").is_some());

    // Books move to fair value: the next cycle sweeps the cache.
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/markets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "conditionId": "0xflow",
            "question": "Does the flow work?",
            "active": true,
            "volume24hr": "900",
            "tokens": [
                {"token_id": "y1", "outcome": "Yes"},
                {"token_id": "n1", "outcome": "No"}
            ]
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/book"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "bids": [{"price": "0.49", "size": "100"}],
            "asks": [{"price": "0.51", "size": "100"}]
        })))
        .mount(&server)
        .await;

    scanner.scan_once(&mut shutdown).await.unwrap();
    assert!(scanner.opportunity("0xflow").is_none());
}
