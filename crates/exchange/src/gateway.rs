//! Typed REST gateway over the exchange's public APIs.
//!
//! Three upstream services sit behind this gateway: the CLOB (books,
//! trades), Gamma (market metadata), and the data API (activity,
//! positions, leaderboard). Every call runs under the matching
//! [`RateLimiter`] bucket and the shared [`RetryPolicy`].

use crate::models::{
    ActivityRecord, LeaderboardEntry, Market, PositionRecord, RawOrderbook, RewardConfig,
    TradeRecord,
};
use crate::orderbook::NormalizedBook;
use crate::rate_limiter::{ApiClass, RateLimiter};
use crate::retry::{Retryable, RetryPolicy};
use polytrade_core::now_ms;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Production CLOB base URL.
pub const CLOB_URL: &str = "https://clob.polymarket.com";
/// Production Gamma base URL.
pub const GAMMA_URL: &str = "https://gamma-api.polymarket.com";
/// Production data API base URL.
pub const DATA_URL: &str = "https://data-api.polymarket.com";

/// Page size used by the activity pagination loop.
const ACTIVITY_PAGE_SIZE: usize = 100;

/// Errors surfaced by the gateway.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx response.
    #[error("api error {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Transport-level failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Body could not be decoded into the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status, when the upstream answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::Decode(_) => None,
        }
    }
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Decode(_) => false,
        }
    }

    fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }
}

/// How user-activity queries address the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityQueryMode {
    /// `user=` query parameter.
    User,
    /// `proxyWallet=` query parameter.
    ProxyWallet,
    /// Try `user=` first, fall back to `proxyWallet=` on an empty page.
    Auto,
}

/// Typed REST gateway.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    http: Client,
    limiter: RateLimiter,
    retry: RetryPolicy,
    clob_url: String,
    gamma_url: String,
    data_url: String,
}

impl HttpGateway {
    /// Creates a gateway against the production endpoints.
    #[must_use]
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            http: Client::new(),
            limiter,
            retry: RetryPolicy::default(),
            clob_url: CLOB_URL.to_string(),
            gamma_url: GAMMA_URL.to_string(),
            data_url: DATA_URL.to_string(),
        }
    }

    /// Overrides all three base URLs (tests point these at wiremock).
    #[must_use]
    pub fn with_base_urls(
        mut self,
        clob: impl Into<String>,
        gamma: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        self.clob_url = clob.into();
        self.gamma_url = gamma.into();
        self.data_url = data.into();
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Rate-limited, retried GET returning decoded JSON.
    async fn get<T: DeserializeOwned>(&self, class: ApiClass, url: String) -> Result<T, ApiError> {
        let limiter = self.limiter.clone();
        let http = self.http.clone();
        self.retry
            .run(
                || {
                    let url = url.clone();
                    let http = http.clone();
                    let limiter = limiter.clone();
                    async move {
                        limiter
                            .execute(class, || async move {
                                debug!(%url, "GET");
                                let resp = http
                                    .get(&url)
                                    .header("Accept", "application/json")
                                    .send()
                                    .await?;
                                let status = resp.status();
                                if !status.is_success() {
                                    let body = resp.text().await.unwrap_or_default();
                                    let mut body = body;
                                    body.truncate(512);
                                    return Err(ApiError::Status {
                                        status: status.as_u16(),
                                        body,
                                    });
                                }
                                let bytes = resp.bytes().await?;
                                serde_json::from_slice::<T>(&bytes)
                                    .map_err(|e| ApiError::Decode(e.to_string()))
                            })
                            .await
                    }
                },
                || self.limiter.note_rate_limited(class),
            )
            .await
    }

    // =========================================================================
    // Markets
    // =========================================================================

    /// Active markets ordered by 24h volume, up to `limit`.
    pub async fn trending_markets(&self, limit: usize) -> Result<Vec<Market>, ApiError> {
        let url = format!(
            "{}/markets?active=true&closed=false&order=volume24hr&ascending=false&limit={}",
            self.gamma_url, limit
        );
        self.get(ApiClass::Gamma, url).await
    }

    /// Active markets with offset paging, for the deep scanner.
    pub async fn active_markets(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Market>, ApiError> {
        let url = format!(
            "{}/markets?active=true&closed=false&order=volume24hr&ascending=false&limit={}&offset={}",
            self.gamma_url, limit, offset
        );
        self.get(ApiClass::Gamma, url).await
    }

    /// A single market by condition id.
    pub async fn market(&self, condition_id: &str) -> Result<Market, ApiError> {
        let url = format!(
            "{}/markets/{}",
            self.clob_url,
            urlencoding::encode(condition_id)
        );
        self.get(ApiClass::Clob, url).await
    }

    /// Raw order book for one asset.
    pub async fn book(&self, asset_id: &str) -> Result<RawOrderbook, ApiError> {
        let url = format!(
            "{}/book?token_id={}",
            self.clob_url,
            urlencoding::encode(asset_id)
        );
        self.get(ApiClass::Clob, url).await
    }

    /// Normalized order book for one asset, stamped with local fetch time.
    pub async fn processed_book(&self, asset_id: &str) -> Result<NormalizedBook, ApiError> {
        let raw = self.book(asset_id).await?;
        Ok(NormalizedBook::from_raw(&raw, now_ms()))
    }

    // =========================================================================
    // Trades
    // =========================================================================

    /// Recent trades in one market.
    pub async fn market_trades(
        &self,
        condition_id: &str,
        limit: usize,
    ) -> Result<Vec<TradeRecord>, ApiError> {
        let url = format!(
            "{}/trades?market={}&limit={}",
            self.data_url,
            urlencoding::encode(condition_id),
            limit
        );
        self.get(ApiClass::Data, url).await
    }

    /// Most recent trades across every market.
    pub async fn global_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, ApiError> {
        let url = format!("{}/trades?limit={}", self.data_url, limit);
        self.get(ApiClass::Data, url).await
    }

    /// Trades executed by one wallet.
    pub async fn user_trades(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<TradeRecord>, ApiError> {
        let url = format!(
            "{}/trades?user={}&limit={}",
            self.data_url,
            urlencoding::encode(address),
            limit
        );
        self.get(ApiClass::Data, url).await
    }

    // =========================================================================
    // Activity
    // =========================================================================

    /// One page of a wallet's activity.
    ///
    /// `Auto` first queries with `user=`; an empty page triggers a single
    /// fallback with `proxyWallet=`, since older wallets only index under
    /// their proxy address.
    pub async fn user_activity(
        &self,
        address: &str,
        limit: usize,
        offset: usize,
        mode: ActivityQueryMode,
    ) -> Result<Vec<ActivityRecord>, ApiError> {
        let param = match mode {
            ActivityQueryMode::User | ActivityQueryMode::Auto => "user",
            ActivityQueryMode::ProxyWallet => "proxyWallet",
        };
        let rows = self.activity_page(param, address, limit, offset).await?;

        if rows.is_empty() && mode == ActivityQueryMode::Auto {
            debug!(address, "no rows under user=, falling back to proxyWallet=");
            return self
                .activity_page("proxyWallet", address, limit, offset)
                .await;
        }
        Ok(rows)
    }

    async fn activity_page(
        &self,
        param: &str,
        address: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ActivityRecord>, ApiError> {
        let url = format!(
            "{}/activity?{}={}&limit={}&offset={}",
            self.data_url,
            param,
            urlencoding::encode(address),
            limit,
            offset
        );
        self.get(ApiClass::Data, url).await
    }

    /// Fetches up to `max_rows` of activity, following pages until a short
    /// page or the cap. Rows come back timestamp-descending with duplicate
    /// transaction hashes suppressed.
    pub async fn get_all_activity(
        &self,
        address: &str,
        max_rows: usize,
        type_filter: Option<&str>,
    ) -> Result<Vec<ActivityRecord>, ApiError> {
        let mut all: Vec<ActivityRecord> = Vec::new();
        let mut seen_hashes: HashSet<String> = HashSet::new();
        let mut offset = 0usize;

        // Resolve the address parameter once: `user=` unless the first page
        // is empty, in which case every page goes through `proxyWallet=`.
        let first = self
            .user_activity(address, ACTIVITY_PAGE_SIZE, 0, ActivityQueryMode::User)
            .await?;
        let mode = if first.is_empty() {
            ActivityQueryMode::ProxyWallet
        } else {
            ActivityQueryMode::User
        };
        let mut pending = if mode == ActivityQueryMode::User {
            Some(first)
        } else {
            None
        };

        while all.len() < max_rows {
            let page = match pending.take() {
                Some(page) => page,
                None => {
                    self.user_activity(address, ACTIVITY_PAGE_SIZE, offset, mode)
                        .await?
                }
            };
            let raw_count = page.len();

            for row in page {
                if let Some(filter) = type_filter {
                    if !row.activity_type.eq_ignore_ascii_case(filter) {
                        continue;
                    }
                }
                if let Some(hash) = &row.transaction_hash {
                    if !seen_hashes.insert(hash.clone()) {
                        continue;
                    }
                }
                all.push(row);
                if all.len() >= max_rows {
                    break;
                }
            }

            if raw_count < ACTIVITY_PAGE_SIZE {
                break;
            }
            offset += ACTIVITY_PAGE_SIZE;
        }

        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(all)
    }

    // =========================================================================
    // Positions, leaderboard, rewards
    // =========================================================================

    /// Open positions for one wallet.
    pub async fn positions(&self, address: &str) -> Result<Vec<PositionRecord>, ApiError> {
        let url = format!(
            "{}/positions?user={}",
            self.data_url,
            urlencoding::encode(address)
        );
        self.get(ApiClass::Data, url).await
    }

    /// Leaderboard for a window ("day", "week", "month", "all").
    pub async fn leaderboard(
        &self,
        window: &str,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, ApiError> {
        let url = format!(
            "{}/leaderboard?window={}&limit={}",
            self.data_url,
            urlencoding::encode(window),
            limit
        );
        self.get(ApiClass::Data, url).await
    }

    /// Reward configuration for one market.
    pub async fn reward_config(&self, condition_id: &str) -> Result<Vec<RewardConfig>, ApiError> {
        let url = format!(
            "{}/rewards/markets/{}",
            self.clob_url,
            urlencoding::encode(condition_id)
        );
        match self.get::<Vec<RewardConfig>>(ApiClass::Clob, url).await {
            Ok(configs) => Ok(configs),
            Err(e) => {
                warn!(condition_id, error = %e, "reward config fetch failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::{ClassLimits, RateLimiterConfig};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_gateway(server: &MockServer) -> HttpGateway {
        let limits = ClassLimits {
            max_concurrent: 4,
            min_time: Duration::from_millis(1),
        };
        let limiter = RateLimiter::new(RateLimiterConfig {
            clob: limits,
            gamma: limits,
            data: limits,
            onchain: limits,
        });
        HttpGateway::new(limiter)
            .with_base_urls(server.uri(), server.uri(), server.uri())
            .with_retry(RetryPolicy {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                max_retries: 2,
            })
    }

    fn activity_row(hash: &str, ts: i64) -> serde_json::Value {
        serde_json::json!({
            "transactionHash": hash,
            "type": "TRADE",
            "side": "BUY",
            "size": "10",
            "price": "0.5",
            "usdcSize": "5",
            "conditionId": "0xc",
            "asset": "1",
            "timestamp": ts
        })
    }

    #[tokio::test]
    async fn book_decodes_and_normalizes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/book"))
            .and(query_param("token_id", "123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "asset_id": "123",
                "bids": [{"price": "0.48", "size": "30"}],
                "asks": [{"price": "0.52", "size": "25"}]
            })))
            .mount(&server)
            .await;

        let gateway = fast_gateway(&server);
        let book = gateway.processed_book("123").await.unwrap();
        assert_eq!(book.best_bid().unwrap().to_string(), "0.48");
        assert_eq!(book.best_ask().unwrap().to_string(), "0.52");
        assert!(book.fetched_at_ms > 0);
    }

    #[tokio::test]
    async fn non_2xx_surfaces_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets/0xbad"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let gateway = fast_gateway(&server);
        let err = gateway.market("0xbad").await.unwrap_err();
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "not found");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_on_500_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trades"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trades"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let gateway = fast_gateway(&server);
        let trades = gateway.global_trades(10).await.unwrap();
        assert!(trades.is_empty());
    }

    #[tokio::test]
    async fn activity_auto_falls_back_to_proxy_wallet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/activity"))
            .and(query_param("user", "0xw"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/activity"))
            .and(query_param("proxyWallet", "0xw"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([activity_row("0x1", 1_700_000_000)])),
            )
            .mount(&server)
            .await;

        let gateway = fast_gateway(&server);
        let rows = gateway
            .user_activity("0xw", 100, 0, ActivityQueryMode::Auto)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].transaction_hash.as_deref(), Some("0x1"));
    }

    #[tokio::test]
    async fn get_all_activity_dedupes_and_sorts_descending() {
        let server = MockServer::start().await;
        // Single short page: dup hash appears twice, out of time order.
        Mock::given(method("GET"))
            .and(path("/activity"))
            .and(query_param("user", "0xw"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                activity_row("0xa", 100),
                activity_row("0xb", 300),
                activity_row("0xa", 100),
                activity_row("0xc", 200),
            ])))
            .mount(&server)
            .await;

        let gateway = fast_gateway(&server);
        let rows = gateway.get_all_activity("0xw", 50, None).await.unwrap();
        assert_eq!(rows.len(), 3);
        let ts: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![300_000, 200_000, 100_000]);
    }

    #[tokio::test]
    async fn get_all_activity_honors_max_rows_and_type_filter() {
        let server = MockServer::start().await;
        let rows: Vec<serde_json::Value> = (0..100)
            .map(|i| {
                let mut row = activity_row(&format!("0x{i}"), 1000 + i);
                if i % 2 == 0 {
                    row["type"] = serde_json::json!("REDEEM");
                }
                row
            })
            .collect();
        Mock::given(method("GET"))
            .and(path("/activity"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(rows)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/activity"))
            .and(query_param("offset", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let gateway = fast_gateway(&server);
        let trades = gateway
            .get_all_activity("0xw", 10, Some("TRADE"))
            .await
            .unwrap();
        assert_eq!(trades.len(), 10);
        assert!(trades.iter().all(|r| r.activity_type == "TRADE"));
    }
}
