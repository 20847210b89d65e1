//! Signed order lifecycle against the CLOB.
//!
//! The client derives its L2 credentials once from the L1 signing key,
//! caches per-token tick sizes and neg-risk flags, and serializes the
//! sign-and-send path so EIP-712 nonce discipline holds when two tasks
//! race to place orders.

use crate::auth::{sign_l1_headers, AuthError, ClobCredentials, L2Signer};
use crate::eip712::{
    calculate_amounts, generate_salt, parse_address, sign_order, SignableOrder, SignatureType,
    SigningContext, Eip712Error, SIDE_BUY, SIDE_SELL,
};
use crate::gateway::{ApiError, CLOB_URL};
use crate::models::{RawOrderbook, Side};
use crate::rate_limiter::{ApiClass, RateLimiter};
use crate::retry::Retryable;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors from the trading client.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("auth: {0}")]
    Auth(#[from] AuthError),

    #[error("signing: {0}")]
    Signing(#[from] Eip712Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("wallet not configured")]
    NoWallet,
}

impl Retryable for TradingError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_retryable())
    }
    fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_rate_limited())
    }
}

/// Time-in-force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LimitOrderType {
    Gtc,
    Gtd,
}

/// Time-in-force for market orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketOrderType {
    Fok,
    Fak,
}

/// Order lifecycle states. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    Cancelled,
    Failed,
}

/// A tracked order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub original_size: Decimal,
    pub filled_size: Decimal,
    pub remaining_size: Decimal,
    pub status: OrderStatus,
    #[serde(default)]
    pub associate_trades: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Raw response from order placement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default, alias = "errorMsg", alias = "error_msg")]
    pub error_msg: Option<String>,
    #[serde(default, alias = "orderID", alias = "orderId", alias = "order_id")]
    pub order_id: Option<String>,
    #[serde(
        default,
        alias = "transactionsHashes",
        alias = "transactionHashes",
        alias = "transaction_hashes"
    )]
    pub transaction_hashes: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "takingAmount", alias = "taking_amount")]
    pub taking_amount: Option<String>,
    #[serde(default, alias = "makingAmount", alias = "making_amount")]
    pub making_amount: Option<String>,
}

impl OrderResponse {
    /// Success determination: the explicit flag wins; otherwise a non-empty
    /// order id or any transaction hash counts as accepted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        if let Some(flag) = self.success {
            return flag;
        }
        if self.order_id.as_deref().is_some_and(|id| !id.is_empty()) {
            return true;
        }
        self.transaction_hashes
            .as_ref()
            .is_some_and(|hashes| !hashes.is_empty())
    }

    /// Shares filled immediately, parsed from `takingAmount` for buys.
    #[must_use]
    pub fn filled_shares(&self, side: Side) -> Option<Decimal> {
        let field = match side {
            Side::Buy => self.taking_amount.as_deref(),
            Side::Sell => self.making_amount.as_deref(),
        };
        field.and_then(|s| Decimal::from_str(s).ok())
    }
}

/// Balance/allowance query target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceKind {
    /// Collateral (USDC) balance and exchange allowance.
    Collateral,
    /// Conditional-token balance for a specific token id.
    ConditionalToken,
}

/// Wallet material and addressing for signing.
#[derive(Debug, Clone)]
pub struct SignerConfig {
    /// Hex private key of the order-signing EOA.
    pub private_key: String,
    /// Funder address holding the positions.
    pub funder_address: String,
    /// Signature scheme.
    pub signature_type: SignatureType,
    pub chain_id: u64,
}

/// Trading client for one wallet.
#[derive(Clone)]
pub struct TradingClient {
    http: Client,
    limiter: RateLimiter,
    base_url: String,
    signer: SignerConfig,
    signer_address: String,
    credentials: Arc<tokio::sync::OnceCell<L2Signer>>,
    tick_sizes: Arc<RwLock<HashMap<String, String>>>,
    neg_risk: Arc<RwLock<HashMap<String, bool>>>,
    /// Serializes sign-and-send. EIP-712 salts are random, but the CLOB
    /// sequences fills per maker; interleaved submits can cross-cancel.
    submit_lock: Arc<Mutex<()>>,
}

impl TradingClient {
    /// Creates a client; fails when the private key is malformed.
    pub fn new(limiter: RateLimiter, signer: SignerConfig) -> Result<Self, TradingError> {
        let signer_address = crate::eip712::address_from_key(&signer.private_key)?;
        Ok(Self {
            http: Client::new(),
            limiter,
            base_url: CLOB_URL.to_string(),
            signer,
            signer_address,
            credentials: Arc::new(tokio::sync::OnceCell::new()),
            tick_sizes: Arc::new(RwLock::new(HashMap::new())),
            neg_risk: Arc::new(RwLock::new(HashMap::new())),
            submit_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Overrides the CLOB base URL (tests).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// The EOA address derived from the signing key.
    #[must_use]
    pub fn signer_address(&self) -> &str {
        &self.signer_address
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    /// Derives (or returns cached) L2 credentials.
    pub async fn credentials(&self) -> Result<&L2Signer, TradingError> {
        self.credentials
            .get_or_try_init(|| async {
                let headers = sign_l1_headers(&self.signer_address, &self.signer.private_key, 0)?;
                let url = format!("{}/auth/derive-api-key", self.base_url);
                let mut req = self.http.get(&url);
                for (name, value) in headers.pairs() {
                    req = req.header(name, value);
                }
                let resp = self
                    .limiter
                    .execute(ApiClass::Clob, || async { req.send().await })
                    .await
                    .map_err(ApiError::from)?;
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(TradingError::Api(ApiError::Status {
                        status: status.as_u16(),
                        body,
                    }));
                }
                let creds: ClobCredentials = resp
                    .json()
                    .await
                    .map_err(|e| TradingError::Api(ApiError::Decode(e.to_string())))?;
                info!(api_key = %creds.api_key, "derived L2 credentials");
                Ok(L2Signer::new(creds, self.signer_address.clone()))
            })
            .await
    }

    // =========================================================================
    // Market metadata caches
    // =========================================================================

    /// Tick size for a token, cached for the process lifetime.
    pub async fn tick_size(&self, token_id: &str) -> Result<String, TradingError> {
        if let Some(tick) = self.tick_sizes.read().get(token_id) {
            return Ok(tick.clone());
        }
        #[derive(Deserialize)]
        struct TickResponse {
            #[serde(alias = "minimum_tick_size", alias = "tick_size")]
            minimum_tick_size: serde_json::Value,
        }
        let url = format!(
            "{}/tick-size?token_id={}",
            self.base_url,
            urlencoding::encode(token_id)
        );
        let resp: TickResponse = self.get_json(&url).await?;
        let tick = match resp.minimum_tick_size {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        self.tick_sizes
            .write()
            .insert(token_id.to_string(), tick.clone());
        Ok(tick)
    }

    /// Whether a token settles through the neg-risk adapter, cached.
    pub async fn is_neg_risk(&self, token_id: &str) -> Result<bool, TradingError> {
        if let Some(flag) = self.neg_risk.read().get(token_id) {
            return Ok(*flag);
        }
        #[derive(Deserialize)]
        struct NegRiskResponse {
            neg_risk: bool,
        }
        let url = format!(
            "{}/neg-risk?token_id={}",
            self.base_url,
            urlencoding::encode(token_id)
        );
        let resp: NegRiskResponse = self.get_json(&url).await?;
        self.neg_risk
            .write()
            .insert(token_id.to_string(), resp.neg_risk);
        Ok(resp.neg_risk)
    }

    /// Seeds both caches from market metadata (avoids two extra calls).
    pub fn seed_token_metadata(&self, token_id: &str, tick_size: &str, neg_risk: bool) {
        self.tick_sizes
            .write()
            .insert(token_id.to_string(), tick_size.to_string());
        self.neg_risk.write().insert(token_id.to_string(), neg_risk);
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Places a signed limit order.
    pub async fn create_order(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        order_type: LimitOrderType,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<Order, TradingError> {
        if order_type == LimitOrderType::Gtd && expiration.is_none() {
            return Err(TradingError::Validation(
                "GTD orders require an expiration".into(),
            ));
        }
        let type_str = match order_type {
            LimitOrderType::Gtc => "GTC",
            LimitOrderType::Gtd => "GTD",
        };
        self.submit(token_id, side, price, size, type_str, expiration)
            .await
    }

    /// Places a market order. For buys `amount` is USDC to spend; for
    /// sells it is shares to liquidate. The book top provides the
    /// marketable limit price.
    pub async fn create_market_order(
        &self,
        token_id: &str,
        side: Side,
        amount: Decimal,
        order_type: MarketOrderType,
    ) -> Result<Order, TradingError> {
        let (best_ask, best_bid) = self.book_top(token_id).await?;
        let (price, size) = match side {
            Side::Buy => {
                let price = best_ask.ok_or_else(|| {
                    TradingError::Validation("no asks to cross for market buy".into())
                })?;
                (price, amount / price)
            }
            Side::Sell => {
                let price = best_bid.ok_or_else(|| {
                    TradingError::Validation("no bids to cross for market sell".into())
                })?;
                (price, amount)
            }
        };
        let type_str = match order_type {
            MarketOrderType::Fok => "FOK",
            MarketOrderType::Fak => "FAK",
        };
        self.submit(token_id, side, price, size, type_str, None).await
    }

    async fn submit(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        type_str: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<Order, TradingError> {
        let tick = self.tick_size(token_id).await?;
        let tick_decimals = tick_decimals(&tick);
        let neg_risk = self.is_neg_risk(token_id).await?;

        let aligned = align_to_tick(price, tick_decimals);
        if aligned != price {
            debug!(%price, %aligned, tick, "aligning price to tick");
        }

        let side_code = match side {
            Side::Buy => SIDE_BUY,
            Side::Sell => SIDE_SELL,
        };
        let (maker_amount, taker_amount) =
            calculate_amounts(side_code, aligned, size, tick_decimals)?;

        let signable = SignableOrder {
            salt: generate_salt(),
            maker: parse_address(&self.signer.funder_address)?,
            signer: parse_address(&self.signer_address)?,
            taker: [0u8; 20],
            token_id: token_id.to_string(),
            maker_amount,
            taker_amount,
            expiration: expiration.map_or(0, |e| e.timestamp().max(0) as u64),
            nonce: 0,
            fee_rate_bps: 0,
            side: side_code,
            signature_type: self.signer.signature_type.as_u8(),
        };
        let ctx = SigningContext {
            chain_id: self.signer.chain_id,
            neg_risk,
        };

        // Serialize sign -> send.
        let _guard = self.submit_lock.lock().await;
        let signature = sign_order(&signable, &ctx, &self.signer.private_key)?;

        let body = serde_json::json!({
            "order": {
                "salt": signable.salt,
                "maker": self.signer.funder_address,
                "signer": self.signer_address,
                "taker": "0x0000000000000000000000000000000000000000",
                "tokenId": token_id,
                "makerAmount": maker_amount.to_string(),
                "takerAmount": taker_amount.to_string(),
                "expiration": signable.expiration.to_string(),
                "nonce": "0",
                "feeRateBps": "0",
                "side": side.as_str(),
                "signatureType": self.signer.signature_type.as_u8(),
                "signature": signature,
            },
            "owner": self.credentials().await?.api_key(),
            "orderType": type_str,
        })
        .to_string();

        let response = self.post_order("/order", &body).await?;
        if !response.is_success() {
            let reason = response
                .error_msg
                .clone()
                .unwrap_or_else(|| "order not accepted".to_string());
            return Err(TradingError::Rejected(reason));
        }

        let filled = response.filled_shares(side).unwrap_or(Decimal::ZERO);
        let status = match response.status.as_deref() {
            Some("matched") => OrderStatus::Filled,
            Some("live") => OrderStatus::Open,
            _ if filled >= size => OrderStatus::Filled,
            _ => OrderStatus::Open,
        };
        Ok(Order {
            id: response.order_id.clone().unwrap_or_default(),
            token_id: token_id.to_string(),
            side,
            price: aligned,
            original_size: size,
            filled_size: filled,
            remaining_size: (size - filled).max(Decimal::ZERO),
            status,
            associate_trades: response.transaction_hashes.clone().unwrap_or_default(),
            created_at: Utc::now(),
        })
    }

    /// Cancels one order by id.
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), TradingError> {
        let body = serde_json::json!({ "orderID": order_id }).to_string();
        self.authed_request(reqwest::Method::DELETE, "/order", Some(body))
            .await?;
        Ok(())
    }

    /// Cancels every open order for this wallet.
    pub async fn cancel_all_orders(&self) -> Result<(), TradingError> {
        self.authed_request(reqwest::Method::DELETE, "/cancel-all", None)
            .await?;
        Ok(())
    }

    /// Open orders, optionally scoped to a market.
    pub async fn open_orders(
        &self,
        condition_id: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, TradingError> {
        let path = match condition_id {
            Some(id) => format!("/data/orders?market={}", urlencoding::encode(id)),
            None => "/data/orders".to_string(),
        };
        let body = self
            .authed_request(reqwest::Method::GET, &path, None)
            .await?;
        serde_json::from_str(&body).map_err(|e| TradingError::Api(ApiError::Decode(e.to_string())))
    }

    /// Fills for this wallet, optionally scoped to a market.
    pub async fn trades(
        &self,
        condition_id: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, TradingError> {
        let path = match condition_id {
            Some(id) => format!("/data/trades?market={}", urlencoding::encode(id)),
            None => "/data/trades".to_string(),
        };
        let body = self
            .authed_request(reqwest::Method::GET, &path, None)
            .await?;
        serde_json::from_str(&body).map_err(|e| TradingError::Api(ApiError::Decode(e.to_string())))
    }

    /// Reward earnings for this wallet on a given day (YYYY-MM-DD).
    pub async fn reward_earnings(&self, date: &str) -> Result<serde_json::Value, TradingError> {
        let path = format!("/rewards/user?date={}", urlencoding::encode(date));
        let body = self
            .authed_request(reqwest::Method::GET, &path, None)
            .await?;
        serde_json::from_str(&body).map_err(|e| TradingError::Api(ApiError::Decode(e.to_string())))
    }

    /// Current reward-market configuration for this wallet's open quotes.
    pub async fn reward_markets(&self) -> Result<serde_json::Value, TradingError> {
        let body = self
            .authed_request(reqwest::Method::GET, "/rewards/user/markets", None)
            .await?;
        serde_json::from_str(&body).map_err(|e| TradingError::Api(ApiError::Decode(e.to_string())))
    }

    /// Balance and allowance for collateral or one conditional token.
    pub async fn balance_allowance(
        &self,
        kind: BalanceKind,
        token_id: Option<&str>,
    ) -> Result<serde_json::Value, TradingError> {
        let path = match (kind, token_id) {
            (BalanceKind::Collateral, _) => {
                "/balance-allowance?asset_type=COLLATERAL".to_string()
            }
            (BalanceKind::ConditionalToken, Some(id)) => format!(
                "/balance-allowance?asset_type=CONDITIONAL&token_id={}",
                urlencoding::encode(id)
            ),
            (BalanceKind::ConditionalToken, None) => {
                return Err(TradingError::Validation(
                    "conditional balance requires a token id".into(),
                ))
            }
        };
        let body = self
            .authed_request(reqwest::Method::GET, &path, None)
            .await?;
        serde_json::from_str(&body).map_err(|e| TradingError::Api(ApiError::Decode(e.to_string())))
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, TradingError> {
        let http = self.http.clone();
        let url = url.to_string();
        let resp = self
            .limiter
            .execute(ApiClass::Clob, || async move {
                http.get(&url).send().await
            })
            .await
            .map_err(ApiError::from)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TradingError::Api(ApiError::Status {
                status: status.as_u16(),
                body,
            }));
        }
        resp.json::<T>()
            .await
            .map_err(|e| TradingError::Api(ApiError::Decode(e.to_string())))
    }

    async fn book_top(
        &self,
        token_id: &str,
    ) -> Result<(Option<Decimal>, Option<Decimal>), TradingError> {
        let url = format!(
            "{}/book?token_id={}",
            self.base_url,
            urlencoding::encode(token_id)
        );
        let raw: RawOrderbook = self.get_json(&url).await?;
        let best_ask = raw
            .asks
            .iter()
            .filter(|l| l.price > Decimal::ZERO && l.size > Decimal::ZERO)
            .map(|l| l.price)
            .min();
        let best_bid = raw
            .bids
            .iter()
            .filter(|l| l.price > Decimal::ZERO && l.size > Decimal::ZERO)
            .map(|l| l.price)
            .max();
        Ok((best_ask, best_bid))
    }

    async fn post_order(&self, path: &str, body: &str) -> Result<OrderResponse, TradingError> {
        let text = self
            .authed_request(reqwest::Method::POST, path, Some(body.to_string()))
            .await?;
        serde_json::from_str(&text)
            .map_err(|e| TradingError::Api(ApiError::Decode(e.to_string())))
    }

    async fn authed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<String>,
    ) -> Result<String, TradingError> {
        let signer = self.credentials().await?.clone();
        // Signature covers the path without query for GET, per upstream.
        let sig_path = path.split('?').next().unwrap_or(path);
        let headers = signer.headers(method.as_str(), sig_path, body.as_deref().unwrap_or(""))?;

        let url = format!("{}{}", self.base_url, path);
        let http = self.http.clone();
        let resp = self
            .limiter
            .execute(ApiClass::Clob, || async move {
                let mut req = http.request(method, &url);
                for (name, value) in headers.pairs() {
                    req = req.header(name, value);
                }
                if let Some(body) = body {
                    req = req.header("Content-Type", "application/json").body(body);
                }
                req.send().await
            })
            .await
            .map_err(ApiError::from)?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            if status.as_u16() == 429 {
                self.limiter.note_rate_limited(ApiClass::Clob);
            }
            warn!(status = status.as_u16(), body = %text, "clob request failed");
            return Err(TradingError::Api(ApiError::Status {
                status: status.as_u16(),
                body: text,
            }));
        }
        Ok(text)
    }
}

/// Decimal places implied by a tick-size string ("0.01" -> 2).
#[must_use]
pub fn tick_decimals(tick: &str) -> u32 {
    tick.trim()
        .split('.')
        .nth(1)
        .map_or(2, |frac| frac.trim_end_matches('0').len().max(1) as u32)
}

fn align_to_tick(price: Decimal, tick_decimals: u32) -> Decimal {
    let factor = Decimal::from(10u64.pow(tick_decimals));
    (price * factor).round() / factor
}
