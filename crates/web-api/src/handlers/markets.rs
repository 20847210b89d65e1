//! Market data endpoints.

use super::ApiFailure;
use crate::state::SharedState;
use axum::extract::{Path, Query, State};
use axum::Json;
use polytrade_exchange::models::{Market, TradeRecord};
use polytrade_exchange::orderbook::NormalizedBook;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// `GET /markets/trending`
pub async fn trending(
    State(state): State<SharedState>,
    Query(query): Query<TrendingQuery>,
) -> Result<Json<Vec<Market>>, ApiFailure> {
    let markets = state
        .gateway
        .trending_markets(query.limit.min(100))
        .await
        .map_err(ApiFailure::upstream)?;
    Ok(Json(markets))
}

/// `GET /markets/:id`
pub async fn detail(
    State(state): State<SharedState>,
    Path(condition_id): Path<String>,
) -> Result<Json<Market>, ApiFailure> {
    let market = state
        .gateway
        .market(&condition_id)
        .await
        .map_err(|e| match e.status() {
            Some(404) => ApiFailure::not_found(format!("market {condition_id}")),
            _ => ApiFailure::upstream(e),
        })?;
    Ok(Json(market))
}

#[derive(Debug, Serialize)]
pub struct OrderbookResponse {
    pub condition_id: String,
    pub yes: NormalizedBook,
    pub no: NormalizedBook,
}

/// `GET /markets/:id/orderbook`; both sides, normalized.
pub async fn orderbook(
    State(state): State<SharedState>,
    Path(condition_id): Path<String>,
) -> Result<Json<OrderbookResponse>, ApiFailure> {
    let market = state
        .gateway
        .market(&condition_id)
        .await
        .map_err(ApiFailure::upstream)?;
    let yes = market
        .yes_token()
        .ok_or_else(|| ApiFailure::not_found("market has no YES token"))?;
    let no = market
        .no_token()
        .ok_or_else(|| ApiFailure::not_found("market has no NO token"))?;

    let yes_book = state
        .gateway
        .processed_book(&yes.asset_id)
        .await
        .map_err(ApiFailure::upstream)?;
    let no_book = state
        .gateway
        .processed_book(&no.asset_id)
        .await
        .map_err(ApiFailure::upstream)?;

    Ok(Json(OrderbookResponse {
        condition_id,
        yes: yes_book,
        no: no_book,
    }))
}

#[derive(Debug, Deserialize)]
pub struct KlinesQuery {
    /// Bucket width in seconds.
    #[serde(default = "default_interval")]
    pub interval: i64,
    #[serde(default = "default_kline_limit")]
    pub limit: usize,
}

fn default_interval() -> i64 {
    60
}

fn default_kline_limit() -> usize {
    120
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Kline {
    /// Bucket open time, ms.
    pub open_time_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// `GET /markets/:id/klines`; trade prints bucketed into candles.
pub async fn klines(
    State(state): State<SharedState>,
    Path(condition_id): Path<String>,
    Query(query): Query<KlinesQuery>,
) -> Result<Json<Vec<Kline>>, ApiFailure> {
    if query.interval <= 0 {
        return Err(ApiFailure::bad_request("interval must be positive"));
    }
    let trades = state
        .gateway
        .market_trades(&condition_id, 1_000)
        .await
        .map_err(ApiFailure::upstream)?;
    let mut candles = bucket_trades(&trades, query.interval * 1_000);
    if candles.len() > query.limit {
        let skip = candles.len() - query.limit;
        candles.drain(..skip);
    }
    Ok(Json(candles))
}

/// Buckets trades (any order) into OHLCV candles of `bucket_ms` width.
#[must_use]
pub fn bucket_trades(trades: &[TradeRecord], bucket_ms: i64) -> Vec<Kline> {
    let mut sorted: Vec<&TradeRecord> = trades.iter().collect();
    sorted.sort_by_key(|t| t.timestamp);

    let mut candles: Vec<Kline> = Vec::new();
    for trade in sorted {
        let open_time_ms = (trade.timestamp / bucket_ms) * bucket_ms;
        match candles.last_mut() {
            Some(last) if last.open_time_ms == open_time_ms => {
                last.high = last.high.max(trade.price);
                last.low = last.low.min(trade.price);
                last.close = trade.price;
                last.volume += trade.price * trade.size;
            }
            _ => candles.push(Kline {
                open_time_ms,
                open: trade.price,
                high: trade.price,
                low: trade.price,
                close: trade.price,
                volume: trade.price * trade.size,
            }),
        }
    }
    candles
}
