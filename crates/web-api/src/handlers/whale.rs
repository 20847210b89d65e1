//! Whale discovery endpoints.

use super::ApiFailure;
use crate::state::SharedState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use polytrade_core::config::WhaleConfig;
use polytrade_exchange::models::TradeRecord;
use polytrade_whale::cache::WalletCacheEntry;
use polytrade_whale::discovery::{DiscoveryStatus, WhaleRecord};
use serde::{Deserialize, Serialize};

/// `POST /whale/start`
pub async fn start(State(state): State<SharedState>) -> StatusCode {
    if state.whale.start() {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    }
}

/// `POST /whale/stop`
pub async fn stop(State(state): State<SharedState>) -> StatusCode {
    if state.whale.stop() {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    }
}

/// `GET /whale/status`
pub async fn status(State(state): State<SharedState>) -> Json<DiscoveryStatus> {
    Json(state.whale.discovery.status())
}

/// `GET /whale/whales`
pub async fn whales(State(state): State<SharedState>) -> Json<Vec<WhaleRecord>> {
    Json(state.whale.discovery.whales())
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    #[serde(default = "default_trades_limit")]
    pub limit: usize,
}

fn default_trades_limit() -> usize {
    100
}

/// `GET /whale/trades`; recent prints by promoted whales.
pub async fn trades(
    State(state): State<SharedState>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Vec<TradeRecord>>, ApiFailure> {
    let recent = state
        .gateway
        .global_trades(query.limit.min(500))
        .await
        .map_err(ApiFailure::upstream)?;
    let whale_trades: Vec<TradeRecord> = recent
        .into_iter()
        .filter(|t| {
            t.wallet
                .as_deref()
                .is_some_and(|w| state.whale.discovery.is_whale(w))
        })
        .collect();
    Ok(Json(whale_trades))
}

/// `GET /whale/config`
pub async fn get_config(State(state): State<SharedState>) -> Json<WhaleConfig> {
    Json(state.whale.discovery.config())
}

/// `PUT /whale/config`
pub async fn put_config(
    State(state): State<SharedState>,
    Json(config): Json<WhaleConfig>,
) -> Json<WhaleConfig> {
    state.whale.discovery.set_config(config);
    Json(state.whale.discovery.config())
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub addresses: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub queued: usize,
    pub deduplicated: usize,
}

/// `POST /whale/cache/refresh`
pub async fn cache_refresh(
    State(state): State<SharedState>,
    Json(request): Json<RefreshRequest>,
) -> Json<RefreshResponse> {
    let mut queued = 0;
    let mut deduplicated = 0;
    for address in &request.addresses {
        if state.whale.cache.enqueue_refresh(address) {
            queued += 1;
        } else {
            deduplicated += 1;
        }
    }
    Json(RefreshResponse {
        queued,
        deduplicated,
    })
}

#[derive(Debug, Deserialize)]
pub struct BulkQuery {
    /// Comma-separated address list.
    pub addresses: String,
}

/// `GET /whale/cache/bulk?addresses=a,b,c`
pub async fn cache_bulk(
    State(state): State<SharedState>,
    Query(query): Query<BulkQuery>,
) -> Json<Vec<WalletCacheEntry>> {
    let addresses: Vec<String> = query
        .addresses
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    Json(state.whale.cache.bulk(&addresses))
}
