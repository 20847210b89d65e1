//! Wallet intelligence endpoints.

use super::ApiFailure;
use crate::state::SharedState;
use axum::extract::{Path, Query, State};
use axum::Json;
use polytrade_exchange::gateway::ActivityQueryMode;
use polytrade_exchange::models::{ActivityRecord, LeaderboardEntry, PositionRecord};
use polytrade_whale::cache::WalletCacheEntry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_window")]
    pub window: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_window() -> String {
    "week".to_string()
}

fn default_limit() -> usize {
    50
}

/// `GET /wallets/leaderboard`
pub async fn leaderboard(
    State(state): State<SharedState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiFailure> {
    let rows = state
        .gateway
        .leaderboard(&query.window, query.limit.min(200))
        .await
        .map_err(ApiFailure::upstream)?;
    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub address: String,
    pub cached: Option<WalletCacheEntry>,
    /// True when a refresh was just queued for a cold address.
    pub refresh_queued: bool,
}

/// `GET /wallets/:addr/profile`; the cached windows, queueing a refresh
/// when cold or stale.
pub async fn profile(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Json<ProfileResponse> {
    let fresh = state.whale.cache.get_fresh(&address);
    let refresh_queued = if fresh.is_none() {
        state.whale.cache.enqueue_refresh(&address)
    } else {
        false
    };
    Json(ProfileResponse {
        cached: fresh.or_else(|| state.whale.cache.get(&address)),
        address,
        refresh_queued,
    })
}

/// `GET /wallets/:addr/positions`
pub async fn positions(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<PositionRecord>>, ApiFailure> {
    let rows = state
        .gateway
        .positions(&address)
        .await
        .map_err(ApiFailure::upstream)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

/// `GET /wallets/:addr/activity`
pub async fn activity(
    State(state): State<SharedState>,
    Path(address): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityRecord>>, ApiFailure> {
    let rows = state
        .gateway
        .user_activity(
            &address,
            query.limit.min(500),
            query.offset,
            ActivityQueryMode::Auto,
        )
        .await
        .map_err(ApiFailure::upstream)?;
    Ok(Json(rows))
}
