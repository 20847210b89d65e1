//! Arbitrage endpoints over the scanner cache and the engine.

use super::ApiFailure;
use crate::state::SharedState;
use axum::extract::{Query, State};
use axum::Json;
use polytrade_arbitrage::types::{ArbOpportunity, ExecutionRecord};
use polytrade_core::now_ms;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanQuery {
    pub min_profit: Option<f64>,
    pub min_volume: Option<f64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub opportunities: Vec<ArbOpportunity>,
    /// Completion time of the scan that produced this set, ms.
    pub last_scan_ms: Option<i64>,
    /// Age of that scan relative to now, ms.
    pub freshness_ms: Option<i64>,
}

/// `GET /arbitrage/scan`; the cached opportunity set with freshness.
pub async fn scan(
    State(state): State<SharedState>,
    Query(query): Query<ScanQuery>,
) -> Json<ScanResponse> {
    let min_profit = query
        .min_profit
        .and_then(Decimal::from_f64)
        .unwrap_or(Decimal::ZERO);

    let mut opportunities: Vec<ArbOpportunity> = state
        .scanner
        .opportunities()
        .into_iter()
        .filter(|o| o.profit_rate >= min_profit)
        .collect();
    if let Some(limit) = query.limit {
        opportunities.truncate(limit);
    }

    let last_scan_ms = state.scanner.last_scan_ms();
    Json(ScanResponse {
        opportunities,
        last_scan_ms,
        freshness_ms: last_scan_ms.map(|t| now_ms() - t),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub condition_id: String,
}

/// `POST /arbitrage/execute`; execute a cached opportunity now.
pub async fn execute(
    State(state): State<SharedState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecutionRecord>, ApiFailure> {
    let opportunity = state
        .scanner
        .opportunity(&request.condition_id)
        .ok_or_else(|| {
            ApiFailure::not_found(format!(
                "no cached opportunity for {}",
                request.condition_id
            ))
        })?;
    let record = state.engine.execute_opportunity(&opportunity).await;
    Ok(Json(record))
}

#[derive(Debug, Serialize)]
pub struct EngineStatusResponse {
    #[serde(flatten)]
    pub status: polytrade_arbitrage::engine::EngineStatus,
    pub history: Vec<ExecutionRecord>,
}

/// `GET /arbitrage/status`; engine state and recent executions.
pub async fn status(State(state): State<SharedState>) -> Json<EngineStatusResponse> {
    Json(EngineStatusResponse {
        status: state.engine.status(),
        history: state.engine.history().into_iter().take(50).collect(),
    })
}
