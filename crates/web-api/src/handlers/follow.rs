//! Follow-activity and auto-trade endpoints.

use super::ApiFailure;
use crate::state::SharedState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use polytrade_core::now_ms;
use polytrade_follow::autotrader::{AutoTraderConfig, ExecutionReport, PaperSummary};
use polytrade_follow::events::FollowEvent;
use polytrade_follow::runner::RunnerStatus;
use polytrade_follow::suggestion::Suggestion;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub target: String,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub runner_id: String,
    pub target: String,
}

/// `POST /follow-activity/start`
pub async fn start(
    State(state): State<SharedState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, ApiFailure> {
    if request.target.trim().is_empty() {
        return Err(ApiFailure::bad_request("target address required"));
    }
    let runner = state.follow.start(&request.target);
    Ok(Json(StartResponse {
        runner_id: runner.id().to_string(),
        target: request.target,
    }))
}

/// `POST /follow-activity/stop`
pub async fn stop(State(state): State<SharedState>) -> StatusCode {
    if state.follow.stop() {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    }
}

/// `GET /follow-activity/status`
pub async fn status(State(state): State<SharedState>) -> Json<Option<RunnerStatus>> {
    Json(state.follow.runner().map(|r| r.status()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeQuery {
    pub before_ms: Option<i64>,
    #[serde(default = "default_page")]
    pub limit: usize,
}

fn default_page() -> usize {
    50
}

/// `GET /follow-activity/activities`
pub async fn activities(
    State(state): State<SharedState>,
    Query(query): Query<BeforeQuery>,
) -> Result<Json<Vec<FollowEvent>>, ApiFailure> {
    let runner = state
        .follow
        .runner()
        .ok_or_else(|| ApiFailure::not_found("no runner active"))?;
    let before = query.before_ms.unwrap_or(i64::MAX);
    Ok(Json(runner.events_before(before, query.limit.min(200))))
}

/// `GET /follow-activity/suggestions`
pub async fn suggestions(
    State(state): State<SharedState>,
    Query(query): Query<BeforeQuery>,
) -> Result<Json<Vec<Suggestion>>, ApiFailure> {
    let runner = state
        .follow
        .runner()
        .ok_or_else(|| ApiFailure::not_found("no runner active"))?;
    let before = query.before_ms.unwrap_or(i64::MAX);
    Ok(Json(
        runner.suggestions_before(before, query.limit.min(200)),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub suggestion_id: String,
}

/// `POST /follow-activity/confirm`; execute a queued suggestion.
pub async fn confirm(
    State(state): State<SharedState>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<ExecutionReport>, ApiFailure> {
    state
        .follow
        .autotrader
        .execute_pending(&request.suggestion_id)
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiFailure::not_found(format!("pending suggestion {}", request.suggestion_id))
        })
}

/// `POST /follow-activity/autotrade/config`
pub async fn set_autotrade_config(
    State(state): State<SharedState>,
    Json(config): Json<AutoTraderConfig>,
) -> Json<AutoTraderConfig> {
    state.follow.autotrader.set_config(config);
    Json(state.follow.autotrader.config())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoTradeStatus {
    pub config: AutoTraderConfig,
    pub pending: usize,
    pub executions: usize,
    pub now_ms: i64,
}

/// `GET /autotrade/status`
pub async fn autotrade_status(State(state): State<SharedState>) -> Json<AutoTradeStatus> {
    let trader = &state.follow.autotrader;
    Json(AutoTradeStatus {
        config: trader.config(),
        pending: trader.pending().len(),
        executions: trader.history().len(),
        now_ms: now_ms(),
    })
}

/// `GET /autotrade/pending`
pub async fn autotrade_pending(State(state): State<SharedState>) -> Json<Vec<Suggestion>> {
    Json(state.follow.autotrader.pending())
}

/// `GET /autotrade/history`
pub async fn autotrade_history(State(state): State<SharedState>) -> Json<Vec<ExecutionReport>> {
    Json(state.follow.autotrader.history())
}

#[derive(Debug, Serialize)]
pub struct PaperStatus {
    pub paper: bool,
    pub executions: usize,
}

/// `GET /autotrade/paper/status`
pub async fn paper_status(State(state): State<SharedState>) -> Json<PaperStatus> {
    let trader = &state.follow.autotrader;
    Json(PaperStatus {
        paper: trader.config().paper,
        executions: trader.history().iter().filter(|r| r.paper).count(),
    })
}

/// `GET /autotrade/paper/history`
pub async fn paper_history(State(state): State<SharedState>) -> Json<Vec<ExecutionReport>> {
    Json(
        state
            .follow
            .autotrader
            .history()
            .into_iter()
            .filter(|r| r.paper)
            .collect(),
    )
}

/// `GET /autotrade/paper/summary`
pub async fn paper_summary(State(state): State<SharedState>) -> Json<PaperSummary> {
    Json(state.follow.autotrader.paper_summary())
}
