//! Account management endpoints.

use super::ApiFailure;
use crate::state::SharedState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use polytrade_accounts::{Account, AccountError};
use serde::Deserialize;

fn map_account_error(e: AccountError) -> ApiFailure {
    match e {
        AccountError::NotFound(id) => ApiFailure::not_found(format!("account {id}")),
        AccountError::AlreadyExists(id) => ApiFailure::bad_request(format!("account {id} exists")),
        AccountError::LastAccount | AccountError::DefaultProtected => ApiFailure {
            status: StatusCode::CONFLICT,
            message: e.to_string(),
        },
        AccountError::Io(e) => ApiFailure::internal(e),
    }
}

/// `GET /accounts`
pub async fn list(State(state): State<SharedState>) -> Result<Json<Vec<Account>>, ApiFailure> {
    state.accounts.list().map(Json).map_err(map_account_error)
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub name: String,
}

/// `POST /accounts`
pub async fn create(
    State(state): State<SharedState>,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<Account>), ApiFailure> {
    if request.name.trim().is_empty() {
        return Err(ApiFailure::bad_request("name required"));
    }
    let account = state
        .accounts
        .create(&request.name)
        .map_err(map_account_error)?;
    Ok((StatusCode::CREATED, Json(account)))
}

#[derive(Debug, Deserialize)]
pub struct PatchRequest {
    pub name: String,
}

/// `PATCH /accounts/:id`
pub async fn patch(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<PatchRequest>,
) -> Result<Json<Account>, ApiFailure> {
    state
        .accounts
        .rename(&id, &request.name)
        .map(Json)
        .map_err(map_account_error)
}

/// `DELETE /accounts/:id`
pub async fn delete(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiFailure> {
    state.accounts.delete(&id).map_err(map_account_error)?;
    Ok(StatusCode::NO_CONTENT)
}
