use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::error::TokenApiError;
use crate::{models::TokenStatus, utils::state::AppState};

// Handler minting a token for a freshly rendered blocked page
pub async fn issue_token(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, TokenApiError> {
    let issued = state.issuer.issue_token().await.map_err(|e| {
        tracing::error!("Token issuance failed: {e}");
        TokenApiError::IssuanceFailed
    })?;

    Ok((StatusCode::CREATED, Json(issued)))
}

// Handler polled by the blocked page until the token is consumed
pub async fn token_status(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<TokenStatus>, TokenApiError> {
    let record = state
        .token_repo
        .find_one_by(&token)
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "Database query failed for unlock token.");
            TokenApiError::InternalServerError
        })?
        .ok_or(TokenApiError::TokenNotFound)?;

    Ok(Json(record.into()))
}
