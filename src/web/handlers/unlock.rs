use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::error::TokenApiError;
use crate::{
    models::{ConsumeOutcome, ConsumeResponse, UnlockQuery},
    utils::state::AppState,
};

fn present(query: UnlockQuery) -> Option<String> {
    query.token.filter(|token| !token.trim().is_empty())
}

// Landing handler for the scanned deep link. Viewing never consumes.
pub async fn unlock_page(Query(query): Query<UnlockQuery>) -> impl IntoResponse {
    match present(query) {
        Some(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "message": "This will give you access to your blocked websites",
            })),
        ),
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "error",
                "message": TokenApiError::MissingToken.to_string(),
            })),
        ),
    }
}

// Handler behind the "Confirm Unlock" action on the second device
pub async fn confirm_unlock(
    State(state): State<AppState>,
    Query(query): Query<UnlockQuery>,
) -> Result<impl IntoResponse, TokenApiError> {
    let token = present(query).ok_or(TokenApiError::MissingToken)?;

    let outcome = state.consumer.consume(&token).await.map_err(|e| {
        tracing::error!("Failed to consume unlock token: {e}");
        TokenApiError::InternalServerError
    })?;

    if let Err(reason) = outcome.into_result() {
        tracing::info!(%reason, "Unlock confirmation rejected");
    }

    let status_code = match outcome {
        ConsumeOutcome::Success => StatusCode::OK,
        ConsumeOutcome::AlreadyConsumed => StatusCode::CONFLICT,
        ConsumeOutcome::Expired => StatusCode::GONE,
        ConsumeOutcome::NotFound => StatusCode::NOT_FOUND,
    };

    Ok((status_code, Json(ConsumeResponse::from(outcome))))
}
