pub mod errors;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use errors::AuthenticationError;
use hyper::header;
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;

use crate::utils::state::AppState;

pub const API_KEY_HEADER: &str = "apikey";

/// Static API key guard for the token store routes.
///
/// The key may arrive as `apikey: <key>` or `Authorization: Bearer <key>`.
pub async fn auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<impl IntoResponse, AuthenticationError> {
    let headers = request.headers();
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|auth| auth.strip_prefix("Bearer "))
        })
        .ok_or(AuthenticationError::MissingApiKey)?;

    let expected = state.api_key.expose_secret().as_bytes();
    if !bool::from(provided.as_bytes().ct_eq(expected)) {
        tracing::warn!("Rejected request with an invalid API key");
        return Err(AuthenticationError::InvalidApiKey);
    }

    Ok(next.run(request).await)
}
