use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenApiError {
    #[error("Something went wrong")]
    InternalServerError,
    #[error("Failed to generate unlock token. Please try again.")]
    IssuanceFailed,
    #[error("Token not found")]
    TokenNotFound,
    #[error("Invalid unlock link")]
    MissingToken,
}

impl IntoResponse for TokenApiError {
    fn into_response(self) -> axum::response::Response {
        use TokenApiError::*;
        let status_code = match self {
            InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            IssuanceFailed => StatusCode::SERVICE_UNAVAILABLE,
            TokenNotFound => StatusCode::NOT_FOUND,
            MissingToken => StatusCode::BAD_REQUEST,
        };

        (status_code, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
