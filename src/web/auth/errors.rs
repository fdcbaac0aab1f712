use axum::{response::IntoResponse, Json};
use hyper::StatusCode;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthenticationError {
    #[error("Missing API key")]
    MissingApiKey,
    #[error("Invalid API key")]
    InvalidApiKey,
}

impl IntoResponse for AuthenticationError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({
            "error": self.to_string()
        });

        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}
