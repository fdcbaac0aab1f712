//! HTTP client for the hosted token store, used from the blocked device.

use std::time::Duration;

use reqwest::{header, Client as HttpClient, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::{
    models::{IssuedToken, TokenStatus},
    web::auth::API_KEY_HEADER,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token not found")]
    NotFound,
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Clone)]
pub struct TokenStoreClient {
    http: HttpClient,
    base_url: String,
    api_key: SecretString,
}

impl TokenStoreClient {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Result<Self, ClientError> {
        // No overall request timeout: a hung poll only delays its own tick
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// `POST /tokens`
    pub async fn issue(&self) -> Result<IssuedToken, ClientError> {
        let url = format!("{}/tokens", self.base_url);
        debug!(url = %url, "POST request");

        let response = self.authorized(self.http.post(&url)).send().await?;
        handle_response(response).await
    }

    /// `GET /tokens/{token}`
    pub async fn status(&self, token: &str) -> Result<TokenStatus, ClientError> {
        let url = format!("{}/tokens/{token}", self.base_url);
        debug!(url = %url, "GET request");

        let response = self.authorized(self.http.get(&url)).send().await?;
        handle_response(response).await
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let key = self.api_key.expose_secret();
        request
            .header(API_KEY_HEADER, key)
            .header(header::AUTHORIZATION, format!("Bearer {key}"))
    }
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}
