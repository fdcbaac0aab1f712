use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use super::{error::IssuanceError, Clock};
use crate::{
    database::queries::TokenRepository,
    models::{IssuedToken, UnlockToken},
};

pub struct TokenIssuer {
    repo: Arc<dyn TokenRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    consumer_base_url: String,
}

impl TokenIssuer {
    pub fn new(
        repo: Arc<dyn TokenRepository>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        consumer_base_url: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            clock,
            ttl,
            consumer_base_url: consumer_base_url.into(),
        }
    }

    /// Mints a fresh token and persists it unconsumed with a single insert.
    ///
    /// No retry is attempted; the caller surfaces the failure and lets the
    /// user regenerate.
    pub async fn issue_token(&self) -> Result<IssuedToken, IssuanceError> {
        let token = Uuid::new_v4().to_string();
        let now = self.clock.now();
        let expires_at = now + self.ttl;

        self.repo
            .insert_one(UnlockToken::new(token.clone(), now, expires_at))
            .await
            .inspect_err(|e| tracing::error!("Failed to create unlock token: {e}"))?;

        tracing::info!(%expires_at, "Issued unlock token");
        Ok(IssuedToken {
            unlock_url: self.unlock_url(&token),
            token,
            expires_at,
        })
    }

    pub fn unlock_url(&self, token: &str) -> String {
        format!(
            "{}/unlock?token={token}",
            self.consumer_base_url.trim_end_matches('/')
        )
    }
}
