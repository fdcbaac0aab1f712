use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

// Unlock tokens entity
pub mod unlock_tokens {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "unlock_tokens")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub token: String,
        pub expires_at: DateTimeUtc,
        pub consumed: bool,
        pub created_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub type UnlockToken = unlock_tokens::Model;

impl UnlockToken {
    pub fn new(token: String, created_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token,
            expires_at,
            consumed: false,
            created_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Returned to the blocked page when a token is minted
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Deep link rendered as the QR code, `{consumer}/unlock?token={token}`
    pub unlock_url: String,
}

/// Poll response for a single token
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenStatus {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl From<UnlockToken> for TokenStatus {
    fn from(record: UnlockToken) -> Self {
        Self {
            token: record.token,
            expires_at: record.expires_at,
            consumed: record.consumed,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConsumeOutcome {
    Success,
    AlreadyConsumed,
    Expired,
    NotFound,
}

impl ConsumeOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Message shown on the second device after a confirmation attempt
    pub fn message(self) -> &'static str {
        match self {
            Self::Success => "Sites unlocked! You can close this page.",
            Self::AlreadyConsumed => "This token has already been used",
            Self::Expired => "This token has expired",
            Self::NotFound => "Invalid or expired token",
        }
    }
}

/// Query string carried by the deep link
#[derive(Debug, Deserialize)]
pub struct UnlockQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsumeResponse {
    pub outcome: ConsumeOutcome,
    pub message: String,
}

impl From<ConsumeOutcome> for ConsumeResponse {
    fn from(outcome: ConsumeOutcome) -> Self {
        Self {
            outcome,
            message: outcome.message().to_string(),
        }
    }
}
