use thiserror::Error;

use crate::{client::ClientError, database::error::RepositoryError, models::ConsumeOutcome};

#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("failed to create token: {0}")]
    Store(#[from] RepositoryError),
    #[error("token store rejected the request: {0}")]
    Remote(#[from] ClientError),
}

/// User-facing rejection of a token. Not retriable without a new token.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("token not found")]
    NotFound,
    #[error("token already consumed")]
    AlreadyConsumed,
    #[error("token expired")]
    Expired,
}

impl ConsumeOutcome {
    pub fn into_result(self) -> Result<(), ValidationError> {
        match self {
            ConsumeOutcome::Success => Ok(()),
            ConsumeOutcome::AlreadyConsumed => Err(ValidationError::AlreadyConsumed),
            ConsumeOutcome::Expired => Err(ValidationError::Expired),
            ConsumeOutcome::NotFound => Err(ValidationError::NotFound),
        }
    }
}
