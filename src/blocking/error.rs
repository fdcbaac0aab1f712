use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockingError {
    #[error("invalid host: {0:?}")]
    InvalidHost(String),
    #[error("{0} is already blocked")]
    AlreadyBlocked(String),
    #[error("failed to read state from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write state to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
