use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{RedirectRule, SyncError};
use crate::utils::atomic_write::write_atomic;

/// The browser's request-filtering engine, seen as an opaque "replace all"
#[async_trait]
pub trait RuleEngine: Send + Sync {
    async fn replace_all(&self, rules: Vec<RedirectRule>) -> Result<(), SyncError>;
    async fn rules(&self) -> Result<Vec<RedirectRule>, SyncError>;
}

#[derive(Default)]
pub struct MemoryRuleEngine {
    rules: RwLock<Vec<RedirectRule>>,
}

#[async_trait]
impl RuleEngine for MemoryRuleEngine {
    async fn replace_all(&self, rules: Vec<RedirectRule>) -> Result<(), SyncError> {
        *self.rules.write().await = rules;
        Ok(())
    }

    async fn rules(&self) -> Result<Vec<RedirectRule>, SyncError> {
        Ok(self.rules.read().await.clone())
    }
}

/// Dynamic rule list persisted as JSON for the extension to load.
///
/// The file is swapped by rename, so a reader sees either the old or the new
/// list, never a mix.
pub struct FileRuleEngine {
    path: PathBuf,
}

impl FileRuleEngine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RuleEngine for FileRuleEngine {
    async fn replace_all(&self, rules: Vec<RedirectRule>) -> Result<(), SyncError> {
        let install_err = |source| SyncError::Install {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(&rules).map_err(|e| install_err(e.into()))?;
        write_atomic(&self.path, json).await.map_err(install_err)
    }

    async fn rules(&self) -> Result<Vec<RedirectRule>, SyncError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| SyncError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(SyncError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
