use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use secrecy::SecretString;

use crate::{
    database::{error::RepositoryError, queries::TokenRepository, Migrator},
    models::UnlockToken,
    tokens::Clock,
    utils::state::AppState,
};

pub const TEST_API_KEY: &str = "test-api-key";

/// Token store kept in a map, for tests that do not need SQL semantics
#[derive(Default)]
pub struct MemoryTokenStore {
    pub(crate) repository: Arc<RwLock<HashMap<String, UnlockToken>>>,
    stale_reads: bool,
}

impl MemoryTokenStore {
    /// Reads return the row as inserted, never showing later updates
    pub fn with_stale_reads() -> Self {
        Self {
            stale_reads: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl TokenRepository for MemoryTokenStore {
    async fn insert_one(&self, entity: UnlockToken) -> Result<(), RepositoryError> {
        let mut repo = self.repository.write().unwrap();
        if repo.contains_key(&entity.token) {
            return Err(RepositoryError::StoreError(DbErr::Custom(
                "duplicate token".to_string(),
            )));
        }
        repo.insert(entity.token.clone(), entity);
        Ok(())
    }

    async fn find_one_by(&self, token: &str) -> Result<Option<UnlockToken>, RepositoryError> {
        let record = self.repository.read().unwrap().get(token).cloned();
        Ok(record.map(|mut r| {
            if self.stale_reads {
                r.consumed = false;
            }
            r
        }))
    }

    async fn mark_consumed(&self, token: &str) -> Result<bool, RepositoryError> {
        let mut repo = self.repository.write().unwrap();
        match repo.get_mut(token) {
            Some(record) if !record.consumed => {
                record.consumed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_expired_before(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut repo = self.repository.write().unwrap();
        let len = repo.len();
        repo.retain(|_, record| record.expires_at >= before);
        Ok((len - repo.len()) as u64)
    }
}

/// Migrated in-memory SQLite database
pub async fn memory_database() -> Result<Arc<DatabaseConnection>, DbErr> {
    // A second pooled connection would open a different, empty database
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

pub fn test_app_state(
    repo: Arc<dyn TokenRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
) -> AppState {
    AppState::new(
        repo,
        clock,
        ttl,
        "http://localhost:8000",
        SecretString::from(TEST_API_KEY),
    )
}
