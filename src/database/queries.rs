use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};

use super::error::RepositoryError;
use crate::models::{unlock_tokens, UnlockToken};

/// Row store backing the token issuer and consumer
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert_one(&self, entity: UnlockToken) -> Result<(), RepositoryError>;
    async fn find_one_by(&self, token: &str) -> Result<Option<UnlockToken>, RepositoryError>;
    /// Flips `consumed` to true only where it is still false.
    /// Returns whether this call performed the transition.
    async fn mark_consumed(&self, token: &str) -> Result<bool, RepositoryError>;
    /// Deletes tokens whose expiry is older than `before`, returning the count
    async fn delete_expired_before(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[derive(Clone)]
pub struct SeaOrmStore<T> {
    db: Arc<DatabaseConnection>,
    _entity: PhantomData<T>,
}

impl<T> SeaOrmStore<T> {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl TokenRepository for SeaOrmStore<UnlockToken> {
    async fn insert_one(&self, entity: UnlockToken) -> Result<(), RepositoryError> {
        let active = unlock_tokens::ActiveModel {
            token: Set(entity.token),
            expires_at: Set(entity.expires_at),
            consumed: Set(entity.consumed),
            created_at: Set(entity.created_at),
        };
        unlock_tokens::Entity::insert(active)
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(RepositoryError::StoreError)?;
        Ok(())
    }

    async fn find_one_by(&self, token: &str) -> Result<Option<UnlockToken>, RepositoryError> {
        unlock_tokens::Entity::find_by_id(token.to_owned())
            .one(self.db.as_ref())
            .await
            .map_err(RepositoryError::FetchError)
    }

    async fn mark_consumed(&self, token: &str) -> Result<bool, RepositoryError> {
        let result = unlock_tokens::Entity::update_many()
            .col_expr(unlock_tokens::Column::Consumed, Expr::value(true))
            .filter(unlock_tokens::Column::Token.eq(token))
            .filter(unlock_tokens::Column::Consumed.eq(false))
            .exec(self.db.as_ref())
            .await
            .map_err(RepositoryError::UpdateError)?;
        Ok(result.rows_affected == 1)
    }

    async fn delete_expired_before(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = unlock_tokens::Entity::delete_many()
            .filter(unlock_tokens::Column::ExpiresAt.lt(before))
            .exec(self.db.as_ref())
            .await
            .map_err(RepositoryError::DeleteError)?;
        Ok(result.rows_affected)
    }
}
