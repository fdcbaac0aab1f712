use sea_orm::DbErr;
use thiserror::Error;

#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum RepositoryError {
    #[error("could not store entity: {0}")]
    StoreError(#[source] DbErr),
    #[error("could not fetch entity: {0}")]
    FetchError(#[source] DbErr),
    #[error("could not update entity: {0}")]
    UpdateError(#[source] DbErr),
    #[error("could not delete entity: {0}")]
    DeleteError(#[source] DbErr),
}
