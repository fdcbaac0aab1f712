use std::sync::Arc;

use chrono::Duration;
use color_eyre::eyre::{ensure, Context};
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use secrecy::{ExposeSecret, SecretString};

use crate::{
    config::Config,
    database::queries::{SeaOrmStore, TokenRepository},
    models::UnlockToken,
    tokens::{Clock, SystemClock, TokenConsumer, TokenIssuer},
};

#[derive(Clone)]
pub struct AppState {
    pub token_repo: Arc<dyn TokenRepository>,
    pub issuer: Arc<TokenIssuer>,
    pub consumer: Arc<TokenConsumer>,
    pub clock: Arc<dyn Clock>,
    pub api_key: Arc<SecretString>,
}

impl AppState {
    pub fn new(
        token_repo: Arc<dyn TokenRepository>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        consumer_base_url: &str,
        api_key: SecretString,
    ) -> Self {
        let issuer = TokenIssuer::new(
            Arc::clone(&token_repo),
            Arc::clone(&clock),
            ttl,
            consumer_base_url,
        );
        let consumer = TokenConsumer::new(Arc::clone(&token_repo), Arc::clone(&clock));
        Self {
            token_repo,
            issuer: Arc::new(issuer),
            consumer: Arc::new(consumer),
            clock,
            api_key: Arc::new(api_key),
        }
    }
}

pub async fn setup(config: &Config) -> color_eyre::Result<AppState> {
    ensure!(
        !config.server.api_key.expose_secret().is_empty(),
        "server.api_key must be set (APP_SERVER__API_KEY)"
    );

    let mut options = ConnectOptions::new(config.database.url.expose_secret());
    options.sqlx_logging(false);
    let db = Database::connect(options)
        .await
        .wrap_err("Failed to connect to database")?;

    crate::database::Migrator::up(&db, None)
        .await
        .wrap_err("Failed to apply migrations")?;

    let repo: Arc<dyn TokenRepository> = Arc::new(SeaOrmStore::<UnlockToken>::new(Arc::new(db)));
    Ok(AppState::new(
        repo,
        Arc::new(SystemClock),
        config.tokens.ttl()?,
        &config.tokens.consumer_base_url,
        config.server.api_key.clone(),
    ))
}
