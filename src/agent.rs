//! Device-side agent tying the blocking state, the rules file and the unlock
//! poller together.

use std::{future::Future, sync::Arc};

use chrono::{Duration, Utc};
use config::ConfigError;
use thiserror::Error;
use tokio::time::interval;
use tracing::{info, warn};

use crate::{
    blocking::{normalize_host, BlockingController, BlockingError, BlockingStore, FileBlockingStore},
    config::AgentConfig,
    messaging::spawn_background,
    poller::{PollerConfig, PollerState, TokenService, UnlockPoller},
    rules::{BlockedPage, FileRuleEngine, RuleEngine, RuleSynchronizer, SyncError},
};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Blocking(#[from] BlockingError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0} is not blocked")]
    NotBlocked(String),
}

pub struct Agent<S, E> {
    controller: Arc<BlockingController<S>>,
    synchronizer: RuleSynchronizer<E>,
    unlock_ttl: Option<Duration>,
    poller_config: PollerConfig,
}

impl Agent<FileBlockingStore, FileRuleEngine> {
    pub async fn open(config: &AgentConfig) -> Result<Self, AgentError> {
        let store = FileBlockingStore::open(&config.state_path).await?;
        let page = BlockedPage::new(&config.extension_origin)?;
        let synchronizer = RuleSynchronizer::new(FileRuleEngine::new(&config.rules_path), page);

        Ok(Self::new(store, synchronizer)
            .with_unlock_ttl(config.unlock_ttl()?)
            .with_poller_config(PollerConfig {
                poll_interval: config.poll_interval(),
                navigate_delay: config.navigate_delay(),
            }))
    }
}

impl<S, E> Agent<S, E>
where
    S: BlockingStore + 'static,
    E: RuleEngine,
{
    pub fn new(store: S, synchronizer: RuleSynchronizer<E>) -> Self {
        Self {
            controller: Arc::new(BlockingController::new(store)),
            synchronizer,
            unlock_ttl: None,
            poller_config: PollerConfig::default(),
        }
    }

    pub fn with_unlock_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.unlock_ttl = ttl;
        self
    }

    pub fn with_poller_config(mut self, config: PollerConfig) -> Self {
        self.poller_config = config;
        self
    }

    pub fn controller(&self) -> &Arc<BlockingController<S>> {
        &self.controller
    }

    pub fn synchronizer(&self) -> &RuleSynchronizer<E> {
        &self.synchronizer
    }

    /// Applies the unlock TTL when one is configured
    pub async fn expire_unlocks(&self) -> Result<(), BlockingError> {
        if let Some(ttl) = self.unlock_ttl {
            self.controller.expire_unlocks(Utc::now(), ttl).await?;
        }
        Ok(())
    }

    /// Rewrites the rules from the current state, returning the rule count
    pub async fn sync(&self) -> Result<usize, AgentError> {
        self.expire_unlocks().await?;
        let state = self.controller.load().await?;
        Ok(self.synchronizer.synchronize_state(&state).await?)
    }

    /// Keeps the rules in sync until `shutdown` resolves. The state is
    /// re-read every poll interval to pick up other processes' writes.
    pub async fn watch(&self, shutdown: impl Future<Output = ()>) -> Result<(), AgentError> {
        self.expire_unlocks().await?;
        let changes = self.controller.subscribe();

        let refresh = async {
            let mut ticker = interval(self.poller_config.poll_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.controller.refresh().await {
                    warn!("Failed to re-read state: {e}");
                }
                if let Err(e) = self.expire_unlocks().await {
                    warn!("Failed to expire unlocks: {e}");
                }
            }
        };

        info!("Watching blocking state");
        tokio::select! {
            _ = self.synchronizer.run(changes, shutdown) => {}
            _ = refresh => {}
        }
        Ok(())
    }

    /// Poller whose unlock requests land in this agent's state
    pub fn unlock_poller<T: TokenService>(&self, service: T) -> UnlockPoller<T> {
        let (background, _task) = spawn_background(Arc::clone(&self.controller));
        UnlockPoller::new(service, background, self.poller_config)
    }

    /// Runs one unlock attempt for a blocked `host` and resyncs the rules
    /// whatever the outcome, since the attempt starts by clearing any
    /// earlier exemption.
    pub async fn unlock<T: TokenService>(
        &self,
        poller: &UnlockPoller<T>,
        host: &str,
    ) -> Result<PollerState, AgentError> {
        let host = normalize_host(host)?;
        if !self.controller.load().await?.blocked_hosts.contains(&host) {
            return Err(AgentError::NotBlocked(host));
        }

        let outcome = poller.run(&host).await;
        self.sync().await?;
        Ok(outcome)
    }
}
