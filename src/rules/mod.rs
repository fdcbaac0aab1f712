//! Redirect rules derived from the blocking state.
//!
//! The installed rule set is always rebuilt from scratch: ids are a dense
//! `1..=N` over the sorted hosts and every synchronization replaces the whole
//! set, so there is nothing to diff and no id can dangle.

mod engine;

use std::{collections::BTreeSet, future::Future, path::PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::blocking::BlockingState;

pub use engine::{FileRuleEngine, MemoryRuleEngine, RuleEngine};

const URL_FILTER_PREFIX: &str = "*://*.";
const URL_FILTER_SUFFIX: &str = "/*";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid blocked page origin {0:?}")]
    InvalidOrigin(String),
    #[error("failed to install rules to {path:?}: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read installed rules from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rules file {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    Redirect { redirect: Redirect },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub url_filter: String,
    pub resource_types: Vec<ResourceType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
}

impl RedirectRule {
    pub fn for_host(id: u32, host: &str, page: &BlockedPage) -> Self {
        Self {
            id,
            priority: 1,
            action: RuleAction::Redirect {
                redirect: Redirect {
                    url: page.url_for(host),
                },
            },
            condition: RuleCondition {
                url_filter: format!("{URL_FILTER_PREFIX}{host}{URL_FILTER_SUFFIX}"),
                resource_types: vec![ResourceType::MainFrame],
            },
        }
    }

    /// Host matched by this rule's filter
    pub fn host(&self) -> Option<&str> {
        self.condition
            .url_filter
            .strip_prefix(URL_FILTER_PREFIX)?
            .strip_suffix(URL_FILTER_SUFFIX)
    }
}

/// The extension page blocked navigations are redirected to,
/// `{origin}/blocked.html?site={host}`
#[derive(Debug, Clone)]
pub struct BlockedPage {
    base: Url,
}

impl BlockedPage {
    pub fn new(extension_origin: &str) -> Result<Self, SyncError> {
        let raw = format!("{}/blocked.html", extension_origin.trim_end_matches('/'));
        let base = Url::parse(&raw)
            .map_err(|_| SyncError::InvalidOrigin(extension_origin.to_string()))?;
        Ok(Self { base })
    }

    pub fn url_for(&self, host: &str) -> String {
        let mut url = self.base.clone();
        url.query_pairs_mut().append_pair("site", host);
        url.into()
    }

    /// Recovers the blocked host from a redirect url
    pub fn site_from(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()?
            .query_pairs()
            .find(|(key, _)| key == "site")
            .map(|(_, value)| value.into_owned())
    }
}

/// One rule per host in `blocked \ unlocked`, ids `1..=N` in host order
pub fn build_rules(
    blocked: &BTreeSet<String>,
    unlocked: &BTreeSet<String>,
    page: &BlockedPage,
) -> Vec<RedirectRule> {
    blocked
        .difference(unlocked)
        .zip(1..)
        .map(|(host, id)| RedirectRule::for_host(id, host, page))
        .collect()
}

pub struct RuleSynchronizer<E> {
    engine: E,
    page: BlockedPage,
}

impl<E: RuleEngine> RuleSynchronizer<E> {
    pub fn new(engine: E, page: BlockedPage) -> Self {
        Self { engine, page }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Replaces the installed rules with exactly `blocked \ unlocked`.
    ///
    /// Failures are logged and returned. Nothing is rolled back or retried;
    /// the next state change triggers a full resynchronization anyway.
    pub async fn synchronize(
        &self,
        blocked: &BTreeSet<String>,
        unlocked: &BTreeSet<String>,
    ) -> Result<usize, SyncError> {
        let rules = build_rules(blocked, unlocked, &self.page);
        let count = rules.len();

        self.engine
            .replace_all(rules)
            .await
            .inspect_err(|e| tracing::error!("Rule synchronization failed: {e}"))?;

        if count == 0 {
            tracing::info!("No sites to block");
        } else {
            tracing::info!(count, "Blocking sites");
        }
        if !unlocked.is_empty() {
            tracing::debug!(?unlocked, "Temporarily unlocked");
        }
        Ok(count)
    }

    pub async fn synchronize_state(&self, state: &BlockingState) -> Result<usize, SyncError> {
        self.synchronize(&state.blocked_hosts, &state.unlocked_hosts())
            .await
    }

    /// Synchronizes the current state, then again on every change until
    /// `shutdown` resolves or the feed closes.
    pub async fn run(
        &self,
        mut changes: watch::Receiver<BlockingState>,
        shutdown: impl Future<Output = ()>,
    ) {
        let initial = changes.borrow_and_update().clone();
        let _ = self.synchronize_state(&initial).await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Blocking state feed closed");
                        break;
                    }
                    let state = changes.borrow_and_update().clone();
                    let _ = self.synchronize_state(&state).await;
                }
            }
        }
    }
}
