//! Blocked hosts and their temporary exemptions.
//!
//! [`BlockingController`] is the only writer of [`BlockingState`]. Every
//! mutation is a read-modify-write through a [`BlockingStore`], whose change
//! feed drives rule synchronization.

mod error;
mod store;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

pub use error::BlockingError;
pub use store::{BlockingStore, FileBlockingStore, MemoryBlockingStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingState {
    #[serde(default)]
    pub blocked_hosts: BTreeSet<String>,
    /// Exempted host mapped to when the exemption was granted
    #[serde(default)]
    pub temporarily_unlocked: BTreeMap<String, DateTime<Utc>>,
}

impl BlockingState {
    pub fn unlocked_hosts(&self) -> BTreeSet<String> {
        self.temporarily_unlocked.keys().cloned().collect()
    }

    /// Hosts that should currently be redirected
    pub fn hosts_to_block(&self) -> BTreeSet<String> {
        self.blocked_hosts
            .iter()
            .filter(|host| !self.temporarily_unlocked.contains_key(*host))
            .cloned()
            .collect()
    }
}

/// Normalizes user input into a bare lowercase hostname.
///
/// Accepts pasted URLs: scheme, credentials, port, path and a leading `*.`
/// or `www.` are stripped. IP literals are kept, IPv6 in brackets.
pub fn normalize_host(input: &str) -> Result<String, BlockingError> {
    let invalid = || BlockingError::InvalidHost(input.to_string());

    let lowered = input.trim().to_lowercase();
    let lowered = lowered.strip_prefix("*.").unwrap_or(&lowered);
    if lowered.is_empty() || lowered.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let url = if lowered.contains("://") {
        Url::parse(lowered)
    } else {
        Url::parse(&format!("http://{lowered}"))
    }
    .map_err(|_| invalid())?;

    let host = url.host_str().ok_or_else(invalid)?;
    // IPv6 literals come back bracketed and already canonical
    if host.starts_with('[') {
        return Ok(host.to_string());
    }

    let host = host.trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);
    let valid = !host.is_empty()
        && !host.starts_with('.')
        && !host.contains("..")
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_');

    if valid {
        Ok(host.to_string())
    } else {
        Err(invalid())
    }
}

pub struct BlockingController<S> {
    store: S,
    write_lock: Mutex<()>,
}

impl<S: BlockingStore> BlockingController<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> Result<BlockingState, BlockingError> {
        self.store.load().await
    }

    pub fn subscribe(&self) -> watch::Receiver<BlockingState> {
        self.store.subscribe()
    }

    /// Picks up writes made by other processes
    pub async fn refresh(&self) -> Result<(), BlockingError> {
        self.store.refresh().await
    }

    /// Writes an empty state unless one is already persisted
    pub async fn initialize(&self) -> Result<BlockingState, BlockingError> {
        let _guard = self.write_lock.lock().await;
        let state = self.store.load().await?;
        self.store.save(&state).await?;
        Ok(state)
    }

    async fn update<F, T>(&self, apply: F) -> Result<T, BlockingError>
    where
        F: FnOnce(&mut BlockingState) -> Result<T, BlockingError>,
    {
        let _guard = self.write_lock.lock().await;
        let mut state = self.store.load().await?;
        let result = apply(&mut state)?;
        self.store.save(&state).await?;
        Ok(result)
    }

    pub async fn add_blocked(&self, host: &str) -> Result<String, BlockingError> {
        let host = normalize_host(host)?;
        self.update(|state| {
            if !state.blocked_hosts.insert(host.clone()) {
                return Err(BlockingError::AlreadyBlocked(host.clone()));
            }
            Ok(())
        })
        .await?;
        tracing::info!(%host, "Blocked host added");
        Ok(host)
    }

    /// Removing a host that is not blocked is a no-op. An exemption left
    /// behind for the host is harmless and stays until cleared.
    pub async fn remove_blocked(&self, host: &str) -> Result<bool, BlockingError> {
        let host = normalize_host(host)?;
        let removed = self
            .update(|state| Ok(state.blocked_hosts.remove(&host)))
            .await?;
        if removed {
            tracing::info!(%host, "Blocked host removed");
        }
        Ok(removed)
    }

    pub async fn temporary_unlock(&self, host: &str) -> Result<(), BlockingError> {
        let host = normalize_host(host)?;
        let now = Utc::now();
        let inserted = self
            .update(|state| {
                Ok(match state.temporarily_unlocked.entry(host.clone()) {
                    std::collections::btree_map::Entry::Vacant(entry) => {
                        entry.insert(now);
                        true
                    }
                    std::collections::btree_map::Entry::Occupied(_) => false,
                })
            })
            .await?;
        if inserted {
            tracing::info!(%host, "Temporarily unlocked");
        }
        Ok(())
    }

    /// Lazy expiry: the exemption ends when the blocked page is shown again
    pub async fn clear_temporary_unlock(&self, host: &str) -> Result<bool, BlockingError> {
        let host = normalize_host(host)?;
        self.update(|state| Ok(state.temporarily_unlocked.remove(&host).is_some()))
            .await
    }

    /// Drops exemptions granted more than `ttl` before `now`
    pub async fn expire_unlocks(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Vec<String>, BlockingError> {
        let expired = self
            .update(|state| {
                let expired: Vec<String> = state
                    .temporarily_unlocked
                    .iter()
                    .filter(|(_, unlocked_at)| now - **unlocked_at >= ttl)
                    .map(|(host, _)| host.clone())
                    .collect();
                for host in &expired {
                    state.temporarily_unlocked.remove(host);
                }
                Ok(expired)
            })
            .await?;
        if !expired.is_empty() {
            tracing::info!(?expired, "Temporary unlocks expired");
        }
        Ok(expired)
    }
}
