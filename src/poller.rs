//! Unlock poller run by the blocked page.
//!
//! Mints a token, renders its countdown and polls the token store until the
//! token is consumed or expires. On consumption the background context is
//! asked to exempt the site and the page navigates on.

use std::{future::Future, pin::Pin, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{
    sync::watch,
    time::{interval, interval_at, sleep, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    client::{ClientError, TokenStoreClient},
    messaging::{BackgroundHandle, Message},
    models::{IssuedToken, TokenStatus},
    tokens::IssuanceError,
};

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);
const EXPIRING_BELOW: Duration = Duration::from_secs(60);
const UNLOCK_FAILED: &str = "Failed to unlock sites";

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Token store operations the poller needs
#[async_trait]
pub trait TokenService: Send + Sync {
    async fn issue(&self) -> Result<IssuedToken, IssuanceError>;
    async fn status(&self, token: &str) -> Result<TokenStatus, PollError>;
}

#[async_trait]
impl TokenService for TokenStoreClient {
    async fn issue(&self) -> Result<IssuedToken, IssuanceError> {
        Ok(TokenStoreClient::issue(self).await?)
    }

    async fn status(&self, token: &str) -> Result<TokenStatus, PollError> {
        Ok(TokenStoreClient::status(self, token).await?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling {
        token: String,
        unlock_url: String,
        expires_at: DateTime<Utc>,
    },
    Unlocked {
        destination: String,
    },
    Expired,
    Failed {
        reason: String,
    },
}

impl PollerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Unlocked { .. } | Self::Expired | Self::Failed { .. }
        )
    }
}

/// Time left on the displayed code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    remaining: Duration,
}

impl Countdown {
    pub fn describe(remaining: Duration) -> Self {
        Self { remaining }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn label(&self) -> String {
        if self.remaining.is_zero() {
            return "QR code expired".to_string();
        }
        let secs = self.remaining.as_secs();
        format!("Expires in: {}m {}s", secs / 60, secs % 60)
    }

    pub fn is_expiring(&self) -> bool {
        self.remaining < EXPIRING_BELOW
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Pause between a successful unlock and navigating to the site
    pub navigate_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            navigate_delay: Duration::from_millis(500),
        }
    }
}

type StatusFuture<'a> = Pin<Box<dyn Future<Output = Result<TokenStatus, PollError>> + Send + 'a>>;

pub struct UnlockPoller<T> {
    service: T,
    background: BackgroundHandle,
    config: PollerConfig,
    state: watch::Sender<PollerState>,
    countdown: watch::Sender<Option<Countdown>>,
}

impl<T: TokenService> UnlockPoller<T> {
    pub fn new(service: T, background: BackgroundHandle, config: PollerConfig) -> Self {
        let (state, _) = watch::channel(PollerState::Idle);
        let (countdown, _) = watch::channel(None);
        Self {
            service,
            background,
            config,
            state,
            countdown,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    pub fn countdown(&self) -> watch::Receiver<Option<Countdown>> {
        self.countdown.subscribe()
    }

    pub fn state(&self) -> PollerState {
        self.state.borrow().clone()
    }

    /// Back to `Idle`, dropping the previous code
    pub fn regenerate(&self) {
        self.countdown.send_replace(None);
        self.transition(PollerState::Idle);
    }

    /// Runs one unlock attempt for `site` to a terminal state
    pub async fn run(&self, site: &str) -> PollerState {
        self.regenerate();

        // Showing the blocked page ends any earlier exemption
        if let Err(e) = self
            .background
            .request(Message::ClearTemporaryUnlock {
                site: site.to_string(),
            })
            .await
        {
            warn!(%site, "Could not clear temporary unlock: {e}");
        }

        let issued = match self.service.issue().await {
            Ok(issued) => issued,
            Err(e) => {
                error!(%site, "Error creating token: {e}");
                return self.transition(PollerState::Failed {
                    reason: e.to_string(),
                });
            }
        };
        info!(%site, token = %issued.token, "Unlock token issued");

        self.transition(PollerState::Polling {
            token: issued.token.clone(),
            unlock_url: issued.unlock_url.clone(),
            expires_at: issued.expires_at,
        });

        let remaining = (issued.expires_at - Utc::now())
            .to_std()
            .unwrap_or_default();
        let deadline = Instant::now() + remaining;

        let mut countdown = interval(COUNTDOWN_TICK);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll = interval_at(
            Instant::now() + self.config.poll_interval,
            self.config.poll_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<StatusFuture<'_>> = None;

        loop {
            tokio::select! {
                _ = countdown.tick() => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    self.countdown.send_replace(Some(Countdown::describe(left)));
                    if left.is_zero() {
                        info!(%site, token = %issued.token, "Unlock token expired");
                        return self.transition(PollerState::Expired);
                    }
                }
                // A slow request keeps its slot; ticks are skipped meanwhile
                _ = poll.tick(), if in_flight.is_none() => {
                    in_flight = Some(self.service.status(&issued.token));
                }
                result = await_status(&mut in_flight) => {
                    in_flight = None;
                    match result {
                        Ok(status) if status.consumed => {
                            return self.complete_unlock(site).await;
                        }
                        Ok(_) => debug!(token = %issued.token, "Token not consumed yet"),
                        Err(e) => warn!(token = %issued.token, "Error polling token: {e}"),
                    }
                }
            }
        }
    }

    async fn complete_unlock(&self, site: &str) -> PollerState {
        let request = Message::TemporaryUnlock {
            site: site.to_string(),
        };
        if let Err(e) = self.background.request(request).await {
            error!(%site, "Unlock request failed: {e}");
            return self.transition(PollerState::Failed {
                reason: UNLOCK_FAILED.to_string(),
            });
        }

        sleep(self.config.navigate_delay).await;
        self.transition(PollerState::Unlocked {
            destination: format!("https://{site}"),
        })
    }

    fn transition(&self, next: PollerState) -> PollerState {
        debug!(state = ?next, "Poller transition");
        self.state.send_replace(next.clone());
        next
    }
}

async fn await_status(in_flight: &mut Option<StatusFuture<'_>>) -> Result<TokenStatus, PollError> {
    match in_flight {
        Some(request) => request.await,
        None => std::future::pending().await,
    }
}
