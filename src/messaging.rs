//! Request/response channel between a blocked page and the background context.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::blocking::{BlockingController, BlockingStore};

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Message {
    TemporaryUnlock { site: String },
    ClearTemporaryUnlock { site: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageResponse {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessagingError {
    #[error("background context is not running")]
    Disconnected,
    #[error("background context rejected the request: {0}")]
    Rejected(String),
}

type Envelope = (Message, oneshot::Sender<MessageResponse>);

#[derive(Clone)]
pub struct BackgroundHandle {
    tx: mpsc::Sender<Envelope>,
}

impl BackgroundHandle {
    /// Sends `message` and waits for the reply
    pub async fn send(&self, message: Message) -> Result<MessageResponse, MessagingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((message, reply_tx))
            .await
            .map_err(|_| MessagingError::Disconnected)?;
        reply_rx.await.map_err(|_| MessagingError::Disconnected)
    }

    /// Like [`send`](Self::send) but an unsuccessful reply is an error
    pub async fn request(&self, message: Message) -> Result<(), MessagingError> {
        let response = self.send(message).await?;
        if response.success {
            Ok(())
        } else {
            Err(MessagingError::Rejected(
                response.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

/// Spawns the background handler owning `controller`.
///
/// The task ends once every [`BackgroundHandle`] is dropped.
pub fn spawn_background<S>(controller: Arc<BlockingController<S>>) -> (BackgroundHandle, JoinHandle<()>)
where
    S: BlockingStore + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);

    let task = tokio::spawn(async move {
        while let Some((message, reply)) = rx.recv().await {
            let response = handle(&controller, message).await;
            // The requester may have gone away
            let _ = reply.send(response);
        }
        tracing::debug!("Background message channel closed");
    });

    (BackgroundHandle { tx }, task)
}

async fn handle<S: BlockingStore>(
    controller: &BlockingController<S>,
    message: Message,
) -> MessageResponse {
    let result = match &message {
        Message::TemporaryUnlock { site } => controller.temporary_unlock(site).await,
        Message::ClearTemporaryUnlock { site } => {
            controller.clear_temporary_unlock(site).await.map(|_| ())
        }
    };

    match result {
        Ok(()) => MessageResponse::ok(),
        Err(e) => {
            tracing::error!(?message, "Error handling message: {e}");
            MessageResponse::failed(e)
        }
    }
}
