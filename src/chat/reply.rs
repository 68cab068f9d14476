//! Reply channels. A sink knows whether its answer can still be delivered.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

use crate::rag::{Answer, AnswerOutcome};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("reply channel is closed")]
    Closed,
    #[error("reply token expired")]
    Expired,
    #[error("reply push failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Whether a reply sent now could still reach the user.
    fn is_open(&self) -> bool;

    /// Resolves once the reply can no longer be delivered.
    async fn expired(&self);

    async fn deliver(&self, answer: &Answer) -> Result<(), DeliveryError>;
}

/// What `POST /api/chat` returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub answer: String,
    pub outcome: AnswerOutcome,
}

/// In-process reply to a waiting HTTP request. Dropping the receiver expires it.
pub struct OneshotReply {
    tx: Mutex<Option<oneshot::Sender<ChatReply>>>,
}

impl OneshotReply {
    pub fn channel() -> (Self, oneshot::Receiver<ChatReply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[async_trait]
impl ReplySink for OneshotReply {
    fn is_open(&self) -> bool {
        match self.tx.try_lock() {
            Ok(tx) => tx.as_ref().is_some_and(|tx| !tx.is_closed()),
            // Only `expired` holds the lock for long, and it means still waiting.
            Err(_) => true,
        }
    }

    async fn expired(&self) {
        let mut tx = self.tx.lock().await;
        if let Some(tx) = tx.as_mut() {
            tx.closed().await;
        }
    }

    async fn deliver(&self, answer: &Answer) -> Result<(), DeliveryError> {
        let tx = self.tx.lock().await.take().ok_or(DeliveryError::Closed)?;
        tx.send(ChatReply {
            answer: answer.text.clone(),
            outcome: answer.outcome,
        })
        .map_err(|_| DeliveryError::Closed)
    }
}

/// Push reply for a webhook event, valid until its reply token lapses.
pub struct WebhookReply {
    client: Client,
    reply_url: String,
    access_token: Option<String>,
    reply_token: String,
    deadline: Instant,
}

impl WebhookReply {
    pub fn new(
        client: Client,
        reply_url: impl Into<String>,
        access_token: Option<String>,
        reply_token: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            client,
            reply_url: reply_url.into(),
            access_token,
            reply_token: reply_token.into(),
            deadline: Instant::now() + ttl,
        }
    }
}

#[async_trait]
impl ReplySink for WebhookReply {
    fn is_open(&self) -> bool {
        Instant::now() < self.deadline
    }

    async fn expired(&self) {
        tokio::time::sleep_until(self.deadline).await;
    }

    async fn deliver(&self, answer: &Answer) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Expired);
        }
        let body = json!({
            "reply_token": self.reply_token,
            "messages": [{ "type": "text", "text": answer.text }],
        });
        let mut request = self.client.post(&self.reply_url).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let res = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Transport(format!("{}: {}", status, text)));
        }
        Ok(())
    }
}
