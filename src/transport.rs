//! Outbound messaging: the transport abstraction and ephemeral delivery.
//!
//! Secret-bearing messages only ever go through `send_private*`; the
//! ephemeral variant schedules best-effort deletion so plaintext does not
//! linger in the owner's private channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::engine::Effect;
use crate::error::{AppError, AppResult};

/// Bound on any single outbound transport call.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Opaque reference to a delivered message, enough to delete it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub channel: String,
    pub message: String,
}

/// What the engine needs from the message-delivery collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, channel: &str, text: &str) -> AppResult<()>;
    async fn send_private(&self, owner: &str, text: &str) -> AppResult<MessageHandle>;
    async fn delete_message(&self, handle: &MessageHandle) -> AppResult<()>;
}

/// Sends engine output and handles the ephemeral-deletion bookkeeping.
pub struct Messenger {
    transport: Arc<dyn Transport>,
    secret_ttl: Duration,
}

impl Messenger {
    pub fn new(transport: Arc<dyn Transport>, secret_ttl: Duration) -> Self {
        Self {
            transport,
            secret_ttl,
        }
    }

    pub fn secret_ttl(&self) -> Duration {
        self.secret_ttl
    }

    /// Best-effort channel message; failures are logged, not surfaced.
    pub async fn send_message(&self, channel: &str, text: &str) {
        match tokio::time::timeout(SEND_TIMEOUT, self.transport.send_message(channel, text)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("failed to send to channel {}: {}", channel, e),
            Err(_) => warn!("send to channel {} timed out", channel),
        }
    }

    pub async fn send_private(&self, owner: &str, text: &str) -> AppResult<MessageHandle> {
        match tokio::time::timeout(SEND_TIMEOUT, self.transport.send_private(owner, text)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::delivery(format!(
                "private send to {owner} timed out"
            ))),
        }
    }

    /// Deliver privately and schedule deletion after the secret TTL.
    ///
    /// The send itself is awaited so the caller learns about delivery
    /// failure; deletion is fire-and-forget.
    pub async fn send_private_ephemeral(&self, owner: &str, text: &str) -> AppResult<()> {
        let handle = self.send_private(owner, text).await?;
        self.schedule_delete(handle);
        Ok(())
    }

    /// Best-effort deletion after the secret TTL. Never blocks the caller;
    /// a message that is already gone is not an error.
    pub fn schedule_delete(&self, handle: MessageHandle) {
        let transport = Arc::clone(&self.transport);
        let delay = self.secret_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match tokio::time::timeout(SEND_TIMEOUT, transport.delete_message(&handle)).await {
                Ok(Ok(())) => debug!("deleted ephemeral message {}", handle.message),
                Ok(Err(e)) => debug!(
                    "could not delete ephemeral message {}: {}",
                    handle.message, e
                ),
                Err(_) => debug!("delete of ephemeral message {} timed out", handle.message),
            }
        });
    }

    /// Execute the messaging effects a turn produced.
    pub async fn execute(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Reply { channel, text } => self.send_message(&channel, &text).await,
                Effect::Private { owner, text } => {
                    if let Err(e) = self.send_private(&owner, &text).await {
                        warn!("private message to {} failed: {}", owner, e);
                    }
                }
                Effect::PrivateEphemeral { owner, text } => {
                    if let Err(e) = self.send_private_ephemeral(&owner, &text).await {
                        warn!("ephemeral private message to {} failed: {}", owner, e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Channel { channel: String, text: String },
        Private { owner: String, text: String },
    }

    /// Records every outbound call; can be told to refuse private delivery.
    #[derive(Default)]
    pub struct MockTransport {
        pub sent: Mutex<Vec<Sent>>,
        pub deleted: Mutex<Vec<MessageHandle>>,
        fail_private: AtomicBool,
        fail_delete: AtomicBool,
        next_id: AtomicU64,
    }

    impl MockTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn set_fail_private(&self, fail: bool) {
            self.fail_private.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_delete(&self, fail: bool) {
            self.fail_delete.store(fail, Ordering::SeqCst);
        }

        pub fn channel_texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|s| match s {
                    Sent::Channel { text, .. } => Some(text.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn private_texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|s| match s {
                    Sent::Private { text, .. } => Some(text.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_message(&self, channel: &str, text: &str) -> AppResult<()> {
            self.sent.lock().unwrap().push(Sent::Channel {
                channel: channel.to_string(),
                text: text.to_string(),
            });
            Ok(())
        }

        async fn send_private(&self, owner: &str, text: &str) -> AppResult<MessageHandle> {
            if self.fail_private.load(Ordering::SeqCst) {
                return Err(AppError::delivery("private channel unavailable"));
            }
            self.sent.lock().unwrap().push(Sent::Private {
                owner: owner.to_string(),
                text: text.to_string(),
            });
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(MessageHandle {
                channel: format!("dm-{owner}"),
                message: id.to_string(),
            })
        }

        async fn delete_message(&self, handle: &MessageHandle) -> AppResult<()> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(AppError::delivery("message already gone"));
            }
            self.deleted.lock().unwrap().push(handle.clone());
            Ok(())
        }
    }
}
