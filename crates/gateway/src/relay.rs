//! Message relay: persist, enrich, then deliver to both parties' channels.

use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    murmur_messages::MessageStore,
    murmur_protocol::{Identity, MessageView, SendMessageParams, ServerEvent},
    tokio::time::timeout,
    tracing::{debug, warn},
};

use crate::{
    router::ChannelRouter,
    state::{ConnectionHandle, send_to_all},
};

/// Why a send was dropped. `Display` is the text reported to the sender.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("recipient is required")]
    MissingRecipient,
    #[error("content is required")]
    EmptyContent,
    #[error("{}", murmur_protocol::SEND_FAILED)]
    Persistence(anyhow::Error),
}

impl RelayError {
    /// Validation failures, as opposed to storage failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::MissingRecipient | Self::EmptyContent)
    }
}

pub struct MessageRelay {
    store: Arc<dyn MessageStore>,
    router: Arc<dyn ChannelRouter>,
    storage_timeout: Duration,
}

impl MessageRelay {
    pub fn new(
        store: Arc<dyn MessageStore>,
        router: Arc<dyn ChannelRouter>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            router,
            storage_timeout,
        }
    }

    /// Handle a `sendMessage` from a connection carrying `sender`.
    ///
    /// On success the enriched message has been delivered to every live
    /// connection of both the sender and the recipient. Nothing is delivered
    /// on error; reporting the error to the sender is the caller's job.
    pub async fn send(
        &self,
        sender: Option<&Identity>,
        params: &SendMessageParams,
    ) -> Result<MessageView, RelayError> {
        let sender = sender.ok_or(RelayError::Unauthenticated)?;
        let recipient_id = params.recipient_id().ok_or(RelayError::MissingRecipient)?;
        let content = params
            .content
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(RelayError::EmptyContent)?;

        let view = self
            .persist(&sender.user_id, recipient_id, content)
            .await
            .map_err(|e| {
                warn!(
                    sender_id = %sender.user_id,
                    recipient_id,
                    error = %e,
                    "failed to persist message"
                );
                RelayError::Persistence(e)
            })?;

        let delivered = self.deliver(&view).await;
        debug!(
            message_id = %view.id,
            sender = %sender.username,
            recipient_id,
            delivered,
            "message relayed"
        );
        Ok(view)
    }

    async fn persist(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
    ) -> anyhow::Result<MessageView> {
        let stored = timeout(
            self.storage_timeout,
            self.store.create(sender_id, recipient_id, content),
        )
        .await
        .map_err(|_| anyhow::anyhow!("create timed out after {:?}", self.storage_timeout))??;

        timeout(self.storage_timeout, self.store.enrich(&stored.id))
            .await
            .map_err(|_| anyhow::anyhow!("enrich timed out after {:?}", self.storage_timeout))??
            .ok_or_else(|| anyhow::anyhow!("message {} vanished before enrich", stored.id))
    }

    /// Conversation between two users, oldest first, bounded by the storage
    /// timeout.
    pub async fn history(&self, user_a: &str, user_b: &str) -> anyhow::Result<Vec<MessageView>> {
        timeout(self.storage_timeout, self.store.history(user_a, user_b))
            .await
            .map_err(|_| anyhow::anyhow!("history timed out after {:?}", self.storage_timeout))?
    }

    /// Send `newMessage` to the union of both parties' connections, once per
    /// connection.
    async fn deliver(&self, view: &MessageView) -> usize {
        let mut targets = self.router.resolve(&view.sender.id).await;
        if view.recipient.id != view.sender.id {
            targets.extend(self.router.resolve(&view.recipient.id).await);
        }
        let mut seen = HashSet::new();
        let targets: Vec<&ConnectionHandle> = targets
            .iter()
            .filter(|h| seen.insert(h.conn_id.as_str()))
            .collect();
        send_to_all(targets, &ServerEvent::NewMessage(view.clone()))
    }
}
