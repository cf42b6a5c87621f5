//! Typing indicators: stateless forwarding to the recipient's connections.

use std::sync::Arc;

use {
    murmur_protocol::{Identity, ServerEvent},
    tracing::debug,
};

use crate::{router::ChannelRouter, state::send_to_all};

/// Forwards typing signals. Keeps no state of its own.
pub struct TypingRelay {
    router: Arc<dyn ChannelRouter>,
}

impl TypingRelay {
    pub fn new(router: Arc<dyn ChannelRouter>) -> Self {
        Self { router }
    }

    /// Tell `to_user_id`'s connections that `from` started typing.
    pub async fn typing(&self, from: &Identity, to_user_id: &str) -> usize {
        let delivered = self
            .forward(to_user_id, ServerEvent::TypingEvent(from.user_id.clone()))
            .await;
        debug!(from = %from.username, to_user_id, delivered, "typing");
        delivered
    }

    /// Tell `to_user_id`'s connections that `from` stopped typing.
    pub async fn typing_ended(&self, from: &Identity, to_user_id: &str) -> usize {
        let delivered = self
            .forward(to_user_id, ServerEvent::TypingEndedEvent(from.user_id.clone()))
            .await;
        debug!(from = %from.username, to_user_id, delivered, "typing ended");
        delivered
    }

    async fn forward(&self, to_user_id: &str, event: ServerEvent) -> usize {
        let targets = self.router.resolve(to_user_id).await;
        send_to_all(&targets, &event)
    }
}
