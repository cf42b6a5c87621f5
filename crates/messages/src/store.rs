/// Storage abstraction for direct messages and the display names used to
/// enrich them.
use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    murmur_protocol::{Identity, MessageView},
};

/// A message as persisted, before display names are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Record (or refresh) the display name of a verified identity.
    async fn remember_user(&self, identity: &Identity) -> anyhow::Result<()>;

    /// Persist a new message. The store assigns id and creation time.
    async fn create(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
    ) -> anyhow::Result<StoredMessage>;

    /// Load a message with both participants' display names attached.
    async fn enrich(&self, message_id: &str) -> anyhow::Result<Option<MessageView>>;

    /// All messages exchanged between two users, oldest first.
    async fn history(&self, user_a: &str, user_b: &str) -> anyhow::Result<Vec<MessageView>>;
}

pub(crate) fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
