use std::collections::HashMap;

use {
    async_trait::async_trait,
    chrono::Utc,
    murmur_protocol::{Identity, MessageView, Participant},
    tokio::sync::RwLock,
};

use crate::store::{MessageStore, StoredMessage, new_message_id};

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryMessageStore {
    users: RwLock<HashMap<String, String>>,
    /// Insertion order doubles as creation order.
    messages: RwLock<Vec<StoredMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    fn view(users: &HashMap<String, String>, m: &StoredMessage) -> MessageView {
        MessageView {
            id: m.id.clone(),
            sender: Participant {
                id: m.sender_id.clone(),
                username: users.get(&m.sender_id).cloned(),
            },
            recipient: Participant {
                id: m.recipient_id.clone(),
                username: users.get(&m.recipient_id).cloned(),
            },
            content: m.content.clone(),
            created_at: m.created_at,
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn remember_user(&self, identity: &Identity) -> anyhow::Result<()> {
        self.users
            .write()
            .await
            .insert(identity.user_id.clone(), identity.username.clone());
        Ok(())
    }

    async fn create(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
    ) -> anyhow::Result<StoredMessage> {
        let msg = StoredMessage {
            id: new_message_id(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.messages.write().await.push(msg.clone());
        Ok(msg)
    }

    async fn enrich(&self, message_id: &str) -> anyhow::Result<Option<MessageView>> {
        let users = self.users.read().await;
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| Self::view(&users, m)))
    }

    async fn history(&self, user_a: &str, user_b: &str) -> anyhow::Result<Vec<MessageView>> {
        let users = self.users.read().await;
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| {
                (m.sender_id == user_a && m.recipient_id == user_b)
                    || (m.sender_id == user_b && m.recipient_id == user_a)
            })
            .map(|m| Self::view(&users, m))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_is_pairwise_and_chronological() {
        let store = InMemoryMessageStore::new();
        store
            .remember_user(&Identity::new("a", "alice"))
            .await
            .unwrap();
        store.create("a", "b", "first").await.unwrap();
        store.create("c", "a", "unrelated").await.unwrap();
        store.create("b", "a", "second").await.unwrap();

        let history = store.history("a", "b").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "first");
        assert_eq!(history[0].sender.username.as_deref(), Some("alice"));
        assert_eq!(history[1].content, "second");
        assert_eq!(history[1].sender.username, None);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn enrich_finds_created_message() {
        let store = InMemoryMessageStore::new();
        let msg = store.create("a", "b", "x").await.unwrap();
        let view = store.enrich(&msg.id).await.unwrap().unwrap();
        assert_eq!(view.created_at, msg.created_at);
        assert!(store.enrich("missing").await.unwrap().is_none());
    }
}
