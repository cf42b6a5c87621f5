//! Wire protocol shared by the gateway and its clients.
//!
//! Every WebSocket text frame, in both directions, is a JSON object of the
//! form `{"event": "<name>", "data": <payload>}`.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

pub const PROTOCOL_VERSION: u32 = 1;

/// Error string sent to the sender when persisting a message fails.
pub const SEND_FAILED: &str = "Failed to send message";

/// Event names used on the wire.
pub mod events {
    pub const SEND_MESSAGE: &str = "sendMessage";
    pub const TYPING: &str = "typing";
    pub const TYPING_ENDED: &str = "typingEnded";

    pub const ONLINE_USERS: &str = "onlineUsers";
    pub const NEW_MESSAGE: &str = "newMessage";
    pub const TYPING_EVENT: &str = "typingEvent";
    pub const TYPING_ENDED_EVENT: &str = "typingEndedEvent";
    pub const MESSAGE_ERROR: &str = "messageError";
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ── Identities ───────────────────────────────────────────────────────────────

/// A verified user identity, attached to a connection at handshake time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

/// One row of the `onlineUsers` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub username: String,
}

impl From<&Identity> for PresenceEntry {
    fn from(identity: &Identity) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
        }
    }
}

/// A user referenced by a client event. Only `userId` is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

// ── Client → server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    /// Older clients address the recipient as a `{userId, username}` object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Peer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl SendMessageParams {
    pub fn new(recipient_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            recipient_id: Some(recipient_id.into()),
            recipient: None,
            content: Some(content.into()),
        }
    }

    /// The addressed recipient, ignoring blank ids.
    pub fn recipient_id(&self) -> Option<&str> {
        self.recipient_id
            .as_deref()
            .or_else(|| self.recipient.as_ref().map(|p| p.user_id.as_str()))
            .filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingParams {
    pub recipient: Peer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    SendMessage(SendMessageParams),
    Typing(TypingParams),
    TypingEnded(TypingParams),
}

impl ClientEvent {
    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => events::SEND_MESSAGE,
            Self::Typing(_) => events::TYPING,
            Self::TypingEnded(_) => events::TYPING_ENDED,
        }
    }
}

// ── Server → client ──────────────────────────────────────────────────────────

/// A message participant with its display name, when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub username: Option<String>,
}

/// A persisted message enriched with both participants' display names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub sender: Participant,
    pub recipient: Participant,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageErrorPayload {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    OnlineUsers(Vec<PresenceEntry>),
    NewMessage(MessageView),
    /// Carries the typing user's id.
    TypingEvent(String),
    TypingEndedEvent(String),
    MessageError(MessageErrorPayload),
}

impl ServerEvent {
    pub fn message_error(error: impl Into<String>) -> Self {
        Self::MessageError(MessageErrorPayload {
            error: error.into(),
        })
    }

    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::OnlineUsers(_) => events::ONLINE_USERS,
            Self::NewMessage(_) => events::NEW_MESSAGE,
            Self::TypingEvent(_) => events::TYPING_EVENT,
            Self::TypingEndedEvent(_) => events::TYPING_ENDED_EVENT,
            Self::MessageError(_) => events::MESSAGE_ERROR,
        }
    }
}
