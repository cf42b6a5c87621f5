use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;

use {
    murmur_config::MurmurConfig,
    murmur_messages::MessageStore,
    murmur_protocol::{Identity, ServerEvent},
    tracing::warn,
};

use crate::{
    auth::{Gatekeeper, SessionVerifier},
    presence::PresenceRegistry,
    relay::MessageRelay,
    router::ChannelRouter,
    typing::TypingRelay,
};

// ── Connection handle ────────────────────────────────────────────────────────

/// An authenticated WebSocket connection as seen by the presence registry.
///
/// Cloning is cheap; all clones feed the same write loop.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: String,
    pub identity: Identity,
    /// Channel for sending serialized frames to this connection's write loop.
    sender: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn new(
        conn_id: impl Into<String>,
        identity: Identity,
        sender: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            conn_id: conn_id.into(),
            identity,
            sender,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    /// Send a serialized JSON frame. Returns false once the write loop is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

/// Serialize `event` once and send it to every handle in `targets`.
/// Returns the number of connections that accepted the frame.
pub fn send_to_all<'a>(
    targets: impl IntoIterator<Item = &'a ConnectionHandle>,
    event: &ServerEvent,
) -> usize {
    let frame = match event.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to encode event");
            return 0;
        },
    };
    targets.into_iter().filter(|h| h.send(&frame)).count()
}

// ── Connection policy ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionPolicy {
    /// Close sockets whose credential fails verification.
    pub close_unauthenticated: bool,
    /// Clear open typing indicators when the typing connection goes away.
    pub clear_typing_on_disconnect: bool,
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// Server version string.
    pub version: String,
    pub presence: Arc<PresenceRegistry>,
    pub gatekeeper: Gatekeeper,
    pub messages: MessageRelay,
    pub typing: TypingRelay,
    pub policy: ConnectionPolicy,
}

impl GatewayState {
    pub fn new(
        config: &MurmurConfig,
        verifier: Arc<dyn SessionVerifier>,
        store: Arc<dyn MessageStore>,
    ) -> Arc<Self> {
        let presence = Arc::new(PresenceRegistry::new(
            Duration::from_millis(config.presence.debounce_ms),
            config.presence.dedupe_by_user,
        ));
        let router: Arc<dyn ChannelRouter> = presence.clone();

        let gatekeeper = Gatekeeper::new(
            verifier,
            Arc::clone(&store),
            config.auth.cookie_name.clone(),
            Duration::from_millis(config.auth.verify_timeout_ms),
            Duration::from_millis(config.storage.timeout_ms),
        );
        let messages = MessageRelay::new(
            store,
            Arc::clone(&router),
            Duration::from_millis(config.storage.timeout_ms),
        );
        let typing = TypingRelay::new(router);

        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            presence,
            gatekeeper,
            messages,
            typing,
            policy: ConnectionPolicy {
                close_unauthenticated: config.auth.close_unauthenticated,
                clear_typing_on_disconnect: config.typing.clear_on_disconnect,
            },
        })
    }

    /// Generate a fresh connection id.
    pub fn next_conn_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
