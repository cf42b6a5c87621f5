//! Per-connection WebSocket loop: admission, event dispatch, teardown.

use std::{collections::BTreeSet, net::SocketAddr, sync::Arc, time::Instant};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, StreamExt},
    murmur_protocol::{ClientEvent, Identity, ServerEvent},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::state::{ConnectionHandle, GatewayState};

/// Connection-local state. Lives exactly as long as the socket.
pub(crate) struct Connection {
    pub conn_id: String,
    /// Set once at admission, never changed afterwards.
    pub identity: Option<Identity>,
    outbound: mpsc::UnboundedSender<String>,
    /// Recipients this connection has an open typing signal towards.
    typing_towards: BTreeSet<String>,
    connected_at: Instant,
}

impl Connection {
    pub(crate) fn new(
        conn_id: String,
        identity: Option<Identity>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            conn_id,
            identity,
            outbound,
            typing_towards: BTreeSet::new(),
            connected_at: Instant::now(),
        }
    }

    fn handle(&self) -> Option<ConnectionHandle> {
        self.identity.as_ref().map(|identity| {
            ConnectionHandle::new(self.conn_id.clone(), identity.clone(), self.outbound.clone())
        })
    }

    /// Send an event to this connection only.
    fn emit(&self, event: &ServerEvent) {
        match event.to_frame() {
            Ok(frame) => {
                let _ = self.outbound.send(frame);
            },
            Err(e) => warn!(conn_id = %self.conn_id, error = %e, "failed to encode event"),
        }
    }
}

/// Drive one WebSocket connection from upgrade to close.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    credential: Option<String>,
    remote_addr: SocketAddr,
) {
    let conn_id = state.next_conn_id();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Write loop: forwards frames until every sender is gone.
    let write_conn_id = conn_id.clone();
    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "write failed, stopping writer");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let identity = match state.gatekeeper.admit(credential.as_deref()).await {
        Ok(identity) => Some(identity),
        Err(e) => {
            warn!(conn_id = %conn_id, remote = %remote_addr, error = %e, "socket verification failed");
            if state.policy.close_unauthenticated {
                drop(tx);
                let _ = write_task.await;
                return;
            }
            None
        },
    };

    let mut conn = Connection::new(conn_id.clone(), identity, tx);
    match conn.handle() {
        Some(handle) => {
            info!(conn_id = %conn_id, remote = %remote_addr, username = %handle.identity.username, "connected");
            state.presence.join(handle).await;
        },
        None => info!(conn_id = %conn_id, remote = %remote_addr, "connected without identity"),
    }

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match ClientEvent::from_frame(text.as_str()) {
                Ok(event) => dispatch(&state, &mut conn, event).await,
                Err(e) => debug!(conn_id = %conn_id, error = %e, "ignoring undecodable frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {},
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "socket read error");
                break;
            },
        }
    }

    disconnect(&state, &mut conn).await;
    info!(
        conn_id = %conn_id,
        username = conn.identity.as_ref().map(|i| i.username.as_str()).unwrap_or("-"),
        connected_secs = conn.connected_at.elapsed().as_secs(),
        "has disconnected"
    );
    drop(conn);
    write_task.abort();
}

/// Handle one decoded client event to completion.
pub(crate) async fn dispatch(state: &GatewayState, conn: &mut Connection, event: ClientEvent) {
    debug!(conn_id = %conn.conn_id, event = event.name(), "dispatching event");
    match event {
        ClientEvent::SendMessage(params) => {
            if let Err(e) = state.messages.send(conn.identity.as_ref(), &params).await {
                debug!(conn_id = %conn.conn_id, error = %e, "send rejected");
                conn.emit(&ServerEvent::message_error(e.to_string()));
            }
        },
        ClientEvent::Typing(params) => {
            let Some(identity) = conn.identity.as_ref() else {
                return;
            };
            let to = params.recipient.user_id;
            state.typing.typing(identity, &to).await;
            if state.policy.clear_typing_on_disconnect {
                conn.typing_towards.insert(to);
            }
        },
        ClientEvent::TypingEnded(params) => {
            let Some(identity) = conn.identity.as_ref() else {
                return;
            };
            let to = params.recipient.user_id;
            state.typing.typing_ended(identity, &to).await;
            conn.typing_towards.remove(&to);
        },
    }
}

/// Tear down connection state: clear open typing signals (if enabled) and
/// leave the presence registry, which schedules the debounced broadcast.
pub(crate) async fn disconnect(state: &GatewayState, conn: &mut Connection) {
    if let Some(identity) = conn.identity.as_ref() {
        for to in std::mem::take(&mut conn.typing_towards) {
            state.typing.typing_ended(identity, &to).await;
        }
    }
    let _ = state.presence.leave(&conn.conn_id).await;
}
