use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{ConnectInfo, Path, State, WebSocketUpgrade, rejection::JsonRejection},
        http::{HeaderMap, HeaderValue, Method, StatusCode, header::CONTENT_TYPE},
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    murmur_config::{MurmurConfig, StorageBackend},
    murmur_messages::{InMemoryMessageStore, MessageStore, SqliteMessageStore},
    murmur_protocol::{Identity, SendMessageParams},
    serde_json::json,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use crate::{
    auth::{JwtSessionVerifier, VerifyError},
    relay::RelayError,
    state::GatewayState,
    ws::handle_connection,
};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
///
/// With a `client_url` only that origin may call the API, with credentials.
/// Without one any origin is allowed, without credentials.
pub fn build_gateway_app(state: Arc<GatewayState>, client_url: Option<&str>) -> Router {
    let cors = match client_url.map(HeaderValue::from_str) {
        Some(Ok(origin)) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([CONTENT_TYPE])
            .allow_credentials(true),
        Some(Err(e)) => {
            warn!(error = %e, "ignoring unparseable client url for CORS");
            permissive_cors()
        },
        None => permissive_cors(),
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .route("/messages/send", post(send_message_handler))
        .route("/messages/{other_user_id}", get(history_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn permissive_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Open the configured message store.
pub async fn open_store(config: &MurmurConfig) -> anyhow::Result<Arc<dyn MessageStore>> {
    Ok(match config.storage.backend {
        StorageBackend::Sqlite => {
            Arc::new(SqliteMessageStore::connect(&config.storage.database_url).await?)
        },
        StorageBackend::Memory => Arc::new(InMemoryMessageStore::new()),
    })
}

/// Start the gateway HTTP + WebSocket server.
pub async fn start_gateway(config: MurmurConfig) -> anyhow::Result<()> {
    let Some(secret) = config.auth.jwt_secret.as_ref() else {
        anyhow::bail!("no JWT secret configured (set MURMUR_JWT_SECRET or auth.jwt_secret)");
    };
    let verifier = Arc::new(JwtSessionVerifier::new(secret));
    let store = open_store(&config).await?;

    let state = GatewayState::new(&config, verifier, store);
    let app = build_gateway_app(Arc::clone(&state), config.server.client_url.as_deref());

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("murmur gateway v{}", state.version),
        format!(
            "protocol v{}, listening on {}",
            murmur_protocol::PROTOCOL_VERSION,
            addr
        ),
        format!(
            "storage: {:?}, presence debounce {}ms",
            config.storage.backend, config.presence.debounce_ms
        ),
        format!(
            "cors: {}",
            config.server.client_url.as_deref().unwrap_or("any origin")
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    // Run the server with ConnectInfo for remote IP extraction.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": state.version,
        "protocol": murmur_protocol::PROTOCOL_VERSION,
        "connections": state.presence.connection_count().await,
        "online": state.presence.online_user_count().await,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let credential = state.gatekeeper.credential(&headers);
    ws.on_upgrade(move |socket| handle_connection(socket, state, credential, addr))
}

fn error_response(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}

/// Verify the request's session cookie.
async fn authenticate(state: &GatewayState, headers: &HeaderMap) -> Result<Identity, Response> {
    let credential = state.gatekeeper.credential(headers);
    state
        .gatekeeper
        .verify(credential.as_deref())
        .await
        .map_err(|e| match e {
            VerifyError::MissingCredential => {
                error_response(StatusCode::UNAUTHORIZED, "Authentication required")
            },
            VerifyError::Invalid(_) | VerifyError::Timeout => {
                warn!(error = %e, "rejected HTTP session");
                error_response(StatusCode::UNAUTHORIZED, "Invalid token")
            },
        })
}

async fn history_handler(
    Path(other_user_id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let identity = match authenticate(&state, &headers).await {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    match state.messages.history(&identity.user_id, &other_user_id).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => {
            warn!(user_id = %identity.user_id, other_user_id = %other_user_id, error = %e, "history lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve messages")
        },
    }
}

async fn send_message_handler(
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<SendMessageParams>, JsonRejection>,
) -> Response {
    let identity = match authenticate(&state, &headers).await {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    let params = body.map(|Json(p)| p).unwrap_or_default();
    match state.messages.send(Some(&identity), &params).await {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(e) if e.is_validation() => error_response(
            StatusCode::BAD_REQUEST,
            "Recipient ID and content are required",
        ),
        Err(e @ RelayError::Persistence(_)) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        },
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_opens_without_io() {
        let mut config = MurmurConfig::default();
        config.storage.backend = StorageBackend::Memory;
        let store = open_store(&config).await.unwrap();
        assert!(store.history("u1", "u2").await.unwrap().is_empty());
    }
}
