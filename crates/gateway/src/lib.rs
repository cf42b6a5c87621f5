//! Gateway: WebSocket/HTTP server for presence, direct messages and typing.
//!
//! Lifecycle:
//! 1. Load + validate config
//! 2. Open the message store, build the session verifier
//! 3. Start HTTP server (health, message history, send)
//! 4. Attach WebSocket upgrade handler
//!
//! Message persistence lives in `murmur-messages`; wire types in
//! `murmur-protocol`.

pub mod auth;
pub mod presence;
pub mod relay;
pub mod router;
pub mod server;
pub mod state;
pub mod typing;
pub mod ws;

pub use {
    auth::{Gatekeeper, JwtSessionVerifier, SessionVerifier, VerifyError},
    server::{build_gateway_app, open_store, start_gateway},
    state::GatewayState,
};
