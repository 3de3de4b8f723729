//! Network collaborators for the conversation core.
//!
//! [`RestClient`] speaks the backend's JSON API with bearer tokens from a
//! [`huddle_platform::TokenVault`]; [`WsTransport`] opens the per-conversation
//! WebSocket. Both plug into [`huddle_core::SessionManager`].

mod error;
/// REST client and directory helpers.
pub mod rest;
/// WebSocket realtime transport.
pub mod ws;

use std::sync::Arc;

use huddle_core::SessionManager;

pub use rest::RestClient;
pub use ws::WsTransport;

/// Session manager wired to the REST client and WebSocket transport.
pub fn session_manager(client: &RestClient, transport: WsTransport) -> SessionManager {
    SessionManager::new(
        Arc::new(client.clone()),
        Arc::new(transport),
        client.endpoints().clone(),
    )
}
