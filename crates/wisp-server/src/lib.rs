//! Wisp reference server.
//!
//! Serves the WebSocket endpoint at `/ws`. The upgrade request carries the
//! protocol level (`l`) and, for the encrypted levels, the sealed ephemeral
//! key (`k`); a request whose handshake cannot be accepted gets HTTP 400.
//! After the upgrade every inbound frame is decoded with the connection's
//! codec and answered by [`responder::respond`].

#![forbid(unsafe_code)]

pub mod responder;
pub mod socket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;
use wisp_core::Framing;
use wisp_crypto::PreSharedSecret;

pub use responder::respond;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub psk: PreSharedSecret,
    pub framing: Framing,
}

#[derive(Clone)]
pub struct AppState {
    psk: Arc<PreSharedSecret>,
    framing: Framing,
}

impl AppState {
    pub fn new(psk: PreSharedSecret, framing: Framing) -> Self {
        Self {
            psk: Arc::new(psk),
            framing,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(socket::ws_handler))
        .with_state(state)
}

/// Bind `config.listen` and serve until the process exits.
pub async fn serve(config: ServerConfig) -> wisp_common::Result<()> {
    let listener = TcpListener::bind(config.listen).await?;
    serve_listener(listener, AppState::new(config.psk, config.framing)).await
}

/// Serve on an already bound listener.
pub async fn serve_listener(listener: TcpListener, state: AppState) -> wisp_common::Result<()> {
    info!("wisp server listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
