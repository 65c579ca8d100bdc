use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wisp_core::{KEY_PARAM, LEVEL_PARAM};
use wisp_crypto::{accept, parse_level, AcceptError, Accepted, Codec};

use crate::responder::respond;
use crate::AppState;

const WS_OUTBOX_CAPACITY: usize = 128;
pub const WS_MAX_TEXT_BYTES: usize = 64 * 1024;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let accepted = parse_level(params.get(LEVEL_PARAM).map(String::as_str)).and_then(|level| {
        accept(
            level,
            params.get(KEY_PARAM).map(String::as_str),
            &state.psk,
            state.framing,
        )
    });
    let accepted = match accepted {
        Ok(accepted) => accepted,
        Err(e) => return reject(addr, e),
    };

    ws.max_message_size(WS_MAX_TEXT_BYTES)
        .max_frame_size(WS_MAX_TEXT_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, accepted, addr))
        .into_response()
}

fn reject(addr: SocketAddr, err: AcceptError) -> Response {
    warn!("rejecting handshake from {}: {}", addr, err);
    (StatusCode::BAD_REQUEST, err.to_string()).into_response()
}

async fn handle_socket(stream: WebSocket, accepted: Accepted, addr: SocketAddr) {
    let Accepted {
        mut codec,
        bootstrap,
    } = accepted;
    info!(level = %codec.level(), "client connected from {}", addr);

    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(WS_OUTBOX_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // The bootstrap is the only plaintext frame and must go first.
    if let Some(bootstrap) = bootstrap {
        match bootstrap.encode() {
            Ok(text) => {
                if tx.send(WsMessage::Text(text)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("failed to encode bootstrap for {}: {}", addr, e);
                return;
            }
        }
    }

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        if let Some(reply) = handle_frame(&mut codec, &text, addr) {
            if tx.send(WsMessage::Text(reply)).await.is_err() {
                break;
            }
        }
    }

    drop(tx);
    let _ = writer.await;
    info!("client {} disconnected", addr);
}

/// Decode one inbound frame and encode the reply, if any.
fn handle_frame(codec: &mut Codec, frame: &str, addr: SocketAddr) -> Option<String> {
    let message = match codec.decode(frame) {
        Ok(message) => message,
        Err(e) => {
            warn!(kind = ?e.kind(), "dropping frame from {}: {}", addr, e);
            return None;
        }
    };
    debug!(id = message.id(), name = message.name(), "frame from {}", addr);

    let reply = respond(&message)?;
    match codec.encode(&reply) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(id = reply.id(), "failed to encode reply: {}", e);
            None
        }
    }
}
