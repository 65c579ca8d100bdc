//! WebSocket channel over tokio-tungstenite.
//!
//! Each connection runs in its own task. The session talks to it through an
//! outbox and reads its state from a shared atomic, so `send` and `close`
//! never await.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;

use crate::channel::{
    ChannelError, ChannelEvent, Connection, Connector, EventSink, ReadyState,
};

/// Opens real WebSocket connections. Requires a running tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn open(&mut self, uri: &Url, sink: EventSink) -> Result<Box<dyn Connection>, ChannelError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChannelError::Open(e.to_string()))?;

        let state = Arc::new(SharedState::new(ReadyState::Connecting));
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        runtime.spawn(drive(uri.clone(), sink, state.clone(), outbox_rx));

        Ok(Box::new(WebSocketConnection {
            outbox: outbox_tx,
            state,
        }))
    }
}

enum Outgoing {
    Frame(String),
    Close,
}

struct SharedState(AtomicU8);

impl SharedState {
    fn new(state: ReadyState) -> Self {
        Self(AtomicU8::new(encode_state(state)))
    }

    fn load(&self) -> ReadyState {
        decode_state(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: ReadyState) {
        self.0.store(encode_state(state), Ordering::Release);
    }
}

fn encode_state(state: ReadyState) -> u8 {
    match state {
        ReadyState::Connecting => 0,
        ReadyState::Open => 1,
        ReadyState::Closing => 2,
        ReadyState::Closed => 3,
    }
}

fn decode_state(value: u8) -> ReadyState {
    match value {
        0 => ReadyState::Connecting,
        1 => ReadyState::Open,
        2 => ReadyState::Closing,
        _ => ReadyState::Closed,
    }
}

struct WebSocketConnection {
    outbox: mpsc::UnboundedSender<Outgoing>,
    state: Arc<SharedState>,
}

impl Connection for WebSocketConnection {
    fn send(&mut self, frame: String) -> Result<(), ChannelError> {
        let state = self.state.load();
        if state != ReadyState::Open {
            return Err(ChannelError::NotOpen(state));
        }
        self.outbox
            .send(Outgoing::Frame(frame))
            .map_err(|_| ChannelError::Stopped)
    }

    fn ready_state(&self) -> ReadyState {
        self.state.load()
    }

    fn close(&mut self) {
        if self.state.load().is_terminal() {
            return;
        }
        self.state.store(ReadyState::Closing);
        let _ = self.outbox.send(Outgoing::Close);
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn drive(
    uri: Url,
    sink: EventSink,
    state: Arc<SharedState>,
    mut outbox: mpsc::UnboundedReceiver<Outgoing>,
) {
    let generation = sink.generation();
    let ws = match connect_async(uri.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!(generation, "websocket connect failed: {}", e);
            state.store(ReadyState::Closed);
            sink.emit(ChannelEvent::Errored(e.to_string()));
            sink.emit(ChannelEvent::Closed { reason: None });
            return;
        }
    };

    // close() may have been called while the handshake was in flight.
    if state.load().is_terminal() {
        state.store(ReadyState::Closed);
        sink.emit(ChannelEvent::Closed { reason: None });
        return;
    }

    state.store(ReadyState::Open);
    sink.emit(ChannelEvent::Opened);
    debug!(generation, "websocket open");

    let (mut write, mut read) = ws.split();
    let reason = loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    sink.emit(ChannelEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    break frame.map(|f| f.reason.as_str().to_owned());
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    debug!(generation, len = data.len(), "dropping binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    state.store(ReadyState::Closed);
                    sink.emit(ChannelEvent::Errored(e.to_string()));
                    sink.emit(ChannelEvent::Closed { reason: None });
                    return;
                }
                None => break None,
            },
            outgoing = outbox.recv() => match outgoing {
                Some(Outgoing::Frame(text)) => {
                    if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                        state.store(ReadyState::Closed);
                        sink.emit(ChannelEvent::Errored(e.to_string()));
                        sink.emit(ChannelEvent::Closed { reason: None });
                        return;
                    }
                }
                Some(Outgoing::Close) | None => {
                    state.store(ReadyState::Closing);
                    let _ = write.send(WsMessage::Close(None)).await;
                    break None;
                }
            },
        }
    };

    state.store(ReadyState::Closed);
    sink.emit(ChannelEvent::Closed { reason });
    debug!(generation, "websocket closed");
}
