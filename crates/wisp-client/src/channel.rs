//! Duplex channel seam.
//!
//! A [`Connector`] opens one message-oriented connection per dial and
//! reports its lifecycle through an [`EventSink`]. Opening never blocks: the
//! connection starts in [`ReadyState::Connecting`] and announces
//! [`ChannelEvent::Opened`] later, the way a browser WebSocket does.

use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

/// Connection state as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    /// Closing or closed: the connection will never carry traffic again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReadyState::Closing | ReadyState::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Frame(String),
    Closed { reason: Option<String> },
    Errored(String),
}

/// A channel event tagged with the dial that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNotice {
    pub generation: u64,
    pub event: ChannelEvent,
}

/// Delivery path from one connection back to its session.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<ChannelNotice>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<ChannelNotice>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns `false` once the session is gone.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        self.tx
            .send(ChannelNotice {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("failed to open channel: {0}")]
    Open(String),

    #[error("channel not open ({0:?})")]
    NotOpen(ReadyState),

    #[error("channel task stopped")]
    Stopped,
}

impl From<ChannelError> for wisp_common::Error {
    fn from(err: ChannelError) -> Self {
        wisp_common::Error::transport(err)
    }
}

/// One physical connection.
pub trait Connection: Send {
    /// Queue a text frame for writing.
    fn send(&mut self, frame: String) -> Result<(), ChannelError>;

    fn ready_state(&self) -> ReadyState;

    /// Begin closing. Idempotent.
    fn close(&mut self);
}

/// Factory for connections, one per dial.
pub trait Connector: Send {
    fn open(&mut self, uri: &Url, sink: EventSink) -> Result<Box<dyn Connection>, ChannelError>;
}
