//! Wisp client.
//!
//! This crate provides:
//! - The duplex channel seam and a tokio-tungstenite implementation
//! - Connection negotiation: dial URI and per-dial codec
//! - Deferred, panic-isolated dispatch of messages by id
//! - The reconnecting session and its control handle
//!
//! # Example
//!
//! ```no_run
//! use wisp_client::{Session, SessionConfig, WebSocketConnector};
//! use wisp_core::events::CONNECT_SUCCESS;
//!
//! # async fn run() -> wisp_common::Result<()> {
//! let config = SessionConfig::new("ws://127.0.0.1:9000/ws", 0);
//! let (mut session, handle) = Session::new(config, WebSocketConnector)?;
//! session.on(CONNECT_SUCCESS, |_| println!("connected"));
//! tokio::spawn(session.run());
//! # handle.shutdown();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod negotiator;
pub mod session;
pub mod websocket;

pub use channel::{
    ChannelError, ChannelEvent, ChannelNotice, Connection, Connector, EventSink, ReadyState,
};
pub use config::SessionConfig;
pub use dispatch::Dispatcher;
pub use negotiator::{build_target, ConnectionTarget, NegotiateError};
pub use session::{Session, SessionCore, SessionHandle, SessionState, WeakSessionHandle};
pub use websocket::WebSocketConnector;
