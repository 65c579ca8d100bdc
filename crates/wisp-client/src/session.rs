//! Reconnecting transport session.
//!
//! # State Machine
//!
//! ```text
//! Idle ──dial──▶ Dialing ──opened──▶ Open
//!                   │                  │
//!                   └──closed/errored──┴──▶ Closed ──tick──▶ Dialing
//! ```
//!
//! [`SessionCore`] holds the state machine and is driven synchronously:
//! every entry point finishes its state change before any handler runs,
//! because handlers only run from [`SessionCore::drain`]. [`Session`] is the
//! task that owns a core and multiplexes channel notices, the retry ticker
//! and commands from [`SessionHandle`]s.
//!
//! Handlers are owned by the session, so a handler that needs to talk back
//! captures a [`WeakSessionHandle`]. Only strong handles keep the task alive.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use wisp_common::Result;
use wisp_core::events::{self, CLOSE, CONNECT_SUCCESS, ERROR, TICK};
use wisp_core::{Message, Payload};
use wisp_crypto::Codec;

use crate::channel::{ChannelEvent, ChannelNotice, Connection, Connector, EventSink};
use crate::config::SessionConfig;
use crate::dispatch::Dispatcher;
use crate::negotiator::{build_target, NegotiateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Dialing,
    Open,
    Closed,
}

/// The connection of one dial and the codec that speaks on it. The codec
/// is discarded as soon as the connection reports it is gone.
struct Link {
    generation: u64,
    connection: Box<dyn Connection>,
    codec: Option<Codec>,
}

pub struct SessionCore<C: Connector> {
    config: SessionConfig,
    connector: C,
    dispatcher: Dispatcher,
    state: SessionState,
    link: Option<Link>,
    generation: u64,
    notices: mpsc::UnboundedSender<ChannelNotice>,
}

impl<C: Connector> SessionCore<C> {
    /// Create an idle core. Configuration errors surface here, before any
    /// network activity.
    pub fn new(
        config: SessionConfig,
        connector: C,
        notices: mpsc::UnboundedSender<ChannelNotice>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            dispatcher: Dispatcher::new(),
            state: SessionState::Idle,
            link: None,
            generation: 0,
            notices,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of dials so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Codec of the current link, if it is still connected.
    pub fn codec(&self) -> Option<&Codec> {
        self.link.as_ref().and_then(|link| link.codec.as_ref())
    }

    pub fn retry_interval(&self) -> Duration {
        self.config.retry_interval
    }

    pub fn on<F>(&mut self, id: u16, handler: F)
    where
        F: FnMut(&Message) + Send + 'static,
    {
        self.dispatcher.on(id, handler);
    }

    /// Run handlers for everything dispatched so far.
    pub fn drain(&mut self) -> usize {
        self.dispatcher.drain()
    }

    /// Negotiate and open a new connection, replacing any current one.
    pub fn dial(&mut self) -> std::result::Result<(), NegotiateError> {
        let target = build_target(
            &self.config.url,
            self.config.level,
            self.config.psk.as_ref(),
            self.config.framing,
        )?;

        if let Some(mut old) = self.link.take() {
            old.connection.close();
        }

        self.generation += 1;
        let generation = self.generation;
        self.state = SessionState::Dialing;
        info!(generation, level = %target.codec.level(), "dialing {}", self.config.url);

        let sink = EventSink::new(generation, self.notices.clone());
        match self.connector.open(&target.uri, sink) {
            Ok(connection) => {
                self.link = Some(Link {
                    generation,
                    connection,
                    codec: Some(target.codec),
                });
            }
            Err(e) => {
                warn!(generation, "open failed: {}", e);
                self.state = SessionState::Closed;
                self.dispatch_event(ERROR, reason_payload(Some(e.to_string())));
            }
        }
        Ok(())
    }

    /// Apply one channel notice. Notices from replaced links are ignored.
    pub fn handle_notice(&mut self, notice: ChannelNotice) {
        let Some(link) = self.link.as_mut() else {
            debug!(generation = notice.generation, "notice without link");
            return;
        };
        if link.generation != notice.generation {
            debug!(
                generation = notice.generation,
                current = link.generation,
                "stale notice"
            );
            return;
        }

        match notice.event {
            ChannelEvent::Opened => {
                info!(generation = notice.generation, "connected");
                self.state = SessionState::Open;
                self.dispatch_event(CONNECT_SUCCESS, Payload::new());
            }
            ChannelEvent::Frame(frame) => {
                let Some(codec) = link.codec.as_mut() else {
                    debug!(generation = notice.generation, "dropping frame after disconnect");
                    return;
                };
                match codec.decode(&frame) {
                    Ok(message) => {
                        debug!(id = message.id(), name = message.name(), "frame received");
                        self.dispatcher.dispatch(message);
                    }
                    Err(e) => {
                        warn!(kind = ?e.kind(), "dropping frame: {}", e);
                    }
                }
            }
            ChannelEvent::Closed { reason } => {
                info!(generation = notice.generation, ?reason, "connection closed");
                link.codec = None;
                self.state = SessionState::Closed;
                self.dispatch_event(CLOSE, reason_payload(reason));
            }
            ChannelEvent::Errored(reason) => {
                warn!(generation = notice.generation, "connection error: {}", reason);
                link.codec = None;
                self.state = SessionState::Closed;
                self.dispatch_event(ERROR, reason_payload(Some(reason)));
            }
        }
    }

    /// Retry timer tick: dispatch `Tick`, then redial if the connection is
    /// gone or going.
    ///
    /// Returns whether a dial happened.
    pub fn on_tick(&mut self) -> bool {
        self.dispatch_event(TICK, Payload::new());

        let alive = self
            .link
            .as_ref()
            .is_some_and(|link| !link.connection.ready_state().is_terminal());
        if alive {
            return false;
        }

        if let Err(e) = self.dial() {
            warn!("redial failed: {}", e);
            return false;
        }
        true
    }

    /// Encode and write one message. Failures are logged and reported as
    /// `false`; nothing is returned to the caller.
    pub fn emit(&mut self, message: &Message) -> bool {
        let Some(link) = self.link.as_mut() else {
            warn!(id = message.id(), "emit without connection");
            return false;
        };
        let Some(codec) = link.codec.as_ref() else {
            warn!(id = message.id(), "emit after disconnect");
            return false;
        };
        let frame = match codec.encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(id = message.id(), kind = ?e.kind(), "encode failed: {}", e);
                return false;
            }
        };
        match link.connection.send(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(id = message.id(), "send failed: {}", e);
                false
            }
        }
    }

    /// Close the connection. Pending dispatches still run on the next drain.
    pub fn shutdown(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.connection.close();
        }
        self.state = SessionState::Closed;
        info!(generation = self.generation, "session shut down");
    }

    fn dispatch_event(&mut self, id: u16, payload: Payload) {
        if let Some(message) = events::event(id, payload) {
            self.dispatcher.dispatch(message);
        }
    }
}

fn reason_payload(reason: Option<String>) -> Payload {
    let mut payload = Payload::new();
    if let Some(reason) = reason {
        payload.insert("reason".to_string(), Value::String(reason));
    }
    payload
}

enum Command {
    Emit(Message),
    ResetRetry(Duration),
    Shutdown,
}

/// Cloneable control handle for a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Queue a message for sending. Returns `false` if the session has
    /// stopped.
    pub fn emit(&self, message: Message) -> bool {
        self.commands.send(Command::Emit(message)).is_ok()
    }

    /// Re-arm the retry timer with a new period and check the connection
    /// immediately.
    pub fn reset_retry_interval(&self, interval: Duration) -> bool {
        self.commands.send(Command::ResetRetry(interval)).is_ok()
    }

    /// Stop the retry timer and close the connection.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Handle for use inside handlers. It does not keep the session alive.
    pub fn downgrade(&self) -> WeakSessionHandle {
        WeakSessionHandle {
            commands: self.commands.downgrade(),
        }
    }
}

/// Non-owning handle. Every call is a no-op returning `false` once all
/// [`SessionHandle`]s are gone.
#[derive(Clone)]
pub struct WeakSessionHandle {
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl WeakSessionHandle {
    pub fn emit(&self, message: Message) -> bool {
        self.send(Command::Emit(message))
    }

    pub fn reset_retry_interval(&self, interval: Duration) -> bool {
        self.send(Command::ResetRetry(interval))
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, command: Command) -> bool {
        self.commands
            .upgrade()
            .is_some_and(|commands| commands.send(command).is_ok())
    }
}

/// Session task. Build with [`Session::new`], register handlers, then
/// [`Session::run`].
pub struct Session<C: Connector> {
    core: SessionCore<C>,
    notices: mpsc::UnboundedReceiver<ChannelNotice>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<SessionState>,
}

impl<C: Connector> Session<C> {
    pub fn new(config: SessionConfig, connector: C) -> Result<(Self, SessionHandle)> {
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let core = SessionCore::new(config, connector, notice_tx)?;
        let session = Self {
            core,
            notices,
            commands,
            state: state_tx,
        };
        let handle = SessionHandle {
            commands: command_tx,
            state: state_rx,
        };
        Ok((session, handle))
    }

    pub fn on<F>(&mut self, id: u16, handler: F)
    where
        F: FnMut(&Message) + Send + 'static,
    {
        self.core.on(id, handler);
    }

    /// Dial and serve until shut down.
    ///
    /// Stops on [`SessionHandle::shutdown`] or once every strong
    /// [`SessionHandle`] is dropped. A strong handle captured by a handler
    /// keeps the session running until an explicit shutdown; capture
    /// [`SessionHandle::downgrade`] instead.
    pub async fn run(mut self) {
        if let Err(e) = self.core.dial() {
            warn!("initial dial failed: {}", e);
        }
        let mut ticker = retry_ticker(self.core.retry_interval());
        self.settle();

        loop {
            tokio::select! {
                Some(notice) = self.notices.recv() => {
                    self.core.handle_notice(notice);
                }
                _ = ticker.tick() => {
                    self.core.on_tick();
                }
                command = self.commands.recv() => match command {
                    Some(Command::Emit(message)) => {
                        self.core.emit(&message);
                    }
                    Some(Command::ResetRetry(interval)) => {
                        let interval = interval.max(MIN_RETRY_INTERVAL);
                        debug!(?interval, "retry interval reset");
                        ticker = retry_ticker(interval);
                        self.core.on_tick();
                    }
                    Some(Command::Shutdown) | None => {
                        self.core.shutdown();
                        self.settle();
                        break;
                    }
                },
            }
            self.settle();
        }
    }

    /// Run deferred handlers and publish the resulting state.
    fn settle(&mut self) {
        self.core.drain();
        let state = self.core.state();
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);

fn retry_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
