use std::sync::{Arc, Mutex};
use std::time::Duration;

use url::Url;
use wisp_client::{
    ChannelError, ChannelEvent, ChannelNotice, Connection, Connector, EventSink, ReadyState,
    Session, SessionConfig, SessionCore, SessionState,
};
use wisp_core::events::{CLOSE, CONNECT_SUCCESS, ERROR, TICK};
use wisp_core::{Framing, Message, ProtocolLevel};
use wisp_crypto::{accept, Codec, PreSharedSecret};

#[derive(Clone)]
struct Dial {
    uri: Url,
    sink: EventSink,
    state: Arc<Mutex<ReadyState>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl Dial {
    fn set_state(&self, state: ReadyState) {
        *self.state.lock().unwrap() = state;
    }

    fn notice(&self, event: ChannelEvent) -> ChannelNotice {
        ChannelNotice {
            generation: self.sink.generation(),
            event,
        }
    }

    fn key_param(&self) -> String {
        self.uri
            .query_pairs()
            .find(|(k, _)| k == "k")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }
}

#[derive(Clone, Default)]
struct MockConnector {
    dials: Arc<Mutex<Vec<Dial>>>,
}

impl MockConnector {
    fn count(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    fn last(&self) -> Dial {
        self.dials.lock().unwrap().last().cloned().unwrap()
    }
}

impl Connector for MockConnector {
    fn open(&mut self, uri: &Url, sink: EventSink) -> Result<Box<dyn Connection>, ChannelError> {
        let dial = Dial {
            uri: uri.clone(),
            sink,
            state: Arc::new(Mutex::new(ReadyState::Connecting)),
            sent: Arc::new(Mutex::new(Vec::new())),
        };
        let connection = MockConnection {
            state: dial.state.clone(),
            sent: dial.sent.clone(),
        };
        self.dials.lock().unwrap().push(dial);
        Ok(Box::new(connection))
    }
}

struct MockConnection {
    state: Arc<Mutex<ReadyState>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl Connection for MockConnection {
    fn send(&mut self, frame: String) -> Result<(), ChannelError> {
        let state = *self.state.lock().unwrap();
        if state != ReadyState::Open {
            return Err(ChannelError::NotOpen(state));
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap()
    }

    fn close(&mut self) {
        *self.state.lock().unwrap() = ReadyState::Closed;
    }
}

fn psk() -> PreSharedSecret {
    PreSharedSecret::new(*b"0123456789abcdef", *b"abcdef0123456789").unwrap()
}

fn chat(text: &str) -> Message {
    Message::new(0x0300, "chat").unwrap().with_field("text", text)
}

fn core(level: u8) -> (SessionCore<MockConnector>, MockConnector) {
    let connector = MockConnector::default();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let config = SessionConfig::new("ws://wisp.test/ws", level).with_psk(psk());
    let core = SessionCore::new(config, connector.clone(), tx).unwrap();
    (core, connector)
}

fn record(core: &mut SessionCore<MockConnector>, ids: &[u16]) -> Arc<Mutex<Vec<Message>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for &id in ids {
        let log = seen.clone();
        core.on(id, move |m| log.lock().unwrap().push(m.clone()));
    }
    seen
}

#[test]
fn test_configuration_error_before_dial() {
    let connector = MockConnector::default();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let config = SessionConfig::new("ws://wisp.test/ws", 2);
    let err = SessionCore::new(config, connector.clone(), tx).err().unwrap();
    assert!(err.is_config());
    assert_eq!(connector.count(), 0);
}

#[test]
fn test_lifecycle_events() {
    let (mut core, net) = core(1);
    let seen = record(&mut core, &[CONNECT_SUCCESS, CLOSE, ERROR]);

    assert_eq!(core.state(), SessionState::Idle);
    core.dial().unwrap();
    assert_eq!(core.state(), SessionState::Dialing);

    let dial = net.last();
    dial.set_state(ReadyState::Open);
    core.handle_notice(dial.notice(ChannelEvent::Opened));
    assert_eq!(core.state(), SessionState::Open);
    assert!(seen.lock().unwrap().is_empty(), "dispatch must be deferred");
    core.drain();

    dial.set_state(ReadyState::Closed);
    core.handle_notice(dial.notice(ChannelEvent::Errored("reset".into())));
    core.handle_notice(dial.notice(ChannelEvent::Closed {
        reason: Some("going away".into()),
    }));
    assert_eq!(core.state(), SessionState::Closed);
    core.drain();

    let seen = seen.lock().unwrap();
    let ids: Vec<u16> = seen.iter().map(Message::id).collect();
    assert_eq!(ids, vec![CONNECT_SUCCESS, ERROR, CLOSE]);
    assert_eq!(seen[1].get_str("reason"), Some("reset"));
    assert_eq!(seen[2].get_str("reason"), Some("going away"));
}

#[test]
fn test_reconnect_dials_once_per_terminal_tick() {
    let (mut core, net) = core(1);
    let ticks = record(&mut core, &[TICK]);
    core.dial().unwrap();

    // Connecting and open links are left alone.
    assert!(!core.on_tick());
    net.last().set_state(ReadyState::Open);
    assert!(!core.on_tick());
    assert_eq!(net.count(), 1);

    net.last().set_state(ReadyState::Closing);
    assert!(core.on_tick());
    assert_eq!(net.count(), 2);

    // The fresh link is connecting again.
    assert!(!core.on_tick());
    assert_eq!(net.count(), 2);

    net.last().set_state(ReadyState::Closed);
    assert!(core.on_tick());
    assert_eq!(net.count(), 3);

    core.drain();
    assert_eq!(ticks.lock().unwrap().len(), 5);

    let keys: Vec<String> = net
        .dials
        .lock()
        .unwrap()
        .iter()
        .map(Dial::key_param)
        .collect();
    assert_ne!(keys[0], keys[1]);
    assert_ne!(keys[1], keys[2]);
    assert_ne!(keys[0], keys[2]);
}

#[test]
fn test_stale_notices_are_ignored() {
    let (mut core, net) = core(0);
    let seen = record(&mut core, &[CONNECT_SUCCESS, CLOSE]);
    core.dial().unwrap();
    let first = net.last();
    first.set_state(ReadyState::Closed);
    core.on_tick();
    let second = net.last();

    core.handle_notice(first.notice(ChannelEvent::Closed { reason: None }));
    core.handle_notice(first.notice(ChannelEvent::Opened));
    assert_eq!(core.state(), SessionState::Dialing);

    core.handle_notice(second.notice(ChannelEvent::Opened));
    assert_eq!(core.state(), SessionState::Open);
    core.drain();

    let ids: Vec<u16> = seen.lock().unwrap().iter().map(Message::id).collect();
    assert_eq!(ids, vec![CONNECT_SUCCESS]);
}

#[test]
fn test_level1_traffic_both_ways() {
    let (mut core, net) = core(1);
    let seen = record(&mut core, &[0x0300]);
    core.dial().unwrap();
    let dial = net.last();

    let mut server = accept(
        ProtocolLevel::HandshakeV1,
        Some(&dial.key_param()),
        &psk(),
        Framing::Length,
    )
    .unwrap()
    .codec;

    assert!(!core.emit(&chat("too early")));

    dial.set_state(ReadyState::Open);
    core.handle_notice(dial.notice(ChannelEvent::Opened));
    assert!(core.emit(&chat("up")));
    let sent = dial.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(server.decode(&sent[0]).unwrap(), chat("up"));

    let frame = server.encode(&chat("down")).unwrap();
    core.handle_notice(dial.notice(ChannelEvent::Frame(frame)));
    core.handle_notice(dial.notice(ChannelEvent::Frame("013agarbage".into())));
    core.drain();
    assert_eq!(*seen.lock().unwrap(), vec![chat("down")]);
}

#[test]
fn test_level2_bootstrap_then_traffic() {
    let (mut core, net) = core(2);
    let seen = record(&mut core, &[CONNECT_SUCCESS, 0x0300]);
    core.dial().unwrap();
    let dial = net.last();

    let accepted = accept(
        ProtocolLevel::HandshakeV2,
        Some(&dial.key_param()),
        &psk(),
        Framing::Length,
    )
    .unwrap();
    let mut server = accepted.codec;
    let bootstrap = accepted.bootstrap.unwrap().encode().unwrap();

    dial.set_state(ReadyState::Open);
    core.handle_notice(dial.notice(ChannelEvent::Opened));
    assert!(!core.emit(&chat("before iv")));

    // Encrypted traffic ahead of the bootstrap is dropped.
    let early = server.encode(&chat("early")).unwrap();
    core.handle_notice(dial.notice(ChannelEvent::Frame(early)));
    assert!(!core.codec().unwrap().is_secured());

    core.handle_notice(dial.notice(ChannelEvent::Frame(bootstrap)));
    assert!(core.codec().unwrap().is_secured());
    assert_eq!(core.codec().unwrap().iv(), server.iv());

    assert!(core.emit(&chat("after iv")));
    let sent = dial.sent.lock().unwrap().clone();
    assert_eq!(server.decode(&sent[0]).unwrap(), chat("after iv"));

    core.drain();
    let seen = seen.lock().unwrap();
    let ids: Vec<u16> = seen.iter().map(Message::id).collect();
    assert_eq!(ids, vec![CONNECT_SUCCESS, CONNECT_SUCCESS]);
    assert!(seen[0].get_str("data").is_none());
    assert!(seen[1].get_str("data").is_some());
}

#[test]
fn test_redial_replaces_codec() {
    let (mut core, net) = core(2);
    core.dial().unwrap();
    let first = net.last();
    let bootstrap = accept(
        ProtocolLevel::HandshakeV2,
        Some(&first.key_param()),
        &psk(),
        Framing::Length,
    )
    .unwrap()
    .bootstrap
    .unwrap()
    .encode()
    .unwrap();
    core.handle_notice(first.notice(ChannelEvent::Frame(bootstrap)));
    assert!(core.codec().unwrap().is_secured());

    first.set_state(ReadyState::Closed);
    core.on_tick();
    assert!(matches!(core.codec(), Some(Codec::V2 { .. })));
    assert!(!core.codec().unwrap().is_secured());
    assert_eq!(core.generation(), 2);
}

#[test]
fn test_disconnect_discards_codec() {
    let (mut core, net) = core(2);
    core.dial().unwrap();
    let first = net.last();
    let bootstrap = accept(
        ProtocolLevel::HandshakeV2,
        Some(&first.key_param()),
        &psk(),
        Framing::Length,
    )
    .unwrap()
    .bootstrap
    .unwrap()
    .encode()
    .unwrap();
    first.set_state(ReadyState::Open);
    core.handle_notice(first.notice(ChannelEvent::Opened));
    core.handle_notice(first.notice(ChannelEvent::Frame(bootstrap)));
    assert!(core.codec().unwrap().is_secured());

    first.set_state(ReadyState::Closed);
    core.handle_notice(first.notice(ChannelEvent::Closed { reason: None }));
    assert!(core.codec().is_none());
    assert!(!core.emit(&chat("after close")));

    // The next dial starts a fresh handshake.
    assert!(core.on_tick());
    assert!(!core.codec().unwrap().is_secured());

    let second = net.last();
    second.set_state(ReadyState::Closed);
    core.handle_notice(second.notice(ChannelEvent::Errored("reset".into())));
    assert!(core.codec().is_none());
}

#[test]
fn test_panicking_handler_does_not_stop_session() {
    let (mut core, net) = core(0);
    core.on(0x0300, |_| panic!("bad handler"));
    let seen = record(&mut core, &[0x0300]);
    core.dial().unwrap();
    let dial = net.last();

    for text in ["one", "two"] {
        let frame = chat(text).encode().unwrap();
        core.handle_notice(dial.notice(ChannelEvent::Frame(frame)));
    }
    assert_eq!(core.drain(), 2);
    assert_eq!(*seen.lock().unwrap(), vec![chat("one"), chat("two")]);
}

#[test]
fn test_shutdown_closes_connection() {
    let (mut core, net) = core(0);
    core.dial().unwrap();
    net.last().set_state(ReadyState::Open);
    core.shutdown();
    assert_eq!(core.state(), SessionState::Closed);
    assert_eq!(*net.last().state.lock().unwrap(), ReadyState::Closed);
    assert!(core.codec().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_session_task_retry_timer() {
    let net = MockConnector::default();
    let config = SessionConfig::new("ws://wisp.test/ws", 0)
        .with_retry_interval(Duration::from_millis(5000));
    let (mut session, handle) = Session::new(config, net.clone()).unwrap();

    let ticks = Arc::new(Mutex::new(0usize));
    let counter = ticks.clone();
    session.on(TICK, move |_| *counter.lock().unwrap() += 1);

    let echo = handle.downgrade();
    session.on(CONNECT_SUCCESS, move |_| {
        echo.emit(Message::new(0x0300, "hello").unwrap());
    });

    let task = tokio::spawn(session.run());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(net.count(), 1);
    assert_eq!(handle.state(), SessionState::Dialing);

    // A handler's emit is queued and written on the next turn.
    let first = net.last();
    first.set_state(ReadyState::Open);
    first.sink.emit(ChannelEvent::Opened);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handle.state(), SessionState::Open);
    assert_eq!(first.sent.lock().unwrap().len(), 1);

    first.set_state(ReadyState::Closed);
    first.sink.emit(ChannelEvent::Closed { reason: None });
    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(handle.state(), SessionState::Dialing);
    assert_eq!(net.count(), 2);

    // Still connecting: the next tick leaves it alone.
    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(net.count(), 2);
    assert_eq!(*ticks.lock().unwrap(), 2);

    // Resetting the interval re-evaluates immediately.
    net.last().set_state(ReadyState::Closed);
    assert!(handle.reset_retry_interval(Duration::from_millis(100)));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(net.count(), 3);
    assert_eq!(*ticks.lock().unwrap(), 3);

    handle.shutdown();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handle.state(), SessionState::Closed);
    assert!(task.is_finished());
    assert!(!handle.emit(chat("late")));
}

#[tokio::test(start_paused = true)]
async fn test_session_stops_when_only_weak_handles_remain() {
    let net = MockConnector::default();
    let config = SessionConfig::new("ws://wisp.test/ws", 0)
        .with_retry_interval(Duration::from_millis(100));
    let (mut session, handle) = Session::new(config, net.clone()).unwrap();

    let greeter = handle.downgrade();
    session.on(CONNECT_SUCCESS, move |_| {
        greeter.emit(chat("hi"));
    });
    let spare = handle.downgrade();
    let state = handle.watch();

    let task = tokio::spawn(session.run());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(net.count(), 1);

    // A dead link would be redialed on every tick while the task lives.
    net.last().set_state(ReadyState::Closed);
    drop(handle);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(task.is_finished());
    assert_eq!(net.count(), 1);
    assert_eq!(*state.borrow(), SessionState::Closed);
    assert!(!spare.emit(chat("late")));
}
