use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use peerlink_core::{
    ClientId, Connector, CoreVerb, Event, EventLabel, EventSink, Message, Mode, NetworkEndpoint,
    SessionParams, TransportError,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{Session, SessionError, SessionState};

type Shared<T> = Arc<Mutex<T>>;

fn shared<T: Default>() -> Shared<T> {
    Arc::default()
}

/// Records what the session asks of its endpoints and lets tests emit
/// events as if they came from the endpoint's I/O thread.
#[derive(Clone, Default)]
struct Recorder {
    log: Shared<Vec<String>>,
    sinks: Shared<Vec<EventSink>>,
    sent: Shared<Vec<(Option<ClientId>, Message)>>,
}

impl Recorder {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn sent(&self) -> Vec<(Option<ClientId>, Message)> {
        self.sent.lock().unwrap().clone()
    }

    /// Emit through the endpoint opened `n`-th.
    fn emit(&self, n: usize, event: Event) {
        self.sinks.lock().unwrap()[n].emit(event);
    }

    fn received(&self, n: usize, message: Message, client: Option<ClientId>) {
        self.emit(
            n,
            Event::message(EventLabel::MessageReceived, message).with_client(client),
        );
    }
}

struct MockConnector(Recorder);

impl Connector for MockConnector {
    fn open(
        &self,
        _mode: Mode,
        _params: &SessionParams,
        sink: EventSink,
    ) -> Result<Box<dyn NetworkEndpoint>, TransportError> {
        let mut sinks = self.0.sinks.lock().unwrap();
        let n = sinks.len();
        sinks.push(sink);
        self.0.log.lock().unwrap().push(format!("open {n}"));
        Ok(Box::new(MockEndpoint {
            n,
            recorder: self.0.clone(),
            closed: false,
        }))
    }
}

struct MockEndpoint {
    n: usize,
    recorder: Recorder,
    closed: bool,
}

impl NetworkEndpoint for MockEndpoint {
    fn identity(&self) -> Uuid {
        Uuid::nil()
    }

    fn send(&mut self, message: Message) {
        self.recorder.sent.lock().unwrap().push((None, message));
    }

    fn send_to(&mut self, client: ClientId, message: Message) {
        self.recorder.sent.lock().unwrap().push((Some(client), message));
    }

    fn disconnect(&mut self, client: ClientId) {
        self.recorder
            .log
            .lock()
            .unwrap()
            .push(format!("disconnect {client}"));
    }

    fn clients(&self) -> Vec<ClientId> {
        Vec::new()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.recorder
                .log
                .lock()
                .unwrap()
                .push(format!("close {}", self.n));
        }
    }
}

fn mock_session(mode: Mode, params: SessionParams) -> (Session, Recorder) {
    let recorder = Recorder::default();
    let session = Session::with_connector(mode, params, MockConnector(recorder.clone()));
    (session, recorder)
}

fn mock_params() -> SessionParams {
    SessionParams::new("127.0.0.1", 0).with_policy_port(None)
}

/// Count events with `label`.
fn count_events(session: &mut Session, label: EventLabel) -> Shared<usize> {
    let count = shared::<usize>();
    let counter = Arc::clone(&count);
    session.on_event(label, move |_, _| {
        *counter.lock().unwrap() += 1;
        Ok(())
    });
    count
}

fn connected(client: ClientId) -> Event {
    Event::message(
        EventLabel::Connected,
        Message::untagged(json!({ "address": "127.0.0.1:5555" })),
    )
    .with_client(client)
}

#[test]
fn test_send_and_trigger_are_noops_when_not_running() {
    let (mut session, recorder) = mock_session(Mode::Server, mock_params());
    assert_eq!(session.state(), SessionState::Uninitialized);

    tokio_test::assert_ok!(session.trigger("click", json!({"x": 1})));
    tokio_test::assert_ok!(session.send(Message::untagged(json!("raw"))));
    assert_eq!(session.pump(), 0);

    session.start();
    session.stop();
    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);

    tokio_test::assert_ok!(session.trigger("click", json!({"x": 1})));
    assert_eq!(session.pump(), 0);
    assert!(recorder.sent().is_empty());
}

#[test]
fn test_start_twice_closes_previous_endpoint_first() {
    let (mut session, recorder) = mock_session(Mode::Server, mock_params());

    session.start();
    session.start();

    assert_eq!(recorder.log(), vec!["open 0", "close 0", "open 1"]);
    assert_eq!(session.state(), SessionState::Running);
}

#[test]
fn test_events_from_stopped_endpoint_are_discarded() {
    let (mut session, recorder) = mock_session(Mode::Server, mock_params());
    let connects = count_events(&mut session, EventLabel::Connected);

    session.start();
    recorder.emit(0, connected(Uuid::new_v4()));
    session.start();
    session.pump();
    assert_eq!(*connects.lock().unwrap(), 0);

    recorder.emit(1, connected(Uuid::new_v4()));
    session.pump();
    assert_eq!(*connects.lock().unwrap(), 1);
    assert_eq!(session.clients().len(), 1);
}

#[test]
fn test_sync_verb_updates_client_and_is_consumed() {
    let (mut session, recorder) = mock_session(Mode::Server, mock_params());
    let on_calls = shared::<usize>();
    let calls = Arc::clone(&on_calls);
    session.on(CoreVerb::SyncClientData.as_str(), move |_, _, _| {
        *calls.lock().unwrap() += 1;
        Ok(())
    });
    let received = count_events(&mut session, EventLabel::MessageReceived);

    session.start();
    let client = Uuid::new_v4();
    recorder.emit(0, connected(client));
    recorder.received(
        0,
        Message::core(CoreVerb::SyncClientData, json!({ "uuid": "X" })),
        Some(client),
    );
    session.pump();

    let record = session.peer().client(client).unwrap();
    assert_eq!(record.synced_id.as_deref(), Some("X"));
    assert_eq!(record.address.as_deref(), Some("127.0.0.1:5555"));
    assert_eq!(*on_calls.lock().unwrap(), 0);
    assert_eq!(*received.lock().unwrap(), 0);
}

#[test]
fn test_malformed_sync_is_consumed_without_update() {
    let (mut session, recorder) = mock_session(Mode::Server, mock_params());
    let received = count_events(&mut session, EventLabel::MessageReceived);

    session.start();
    let client = Uuid::new_v4();
    recorder.emit(0, connected(client));
    recorder.received(
        0,
        Message::core(CoreVerb::SyncClientData, json!({ "id": 7 })),
        Some(client),
    );
    session.pump();

    assert_eq!(session.peer().client(client).unwrap().synced_id, None);
    assert_eq!(*received.lock().unwrap(), 0);
}

#[test]
fn test_server_full_emits_once_and_stops() {
    let (mut session, recorder) = mock_session(Mode::Client, mock_params());
    let full = count_events(&mut session, EventLabel::ServerFull);
    let closed = count_events(&mut session, EventLabel::Closed);

    session.start();
    recorder.received(0, Message::core(CoreVerb::ServerFull, Value::Null), None);
    recorder.emit(0, Event::new(EventLabel::Closed, json!({})));
    session.pump();

    assert_eq!(*full.lock().unwrap(), 1);
    assert_eq!(*closed.lock().unwrap(), 0);
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(recorder.log(), vec!["open 0", "close 0"]);

    session.pump();
    assert_eq!(*full.lock().unwrap(), 1);
}

#[test]
fn test_server_ignores_capacity_rejection_from_client() {
    let (mut session, recorder) = mock_session(Mode::Server, mock_params());
    let full = count_events(&mut session, EventLabel::ServerFull);
    let received = count_events(&mut session, EventLabel::MessageReceived);

    session.start();
    let client = Uuid::new_v4();
    recorder.emit(0, connected(client));
    recorder.received(0, Message::core(CoreVerb::ServerFull, Value::Null), Some(client));
    session.pump();

    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(*full.lock().unwrap(), 0);
    assert_eq!(*received.lock().unwrap(), 0);
    assert_eq!(recorder.log(), vec!["open 0"]);
    assert_eq!(session.clients().len(), 1);
}

#[test]
fn test_failing_server_full_listener_still_stops() {
    let (mut session, recorder) = mock_session(Mode::Client, mock_params());
    session.on_event(EventLabel::ServerFull, |_, _| panic!("listener panicked"));

    session.start();
    recorder.received(0, Message::core(CoreVerb::ServerFull, Value::Null), None);
    session.pump();

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(recorder.log(), vec!["open 0", "close 0"]);

    let (mut session, recorder) = mock_session(Mode::Client, mock_params());
    session.on_event(EventLabel::ServerFull, |_, _| anyhow::bail!("listener failed"));

    session.start();
    recorder.received(0, Message::core(CoreVerb::ServerFull, Value::Null), None);
    session.pump();

    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
fn test_failing_disconnected_listener_still_removes_record() {
    let (mut session, recorder) = mock_session(Mode::Server, mock_params());
    session.on_event(EventLabel::Disconnected, |_, _| panic!("listener panicked"));
    let later = count_events(&mut session, EventLabel::Connected);

    session.start();
    let gone = Uuid::new_v4();
    recorder.emit(0, connected(gone));
    recorder.emit(
        0,
        Event::new(EventLabel::Disconnected, json!({})).with_client(gone),
    );
    let next = Uuid::new_v4();
    recorder.emit(0, connected(next));
    session.pump();

    let ids: Vec<ClientId> = session.clients().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![next]);
    assert_eq!(*later.lock().unwrap(), 2);
}

#[test]
fn test_reserved_and_empty_verbs_rejected() {
    let (mut session, recorder) = mock_session(Mode::Client, mock_params());
    session.start();

    assert!(matches!(
        session.trigger(CoreVerb::ServerFull.as_str(), Value::Null),
        Err(SessionError::ReservedVerb(_))
    ));
    assert!(matches!(
        session.trigger("core.custom", Value::Null),
        Err(SessionError::ReservedVerb(_))
    ));
    assert!(matches!(
        session.send(Message::core(CoreVerb::SyncClientData, json!({"uuid": "x"}))),
        Err(SessionError::ReservedVerb(_))
    ));
    assert!(matches!(
        session.trigger("", Value::Null),
        Err(SessionError::EmptyVerb)
    ));
    assert!(recorder.sent().is_empty());
}

#[test]
fn test_on_filters_by_verb_in_registration_order() {
    let (mut session, recorder) = mock_session(Mode::Server, mock_params());
    let order = shared::<Vec<(&'static str, Value)>>();

    for name in ["first", "second"] {
        let order = Arc::clone(&order);
        session.on("click", move |content, _, _| {
            order.lock().unwrap().push((name, content.clone()));
            Ok(())
        });
    }
    let other = Arc::clone(&order);
    session.on("scroll", move |content, _, _| {
        other.lock().unwrap().push(("scroll", content.clone()));
        Ok(())
    });
    assert_eq!(session.listener_count(EventLabel::MessageReceived), 3);

    session.start();
    recorder.received(
        0,
        Message::new("click", json!({"x": 10, "y": 30})),
        Some(Uuid::new_v4()),
    );
    session.pump();

    let order = order.lock().unwrap();
    assert_eq!(
        *order,
        vec![
            ("first", json!({"x": 10, "y": 30})),
            ("second", json!({"x": 10, "y": 30})),
        ]
    );
}

#[test]
fn test_listener_failure_does_not_drop_later_events() {
    let (mut session, recorder) = mock_session(Mode::Client, mock_params());
    session.on("boom", |_, _, _| anyhow::bail!("listener rejected message"));
    session.on("explode", |_, _, _| panic!("listener panicked"));
    let ok_calls = shared::<usize>();
    let calls = Arc::clone(&ok_calls);
    session.on("ok", move |_, _, _| {
        *calls.lock().unwrap() += 1;
        Ok(())
    });

    session.start();
    recorder.received(0, Message::new("boom", Value::Null), None);
    recorder.received(0, Message::new("explode", Value::Null), None);
    recorder.received(0, Message::new("ok", Value::Null), None);
    assert_eq!(session.pump(), 3);

    assert_eq!(*ok_calls.lock().unwrap(), 1);
}

#[test]
fn test_disconnect_client_by_mode() {
    let (mut server, recorder) = mock_session(Mode::Server, mock_params());
    server.disconnect_client(Some(Uuid::new_v4()));
    assert!(recorder.log().is_empty());

    server.start();
    let client = Uuid::new_v4();
    server.disconnect_client(None);
    server.disconnect_client(Some(client));
    assert_eq!(recorder.log(), vec!["open 0".to_string(), format!("disconnect {client}")]);
    assert_eq!(server.state(), SessionState::Running);

    let (mut client_session, recorder) = mock_session(Mode::Client, mock_params());
    client_session.start();
    client_session.disconnect_client(Some(Uuid::new_v4()));
    assert_eq!(client_session.state(), SessionState::Stopped);
    assert_eq!(recorder.log(), vec!["open 0", "close 0"]);
}

#[test]
fn test_client_announces_identity_on_connect() {
    let params = mock_params().with_identity("alice");
    let (mut session, recorder) = mock_session(Mode::Client, params);

    session.start();
    recorder.emit(0, Event::new(EventLabel::Connected, json!({})));
    session.pump();

    assert_eq!(
        recorder.sent(),
        vec![(
            None,
            Message::core(CoreVerb::SyncClientData, json!({ "uuid": "alice" }))
        )]
    );
}

#[test]
fn test_disconnected_record_visible_to_listeners() {
    let (mut session, recorder) = mock_session(Mode::Server, mock_params());
    let seen = shared::<Option<bool>>();
    let seen_in_listener = Arc::clone(&seen);
    session.on_event(EventLabel::Disconnected, move |event, peer| {
        let client = event.client().unwrap();
        *seen_in_listener.lock().unwrap() = Some(peer.client(client).is_some());
        Ok(())
    });

    session.start();
    let client = Uuid::new_v4();
    recorder.emit(0, connected(client));
    recorder.emit(
        0,
        Event::new(EventLabel::Disconnected, json!({})).with_client(client),
    );
    session.pump();

    assert_eq!(*seen.lock().unwrap(), Some(true));
    assert!(session.clients().is_empty());
}

#[test]
fn test_reply_routes_to_origin() {
    let (mut session, recorder) = mock_session(Mode::Server, mock_params());
    session.on("ping", |content, event, peer| {
        peer.reply(event, "pong", content.clone())?;
        Ok(())
    });

    session.start();
    let client = Uuid::new_v4();
    recorder.received(0, Message::new("ping", json!(42)), Some(client));
    session.pump();

    assert_eq!(
        recorder.sent(),
        vec![(Some(client), Message::new("pong", json!(42)))]
    );
}

#[test]
fn test_trigger_event_delivered_next_tick() {
    let (mut session, _recorder) = mock_session(Mode::Server, mock_params());
    let init = count_events(&mut session, EventLabel::InitSuccess);

    session.trigger_event(EventLabel::InitSuccess, json!({ "address": "test" }));
    assert_eq!(*init.lock().unwrap(), 0);
    assert_eq!(session.pump(), 1);
    assert_eq!(*init.lock().unwrap(), 1);
}

#[test]
fn test_invalid_params_report_init_failure() {
    let params = mock_params().with_max_connections(0);
    let (mut session, recorder) = mock_session(Mode::Server, params);
    let failures = count_events(&mut session, EventLabel::InitFailure);

    session.start();
    session.pump();

    assert!(recorder.log().is_empty());
    assert_eq!(*failures.lock().unwrap(), 1);
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[test]
fn test_ticker_pumps_and_returns_session() {
    let (mut session, _recorder) = mock_session(Mode::Server, mock_params());
    let init = count_events(&mut session, EventLabel::InitSuccess);
    session.trigger_event(EventLabel::InitSuccess, Value::Null);

    let ticker = session.spawn_ticker().unwrap();
    let deadline = Instant::now() + WAIT;
    while *init.lock().unwrap() == 0 {
        assert!(Instant::now() < deadline, "ticker never pumped");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(ticker.is_running());

    let session = ticker.join().unwrap();
    assert_eq!(session.state(), SessionState::Uninitialized);
}

// Loopback sessions over real sockets.

const WAIT: Duration = Duration::from_secs(10);

fn pump_until(sessions: &mut [&mut Session], mut done: impl FnMut(&[&mut Session]) -> bool) {
    let deadline = Instant::now() + WAIT;
    loop {
        for session in sessions.iter_mut() {
            session.pump();
        }
        if done(sessions) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out pumping sessions");
        thread::sleep(Duration::from_millis(5));
    }
}

fn pump_for(sessions: &mut [&mut Session], duration: Duration) {
    let until = Instant::now() + duration;
    while Instant::now() < until {
        for session in sessions.iter_mut() {
            session.pump();
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn loopback_params() -> SessionParams {
    SessionParams::new("127.0.0.1", 0).with_policy_port(None)
}

/// Start a server on an ephemeral port and return its port.
fn start_server(server: &mut Session) -> u16 {
    let address = shared::<Option<String>>();
    let slot = Arc::clone(&address);
    server.on_event(EventLabel::InitSuccess, move |event, _| {
        *slot.lock().unwrap() = event.payload()["address"].as_str().map(String::from);
        Ok(())
    });
    server.start();
    pump_until(&mut [server], |_| address.lock().unwrap().is_some());

    let address = address.lock().unwrap().clone().unwrap();
    address.rsplit(':').next().unwrap().parse().unwrap()
}

#[test]
fn test_loopback_click_reaches_peer_once() {
    let mut server = Session::new(Mode::Server, loopback_params());
    let clicks = shared::<Vec<Value>>();
    let sink = Arc::clone(&clicks);
    server.on("click", move |content, _, _| {
        sink.lock().unwrap().push(content.clone());
        Ok(())
    });
    let port = start_server(&mut server);

    let mut client = Session::new(
        Mode::Client,
        SessionParams::new("127.0.0.1", port)
            .with_policy_port(None)
            .with_identity("client-a"),
    );
    client.start();
    pump_until(&mut [&mut server, &mut client], |s| {
        s[0].clients()
            .first()
            .is_some_and(|c| c.synced_id.as_deref() == Some("client-a"))
    });

    tokio_test::assert_ok!(client.trigger("click", json!({"x": 10, "y": 30})));
    pump_until(&mut [&mut server, &mut client], |_| {
        !clicks.lock().unwrap().is_empty()
    });
    pump_for(&mut [&mut server, &mut client], Duration::from_millis(100));

    assert_eq!(*clicks.lock().unwrap(), vec![json!({"x": 10, "y": 30})]);
}

#[test]
fn test_loopback_server_full_stops_rejected_client() {
    let mut server = Session::new(Mode::Server, loopback_params().with_max_connections(1));
    let port = start_server(&mut server);
    let client_params = SessionParams::new("127.0.0.1", port).with_policy_port(None);

    let mut first = Session::new(Mode::Client, client_params.clone());
    first.start();
    pump_until(&mut [&mut server, &mut first], |s| s[0].clients().len() == 1);

    let mut second = Session::new(Mode::Client, client_params);
    let full = count_events(&mut second, EventLabel::ServerFull);
    second.start();
    pump_until(&mut [&mut server, &mut first, &mut second], |s| {
        s[2].state() == SessionState::Stopped
    });
    pump_for(
        &mut [&mut server, &mut first, &mut second],
        Duration::from_millis(100),
    );

    assert_eq!(*full.lock().unwrap(), 1);
    assert_eq!(first.state(), SessionState::Running);
    assert_eq!(server.clients().len(), 1);
}

#[test]
fn test_loopback_server_kicks_client() {
    let mut server = Session::new(Mode::Server, loopback_params());
    let port = start_server(&mut server);

    let mut client = Session::new(
        Mode::Client,
        SessionParams::new("127.0.0.1", port).with_policy_port(None),
    );
    let closed = count_events(&mut client, EventLabel::Closed);
    client.start();
    pump_until(&mut [&mut server, &mut client], |s| s[0].clients().len() == 1);

    let id = server.clients()[0].id;
    server.disconnect_client(Some(id));
    pump_until(&mut [&mut server, &mut client], |s| {
        s[0].clients().is_empty() && *closed.lock().unwrap() == 1
    });
}

#[test]
fn test_loopback_restart_rebinds_same_port() {
    let port = {
        let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        free.local_addr().unwrap().port()
    };
    let mut server = Session::new(
        Mode::Server,
        SessionParams::new("127.0.0.1", port).with_policy_port(None),
    );
    let ready = count_events(&mut server, EventLabel::InitSuccess);
    let failed = count_events(&mut server, EventLabel::InitFailure);

    server.start();
    pump_until(&mut [&mut server], |_| *ready.lock().unwrap() == 1);
    server.start();
    pump_until(&mut [&mut server], |_| *ready.lock().unwrap() == 2);

    assert_eq!(*failed.lock().unwrap(), 0);
    assert_eq!(server.state(), SessionState::Running);
}
