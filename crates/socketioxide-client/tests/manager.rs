use std::time::Duration;

use bytes::Bytes;
use engineioxide_client::{IoEvent, io::IoError};
use socketioxide_client::ManagerState;
use socketioxide_client_core::{Frame, Value};

mod fixture;
use fixture::*;

fn refuse(h: &mut Harness) {
    let calls = h.mock.take();
    let id = *ws_opens(&calls).last().expect("websocket opened");
    h.handle_io(IoEvent::WsError(id, IoError::new("connection refused")));
}

#[test]
fn open_and_connect_default_namespace() {
    let mut h = harness(config().build());
    let open = record(h.manager.emitter(), "open");
    assert_eq!(h.manager.state(), ManagerState::Opening);

    let socket = h.socket("/", None);
    let connect = record(&socket, "connect");
    let id = h.handshake("abc");
    assert_eq!(h.manager.state(), ManagerState::Open);
    assert_eq!(count(&open), 1);
    assert_eq!(h.manager.engine_id(), Some("abc"));
    // The default namespace is connected by the server without a connect packet.
    assert!(h.written().is_empty());

    h.server_send(id, "40");
    assert_eq!(count(&connect), 1);
    assert_eq!(h.manager.socket("/").unwrap().id(), Some("abc"));

    h.manager
        .emit("/", "hello", vec!["world".into(), Value::from(1)]);
    assert_eq!(h.written(), vec![r#"42["hello","world",1]"#]);
}

#[test]
fn connect_packet_carries_query() {
    let mut h = harness(config().build());
    h.socket("/admin", Some("token=123"));
    h.handshake("abc");
    assert_eq!(h.written(), vec!["40/admin?token=123"]);
}

#[test]
fn namespaces_share_the_connection() {
    let mut h = harness(config().build());
    let root = h.socket("/", None);
    let admin = h.socket("/admin", None);
    let root_msgs = record(&root, "msg");
    let admin_msgs = record(&admin, "msg");
    let id = h.handshake("abc");
    assert_eq!(h.written(), vec!["40/admin"]);
    assert_eq!(ws_opens(&h.mock.take()).len(), 0);

    h.server_send(id, "40");
    h.server_send(id, "40/admin");
    h.server_send(id, r#"42/admin,["msg","for admin"]"#);
    h.server_send(id, r#"42["msg","for root"]"#);

    assert_eq!(
        *admin_msgs.lock().unwrap(),
        vec![vec![Value::from("for admin")]]
    );
    assert_eq!(*root_msgs.lock().unwrap(), vec![vec![Value::from("for root")]]);
}

#[test]
fn unknown_namespace_packets_are_dropped() {
    let mut h = harness(config().build());
    let packets = record(h.manager.emitter(), "packet");
    let root = h.socket("/", None);
    let msgs = record(&root, "msg");
    let id = h.handshake("abc");
    h.server_send(id, "40");

    h.server_send(id, r#"42/other,["msg","lost"]"#);
    assert_eq!(count(&msgs), 0);
    let packets = packets.lock().unwrap();
    let last = packets.last().unwrap()[0].as_socket_packet().unwrap();
    assert_eq!(last.nsp, "/other");
}

#[test]
fn binary_packets_are_not_interleaved() {
    let mut h = harness(config().build());
    h.socket("/", None);
    let id = h.handshake("abc");
    h.server_send(id, "40");

    let file = |b: &'static [u8]| Value::Binary(Bytes::from_static(b));
    h.manager.emit("/", "upload", vec![file(&[1, 2])]);
    h.manager.emit("/", "upload", vec![file(&[3])]);

    let (frames, _) = h.flush();
    assert_eq!(
        frames,
        vec![
            Frame::Text(r#"451-["upload",{"_placeholder":true,"num":0}]"#.into()),
            Frame::Binary(Bytes::from_static(&[4, 1, 2])),
            Frame::Text(r#"451-["upload",{"_placeholder":true,"num":0}]"#.into()),
            Frame::Binary(Bytes::from_static(&[4, 3])),
        ]
    );
}

#[test]
fn ping_and_pong_are_forwarded() {
    let mut h = harness(config().build());
    let socket = h.socket("/", None);
    let pings = record(&socket, "ping");
    let pongs = record(h.manager.emitter(), "pong");
    let id = h.handshake("abc");

    let calls = h.mock.take();
    let ping = timers(&calls, Duration::from_millis(25000));
    assert_eq!(ping.len(), 1);
    h.handle_io(IoEvent::Timer(ping[0]));
    assert_eq!(h.written(), vec!["2"]);
    assert_eq!(count(&pings), 1);

    h.handle_io(IoEvent::WsMessage(id, Frame::Text("3".into())));
    let pongs = pongs.lock().unwrap();
    assert_eq!(pongs.len(), 1);
    assert!(pongs[0][0].as_int().unwrap() >= 0);
}

#[test]
fn connect_timeout() {
    let mut h = harness(
        config()
            .timeout(Some(Duration::from_secs(5)))
            .reconnection(false)
            .build(),
    );
    let errors = record(h.manager.emitter(), "connect_error");
    let timeouts = record(h.manager.emitter(), "connect_timeout");

    let calls = h.mock.take();
    let timer = timers(&calls, Duration::from_secs(5));
    assert_eq!(timer.len(), 1);
    h.handle_io(IoEvent::Timer(timer[0]));

    assert_eq!(*errors.lock().unwrap(), vec![vec![Value::from("timeout")]]);
    assert_eq!(*timeouts.lock().unwrap(), vec![vec![Value::Int(5000)]]);
    assert_eq!(h.manager.state(), ManagerState::Closed);
    assert!(h.manager.engine().is_none());
    let calls = h.mock.take();
    assert!(ws_closed(&calls));
    assert_eq!(set_timeouts(&calls), 0);
}

#[test]
fn connect_callback_is_called_with_result() {
    use std::sync::{Arc, Mutex};

    let mut h = harness(config().auto_connect(false).build());
    assert_eq!(h.manager.state(), ManagerState::Closed);
    let results: Arc<Mutex<Vec<bool>>> = Arc::default();

    let r = results.clone();
    h.manager
        .connect_with(move |res| r.lock().unwrap().push(res.is_ok()));
    refuse(&mut h);
    assert_eq!(*results.lock().unwrap(), vec![false]);
    // No retry when a callback handles the failure.
    assert_eq!(set_timeouts(&h.mock.take()), 0);
    assert!(!h.manager.reconnecting());

    let r = results.clone();
    h.manager
        .connect_with(move |res| r.lock().unwrap().push(res.is_ok()));
    h.handshake("abc");
    assert_eq!(*results.lock().unwrap(), vec![false, true]);

    // Already open: called right away.
    let r = results.clone();
    h.manager
        .connect_with(move |res| r.lock().unwrap().push(res.is_ok()));
    assert_eq!(*results.lock().unwrap(), vec![false, true, true]);
}

#[test]
fn reconnection_gives_up_after_max_attempts() {
    let mut h = harness(config().reconnection_attempts(3).build());
    let emitter = h.manager.emitter().clone();
    let attempts = record(&emitter, "reconnect_attempt");
    let errors = record(&emitter, "connect_error");
    let reconnect_errors = record(&emitter, "reconnect_error");
    let failed = record(&emitter, "reconnect_failed");

    refuse(&mut h);
    for delay in [1000, 2000, 4000] {
        assert!(h.manager.reconnecting());
        let calls = h.mock.take();
        let timer = timers(&calls, Duration::from_millis(delay));
        assert_eq!(timer.len(), 1, "reconnect delay of {delay}ms");
        h.handle_io(IoEvent::Timer(timer[0]));
        refuse(&mut h);
    }

    assert_eq!(
        *attempts.lock().unwrap(),
        vec![
            vec![Value::Int(1)],
            vec![Value::Int(2)],
            vec![Value::Int(3)]
        ]
    );
    assert_eq!(count(&errors), 4);
    assert_eq!(count(&reconnect_errors), 3);
    assert_eq!(count(&failed), 1);
    assert!(!h.manager.reconnecting());
    assert_eq!(h.manager.attempts(), 0);
    assert_eq!(set_timeouts(&h.mock.take()), 0);
}

#[test]
fn reconnection_success_resets_attempts() {
    let mut h = harness(config().build());
    let reconnects = record(h.manager.emitter(), "reconnect");

    refuse(&mut h);
    for delay in [1000, 2000] {
        let timer = timers(&h.mock.take(), Duration::from_millis(delay));
        h.handle_io(IoEvent::Timer(timer[0]));
        if delay == 1000 {
            refuse(&mut h);
        }
    }
    assert_eq!(h.manager.attempts(), 2);

    h.handshake("def");
    assert_eq!(h.manager.state(), ManagerState::Open);
    assert_eq!(*reconnects.lock().unwrap(), vec![vec![Value::Int(2)]]);
    assert_eq!(h.manager.attempts(), 0);
    assert!(!h.manager.reconnecting());
}

#[test]
fn opening_during_backoff_counts_as_reconnection() {
    let mut h = harness(config().build());
    let reconnects = record(h.manager.emitter(), "reconnect");
    refuse(&mut h);
    let pending = timers(&h.mock.take(), Duration::from_millis(1000));
    assert_eq!(pending.len(), 1);

    h.socket("/admin", None);
    let calls = h.mock.take();
    assert!(
        calls
            .iter()
            .any(|c| matches!(c, Call::ClearTimeout(t) if *t == pending[0]))
    );
    let id = *ws_opens(&calls).last().expect("websocket opened");
    h.handle_io(IoEvent::WsOpen(id));
    h.handle_io(IoEvent::WsMessage(id, open_frame("abc")));
    assert_eq!(h.written(), vec!["40/admin"]);
    assert_eq!(*reconnects.lock().unwrap(), vec![vec![Value::Int(1)]]);
    assert!(!h.manager.reconnecting());
    assert_eq!(h.manager.attempts(), 0);

    // Losing the connection schedules a new reconnection.
    h.handle_io(IoEvent::WsClose(id));
    assert!(h.manager.reconnecting());
    assert_eq!(timers(&h.mock.take(), Duration::from_millis(1000)).len(), 1);
}

#[test]
fn failed_open_during_backoff_keeps_reconnecting() {
    let mut h = harness(config().build());
    let reconnect_errors = record(h.manager.emitter(), "reconnect_error");
    refuse(&mut h);
    h.mock.take();

    h.socket("/admin", None);
    refuse(&mut h);
    assert_eq!(count(&reconnect_errors), 1);
    assert!(h.manager.reconnecting());
    assert_eq!(timers(&h.mock.take(), Duration::from_millis(2000)).len(), 1);
}

#[test]
fn reconnection_delay_is_capped() {
    let mut h = harness(
        config()
            .reconnection_delay(Duration::from_millis(3000))
            .reconnection_delay_max(Duration::from_millis(5000))
            .build(),
    );
    refuse(&mut h);
    let timer = timers(&h.mock.take(), Duration::from_millis(3000));
    h.handle_io(IoEvent::Timer(timer[0]));
    refuse(&mut h);
    assert_eq!(timers(&h.mock.take(), Duration::from_millis(5000)).len(), 1);
}

#[test]
fn lost_connection_triggers_reconnection() {
    let mut h = harness(config().build());
    let close = record(h.manager.emitter(), "close");
    let socket = h.socket("/admin", None);
    let disconnects = record(&socket, "disconnect");
    let id = h.handshake("abc");
    h.server_send(id, "40/admin");
    h.written();

    h.handle_io(IoEvent::WsClose(id));
    assert_eq!(*close.lock().unwrap(), vec![vec![Value::from("transport close")]]);
    assert_eq!(
        *disconnects.lock().unwrap(),
        vec![vec![Value::from("transport close")]]
    );
    assert!(h.manager.reconnecting());

    let timer = timers(&h.mock.take(), Duration::from_millis(1000));
    h.handle_io(IoEvent::Timer(timer[0]));
    h.handshake("def");
    // The namespace is connected again on the new session.
    assert_eq!(h.written(), vec!["40/admin"]);
}

#[test]
fn disconnect_stops_reconnection() {
    let mut h = harness(config().build());
    let attempts = record(h.manager.emitter(), "reconnect_attempt");
    refuse(&mut h);
    let timer = timers(&h.mock.take(), Duration::from_millis(1000));
    assert_eq!(timer.len(), 1);

    h.manager.disconnect();
    assert!(!h.manager.reconnecting());
    let calls = h.mock.take();
    assert!(
        calls
            .iter()
            .any(|c| matches!(c, Call::ClearTimeout(t) if *t == timer[0]))
    );

    h.handle_io(IoEvent::Timer(timer[0]));
    assert_eq!(count(&attempts), 0);
    assert!(ws_opens(&h.mock.take()).is_empty());
}

#[test]
fn disconnect_while_opening_drops_the_engine() {
    let mut h = harness(config().build());
    let close = record(h.manager.emitter(), "close");
    h.manager.disconnect();
    assert_eq!(h.manager.state(), ManagerState::Closed);
    assert!(h.manager.engine().is_none());
    assert!(ws_closed(&h.mock.take()));
    assert_eq!(count(&close), 0);
}
