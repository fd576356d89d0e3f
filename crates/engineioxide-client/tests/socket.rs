use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use engineioxide_client::{
    Error, ReadyState, Socket, SocketConfig, SocketEvent, UpgradeMemory,
    io::{IoEvent, RequestKind},
};
use http::header;
use socketioxide_client_core::{EnginePacket, EnginePacketType, PacketOptions, Value};

use fixture::*;

const PING_INTERVAL: Duration = Duration::from_millis(25000);
const DEAD_TIMEOUT: Duration = Duration::from_millis(30000);

fn polling_socket() -> (Socket, Arc<Mock>) {
    let (io, mock) = mock_io();
    let config = SocketConfig::builder().transports(["polling"]).build();
    (Socket::new(config, io, UpgradeMemory::new()), mock)
}

fn open_socket() -> (Socket, Arc<Mock>, Vec<Call>) {
    let (mut socket, mock) = polling_socket();
    let calls = handshake(&mut socket, &mock, &[]);
    events(&mut socket);
    (socket, mock, calls)
}

#[test]
fn handshake_over_polling() {
    let (mut socket, mock) = polling_socket();
    assert_eq!(socket.state(), ReadyState::Opening);

    let calls = mock.take();
    let polls = requests(&calls, RequestKind::Poll);
    assert_eq!(polls.len(), 1);
    let uri = polls[0].1.uri().to_string();
    assert!(
        uri.starts_with("http://localhost/engine.io/?EIO=3&transport=polling&t="),
        "{uri}"
    );
    socket.handle_io(poll_response(polls[0].0, &[open_packet("abc", &[])]));

    let events = events(&mut socket);
    assert!(matches!(&events[0], SocketEvent::Packet(p) if p.kind == EnginePacketType::Open));
    assert!(matches!(&events[1], SocketEvent::Handshake(h) if h.sid == "abc" && h.ping_interval == 25000));
    assert!(matches!(events[2], SocketEvent::Open));
    assert_eq!(socket.id(), Some("abc"));
    assert_eq!(socket.state(), ReadyState::Open);

    let calls = mock.take();
    let polls = requests(&calls, RequestKind::Poll);
    assert_eq!(polls.len(), 1, "the next poll is issued");
    assert!(polls[0].1.uri().to_string().contains("sid=abc"));
    assert_eq!(timers(&calls, PING_INTERVAL).len(), 1);
    assert_eq!(timers(&calls, DEAD_TIMEOUT).len(), 1);
}

#[test]
fn message_received() {
    let (mut socket, mock, calls) = open_socket();
    let (poll, _) = requests(&calls, RequestKind::Poll)[0];
    socket.handle_io(poll_response(
        poll,
        &[EnginePacket::message("hello"), EnginePacket::message("world")],
    ));
    let messages: Vec<_> = events(&mut socket)
        .into_iter()
        .filter_map(|e| match e {
            SocketEvent::Message(v) => Some(v),
            _ => None,
        })
        .collect();
    assert_eq!(messages, vec![Value::from("hello"), Value::from("world")]);
    // Every packet re-arms the heartbeat.
    assert_eq!(timers(&mock.take(), DEAD_TIMEOUT).len(), 2);
}

#[test]
fn write_posts_binary_payload() {
    let (mut socket, mock, _) = open_socket();
    assert!(socket.write("hello", PacketOptions::default()));

    let calls = mock.take();
    let posts = requests(&calls, RequestKind::Post);
    assert_eq!(posts.len(), 1);
    let (post, req) = posts[0];
    assert_eq!(req.method(), http::Method::POST);
    assert_eq!(req.headers()[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(
        req.body().as_ref(),
        &[0, 6, 0xFF, b'4', b'h', b'e', b'l', b'l', b'o']
    );
    assert!(matches!(events(&mut socket)[..], [SocketEvent::Flush]));

    // Writes are buffered while the post is in flight.
    assert!(socket.write("again", PacketOptions::default()));
    assert!(requests(&mock.take(), RequestKind::Post).is_empty());

    socket.handle_io(text_response(post, "ok"));
    assert!(matches!(events(&mut socket)[..], [SocketEvent::Flush]));
    let calls = mock.take();
    let posts = requests(&calls, RequestKind::Post);
    assert_eq!(posts.len(), 1);
    let (post, req) = posts[0];
    assert_eq!(req.body().as_ref(), &[0, 6, 0xFF, b'4', b'a', b'g', b'a', b'i', b'n']);

    socket.handle_io(text_response(post, "ok"));
    assert!(matches!(events(&mut socket)[..], [SocketEvent::Drain]));
}

#[test]
fn ping_and_pong() {
    let (mut socket, mock, calls) = open_socket();
    let interval = timers(&calls, PING_INTERVAL)[0];
    socket.handle_io(IoEvent::Timer(interval));

    let events_ = events(&mut socket);
    assert!(events_.iter().any(|e| matches!(e, SocketEvent::Ping)));
    let calls = mock.take();
    let posts = requests(&calls, RequestKind::Post);
    assert_eq!(posts[0].1.body().as_ref(), &[0, 1, 0xFF, b'2']);
    // The dead timer now waits for the pong only.
    assert_eq!(timers(&calls, Duration::from_millis(5000)).len(), 1);
}

#[test]
fn pong_rearms_ping_interval() {
    let (mut socket, mock, calls) = open_socket();
    let (poll, _) = requests(&calls, RequestKind::Poll)[0];
    socket.handle_io(poll_response(poll, &[EnginePacket::new(EnginePacketType::Pong)]));
    assert!(events(&mut socket).iter().any(|e| matches!(e, SocketEvent::Pong)));
    assert_eq!(timers(&mock.take(), PING_INTERVAL).len(), 1);
}

#[test]
fn ping_timeout_closes() {
    let (mut socket, _mock, calls) = open_socket();
    let dead = timers(&calls, DEAD_TIMEOUT)[0];
    socket.handle_io(IoEvent::Timer(dead));
    assert!(matches!(
        events(&mut socket)[..],
        [SocketEvent::Close {
            reason: "ping timeout",
            ..
        }]
    ));
    assert_eq!(socket.state(), ReadyState::Closed);
    assert_eq!(socket.id(), None);
}

#[test]
fn close_waits_for_drain() {
    let (mut socket, mock, calls) = open_socket();
    let (poll, _) = requests(&calls, RequestKind::Poll)[0];
    socket.write("bye", PacketOptions::default());
    let calls = mock.take();
    let (post, _) = requests(&calls, RequestKind::Post)[0];
    events(&mut socket);

    socket.close();
    assert_eq!(socket.state(), ReadyState::Closing);
    assert!(mock.take().is_empty());
    // Closing twice is a no-op.
    socket.close();

    socket.handle_io(text_response(post, "ok"));
    let events_ = events(&mut socket);
    assert!(matches!(events_[0], SocketEvent::Drain));
    assert!(matches!(
        events_[1],
        SocketEvent::Close {
            reason: "forced close",
            ..
        }
    ));
    assert_eq!(socket.state(), ReadyState::Closed);

    let calls = mock.take();
    let posts = requests(&calls, RequestKind::Post);
    assert_eq!(posts[0].1.body().as_ref(), &[0, 1, 0xFF, b'1']);
    assert!(calls.iter().any(|c| matches!(c, Call::Abort(id) if *id == poll)));

    // Writes after close are dropped.
    assert!(!socket.write("late", PacketOptions::default()));
}

#[test]
fn malformed_payload_closes() {
    let (mut socket, _mock, calls) = open_socket();
    let (poll, _) = requests(&calls, RequestKind::Poll)[0];
    socket.handle_io(text_response(poll, "3:4hi5"));

    let events_ = events(&mut socket);
    assert!(events_.iter().any(|e| matches!(e, SocketEvent::Message(v) if v == &Value::from("hi"))));
    assert!(events_.iter().any(|e| matches!(e, SocketEvent::Error(Error::PacketParse(_)))));
    assert!(matches!(
        events_.last(),
        Some(SocketEvent::Close {
            reason: "transport error",
            ..
        })
    ));
}

#[test]
fn poll_error_closes() {
    let (mut socket, mock) = polling_socket();
    let calls = mock.take();
    let (poll, _) = requests(&calls, RequestKind::Poll)[0];
    let res = http::Response::builder()
        .status(500)
        .body(Bytes::new())
        .unwrap();
    socket.handle_io(IoEvent::Http {
        id: poll,
        result: Ok(res),
    });
    let events_ = events(&mut socket);
    match &events_[0] {
        SocketEvent::Error(err @ Error::Transport { message, .. }) => {
            assert_eq!(*message, "xhr poll error");
            assert_eq!(err.description(), Some("500 Internal Server Error"));
        }
        e => panic!("unexpected event {e:?}"),
    }
    assert!(matches!(
        &events_[1],
        SocketEvent::Close {
            reason: "transport error",
            description: Some(d),
        } if d == "500 Internal Server Error"
    ));
}

#[test]
fn server_close_packet() {
    let (mut socket, _mock, calls) = open_socket();
    let (poll, _) = requests(&calls, RequestKind::Poll)[0];
    socket.handle_io(poll_response(poll, &[EnginePacket::new(EnginePacketType::Close)]));
    assert!(matches!(
        events(&mut socket)[..],
        [SocketEvent::Close {
            reason: "transport close",
            ..
        }]
    ));
}

#[test]
fn no_transports_available() {
    let (io, mock) = mock_io();
    let config = SocketConfig::builder().transports(["carrier-pigeon"]).build();
    let mut socket = Socket::new(config, io, UpgradeMemory::new());
    // Reported asynchronously.
    assert!(socket.poll_event().is_none());

    let calls = mock.take();
    let next_tick = timers(&calls, Duration::ZERO);
    assert_eq!(next_tick.len(), 1);
    socket.handle_io(IoEvent::Timer(next_tick[0]));
    assert!(matches!(
        events(&mut socket)[..],
        [SocketEvent::Error(Error::NoTransports)]
    ));
}

#[test]
fn invalid_handshake() {
    let (mut socket, mock) = polling_socket();
    let calls = mock.take();
    let (poll, _) = requests(&calls, RequestKind::Poll)[0];
    let open = EnginePacket::with_data(EnginePacketType::Open, "{\"sid\":1}");
    socket.handle_io(poll_response(poll, &[open]));
    let events_ = events(&mut socket);
    assert!(events_.iter().any(|e| matches!(e, SocketEvent::Error(Error::Handshake(_)))));
    assert_eq!(socket.state(), ReadyState::Closed);
}
