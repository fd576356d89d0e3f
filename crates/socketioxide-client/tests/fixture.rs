#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use engineioxide_client::{
    Io, IoEvent, SocketConfig, UpgradeMemory,
    io::{HttpClient, RequestId, Timer, TimerHandle, TransportId, WebSocketConnector},
};
use http::Request;
use socketioxide_client::{Command, Manager, ManagerConfig, ManagerConfigBuilder};
use socketioxide_client_core::{Emitter, Frame, Value};
use tokio::sync::mpsc;
use url::Url;

#[derive(Debug)]
pub enum Call {
    Http(RequestId),
    Abort(RequestId),
    WsOpen(TransportId, String),
    WsSend(TransportId, Frame),
    WsClose(TransportId),
    SetTimeout(TimerHandle, Duration),
    ClearTimeout(TimerHandle),
}

/// Collaborators recording every call instead of performing it.
#[derive(Debug, Default)]
pub struct Mock {
    calls: Mutex<Vec<Call>>,
    next_timer: AtomicU64,
}

impl Mock {
    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

impl HttpClient for Mock {
    fn send(&self, id: RequestId, _req: Request<Bytes>) {
        self.push(Call::Http(id));
    }
    fn abort(&self, id: RequestId) {
        self.push(Call::Abort(id));
    }
}

impl WebSocketConnector for Mock {
    fn open(&self, id: TransportId, uri: String, _protocols: &[String]) {
        self.push(Call::WsOpen(id, uri));
    }
    fn send(&self, id: TransportId, frame: Frame) {
        self.push(Call::WsSend(id, frame));
    }
    fn close(&self, id: TransportId) {
        self.push(Call::WsClose(id));
    }
}

impl Timer for Mock {
    fn set_timeout(&self, after: Duration) -> TimerHandle {
        let handle = TimerHandle(self.next_timer.fetch_add(1, Ordering::Relaxed));
        self.push(Call::SetTimeout(handle, after));
        handle
    }
    fn clear_timeout(&self, handle: TimerHandle) {
        self.push(Call::ClearTimeout(handle));
    }
}

/// A manager talking to a mocked server, along with the receiving side of its command channel.
pub struct Harness {
    pub manager: Manager,
    pub mock: Arc<Mock>,
    pub commands: mpsc::UnboundedReceiver<Command>,
    // Keeps the weak sender given to the manager alive.
    _tx: mpsc::UnboundedSender<Command>,
}

/// A websocket only config without jitter, so that delays are predictable.
pub fn config() -> ManagerConfigBuilder {
    ManagerConfig::builder()
        .randomization_factor(0.0)
        .timeout(None)
        .engine(SocketConfig::builder().transports(["websocket"]).build())
}

/// Log to the test output, filtered by `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_line_number(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness(config: ManagerConfig) -> Harness {
    init_tracing();
    let mock = Arc::new(Mock::default());
    let io = Io::new(mock.clone(), mock.clone(), mock.clone());
    let (tx, commands) = mpsc::unbounded_channel();
    let url = Url::parse("http://localhost:3000").unwrap();
    let manager = Manager::new(&url, config, io, UpgradeMemory::new(), tx.downgrade());
    Harness {
        manager,
        mock,
        commands,
        _tx: tx,
    }
}

pub fn ws_opens(calls: &[Call]) -> Vec<TransportId> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::WsOpen(id, _) => Some(*id),
            _ => None,
        })
        .collect()
}

pub fn ws_sends(calls: &[Call]) -> Vec<Frame> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::WsSend(_, frame) => Some(frame.clone()),
            _ => None,
        })
        .collect()
}

pub fn ws_closed(calls: &[Call]) -> bool {
    calls.iter().any(|c| matches!(c, Call::WsClose(_)))
}

pub fn timers(calls: &[Call], after: Duration) -> Vec<TimerHandle> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::SetTimeout(h, d) if *d == after => Some(*h),
            _ => None,
        })
        .collect()
}

pub fn set_timeouts(calls: &[Call]) -> usize {
    calls
        .iter()
        .filter(|c| matches!(c, Call::SetTimeout(..)))
        .count()
}

/// The engine.io open packet, sent as a websocket text frame.
pub fn open_frame(sid: &str) -> Frame {
    let data = serde_json::json!({
        "sid": sid,
        "upgrades": [],
        "pingInterval": 25000,
        "pingTimeout": 5000,
    });
    Frame::Text(format!("0{data}"))
}

impl Harness {
    pub fn handle_io(&mut self, event: IoEvent) {
        self.manager.handle_io(event);
    }

    /// Accept the websocket opened by the manager and answer the engine.io handshake.
    pub fn handshake(&mut self, sid: &str) -> TransportId {
        let calls = self.mock.take();
        let id = *ws_opens(&calls).last().expect("websocket opened");
        self.handle_io(IoEvent::WsOpen(id));
        self.handle_io(IoEvent::WsMessage(id, open_frame(sid)));
        id
    }

    /// Send a socket.io packet from the server, e.g `40` or `42["hello"]`.
    pub fn server_send(&mut self, id: TransportId, packet: &str) {
        self.handle_io(IoEvent::WsMessage(id, Frame::Text(format!("4{packet}"))));
    }

    /// Send a binary attachment from the server.
    pub fn server_send_binary(&mut self, id: TransportId, data: &[u8]) {
        let mut frame = vec![4];
        frame.extend_from_slice(data);
        self.handle_io(IoEvent::WsMessage(id, Frame::Binary(Bytes::from(frame))));
    }

    /// Fire the drain timers of the websocket until nothing is left to write.
    /// Returns every frame written and the other calls made meanwhile.
    pub fn flush(&mut self) -> (Vec<Frame>, Vec<Call>) {
        let mut frames = Vec::new();
        let mut others = Vec::new();
        loop {
            let calls = self.mock.take();
            frames.extend(ws_sends(&calls));
            let drains = timers(&calls, Duration::ZERO);
            others.extend(calls.into_iter().filter(|c| !matches!(c, Call::WsSend(..))));
            if drains.is_empty() {
                break;
            }
            for drain in drains {
                self.handle_io(IoEvent::Timer(drain));
            }
        }
        (frames, others)
    }

    /// The frames written on the wire, as strings for text frames.
    pub fn written(&mut self) -> Vec<String> {
        self.flush()
            .0
            .into_iter()
            .map(|f| match f {
                Frame::Text(s) => s,
                Frame::Binary(b) => format!("<binary {b:?}>"),
            })
            .collect()
    }

    /// Register the socket of `nsp` and return its listeners.
    pub fn socket(&mut self, nsp: &str, query: Option<&str>) -> Arc<Emitter> {
        let emitter = Arc::new(Emitter::default());
        self.manager
            .add_socket(nsp, query.map(str::to_string), emitter.clone());
        emitter
    }

    /// Execute the commands sent by the ack callbacks.
    pub fn run_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.manager.handle_command(command);
        }
    }
}

pub type Record = Arc<Mutex<Vec<Vec<Value>>>>;

/// Record the arguments of every call of `event` on `emitter`.
pub fn record(emitter: &Emitter, event: &str) -> Record {
    let record = Record::default();
    let r = record.clone();
    emitter.on(event, move |args| r.lock().unwrap().push(args.to_vec()));
    record
}

pub fn count(record: &Record) -> usize {
    record.lock().unwrap().len()
}
