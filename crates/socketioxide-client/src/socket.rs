//! The namespace socket.
//!
//! A [`NsSocket`] is owned by its [`Manager`](crate::Manager), which feeds it the packets of
//! its namespace and sends the packets it queues. User listeners are registered on its
//! [`Emitter`].
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use socketioxide_client_core::{Emitter, Function, SocketPacket, SocketPacketType, Value};
use tokio::sync::mpsc::WeakUnboundedSender;

use crate::manager::Command;

/// Events only emitted locally. Emitting one of them never sends anything to the server.
pub const RESERVED_EVENTS: [&str; 13] = [
    "connect",
    "connect_error",
    "connect_timeout",
    "connecting",
    "disconnect",
    "error",
    "reconnect",
    "reconnect_attempt",
    "reconnect_failed",
    "reconnect_error",
    "reconnecting",
    "ping",
    "pong",
];

/// The connection state of a namespace socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Not connected, or disconnected.
    Disconnected,
    /// Waiting for the server to accept the namespace.
    Connecting,
    /// The server accepted the namespace.
    Connected,
}

/// A socket bound to a namespace of a [`Manager`](crate::Manager).
#[derive(Debug)]
pub struct NsSocket {
    nsp: String,
    query: Option<String>,
    emitter: Arc<Emitter>,
    commands: WeakUnboundedSender<Command>,

    state: SocketState,
    subscribed: bool,
    id: Option<String>,

    ids: u64,
    acks: HashMap<u64, Function>,
    receive_buffer: Vec<Vec<Value>>,
    send_buffer: Vec<SocketPacket>,

    outbox: VecDeque<SocketPacket>,
    destroyed: bool,
}

impl NsSocket {
    pub(crate) fn new(
        nsp: String,
        query: Option<String>,
        emitter: Arc<Emitter>,
        commands: WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            nsp,
            query,
            emitter,
            commands,
            state: SocketState::Disconnected,
            subscribed: false,
            id: None,
            ids: 0,
            acks: HashMap::new(),
            receive_buffer: Vec::new(),
            send_buffer: Vec::new(),
            outbox: VecDeque::new(),
            destroyed: false,
        }
    }

    /// The namespace.
    pub fn nsp(&self) -> &str {
        &self.nsp
    }

    /// The session id, set once connected.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The connection state.
    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Returns true once the server accepted the namespace.
    pub fn connected(&self) -> bool {
        self.state == SocketState::Connected
    }

    /// The listeners of this socket.
    pub fn emitter(&self) -> &Arc<Emitter> {
        &self.emitter
    }

    /// Returns true while the socket receives the events of its manager.
    pub(crate) fn subscribed(&self) -> bool {
        self.subscribed
    }

    pub(crate) fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    /// Packets to send, and whether the socket asked to be removed from the manager.
    pub(crate) fn take_outbox(&mut self) -> (VecDeque<SocketPacket>, bool) {
        let destroyed = std::mem::take(&mut self.destroyed);
        (std::mem::take(&mut self.outbox), destroyed)
    }

    /// Start connecting. `manager_open` tells if the shared connection is already open.
    pub(crate) fn open(&mut self, manager_open: bool) {
        self.subscribed = true;
        self.state = SocketState::Connecting;
        if manager_open {
            self.on_open();
        }
        self.emitter.emit("connecting", &[]);
    }

    /// Emit an event. Reserved events are only dispatched to the local listeners.
    ///
    /// If the last argument is a [`Value::Function`], it is called with the arguments of the
    /// server acknowledgement.
    pub(crate) fn emit(&mut self, event: &str, mut args: Vec<Value>) {
        if RESERVED_EVENTS.contains(&event) {
            self.emitter.emit(event, &args);
            return;
        }

        let ack = match args.last() {
            Some(Value::Function(f)) => Some(f.clone()),
            _ => None,
        };
        if ack.is_some() {
            args.pop();
        }

        let mut data = Vec::with_capacity(args.len() + 1);
        data.push(Value::from(event));
        data.extend(args);
        let mut packet = SocketPacket::event(self.nsp.clone(), data);

        if let Some(ack) = ack {
            tracing::debug!(nsp = self.nsp, id = self.ids, "emitting packet with ack id");
            self.acks.insert(self.ids, ack);
            packet.id = Some(self.ids);
            self.ids += 1;
        }

        if self.connected() {
            self.outbox.push_back(packet);
        } else {
            tracing::trace!(nsp = self.nsp, event, "not connected, buffering packet");
            self.send_buffer.push(packet);
        }
    }

    /// Answer the server event `id`.
    pub(crate) fn ack(&mut self, id: u64, args: Vec<Value>) {
        tracing::debug!(nsp = self.nsp, id, "sending ack");
        self.outbox
            .push_back(SocketPacket::ack(self.nsp.clone(), args, id));
    }

    /// The shared connection is open.
    pub(crate) fn on_open(&mut self) {
        tracing::debug!(nsp = self.nsp, "transport is open - connecting");
        if self.nsp != "/" {
            let mut packet = SocketPacket::connect(self.nsp.clone());
            packet.query = self.query.clone();
            self.outbox.push_back(packet);
        }
    }

    /// The shared connection closed.
    pub(crate) fn on_close(&mut self, reason: &str) {
        tracing::debug!(nsp = self.nsp, reason, "close");
        self.state = SocketState::Disconnected;
        self.id = None;
        self.emitter.emit("disconnect", &[Value::from(reason)]);
    }

    /// A packet for this namespace was received. `sid` is the engine session id.
    pub(crate) fn on_packet(&mut self, packet: SocketPacket, sid: Option<&str>) {
        match packet.kind {
            SocketPacketType::Connect => self.on_connect(sid),
            SocketPacketType::Event | SocketPacketType::BinaryEvent => self.on_event(packet),
            SocketPacketType::Ack | SocketPacketType::BinaryAck => self.on_ack(packet),
            SocketPacketType::Disconnect => self.on_disconnect(),
            SocketPacketType::Error => {
                self.emitter.emit("error", &[packet.data]);
            }
        }
    }

    fn on_event(&mut self, packet: SocketPacket) {
        let mut args = match packet.data.into_array() {
            Ok(args) if !args.is_empty() => args,
            _ => {
                tracing::warn!(nsp = self.nsp, "event packet without event name, dropping");
                return;
            }
        };
        if let Some(id) = packet.id {
            tracing::trace!(nsp = self.nsp, id, "attaching ack callback to event");
            args.push(self.ack_callback(id));
        }

        if self.connected() {
            self.dispatch(args);
        } else {
            self.receive_buffer.push(args);
        }
    }

    /// Call the listeners of the event named by the first argument.
    fn dispatch(&self, args: Vec<Value>) {
        match args.first().map(Value::as_str) {
            Some(Ok(event)) => {
                tracing::trace!(nsp = self.nsp, event, "emitting event");
                self.emitter.emit(event, &args[1..]);
            }
            _ => tracing::warn!(nsp = self.nsp, "invalid event name, dropping"),
        }
    }

    /// A callback sending an ack packet for `id`. Only the first call has an effect.
    fn ack_callback(&self, id: u64) -> Value {
        let sent = AtomicBool::new(false);
        let nsp = self.nsp.clone();
        let commands = self.commands.clone();
        Value::function(move |args| {
            if sent.swap(true, Ordering::SeqCst) {
                return;
            }
            match commands.upgrade() {
                Some(tx) => {
                    tx.send(Command::Ack {
                        nsp: nsp.clone(),
                        id,
                        args,
                    })
                    .ok();
                }
                None => tracing::debug!(nsp, id, "manager gone, dropping ack"),
            }
        })
    }

    fn on_ack(&mut self, packet: SocketPacket) {
        let Some(id) = packet.id else {
            return;
        };
        match self.acks.remove(&id) {
            Some(ack) => {
                tracing::debug!(nsp = self.nsp, id, "calling ack");
                let args = match packet.data {
                    Value::Array(args) => args,
                    Value::None => Vec::new(),
                    data => vec![data],
                };
                ack.call(args);
            }
            None => tracing::debug!(nsp = self.nsp, id, "bad ack"),
        }
    }

    fn on_connect(&mut self, sid: Option<&str>) {
        tracing::debug!(nsp = self.nsp, ?sid, "connected");
        self.state = SocketState::Connected;
        self.id = sid.map(str::to_string);
        self.emitter.emit("connect", &[]);
        self.emit_buffered();
    }

    fn emit_buffered(&mut self) {
        for args in std::mem::take(&mut self.receive_buffer) {
            self.dispatch(args);
        }
        self.outbox.extend(self.send_buffer.drain(..));
    }

    fn on_disconnect(&mut self) {
        tracing::debug!(nsp = self.nsp, "server disconnect");
        self.destroy();
        self.on_close("io server disconnect");
    }

    /// Stop receiving the events of the manager and ask to be removed from it.
    fn destroy(&mut self) {
        self.subscribed = false;
        self.destroyed = true;
    }

    /// Disconnect from the namespace.
    pub(crate) fn close(&mut self) {
        let connected = self.connected();
        if connected {
            tracing::debug!(nsp = self.nsp, "performing disconnect");
            self.outbox
                .push_back(SocketPacket::disconnect(self.nsp.clone()));
        }
        self.destroy();
        if connected {
            self.on_close("io client disconnect");
        } else {
            self.state = SocketState::Disconnected;
        }
    }
}
