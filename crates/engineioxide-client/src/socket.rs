//! The engine.io [`Socket`]: connection lifecycle, heartbeat, write buffering and transport
//! upgrades.
//!
//! The socket is a state machine. It starts I/O through the collaborators of its [`Io`] bundle,
//! is fed the completions with [`Socket::handle_io`] and reports what happened as
//! [`SocketEvent`]s, drained with [`Socket::poll_event`].
//!
//! #### Upgrades
//! Once open, if the current transport can be paused, every upgrade offered by the server and
//! allowed by the [`SocketConfig`] is probed: the candidate is opened and sent a `ping probe`.
//! The first candidate answering `pong probe` wins, the other probes are frozen, the current
//! transport is paused and then replaced by the candidate.
//!
//! #### Heartbeat
//! The socket sends a ping every `ping_interval`. Any packet received resets the "connection
//! dead" timer to `ping_interval + ping_timeout`, a ping sets it to `ping_timeout`. When it fires
//! the socket closes with the `"ping timeout"` reason.
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde::Deserialize;
use socketioxide_client_core::{EnginePacket, EnginePacketType, PacketOptions, Value};

use crate::{
    config::SocketConfig,
    errors::Error,
    io::{Io, IoEvent, TimerHandle, TransportId},
    transport::{self, ReadyState, Transport, TransportEvent, TransportType},
};

/// Remembers whether the last connection succeeded over websocket.
///
/// With [`SocketConfig::remember_upgrade`], a socket sharing this memory with a previous one
/// connects with websocket right away.
#[derive(Debug, Clone, Default)]
pub struct UpgradeMemory(Arc<AtomicBool>);

impl UpgradeMemory {
    /// Create an empty memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the last connection succeeded over websocket.
    pub fn websocket_succeeded(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn set(&self, value: bool) {
        self.0.store(value, Ordering::Relaxed);
    }
}

/// The data of the open packet sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// The session id.
    pub sid: String,
    /// Transports the session can be upgraded to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Ping interval in milliseconds.
    pub ping_interval: u64,
    /// Ping timeout in milliseconds.
    pub ping_timeout: u64,
}

/// Events produced by a [`Socket`].
#[derive(Debug)]
pub enum SocketEvent {
    /// The handshake completed.
    Open,
    /// The handshake was received, right before [`SocketEvent::Open`].
    Handshake(Handshake),
    /// Any packet was received.
    Packet(EnginePacket),
    /// A message was received.
    Message(Value),
    /// A ping was sent.
    Ping,
    /// A pong was received.
    Pong,
    /// The write buffer is empty.
    Drain,
    /// The write buffer was handed to the transport.
    Flush,
    /// A probe succeeded, the current transport is being paused.
    Upgrading(TransportType),
    /// The socket now uses another transport.
    Upgrade(TransportType),
    /// A probe failed. The socket keeps its current transport.
    UpgradeError(Error),
    /// The socket failed. A [`SocketEvent::Close`] follows.
    Error(Error),
    /// The socket is closed.
    Close {
        /// Why the socket closed: `"forced close"`, `"transport close"`, `"transport error"` or
        /// `"ping timeout"`.
        reason: &'static str,
        /// Details on the failure, if any.
        description: Option<String>,
    },
}

#[derive(Debug)]
struct Probe {
    transport: Box<dyn Transport>,
    awaiting_pong: bool,
}

/// An engine.io client socket.
#[derive(Debug)]
pub struct Socket {
    config: Arc<SocketConfig>,
    io: Io,
    memory: UpgradeMemory,

    state: ReadyState,
    id: Option<String>,
    transports: Vec<String>,
    transport: Option<Box<dyn Transport>>,
    probes: Vec<Probe>,
    upgrades: Vec<String>,

    ping_interval: Duration,
    ping_timeout: Duration,
    ping_interval_timer: Option<TimerHandle>,
    ping_timeout_timer: Option<TimerHandle>,
    no_transports_timer: Option<TimerHandle>,
    heartbeat_armed: bool,

    write_buffer: Vec<EnginePacket>,
    prev_buffer_len: usize,

    upgrading: bool,
    pending_upgrade: Option<TransportId>,
    close_after_drain: bool,
    close_after_upgrade: bool,

    events: VecDeque<SocketEvent>,
}

impl Socket {
    /// Create a socket and start connecting.
    pub fn new(config: impl Into<Arc<SocketConfig>>, io: Io, memory: UpgradeMemory) -> Self {
        let config = config.into();
        let mut socket = Self {
            transports: config.transports.clone(),
            config,
            io,
            memory,
            state: ReadyState::None,
            id: None,
            transport: None,
            probes: Vec::new(),
            upgrades: Vec::new(),
            ping_interval: Duration::ZERO,
            ping_timeout: Duration::ZERO,
            ping_interval_timer: None,
            ping_timeout_timer: None,
            no_transports_timer: None,
            heartbeat_armed: false,
            write_buffer: Vec::new(),
            prev_buffer_len: 0,
            upgrading: false,
            pending_upgrade: None,
            close_after_drain: false,
            close_after_upgrade: false,
            events: VecDeque::new(),
        };
        socket.open();
        socket
    }

    /// The session id, once the handshake is done.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The socket ready state.
    pub fn state(&self) -> ReadyState {
        self.state
    }

    /// The type of the active transport.
    pub fn transport(&self) -> Option<TransportType> {
        self.transport.as_ref().map(|t| t.kind())
    }

    /// The upgrades offered by the server and allowed by the config.
    pub fn upgrades(&self) -> &[String] {
        &self.upgrades
    }

    /// Returns true while a transport upgrade is in progress.
    pub fn upgrading(&self) -> bool {
        self.upgrading
    }

    /// Pop the next pending event.
    pub fn poll_event(&mut self) -> Option<SocketEvent> {
        self.events.pop_front()
    }

    /// Send a message.
    pub fn write(&mut self, data: impl Into<Value>, options: PacketOptions) -> bool {
        self.send_packet(EnginePacketType::Message, data.into(), options)
    }

    /// Buffer a packet and flush the buffer if possible.
    ///
    /// Returns false if the socket is closing or closed, the packet is dropped.
    pub fn send_packet(
        &mut self,
        kind: EnginePacketType,
        data: Value,
        options: PacketOptions,
    ) -> bool {
        if matches!(self.state, ReadyState::Closing | ReadyState::Closed) {
            tracing::debug!(?kind, "socket closing, dropping packet");
            return false;
        }
        self.write_buffer.push(EnginePacket {
            kind,
            data,
            options,
        });
        self.flush();
        self.pump();
        true
    }

    /// Close the socket once the write buffer is flushed and any upgrade is done.
    pub fn close(&mut self) {
        if !matches!(self.state, ReadyState::Opening | ReadyState::Open) {
            return;
        }
        self.state = ReadyState::Closing;
        if !self.write_buffer.is_empty() {
            tracing::debug!("closing once the write buffer is drained");
            self.close_after_drain = true;
        } else if self.upgrading {
            tracing::debug!("closing once the upgrade is done");
            self.close_after_upgrade = true;
        } else {
            self.close_transport();
        }
        self.pump();
    }

    /// Feed the completion of an operation started by this socket or its transports.
    pub fn handle_io(&mut self, event: IoEvent) {
        match event {
            IoEvent::Timer(handle) => self.on_timer(handle),
            event => {
                let target = event.transport();
                if let Some(transport) = self
                    .transport
                    .as_mut()
                    .filter(|t| Some(t.id()) == target)
                {
                    transport.handle_io(event);
                } else if let Some(probe) = self
                    .probes
                    .iter_mut()
                    .find(|p| Some(p.transport.id()) == target)
                {
                    probe.transport.handle_io(event);
                } else {
                    tracing::trace!(?event, "io event for a stale transport");
                }
            }
        }
        self.pump();
    }

    fn emit(&mut self, event: SocketEvent) {
        self.events.push_back(event);
    }

    fn open(&mut self) {
        loop {
            let name = if self.config.remember_upgrade
                && self.memory.websocket_succeeded()
                && self.transports.iter().any(|t| t == "websocket")
            {
                "websocket".to_string()
            } else if let Some(name) = self.transports.first() {
                name.clone()
            } else {
                tracing::debug!("no transports available");
                self.no_transports_timer = Some(self.io.timer.set_timeout(Duration::ZERO));
                return;
            };

            self.state = ReadyState::Opening;
            match transport::create(&name, self.config.clone(), self.io.clone(), None) {
                Ok(mut transport) => {
                    tracing::debug!(transport = %transport.kind(), "opening");
                    transport.open();
                    self.transport = Some(transport);
                    self.pump();
                    return;
                }
                Err(e) => {
                    tracing::debug!("cannot create transport: {e}");
                    self.transports.retain(|t| t != &name);
                }
            }
        }
    }

    /// Process the events of the transports until none is left.
    fn pump(&mut self) {
        loop {
            if let Some(event) = self.transport.as_mut().and_then(|t| t.poll_event()) {
                self.on_transport_event(event);
                continue;
            }
            let probe_event = self.probes.iter_mut().find_map(|p| {
                let id = p.transport.id();
                p.transport.poll_event().map(|e| (id, e))
            });
            match probe_event {
                Some((id, event)) => self.on_probe_event(id, event),
                None => break,
            }
        }
    }

    fn on_timer(&mut self, handle: TimerHandle) {
        if self.ping_interval_timer == Some(handle) {
            self.ping_interval_timer = None;
            tracing::trace!(timeout = ?self.ping_timeout, "writing ping packet");
            self.ping();
            self.on_heartbeat(Some(self.ping_timeout));
        } else if self.ping_timeout_timer == Some(handle) {
            self.ping_timeout_timer = None;
            self.on_close("ping timeout", None);
        } else if self.no_transports_timer == Some(handle) {
            self.no_transports_timer = None;
            self.emit(SocketEvent::Error(Error::NoTransports));
        } else if let Some(transport) = self.transport.as_mut().filter(|t| t.owns_timer(handle)) {
            transport.handle_io(IoEvent::Timer(handle));
        } else if let Some(probe) = self
            .probes
            .iter_mut()
            .find(|p| p.transport.owns_timer(handle))
        {
            probe.transport.handle_io(IoEvent::Timer(handle));
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {}
            TransportEvent::Packet(packet) => self.on_packet(packet),
            TransportEvent::Drain => self.on_drain(),
            TransportEvent::Close => self.on_close("transport close", None),
            TransportEvent::Error(err) => self.on_error(err),
            TransportEvent::Paused => self.on_paused(),
        }
    }

    fn on_packet(&mut self, packet: EnginePacket) {
        if !matches!(
            self.state,
            ReadyState::Opening | ReadyState::Open | ReadyState::Closing
        ) {
            tracing::debug!(state = ?self.state, "packet received on a closed socket");
            return;
        }
        tracing::trace!(kind = ?packet.kind, data = ?packet.data, "socket receive");
        self.emit(SocketEvent::Packet(packet.clone()));
        if self.heartbeat_armed {
            self.on_heartbeat(None);
        }

        match packet.kind {
            EnginePacketType::Open => {
                let res = match &packet.data {
                    Value::Str(data) => serde_json::from_str::<Handshake>(data),
                    data => serde_json::from_str::<Handshake>(&data.to_json_string()),
                };
                match res {
                    Ok(handshake) => self.on_handshake(handshake),
                    Err(e) => self.on_error(Error::Handshake(e)),
                }
            }
            EnginePacketType::Pong => {
                self.set_ping();
                self.emit(SocketEvent::Pong);
            }
            EnginePacketType::Error => self.on_error(Error::PacketParse(packet.data)),
            EnginePacketType::Message => self.emit(SocketEvent::Message(packet.data)),
            _ => {}
        }
    }

    fn on_handshake(&mut self, handshake: Handshake) {
        tracing::debug!(sid = %handshake.sid, "handshake");
        self.emit(SocketEvent::Handshake(handshake.clone()));
        if let Some(transport) = self.transport.as_mut() {
            transport.set_sid(handshake.sid.clone());
        }
        self.id = Some(handshake.sid);
        self.upgrades = handshake
            .upgrades
            .into_iter()
            .filter(|u| self.transports.contains(u))
            .collect();
        self.ping_interval = Duration::from_millis(handshake.ping_interval);
        self.ping_timeout = Duration::from_millis(handshake.ping_timeout);

        self.on_open();
        if self.state == ReadyState::Closed {
            return;
        }
        self.set_ping();
        self.heartbeat_armed = true;
        self.on_heartbeat(None);
    }

    fn on_open(&mut self) {
        self.state = ReadyState::Open;
        let kind = self.transport();
        tracing::debug!(transport = ?kind, "socket open");
        self.memory.set(kind == Some(TransportType::Websocket));
        self.emit(SocketEvent::Open);
        self.flush();

        let pausable = self.transport.as_ref().is_some_and(|t| t.supports_pause());
        if self.state == ReadyState::Open && self.config.upgrade && pausable {
            tracing::debug!(upgrades = ?self.upgrades, "starting upgrade probes");
            for name in self.upgrades.clone() {
                self.probe(&name);
            }
        }
    }

    fn probe(&mut self, name: &str) {
        tracing::debug!(transport = name, "probing transport");
        self.memory.set(false);
        match transport::create(name, self.config.clone(), self.io.clone(), self.id.clone()) {
            Ok(mut transport) => {
                transport.open();
                self.probes.push(Probe {
                    transport,
                    awaiting_pong: false,
                });
            }
            Err(e) => tracing::debug!("cannot probe transport: {e}"),
        }
    }

    fn on_probe_event(&mut self, id: TransportId, event: TransportEvent) {
        let Some(probe) = self.probes.iter_mut().find(|p| p.transport.id() == id) else {
            return;
        };
        let kind = probe.transport.kind();
        match event {
            TransportEvent::Open => {
                let current_binary = self.transport.as_ref().is_some_and(|t| t.supports_binary());
                if self.config.only_binary_upgrades
                    && current_binary
                    && !probe.transport.supports_binary()
                {
                    tracing::debug!(transport = %kind, "upgrade would lose binary support");
                    self.freeze_probe(id);
                    return;
                }
                tracing::debug!(transport = %kind, "probe transport opened");
                probe.awaiting_pong = true;
                probe
                    .transport
                    .send(&[EnginePacket::with_data(EnginePacketType::Ping, "probe")]);
            }
            TransportEvent::Packet(packet) if probe.awaiting_pong => {
                probe.awaiting_pong = false;
                let is_probe_pong = packet.kind == EnginePacketType::Pong
                    && packet.data.as_str().is_ok_and(|d| d == "probe");
                if is_probe_pong {
                    tracing::debug!(transport = %kind, "probe transport pong");
                    self.upgrading = true;
                    self.pending_upgrade = Some(id);
                    self.emit(SocketEvent::Upgrading(kind));
                    self.memory.set(kind == TransportType::Websocket);
                    let others: Vec<_> = self
                        .probes
                        .iter()
                        .map(|p| p.transport.id())
                        .filter(|&other| other != id)
                        .collect();
                    for other in others {
                        tracing::debug!(transport = %kind, "works, aborting other probes");
                        self.freeze_probe(other);
                    }
                    if let Some(transport) = self.transport.as_mut() {
                        tracing::debug!(transport = %transport.kind(), "pausing current transport");
                        transport.pause();
                    }
                } else {
                    tracing::debug!(transport = %kind, "probe transport failed");
                    self.freeze_probe(id);
                    self.emit(SocketEvent::UpgradeError(Error::ProbeFailed(kind)));
                }
            }
            TransportEvent::Packet(packet) => {
                tracing::trace!(?packet, "ignoring packet on probe transport");
            }
            TransportEvent::Error(err) => self.on_probe_failure(id, err),
            TransportEvent::Close => self.on_probe_failure(
                id,
                Error::Transport {
                    transport: kind,
                    message: "transport closed",
                    description: None,
                },
            ),
            TransportEvent::Drain | TransportEvent::Paused => {}
        }
    }

    fn on_probe_failure(&mut self, id: TransportId, err: Error) {
        self.freeze_probe(id);
        if self.pending_upgrade == Some(id) {
            // The current transport is already paused, there is nothing left to fall back to.
            self.pending_upgrade = None;
            self.upgrading = false;
            let description = err.to_string();
            self.emit(SocketEvent::UpgradeError(err));
            self.on_close("transport error", Some(description));
        } else {
            self.emit(SocketEvent::UpgradeError(err));
        }
    }

    fn freeze_probe(&mut self, id: TransportId) {
        if let Some(pos) = self.probes.iter().position(|p| p.transport.id() == id) {
            let mut probe = self.probes.remove(pos);
            probe.transport.close();
            probe.transport.discard_events();
        }
    }

    /// The current transport is paused: swap it with the winning probe.
    fn on_paused(&mut self) {
        let Some(id) = self.pending_upgrade.take() else {
            return;
        };
        let Some(pos) = self.probes.iter().position(|p| p.transport.id() == id) else {
            return;
        };
        let mut probe = self.probes.remove(pos);
        let kind = probe.transport.kind();
        tracing::debug!(transport = %kind, "changing transport and sending upgrade packet");

        probe
            .transport
            .send(&[EnginePacket::new(EnginePacketType::Upgrade)]);
        if let Some(mut previous) = self.transport.replace(probe.transport) {
            previous.discard_events();
        }
        self.emit(SocketEvent::Upgrade(kind));
        self.upgrading = false;
        self.flush();

        if self.close_after_upgrade {
            self.close_after_upgrade = false;
            self.close_transport();
        }
    }

    fn set_ping(&mut self) {
        if let Some(timer) = self.ping_interval_timer.take() {
            self.io.timer.clear_timeout(timer);
        }
        self.ping_interval_timer = Some(self.io.timer.set_timeout(self.ping_interval));
    }

    fn ping(&mut self) {
        if self.send_packet(EnginePacketType::Ping, Value::None, PacketOptions::default()) {
            self.emit(SocketEvent::Ping);
        }
    }

    /// Reset the "connection dead" timer, by default to `ping_interval + ping_timeout`.
    fn on_heartbeat(&mut self, timeout: Option<Duration>) {
        if let Some(timer) = self.ping_timeout_timer.take() {
            self.io.timer.clear_timeout(timer);
        }
        let timeout = timeout.unwrap_or(self.ping_interval + self.ping_timeout);
        self.ping_timeout_timer = Some(self.io.timer.set_timeout(timeout));
    }

    fn on_drain(&mut self) {
        self.write_buffer.drain(..self.prev_buffer_len);
        self.prev_buffer_len = 0;
        if !self.write_buffer.is_empty() {
            self.flush();
            return;
        }
        self.emit(SocketEvent::Drain);
        if self.close_after_drain {
            self.close_after_drain = false;
            if self.upgrading {
                self.close_after_upgrade = true;
            } else {
                self.close_transport();
            }
        }
    }

    fn flush(&mut self) {
        if !matches!(self.state, ReadyState::Open | ReadyState::Closing)
            || self.upgrading
            || self.write_buffer.is_empty()
        {
            return;
        }
        let Some(transport) = self.transport.as_mut().filter(|t| t.writable()) else {
            return;
        };
        tracing::trace!(len = self.write_buffer.len(), "flushing packets");
        if transport.send(&self.write_buffer) {
            self.prev_buffer_len = self.write_buffer.len();
            self.emit(SocketEvent::Flush);
        }
    }

    fn close_transport(&mut self) {
        tracing::debug!("socket closing, telling transport to close");
        self.on_close("forced close", None);
    }

    fn on_error(&mut self, err: Error) {
        tracing::debug!("socket error: {err}");
        self.memory.set(false);
        let description = err
            .description()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        self.emit(SocketEvent::Error(err));
        self.on_close("transport error", Some(description));
    }

    fn on_close(&mut self, reason: &'static str, description: Option<String>) {
        if !matches!(
            self.state,
            ReadyState::Opening | ReadyState::Open | ReadyState::Closing
        ) {
            return;
        }
        tracing::debug!(reason, ?description, "socket close");
        for timer in [self.ping_interval_timer.take(), self.ping_timeout_timer.take()]
            .into_iter()
            .flatten()
        {
            self.io.timer.clear_timeout(timer);
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
            transport.discard_events();
        }
        for mut probe in self.probes.drain(..) {
            probe.transport.close();
            probe.transport.discard_events();
        }

        self.heartbeat_armed = false;
        self.upgrading = false;
        self.pending_upgrade = None;
        self.close_after_drain = false;
        self.close_after_upgrade = false;
        self.state = ReadyState::Closed;
        self.id = None;
        self.emit(SocketEvent::Close {
            reason,
            description,
        });
        self.write_buffer.clear();
        self.prev_buffer_len = 0;
    }
}
