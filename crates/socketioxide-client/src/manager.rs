//! The [`Manager`] owns the engine.io connection shared by the namespace sockets.
//!
//! It is a sans-io state machine like the engine [`Socket`]: I/O completions are fed with
//! [`Manager::handle_io`] and user requests with [`Manager::handle_command`]. Events are
//! dispatched synchronously to the listeners of the manager [`Emitter`] and of the namespace
//! sockets.
//!
//! #### Reconnection
//! When the connection is lost, or when the first connection attempt fails, the manager waits
//! for a delay given by its [`Backoff`] and connects again, until
//! [`ManagerConfig::reconnection_attempts`] is reached. An explicit [`Manager::disconnect`]
//! stops the reconnection loop until the next [`Manager::connect`].
use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use engineioxide_client::{
    Io, IoEvent, Socket, SocketConfig, SocketEvent, UpgradeMemory, io::TimerHandle,
};
use socketioxide_client_core::{
    Backoff, Emitter, Frame, SocketPacket, SocketPacketType, Value,
};
use tokio::sync::mpsc::WeakUnboundedSender;
use url::Url;

use crate::{
    config::ManagerConfig,
    errors::Error,
    parser::{Decoder, Encoder},
    socket::{NsSocket, SocketState},
};

/// A callback invoked once the pending connection attempt resolves.
pub type ConnectFn = Box<dyn FnOnce(Result<(), &Error>) + Send>;

/// Requests sent to a [`Manager`] by the user handles and the ack callbacks.
pub enum Command {
    /// Open the connection.
    Connect(Option<ConnectFn>),
    /// Register the socket of a namespace, sharing `emitter` with the user handle.
    Socket {
        /// The namespace.
        nsp: String,
        /// Query sent with the connect packet.
        query: Option<String>,
        /// Listeners of the namespace socket.
        emitter: Arc<Emitter>,
    },
    /// Connect a namespace.
    Open(String),
    /// Emit an event on a namespace.
    Emit {
        /// The namespace.
        nsp: String,
        /// The event name.
        event: String,
        /// The event arguments. A trailing [`Value::Function`] is an ack callback.
        args: Vec<Value>,
    },
    /// Answer a server event.
    Ack {
        /// The namespace.
        nsp: String,
        /// The ack id of the server event.
        id: u64,
        /// The ack arguments.
        args: Vec<Value>,
    },
    /// Disconnect a namespace.
    Close(String),
    /// Close the connection and stop reconnecting.
    Disconnect,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect(cb) => f.debug_tuple("Connect").field(&cb.is_some()).finish(),
            Command::Socket { nsp, query, .. } => f
                .debug_struct("Socket")
                .field("nsp", nsp)
                .field("query", query)
                .finish(),
            Command::Open(nsp) => f.debug_tuple("Open").field(nsp).finish(),
            Command::Emit { nsp, event, args } => f
                .debug_struct("Emit")
                .field("nsp", nsp)
                .field("event", event)
                .field("args", args)
                .finish(),
            Command::Ack { nsp, id, args } => f
                .debug_struct("Ack")
                .field("nsp", nsp)
                .field("id", id)
                .field("args", args)
                .finish(),
            Command::Close(nsp) => f.debug_tuple("Close").field(nsp).finish(),
            Command::Disconnect => f.write_str("Disconnect"),
        }
    }
}

/// The manager ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    #[allow(missing_docs)]
    Closed,
    #[allow(missing_docs)]
    Opening,
    #[allow(missing_docs)]
    Open,
}

enum ConnectCallback {
    Reconnect,
    User(ConnectFn),
}

/// What the manager currently listens to on the engine socket.
enum Subs {
    None,
    Connecting {
        callbacks: Vec<ConnectCallback>,
        timer: Option<TimerHandle>,
    },
    Open,
}

impl fmt::Debug for Subs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subs::None => f.write_str("None"),
            Subs::Connecting { callbacks, timer } => f
                .debug_struct("Connecting")
                .field("callbacks", &callbacks.len())
                .field("timer", timer)
                .finish(),
            Subs::Open => f.write_str("Open"),
        }
    }
}

/// A socket.io connection manager. See the [module docs](self).
#[derive(Debug)]
pub struct Manager {
    config: Arc<ManagerConfig>,
    engine_config: Arc<SocketConfig>,
    io: Io,
    memory: UpgradeMemory,
    commands: WeakUnboundedSender<Command>,
    emitter: Arc<Emitter>,

    state: ManagerState,
    engine: Option<Socket>,
    subs: Subs,
    backoff: Backoff,
    reconnecting: bool,
    skip_reconnect: bool,
    reconnect_timer: Option<TimerHandle>,

    encoder: Encoder,
    decoder: Decoder,
    encoding: bool,
    packet_buffer: VecDeque<SocketPacket>,
    last_ping: Option<Instant>,

    nsps: HashMap<String, NsSocket>,
    connecting: HashSet<String>,
}

impl Manager {
    /// Create a manager for the server at `url`. It connects right away if
    /// [`ManagerConfig::auto_connect`] is set.
    ///
    /// Ack callbacks handed to the listeners answer through `commands`.
    pub fn new(
        url: &Url,
        config: ManagerConfig,
        io: Io,
        memory: UpgradeMemory,
        commands: WeakUnboundedSender<Command>,
    ) -> Self {
        let backoff = Backoff::new(
            config.reconnection_delay,
            config.reconnection_delay_max,
            2,
            config.randomization_factor,
        );
        let engine_config = Arc::new(config.engine_config(url));
        let auto_connect = config.auto_connect;
        let mut manager = Self {
            config: Arc::new(config),
            engine_config,
            io,
            memory,
            commands,
            emitter: Arc::default(),
            state: ManagerState::Closed,
            engine: None,
            subs: Subs::None,
            backoff,
            reconnecting: false,
            skip_reconnect: false,
            reconnect_timer: None,
            encoder: Encoder,
            decoder: Decoder::new(),
            encoding: false,
            packet_buffer: VecDeque::new(),
            last_ping: None,
            nsps: HashMap::new(),
            connecting: HashSet::new(),
        };
        if auto_connect {
            manager.connect();
        }
        manager
    }

    /// The manager config.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The listeners of the manager: `open`, `close`, `packet` and every event broadcast to
    /// the namespaces.
    pub fn emitter(&self) -> &Arc<Emitter> {
        &self.emitter
    }

    /// The manager ready state.
    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// The engine.io session id, once connected.
    pub fn engine_id(&self) -> Option<&str> {
        self.engine.as_ref().and_then(Socket::id)
    }

    /// The engine.io socket, if any.
    pub fn engine(&self) -> Option<&Socket> {
        self.engine.as_ref()
    }

    /// Returns true while a reconnection is scheduled or in progress.
    pub fn reconnecting(&self) -> bool {
        self.reconnecting
    }

    /// Number of reconnection attempts since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// The socket of namespace `nsp`, if registered.
    pub fn socket(&self, nsp: &str) -> Option<&NsSocket> {
        self.nsps.get(nsp)
    }

    /// Open the connection. No-op if it is open or opening.
    pub fn connect(&mut self) {
        self.open(None);
        self.pump();
    }

    /// Open the connection and call `callback` once the attempt resolves.
    ///
    /// A failed attempt is not retried when a callback is given.
    pub fn connect_with(&mut self, callback: impl FnOnce(Result<(), &Error>) + Send + 'static) {
        self.open(Some(ConnectCallback::User(Box::new(callback))));
        self.pump();
    }

    /// Register the socket of namespace `nsp` if needed, and connect it if
    /// [`ManagerConfig::auto_connect`] is set.
    pub fn add_socket(&mut self, nsp: &str, query: Option<String>, emitter: Arc<Emitter>) {
        if !self.nsps.contains_key(nsp) {
            tracing::debug!(nsp, "creating socket");
            let socket = NsSocket::new(nsp.to_string(), query, emitter, self.commands.clone());
            self.nsps.insert(nsp.to_string(), socket);
        }
        if self.config.auto_connect {
            self.open_socket(nsp);
        }
    }

    /// Connect the socket of namespace `nsp`, opening the connection if needed.
    pub fn open_socket(&mut self, nsp: &str) {
        match self.nsps.get_mut(nsp) {
            Some(socket) if socket.connected() => return,
            Some(_) => {}
            None => {
                tracing::warn!(nsp, "unknown namespace");
                return;
            }
        }
        self.connecting.insert(nsp.to_string());
        self.open(None);
        let open = self.state == ManagerState::Open;
        if let Some(socket) = self.nsps.get_mut(nsp) {
            socket.open(open);
        }
        self.drain_socket(nsp);
        self.pump();
    }

    /// Emit an event on namespace `nsp`.
    pub fn emit(&mut self, nsp: &str, event: &str, args: Vec<Value>) {
        match self.nsps.get_mut(nsp) {
            Some(socket) => socket.emit(event, args),
            None => {
                tracing::warn!(nsp, event, "unknown namespace, dropping event");
                return;
            }
        }
        self.drain_socket(nsp);
        self.pump();
    }

    /// Disconnect the socket of namespace `nsp`.
    pub fn close_socket(&mut self, nsp: &str) {
        if let Some(socket) = self.nsps.get_mut(nsp) {
            socket.close();
            self.drain_socket(nsp);
            self.pump();
        }
    }

    /// Forget namespace `nsp`. The connection is closed once no namespace is left connecting.
    pub fn destroy_socket(&mut self, nsp: &str) {
        self.connecting.remove(nsp);
        if self.connecting.is_empty() {
            self.disconnect();
        }
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&mut self) {
        tracing::debug!("disconnect");
        self.skip_reconnect = true;
        self.reconnecting = false;
        if let Some(timer) = self.reconnect_timer.take() {
            self.io.timer.clear_timeout(timer);
        }
        let opening = self.state == ManagerState::Opening;
        if opening {
            // No close event follows since the connection never opened.
            self.cleanup();
        }
        self.backoff.reset();
        self.state = ManagerState::Closed;
        if let Some(engine) = self.engine.as_mut() {
            engine.close();
        }
        if opening {
            self.engine = None;
        }
        self.pump();
    }

    /// Encode and write a packet. Packets are written one at a time so that the attachments of
    /// a binary packet directly follow its header.
    pub fn send_packet(&mut self, mut packet: SocketPacket) {
        if packet.kind == SocketPacketType::Connect {
            if let Some(query) = packet.query.take() {
                packet.nsp.push('?');
                packet.nsp.push_str(&query);
            }
        }
        if self.encoding {
            self.packet_buffer.push_back(packet);
            return;
        }

        tracing::trace!(?packet, "writing packet");
        self.encoding = true;
        let frames = self.encoder.encode(&packet);
        match self.engine.as_mut() {
            Some(engine) => {
                for frame in frames {
                    engine.write(Value::from(frame), packet.options);
                }
            }
            None => tracing::debug!(nsp = packet.nsp, "no connection, dropping packet"),
        }
        self.encoding = false;
        self.process_packet_queue();
    }

    fn process_packet_queue(&mut self) {
        if !self.encoding {
            if let Some(packet) = self.packet_buffer.pop_front() {
                self.send_packet(packet);
            }
        }
    }

    /// Feed the completion of an operation started by this manager or its engine socket.
    pub fn handle_io(&mut self, event: IoEvent) {
        match event {
            IoEvent::Timer(handle) if self.reconnect_timer == Some(handle) => {
                self.reconnect_timer = None;
                self.on_reconnect_timer();
            }
            IoEvent::Timer(handle)
                if matches!(self.subs, Subs::Connecting { timer: Some(t), .. } if t == handle) =>
            {
                self.on_connect_timeout();
            }
            event => match self.engine.as_mut() {
                Some(engine) => engine.handle_io(event),
                None => tracing::trace!(?event, "no engine socket, dropping io event"),
            },
        }
        self.pump();
    }

    /// Execute a user request.
    pub fn handle_command(&mut self, command: Command) {
        tracing::trace!(?command, "command");
        match command {
            Command::Connect(Some(callback)) => self.connect_with(callback),
            Command::Connect(None) => self.connect(),
            Command::Socket {
                nsp,
                query,
                emitter,
            } => self.add_socket(&nsp, query, emitter),
            Command::Open(nsp) => self.open_socket(&nsp),
            Command::Emit { nsp, event, args } => self.emit(&nsp, &event, args),
            Command::Ack { nsp, id, args } => {
                if let Some(socket) = self.nsps.get_mut(&nsp) {
                    socket.ack(id, args);
                    self.drain_socket(&nsp);
                    self.pump();
                }
            }
            Command::Close(nsp) => self.close_socket(&nsp),
            Command::Disconnect => self.disconnect(),
        }
    }

    /// Emit an event to the manager listeners and to every namespace socket.
    fn emit_all(&self, event: &str, args: &[Value]) {
        self.emitter.emit(event, args);
        for socket in self.nsps.values() {
            socket.emitter().emit(event, args);
        }
    }

    /// Send the packets queued by the socket of `nsp` and handle its removal request.
    fn drain_socket(&mut self, nsp: &str) {
        let Some(socket) = self.nsps.get_mut(nsp) else {
            return;
        };
        let (packets, destroyed) = socket.take_outbox();
        for packet in packets {
            self.send_packet(packet);
        }
        if destroyed {
            self.destroy_socket(nsp);
        }
    }

    fn drain_sockets(&mut self) {
        let nsps: Vec<String> = self.nsps.keys().cloned().collect();
        for nsp in nsps {
            self.drain_socket(&nsp);
        }
    }

    fn open(&mut self, callback: Option<ConnectCallback>) {
        match (&mut self.subs, self.state) {
            (_, ManagerState::Open) => {
                if let Some(ConnectCallback::User(callback)) = callback {
                    callback(Ok(()));
                }
                return;
            }
            (Subs::Connecting { callbacks, .. }, ManagerState::Opening) => {
                callbacks.extend(callback);
                return;
            }
            _ => {}
        }

        tracing::debug!(
            host = self.engine_config.hostname,
            port = self.engine_config.port,
            "opening"
        );
        let engine = Socket::new(
            self.engine_config.clone(),
            self.io.clone(),
            self.memory.clone(),
        );
        self.engine = Some(engine);
        self.state = ManagerState::Opening;
        self.skip_reconnect = false;

        let timer = self.config.timeout.map(|timeout| {
            tracing::debug!(?timeout, "connect attempt will timeout");
            self.io.timer.set_timeout(timeout)
        });
        let mut callbacks: Vec<ConnectCallback> = callback.into_iter().collect();
        if let Some(pending) = self.reconnect_timer.take() {
            // This attempt replaces the scheduled reconnection.
            tracing::debug!("opening during reconnection backoff");
            self.io.timer.clear_timeout(pending);
            callbacks.push(ConnectCallback::Reconnect);
        }
        self.subs = Subs::Connecting { callbacks, timer };
    }

    /// Process the events of the engine socket until none is left.
    fn pump(&mut self) {
        while let Some(event) = self.engine.as_mut().and_then(Socket::poll_event) {
            self.on_engine_event(event);
        }
    }

    fn on_engine_event(&mut self, event: SocketEvent) {
        let connecting = matches!(self.subs, Subs::Connecting { .. });
        let open = matches!(self.subs, Subs::Open);
        match event {
            SocketEvent::Open if connecting => self.on_open(),
            SocketEvent::Error(err) if connecting => self.on_connect_error(Error::Engine(err)),
            SocketEvent::Close { reason, .. } if connecting => {
                tracing::debug!(reason, "closed while connecting");
                self.on_connect_error(Error::Closed);
            }
            SocketEvent::Message(data) if open => self.on_data(data),
            SocketEvent::Ping if open => self.on_ping(),
            SocketEvent::Pong if open => self.on_pong(),
            SocketEvent::Error(err) if open => {
                tracing::debug!("error: {err}");
                self.emit_all("error", &[Value::from(err.to_string())]);
            }
            SocketEvent::Close { reason, .. } if open => self.on_close(reason),
            event => tracing::trace!(?event, "ignoring engine event"),
        }
    }

    fn on_open(&mut self) {
        tracing::debug!(sid = ?self.engine_id(), "open");
        let callbacks = match std::mem::replace(&mut self.subs, Subs::None) {
            Subs::Connecting { callbacks, timer } => {
                if let Some(timer) = timer {
                    self.io.timer.clear_timeout(timer);
                }
                callbacks
            }
            _ => Vec::new(),
        };
        self.cleanup();

        self.state = ManagerState::Open;
        self.subs = Subs::Open;
        self.emitter.emit("open", &[]);
        for socket in self.nsps.values_mut().filter(|s| s.subscribed()) {
            socket.on_open();
        }
        self.drain_sockets();

        for callback in callbacks {
            match callback {
                ConnectCallback::Reconnect => self.on_reconnect(),
                ConnectCallback::User(callback) => callback(Ok(())),
            }
        }
    }

    fn on_connect_error(&mut self, err: Error) {
        tracing::debug!("connect_error: {err}");
        let callbacks = match std::mem::replace(&mut self.subs, Subs::None) {
            Subs::Connecting { callbacks, .. } => callbacks,
            _ => Vec::new(),
        };
        self.cleanup();
        self.state = ManagerState::Closed;
        if let Some(mut engine) = self.engine.take() {
            engine.close();
        }
        self.emit_all("connect_error", &[Value::from(err.to_string())]);

        if callbacks.is_empty() {
            self.maybe_reconnect_on_open();
        }
        for callback in callbacks {
            match callback {
                ConnectCallback::Reconnect => {
                    tracing::debug!("reconnect attempt error");
                    self.reconnecting = false;
                    self.reconnect();
                    self.emit_all("reconnect_error", &[Value::from(err.to_string())]);
                }
                ConnectCallback::User(callback) => callback(Err(&err)),
            }
        }
    }

    fn on_connect_timeout(&mut self) {
        let timeout = self.config.timeout.unwrap_or_default();
        tracing::debug!(?timeout, "connect attempt timed out");
        if let Subs::Connecting { timer, .. } = &mut self.subs {
            *timer = None;
        }
        if let Some(engine) = self.engine.as_mut() {
            engine.close();
            // The close events of the engine are not related to the connect error path.
            while engine.poll_event().is_some() {}
        }
        self.on_connect_error(Error::Timeout);
        self.emit_all("connect_timeout", &[millis(timeout)]);
    }

    fn maybe_reconnect_on_open(&mut self) {
        // Only reconnect here for the first attempt, the reconnection loop handles the others.
        if !self.reconnecting && self.config.reconnection && self.backoff.attempts() == 0 {
            self.reconnect();
        }
    }

    fn reconnect(&mut self) {
        if self.reconnecting || self.skip_reconnect {
            return;
        }

        if self.backoff.attempts() >= self.config.reconnection_attempts {
            tracing::debug!("reconnect failed");
            self.backoff.reset();
            self.emit_all("reconnect_failed", &[]);
            self.reconnecting = false;
        } else {
            let delay = self.backoff.duration();
            tracing::debug!(?delay, "will wait before reconnect attempt");
            self.reconnecting = true;
            self.reconnect_timer = Some(self.io.timer.set_timeout(delay));
        }
    }

    fn on_reconnect_timer(&mut self) {
        if self.skip_reconnect {
            return;
        }
        tracing::debug!("attempting reconnect");
        let attempts = Value::from(self.backoff.attempts());
        self.emit_all("reconnect_attempt", std::slice::from_ref(&attempts));
        self.emit_all("reconnecting", std::slice::from_ref(&attempts));
        self.open(Some(ConnectCallback::Reconnect));
    }

    fn on_reconnect(&mut self) {
        tracing::debug!("reconnect success");
        let attempts = self.backoff.attempts();
        self.reconnecting = false;
        self.backoff.reset();
        self.update_socket_ids();
        self.emit_all("reconnect", &[Value::from(attempts)]);
    }

    fn update_socket_ids(&mut self) {
        let id = self.engine_id().map(str::to_string);
        for socket in self.nsps.values_mut() {
            socket.set_id(id.clone());
        }
    }

    fn on_data(&mut self, data: Value) {
        let frame = match Frame::try_from(data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("invalid message data: {e}");
                return;
            }
        };
        match self.decoder.add(frame) {
            Ok(Some(packet)) => self.on_decoded(packet),
            Ok(None) => {}
            Err(e) => tracing::warn!("dropping malformed packet: {e}"),
        }
    }

    fn on_decoded(&mut self, packet: SocketPacket) {
        if self.emitter.has_listeners("packet") {
            self.emitter.emit("packet", &[Value::from(packet.clone())]);
        }
        let sid = self.engine.as_ref().and_then(Socket::id).map(str::to_string);
        let nsp = packet.nsp.clone();
        match self.nsps.get_mut(&nsp).filter(|s| s.subscribed()) {
            Some(socket) => socket.on_packet(packet, sid.as_deref()),
            None => {
                tracing::debug!(nsp, kind = ?packet.kind, "packet for an unknown namespace, dropping");
                return;
            }
        }
        self.drain_socket(&nsp);
    }

    fn on_ping(&mut self) {
        self.last_ping = Some(Instant::now());
        self.emit_all("ping", &[]);
    }

    fn on_pong(&mut self) {
        let latency = self.last_ping.map(|t| t.elapsed()).unwrap_or_default();
        self.emit_all("pong", &[millis(latency)]);
    }

    fn on_close(&mut self, reason: &'static str) {
        tracing::debug!(reason, "close");
        self.cleanup();
        self.engine = None;
        self.backoff.reset();
        self.state = ManagerState::Closed;
        self.emitter.emit("close", &[Value::from(reason)]);
        for socket in self.nsps.values_mut().filter(|s| s.subscribed()) {
            socket.on_close(reason);
        }

        if self.config.reconnection && !self.skip_reconnect {
            self.reconnect();
        }
    }

    /// Tear down everything bound to the current connection attempt.
    fn cleanup(&mut self) {
        tracing::trace!("cleanup");
        if let Subs::Connecting {
            timer: Some(timer), ..
        } = std::mem::replace(&mut self.subs, Subs::None)
        {
            self.io.timer.clear_timeout(timer);
        }
        if let Some(timer) = self.reconnect_timer.take() {
            self.io.timer.clear_timeout(timer);
        }
        self.packet_buffer.clear();
        self.encoding = false;
        self.last_ping = None;
        self.decoder.reset();
    }

    /// The state of the socket of namespace `nsp`.
    pub fn socket_state(&self, nsp: &str) -> Option<SocketState> {
        self.nsps.get(nsp).map(NsSocket::state)
    }
}

fn millis(duration: Duration) -> Value {
    Value::Int(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
}
