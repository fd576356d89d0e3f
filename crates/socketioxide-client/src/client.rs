//! Tokio driver and user handles.
//!
//! A [`Client`] owns a [`Manager`] and drives it from a task: it feeds it the completions of
//! the tokio collaborators and the [`Command`]s sent by the [`ManagerHandle`] and
//! [`SocketHandle`]s. Listeners are called on the driver task.
//!
//! ```no_run
//! # use socketioxide_client::{ManagerConfig, SocketIo};
//! # async fn doc() -> Result<(), socketioxide_client::Error> {
//! let io = SocketIo::new();
//! let socket = io.connect("http://localhost:3000/chat", ManagerConfig::default())?;
//! socket.on("message", |args| println!("received {args:?}"));
//! socket.emit("message", vec!["hello".into()])?;
//! # Ok(())
//! # }
//! ```
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use engineioxide_client::{IoEvent, UpgradeMemory, runtime};
use socketioxide_client_core::{Emitter, ListenerKey, Value};
use tokio::sync::mpsc;
use url::Url;

use crate::{
    config::ManagerConfig,
    errors::Error,
    manager::{Command, Manager},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drives a [`Manager`] on the tokio runtime.
#[derive(Debug)]
pub struct Client {
    manager: Manager,
    io_rx: mpsc::UnboundedReceiver<IoEvent>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
}

impl Client {
    /// Create a client for the server at `url` and the handle controlling it.
    ///
    /// Must be called from a tokio runtime.
    pub fn new(url: &Url, config: ManagerConfig, memory: UpgradeMemory) -> (Self, ManagerHandle) {
        let (io, io_rx) = runtime::tokio_io();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let manager = Manager::new(url, config, io, memory, cmd_tx.downgrade());
        let handle = ManagerHandle {
            tx: cmd_tx,
            emitter: manager.emitter().clone(),
            query: manager.config().query.clone(),
            sockets: Arc::default(),
        };
        let client = Self {
            manager,
            io_rx,
            cmd_rx,
        };
        (client, handle)
    }

    /// Spawn the driver of a client for the server at `url`.
    pub fn spawn(url: &Url, config: ManagerConfig, memory: UpgradeMemory) -> ManagerHandle {
        let (client, handle) = Self::new(url, config, memory);
        tokio::spawn(client.run());
        handle
    }

    /// Run until every handle is dropped. The connection is then closed.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(event) = self.io_rx.recv() => self.manager.handle_io(event),
                command = self.cmd_rx.recv() => match command {
                    Some(command) => self.manager.handle_command(command),
                    None => {
                        tracing::debug!("every handle dropped, closing the client");
                        self.manager.disconnect();
                        return;
                    }
                },
            }
        }
    }
}

/// A handle to a running [`Client`].
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    tx: mpsc::UnboundedSender<Command>,
    emitter: Arc<Emitter>,
    query: Option<String>,
    sockets: Arc<Mutex<HashMap<String, SocketHandle>>>,
}

impl ManagerHandle {
    fn send(&self, command: Command) -> Result<(), Error> {
        self.tx.send(command).map_err(|_| Error::Closed)
    }

    /// The socket of namespace `nsp`, created on first use.
    pub fn socket(&self, nsp: &str) -> Result<SocketHandle, Error> {
        let mut sockets = lock(&self.sockets);
        if let Some(socket) = sockets.get(nsp) {
            return Ok(socket.clone());
        }
        let socket = SocketHandle {
            nsp: nsp.to_string(),
            tx: self.tx.clone(),
            emitter: Arc::default(),
        };
        self.send(Command::Socket {
            nsp: nsp.to_string(),
            query: self.query.clone(),
            emitter: socket.emitter.clone(),
        })?;
        sockets.insert(nsp.to_string(), socket.clone());
        Ok(socket)
    }

    /// Returns true if the socket of namespace `nsp` was created.
    pub fn has_socket(&self, nsp: &str) -> bool {
        lock(&self.sockets).contains_key(nsp)
    }

    /// Register a listener on the manager.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerKey
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.emitter.on(event, listener)
    }

    /// The manager listeners.
    pub fn emitter(&self) -> &Arc<Emitter> {
        &self.emitter
    }

    /// Open the connection.
    pub fn connect(&self) -> Result<(), Error> {
        self.send(Command::Connect(None))
    }

    /// Open the connection and call `callback` once the attempt resolves.
    pub fn connect_with(
        &self,
        callback: impl FnOnce(Result<(), &Error>) + Send + 'static,
    ) -> Result<(), Error> {
        self.send(Command::Connect(Some(Box::new(callback))))
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&self) -> Result<(), Error> {
        self.send(Command::Disconnect)
    }
}

/// A handle to the socket of a namespace.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    nsp: String,
    tx: mpsc::UnboundedSender<Command>,
    emitter: Arc<Emitter>,
}

impl SocketHandle {
    /// The namespace.
    pub fn nsp(&self) -> &str {
        &self.nsp
    }

    /// Register a listener.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerKey
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.emitter.on(event, listener)
    }

    /// Register a listener removed after its first call.
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerKey
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.emitter.once(event, listener)
    }

    /// Remove a listener.
    pub fn off(&self, event: &str, key: ListenerKey) -> bool {
        self.emitter.off(event, key)
    }

    /// The socket listeners.
    pub fn emitter(&self) -> &Arc<Emitter> {
        &self.emitter
    }

    /// Emit an event. It is buffered until the namespace is connected.
    ///
    /// A trailing [`Value::Function`] argument is called with the arguments of the server
    /// acknowledgement.
    pub fn emit(&self, event: impl Into<String>, args: Vec<Value>) -> Result<(), Error> {
        self.tx
            .send(Command::Emit {
                nsp: self.nsp.clone(),
                event: event.into(),
                args,
            })
            .map_err(|_| Error::Closed)
    }

    /// Emit an event and call `ack` with the arguments of the server acknowledgement.
    pub fn emit_with_ack<F>(
        &self,
        event: impl Into<String>,
        mut args: Vec<Value>,
        ack: F,
    ) -> Result<(), Error>
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        args.push(Value::function(ack));
        self.emit(event, args)
    }

    /// Connect the namespace, if not already connected.
    pub fn open(&self) -> Result<(), Error> {
        self.tx
            .send(Command::Open(self.nsp.clone()))
            .map_err(|_| Error::Closed)
    }

    /// Disconnect the namespace.
    pub fn close(&self) -> Result<(), Error> {
        self.tx
            .send(Command::Close(self.nsp.clone()))
            .map_err(|_| Error::Closed)
    }
}

/// Caches one client per server and remembers websocket upgrades across connections.
#[derive(Debug, Default)]
pub struct SocketIo {
    managers: Mutex<HashMap<String, ManagerHandle>>,
    memory: UpgradeMemory,
}

impl SocketIo {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the socket of the namespace targeted by `uri`, e.g `http://localhost:3000/chat`.
    ///
    /// The client of the server is reused unless [`ManagerConfig::force_new`] is set,
    /// [`ManagerConfig::multiplex`] is unset or the namespace is already open on it.
    /// Must be called from a tokio runtime.
    pub fn connect(&self, uri: &str, mut config: ManagerConfig) -> Result<SocketHandle, Error> {
        let url = Url::parse(uri)?;
        let id = cache_id(&url);
        let nsp = match url.path() {
            "" => "/",
            path => path,
        };
        if config.query.is_none() {
            config.query = url.query().map(str::to_string);
        }

        let mut managers = lock(&self.managers);
        let same_namespace = managers.get(&id).is_some_and(|m| m.has_socket(nsp));
        let manager = if config.force_new || !config.multiplex || same_namespace {
            tracing::debug!(uri, "ignoring socket cache");
            Client::spawn(&url, config, self.memory.clone())
        } else {
            managers
                .entry(id)
                .or_insert_with(|| {
                    tracing::debug!(uri, "new manager");
                    Client::spawn(&url, config, self.memory.clone())
                })
                .clone()
        };
        manager.socket(nsp)
    }

    /// The "prior websocket success" memory shared by the connections.
    pub fn upgrade_memory(&self) -> &UpgradeMemory {
        &self.memory
    }
}

/// `scheme://host:port`, the key of the client cache.
fn cache_id(url: &Url) -> String {
    let host = url.host_str().unwrap_or("localhost");
    match url.port_or_known_default() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}
