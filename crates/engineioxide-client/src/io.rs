//! Interfaces to the outside world.
//!
//! The engine.io state machines never perform I/O themselves. They call the collaborators of
//! an [`Io`] bundle to start work and get the outcome back later as an [`IoEvent`], fed to
//! [`Socket::handle_io`](crate::Socket::handle_io). Collaborators must never call back into the
//! state machine synchronously: completions go through an [`IoSink`].
//!
//! A tokio based implementation lives in [`runtime`](crate::runtime).
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use http::{Request, Response};
use socketioxide_client_core::Frame;
use tokio::sync::mpsc;

/// Unique id of a transport instance.
pub type TransportId = u64;

/// The kind of request a polling transport has in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// A long polling GET.
    Poll,
    /// A POST carrying a payload.
    Post,
}

/// Identifies an http request. A transport has at most one request of each kind in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId {
    /// The transport that issued the request.
    pub transport: TransportId,
    /// The request kind.
    pub kind: RequestKind,
}

/// Identifies a pending timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// An I/O failure reported by a collaborator.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct IoError(pub String);

impl IoError {
    /// Build an error from anything printable.
    pub fn new(err: impl fmt::Display) -> Self {
        IoError(err.to_string())
    }
}

/// The completion of an operation started through a collaborator.
#[derive(Debug)]
pub enum IoEvent {
    /// An http request completed.
    Http {
        /// The request.
        id: RequestId,
        /// The response, whatever its status.
        result: Result<Response<Bytes>, IoError>,
    },
    /// A websocket connection is established.
    WsOpen(TransportId),
    /// A websocket message was received.
    WsMessage(TransportId, Frame),
    /// A websocket connection was closed.
    WsClose(TransportId),
    /// A websocket connection failed.
    WsError(TransportId, IoError),
    /// A timeout fired.
    Timer(TimerHandle),
}

impl IoEvent {
    /// The transport this event is addressed to. Timers have no transport.
    pub fn transport(&self) -> Option<TransportId> {
        match self {
            IoEvent::Http { id, .. } => Some(id.transport),
            IoEvent::WsOpen(id)
            | IoEvent::WsMessage(id, _)
            | IoEvent::WsClose(id)
            | IoEvent::WsError(id, _) => Some(*id),
            IoEvent::Timer(_) => None,
        }
    }
}

/// The channel on which collaborators report completions.
pub type IoSink = mpsc::UnboundedSender<IoEvent>;

/// Issues http requests for the polling transport.
pub trait HttpClient: Send + Sync + 'static {
    /// Start `req`. The response is reported as [`IoEvent::Http`] with the same `id`.
    fn send(&self, id: RequestId, req: Request<Bytes>);
    /// Abort the request `id` if it is still in flight. No completion is reported for it.
    fn abort(&self, id: RequestId);
}

/// Opens websocket connections for the websocket transport.
pub trait WebSocketConnector: Send + Sync + 'static {
    /// Connect to `uri`. Progress is reported with the `Ws*` variants of [`IoEvent`].
    fn open(&self, id: TransportId, uri: String, protocols: &[String]);
    /// Send a frame. Frames sent before the connection is established are queued.
    fn send(&self, id: TransportId, frame: Frame);
    /// Close the connection.
    fn close(&self, id: TransportId);
}

/// Timer service.
pub trait Timer: Send + Sync + 'static {
    /// Schedule an [`IoEvent::Timer`] after `after`. A zero duration defers to the next tick.
    fn set_timeout(&self, after: Duration) -> TimerHandle;
    /// Cancel a pending timeout. Unknown or fired handles are ignored.
    fn clear_timeout(&self, handle: TimerHandle);
}

/// The collaborators used by a socket and its transports.
#[derive(Clone)]
pub struct Io {
    /// Http client.
    pub http: Arc<dyn HttpClient>,
    /// Websocket connector.
    pub ws: Arc<dyn WebSocketConnector>,
    /// Timer service.
    pub timer: Arc<dyn Timer>,
    ids: Arc<AtomicU64>,
}

impl fmt::Debug for Io {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Io")
            .field("next_id", &self.ids.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Io {
    /// Bundle the collaborators.
    pub fn new(
        http: Arc<dyn HttpClient>,
        ws: Arc<dyn WebSocketConnector>,
        timer: Arc<dyn Timer>,
    ) -> Self {
        Self {
            http,
            ws,
            timer,
            ids: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate a transport id, unique for this bundle and its clones.
    pub fn next_transport_id(&self) -> TransportId {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }
}
