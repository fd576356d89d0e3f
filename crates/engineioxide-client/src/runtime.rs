//! Tokio implementation of the I/O collaborators.
//!
//! Every operation runs in its own task spawned on the current runtime and reports its
//! completion on the [`IoSink`]. Only plain `http`/`ws` connections are supported.
//!
//! ```no_run
//! # use engineioxide_client::{runtime, Socket, SocketConfig, UpgradeMemory};
//! # async fn doc() {
//! let (io, mut rx) = runtime::tokio_io();
//! let mut socket = Socket::new(SocketConfig::default(), io, UpgradeMemory::new());
//! while let Some(event) = rx.recv().await {
//!     socket.handle_io(event);
//!     while let Some(event) = socket.poll_event() {
//!         println!("{event:?}");
//!     }
//! }
//! # }
//! ```
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::{HeaderValue, Request, Response, header};
use http_body_util::{BodyExt, Full};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use socketioxide_client_core::Frame;
use tokio::{sync::mpsc, task::AbortHandle};
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};

use crate::io::{
    HttpClient, Io, IoError, IoEvent, IoSink, RequestId, Timer, TimerHandle, TransportId,
    WebSocketConnector,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Create the tokio collaborators and the channel on which they report completions.
pub fn tokio_io() -> (Io, mpsc::UnboundedReceiver<IoEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let io = Io::new(
        Arc::new(TokioHttp::new(tx.clone())),
        Arc::new(TokioWs::new(tx.clone())),
        Arc::new(TokioTimer::new(tx)),
    );
    (io, rx)
}

/// [`HttpClient`] backed by the hyper legacy client.
#[derive(Debug)]
pub struct TokioHttp {
    client: Client<HttpConnector, Full<Bytes>>,
    sink: IoSink,
    inflight: Mutex<HashMap<RequestId, AbortHandle>>,
}

impl TokioHttp {
    /// Create a client reporting on `sink`.
    pub fn new(sink: IoSink) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            sink,
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

async fn request(
    client: Client<HttpConnector, Full<Bytes>>,
    req: Request<Bytes>,
) -> Result<Response<Bytes>, IoError> {
    let res = client.request(req.map(Full::new)).await.map_err(IoError::new)?;
    let (parts, body) = res.into_parts();
    let body = body.collect().await.map_err(IoError::new)?.to_bytes();
    Ok(Response::from_parts(parts, body))
}

impl HttpClient for TokioHttp {
    fn send(&self, id: RequestId, req: Request<Bytes>) {
        tracing::trace!(?id, uri = %req.uri(), method = %req.method(), "http request");
        let client = self.client.clone();
        let sink = self.sink.clone();
        let handle = tokio::spawn(async move {
            let result = request(client, req).await;
            sink.send(IoEvent::Http { id, result }).ok();
        })
        .abort_handle();

        let mut inflight = lock(&self.inflight);
        inflight.retain(|_, h| !h.is_finished());
        inflight.insert(id, handle);
    }

    fn abort(&self, id: RequestId) {
        if let Some(handle) = lock(&self.inflight).remove(&id) {
            handle.abort();
        }
    }
}

/// [`WebSocketConnector`] backed by tokio-tungstenite.
#[derive(Debug)]
pub struct TokioWs {
    sink: IoSink,
    conns: Mutex<HashMap<TransportId, mpsc::UnboundedSender<Frame>>>,
}

impl TokioWs {
    /// Create a connector reporting on `sink`.
    pub fn new(sink: IoSink) -> Self {
        Self {
            sink,
            conns: Mutex::new(HashMap::new()),
        }
    }
}

async fn run_ws(
    id: TransportId,
    uri: String,
    protocols: Vec<String>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    sink: IoSink,
) -> Result<(), IoError> {
    let mut req = uri.into_client_request().map_err(IoError::new)?;
    if !protocols.is_empty() {
        let value = HeaderValue::from_str(&protocols.join(", ")).map_err(IoError::new)?;
        req.headers_mut().insert(header::SEC_WEBSOCKET_PROTOCOL, value);
    }
    let (stream, _) = tokio_tungstenite::connect_async(req)
        .await
        .map_err(IoError::new)?;
    sink.send(IoEvent::WsOpen(id)).ok();

    let (mut tx, mut stream) = stream.split();
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(Frame::Text(data)) => tx.send(Message::text(data)).await.map_err(IoError::new)?,
                Some(Frame::Binary(data)) => tx.send(Message::binary(data)).await.map_err(IoError::new)?,
                None => {
                    tx.close().await.ok();
                    return Ok(());
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(data))) => {
                    let frame = Frame::Text(data.as_str().to_owned());
                    sink.send(IoEvent::WsMessage(id, frame)).ok();
                }
                Some(Ok(Message::Binary(data))) => {
                    sink.send(IoEvent::WsMessage(id, Frame::Binary(data))).ok();
                }
                Some(Ok(Message::Close(_))) | None => {
                    sink.send(IoEvent::WsClose(id)).ok();
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(IoError::new(e)),
            }
        }
    }
}

impl WebSocketConnector for TokioWs {
    fn open(&self, id: TransportId, uri: String, protocols: &[String]) {
        tracing::trace!(id, %uri, "websocket connect");
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = self.sink.clone();
        let protocols = protocols.to_vec();
        tokio::spawn(async move {
            if let Err(e) = run_ws(id, uri, protocols, rx, sink.clone()).await {
                tracing::debug!(id, "websocket error: {e}");
                sink.send(IoEvent::WsError(id, e)).ok();
            }
        });
        lock(&self.conns).insert(id, tx);
    }

    fn send(&self, id: TransportId, frame: Frame) {
        match lock(&self.conns).get(&id) {
            Some(tx) => {
                tx.send(frame).ok();
            }
            None => tracing::debug!(id, "send on an unknown websocket"),
        }
    }

    fn close(&self, id: TransportId) {
        // Dropping the sender lets the task send a close frame and exit.
        lock(&self.conns).remove(&id);
    }
}

/// [`Timer`] backed by `tokio::time`.
#[derive(Debug)]
pub struct TokioTimer {
    sink: IoSink,
    next: AtomicU64,
    timers: Arc<Mutex<HashMap<TimerHandle, AbortHandle>>>,
}

impl TokioTimer {
    /// Create a timer service reporting on `sink`.
    pub fn new(sink: IoSink) -> Self {
        Self {
            sink,
            next: AtomicU64::new(1),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Timer for TokioTimer {
    fn set_timeout(&self, after: Duration) -> TimerHandle {
        let handle = TimerHandle(self.next.fetch_add(1, Ordering::Relaxed));
        let sink = self.sink.clone();
        let timers = self.timers.clone();
        // Hold the lock so the task cannot remove its entry before it is inserted.
        let mut guard = lock(&self.timers);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            lock(&timers).remove(&handle);
            sink.send(IoEvent::Timer(handle)).ok();
        })
        .abort_handle();
        guard.insert(handle, task);
        handle
    }

    fn clear_timeout(&self, handle: TimerHandle) {
        if let Some(task) = lock(&self.timers).remove(&handle) {
            task.abort();
        }
    }
}
