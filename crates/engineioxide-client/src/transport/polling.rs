//! Long polling transport.
//!
//! A GET request is kept in flight to receive payloads and every write is a POST. At most one
//! request of each kind is in flight at a time.
use bytes::Bytes;
use http::{Method, Request, Response, header};
use socketioxide_client_core::{EnginePacket, EnginePacketType, Frame};

use super::{ReadyState, Transport, TransportBase, TransportEvent};
use crate::{
    errors::Error,
    io::{IoError, IoEvent, RequestId, RequestKind},
    payload::{decode_payload, encode_payload},
};

const POLL_ERROR: &str = "xhr poll error";
const POST_ERROR: &str = "xhr post error";

/// The polling transport.
#[derive(Debug)]
pub struct Polling {
    base: TransportBase,
    polling: bool,
}

impl Polling {
    pub(crate) fn new(base: TransportBase) -> Self {
        Self {
            base,
            polling: false,
        }
    }

    fn request_id(&self, kind: RequestKind) -> RequestId {
        RequestId {
            transport: self.base.id,
            kind,
        }
    }

    fn build_request(&self, method: Method, body: Option<Frame>) -> Result<Request<Bytes>, Error> {
        let uri = self.base.uri(true)?;
        let mut builder = Request::builder().method(method).uri(uri.as_str());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.base.config.extra_headers.clone());
        }
        let body = match body {
            Some(Frame::Text(data)) => {
                builder = builder.header(header::CONTENT_TYPE, "text/plain;charset=UTF-8");
                Bytes::from(data)
            }
            Some(Frame::Binary(data)) => {
                builder = builder.header(header::CONTENT_TYPE, "application/octet-stream");
                data
            }
            None => Bytes::new(),
        };
        Ok(builder.body(body)?)
    }

    /// Start a poll cycle.
    fn poll(&mut self) {
        tracing::trace!(id = self.base.id, "polling");
        match self.build_request(Method::GET, None) {
            Ok(req) => {
                self.polling = true;
                let id = self.request_id(RequestKind::Poll);
                self.base.io.http.send(id, req);
            }
            Err(e) => self.base.on_error(POLL_ERROR, Some(e.to_string())),
        }
    }

    fn on_poll_response(&mut self, result: Result<Response<Bytes>, IoError>) {
        match read_body(result) {
            Ok(frame) => self.on_payload(frame),
            Err(description) => {
                self.polling = false;
                self.base.on_error(POLL_ERROR, Some(description));
            }
        }
    }

    fn on_payload(&mut self, frame: Frame) {
        for packet in decode_payload(frame) {
            // The first response opens the transport.
            if self.base.state == ReadyState::Opening {
                self.base.on_open();
            }
            if packet.kind == EnginePacketType::Close {
                self.base.on_close();
                return;
            }
            self.base.on_packet(packet);
        }

        if self.base.state != ReadyState::Closed {
            self.polling = false;
            match self.base.state {
                ReadyState::Open => self.poll(),
                ReadyState::Pausing => self.try_pause(),
                state => tracing::trace!(?state, "ignoring poll"),
            }
        }
    }

    fn on_post_response(&mut self, result: Result<Response<Bytes>, IoError>) {
        match read_body(result) {
            Ok(_) => {
                self.base.writable = true;
                self.base.emit(TransportEvent::Drain);
                if self.base.state == ReadyState::Pausing {
                    self.try_pause();
                }
            }
            Err(description) => self.base.on_error(POST_ERROR, Some(description)),
        }
    }

    /// Complete a pending pause once no request is in flight.
    fn try_pause(&mut self) {
        if self.polling {
            tracing::trace!("waiting for the poll to complete before pausing");
        } else if !self.base.writable {
            tracing::trace!("waiting for the post to complete before pausing");
        } else {
            tracing::debug!(id = self.base.id, "paused");
            self.base.state = ReadyState::Paused;
            self.base.emit(TransportEvent::Paused);
        }
    }
}

/// Extract the payload of a successful response.
fn read_body(result: Result<Response<Bytes>, IoError>) -> Result<Frame, String> {
    let res = result.map_err(|e| e.0)?;
    if !res.status().is_success() {
        return Err(res.status().to_string());
    }
    let binary = res
        .headers()
        .get(header::CONTENT_TYPE)
        .is_some_and(|v| v.as_bytes().starts_with(b"application/octet-stream"));
    let body = res.into_body();
    if binary {
        Ok(Frame::Binary(body))
    } else {
        String::from_utf8(body.to_vec())
            .map(Frame::Text)
            .map_err(|e| e.to_string())
    }
}

impl Transport for Polling {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TransportBase {
        &mut self.base
    }

    fn do_open(&mut self) {
        self.poll();
    }

    fn do_close(&mut self) {
        if self.base.state == ReadyState::Open {
            tracing::debug!("transport open, writing close packet");
            self.write(&[EnginePacket::new(EnginePacketType::Close)]);
        }
        if self.polling {
            self.polling = false;
            self.base.io.http.abort(self.request_id(RequestKind::Poll));
        }
    }

    fn write(&mut self, packets: &[EnginePacket]) {
        self.base.writable = false;
        let payload = encode_payload(packets, self.base.supports_binary);
        match self.build_request(Method::POST, Some(payload)) {
            Ok(req) => {
                let id = self.request_id(RequestKind::Post);
                self.base.io.http.send(id, req);
            }
            Err(e) => self.base.on_error(POST_ERROR, Some(e.to_string())),
        }
    }

    fn pause(&mut self) {
        self.base.state = ReadyState::Pausing;
        self.try_pause();
    }

    fn supports_pause(&self) -> bool {
        true
    }

    fn handle_io(&mut self, event: IoEvent) {
        if self.base.state == ReadyState::Closed {
            tracing::trace!(?event, "transport closed, dropping io event");
            return;
        }
        match event {
            IoEvent::Http { id, result } if id.kind == RequestKind::Poll => {
                self.on_poll_response(result)
            }
            IoEvent::Http { result, .. } => self.on_post_response(result),
            event => tracing::debug!(?event, "unexpected io event for polling transport"),
        }
    }
}
