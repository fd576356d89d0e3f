//! Websocket transport.
//!
//! Each packet is sent in its own websocket message. There is no acknowledgement of writes so
//! the transport becomes writable again on the next tick.
use socketioxide_client_core::EnginePacket;

use super::{ReadyState, Transport, TransportBase, TransportEvent};
use crate::{
    io::{IoEvent, TimerHandle},
    parser::encode_packet,
};

const WS_ERROR: &str = "websocket error";

/// The websocket transport.
#[derive(Debug)]
pub struct WebSocket {
    base: TransportBase,
    drain_timer: Option<TimerHandle>,
}

impl WebSocket {
    pub(crate) fn new(base: TransportBase) -> Self {
        Self {
            base,
            drain_timer: None,
        }
    }

    fn on_drain_timer(&mut self) {
        self.drain_timer = None;
        self.base.writable = true;
        self.base.emit(TransportEvent::Drain);
    }
}

impl Transport for WebSocket {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TransportBase {
        &mut self.base
    }

    fn do_open(&mut self) {
        match self.base.uri(false) {
            Ok(uri) => {
                let protocols = &self.base.config.protocols;
                self.base.io.ws.open(self.base.id, uri.into(), protocols);
                self.base.supports_binary = !self.base.config.force_base64;
            }
            Err(e) => self.base.on_error(WS_ERROR, Some(e.to_string())),
        }
    }

    fn do_close(&mut self) {
        if let Some(timer) = self.drain_timer.take() {
            self.base.io.timer.clear_timeout(timer);
        }
        self.base.io.ws.close(self.base.id);
    }

    fn write(&mut self, packets: &[EnginePacket]) {
        if packets.is_empty() {
            return;
        }
        self.base.writable = false;
        for packet in packets {
            let frame = encode_packet(packet, self.base.supports_binary, false);
            self.base.io.ws.send(self.base.id, frame);
        }
        // Let the socket clear its write buffer before draining.
        self.drain_timer = Some(self.base.io.timer.set_timeout(std::time::Duration::ZERO));
    }

    fn pause(&mut self) {
        self.base.state = ReadyState::Paused;
        self.base.emit(TransportEvent::Paused);
    }

    fn supports_pause(&self) -> bool {
        false
    }

    fn owns_timer(&self, handle: TimerHandle) -> bool {
        self.drain_timer == Some(handle)
    }

    fn handle_io(&mut self, event: IoEvent) {
        if self.base.state == ReadyState::Closed {
            tracing::trace!(?event, "transport closed, dropping io event");
            return;
        }
        match event {
            IoEvent::WsOpen(_) => self.base.on_open(),
            IoEvent::WsMessage(_, frame) => self.base.on_data(&frame),
            IoEvent::WsClose(_) => self.base.on_close(),
            IoEvent::WsError(_, err) => self.base.on_error(WS_ERROR, Some(err.0)),
            IoEvent::Timer(handle) if self.owns_timer(handle) => self.on_drain_timer(),
            event => tracing::debug!(?event, "unexpected io event for websocket transport"),
        }
    }
}
