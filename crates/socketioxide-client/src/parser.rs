//! Socket.io packet encoder and decoder.
//!
//! A packet is encoded as a text frame:
//! `<type>[<attachments>-][<nsp>,][<ack id>][<json data>]`.
//! Binary packets are followed by one binary frame per attachment.
use std::io::Cursor;

use bytes::{Buf, Bytes};
use smallvec::{SmallVec, smallvec};
use socketioxide_client_core::{Frame, SocketPacket, SocketPacketType, Value};

use crate::{
    binary::{DeconstructedPacket, deconstruct_packet, reconstruct_packet},
    errors::ParseError,
};

/// Encodes packets into frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder;

impl Encoder {
    /// Encode `packet`. Binary packets produce their header frame followed by their
    /// attachments, other packets produce a single text frame.
    pub fn encode(&self, packet: &SocketPacket) -> SmallVec<[Frame; 1]> {
        tracing::trace!(?packet, "encoding packet");
        if packet.kind.is_binary() {
            let DeconstructedPacket { packet, buffers } = deconstruct_packet(packet.clone());
            let mut frames = SmallVec::with_capacity(buffers.len() + 1);
            frames.push(Frame::Text(encode_string(&packet)));
            frames.extend(buffers.into_iter().map(Frame::Binary));
            frames
        } else {
            smallvec![Frame::Text(encode_string(packet))]
        }
    }
}

fn get_size_hint(packet: &SocketPacket) -> usize {
    // type digit, separators and a few digits for the ack id
    const PACKET_OVERHEAD: usize = 8;
    PACKET_OVERHEAD + packet.nsp.len()
}

fn encode_string(packet: &SocketPacket) -> String {
    let mut itoa_buf = itoa::Buffer::new();
    let mut out = String::with_capacity(get_size_hint(packet));
    out.push(char::from(b'0' + packet.kind.index()));

    if packet.kind.is_binary() {
        out.push_str(itoa_buf.format(packet.attachments.unwrap_or(0)));
        out.push('-');
    }

    // The comma is only needed when something follows the namespace.
    let mut nsp = false;
    if !packet.nsp.is_empty() && packet.nsp != "/" {
        out.push_str(&packet.nsp);
        nsp = true;
    }

    if let Some(id) = packet.id {
        if nsp {
            out.push(',');
            nsp = false;
        }
        out.push_str(itoa_buf.format(id));
    }

    if !packet.data.is_none() {
        if nsp {
            out.push(',');
        }
        out.push_str(&packet.data.to_json_string());
    }
    out
}

/// Collects the attachments of a binary packet.
#[derive(Debug)]
struct BinaryReconstructor {
    packet: SocketPacket,
    attachments: usize,
    buffers: Vec<Bytes>,
}

impl BinaryReconstructor {
    fn new(packet: SocketPacket, attachments: usize) -> Self {
        Self {
            packet,
            attachments,
            buffers: Vec::with_capacity(attachments),
        }
    }

    /// Returns true once every attachment was received.
    fn take_binary_data(&mut self, data: Bytes) -> bool {
        self.buffers.push(data);
        self.buffers.len() == self.attachments
    }
}

/// Decodes frames into packets.
///
/// A binary packet is only returned once its last attachment was added.
#[derive(Debug, Default)]
pub struct Decoder {
    reconstructor: Option<BinaryReconstructor>,
}

impl Decoder {
    /// Create a decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a frame. Returns the packet it completes, if any.
    ///
    /// On error, any partially received binary packet is discarded.
    pub fn add(&mut self, frame: Frame) -> Result<Option<SocketPacket>, ParseError> {
        match frame {
            Frame::Text(data) => {
                if self.reconstructor.take().is_some() {
                    return Err(ParseError::UnexpectedStringPacket);
                }
                let packet = decode_string(&data)?;
                match packet.attachments {
                    Some(attachments) if attachments > 0 => {
                        tracing::trace!(attachments, "waiting for attachments");
                        self.reconstructor = Some(BinaryReconstructor::new(packet, attachments));
                        Ok(None)
                    }
                    _ => Ok(Some(packet)),
                }
            }
            Frame::Binary(data) => {
                let reconstructor = self
                    .reconstructor
                    .as_mut()
                    .ok_or(ParseError::UnexpectedBinaryPacket)?;
                if !reconstructor.take_binary_data(data) {
                    return Ok(None);
                }
                match self.reconstructor.take() {
                    Some(BinaryReconstructor {
                        packet, buffers, ..
                    }) => reconstruct_packet(packet, &buffers).map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    /// Returns true while the attachments of a binary packet are expected.
    pub fn is_reconstructing(&self) -> bool {
        self.reconstructor.is_some()
    }

    /// Drop any partially received binary packet.
    pub fn reset(&mut self) {
        self.reconstructor = None;
    }
}

/// Decode the text form of a packet.
pub fn decode_string(data: &str) -> Result<SocketPacket, ParseError> {
    // Separators are ASCII so the packet can be read as bytes.
    let mut reader = Cursor::new(data);
    if !reader.has_remaining() {
        return Err(ParseError::InvalidPacketType);
    }
    let kind = reader
        .get_u8()
        .checked_sub(b'0')
        .and_then(SocketPacketType::from_index)
        .ok_or(ParseError::InvalidPacketType)?;

    let attachments = if kind.is_binary() {
        Some(read_attachments(&mut reader).ok_or(ParseError::InvalidAttachments)?)
    } else {
        None
    };

    // Custom namespaces start with a slash
    let nsp = if reader.has_remaining() && reader.chunk()[0] == b'/' {
        read_nsp(&mut reader)
    } else {
        "/"
    };

    let id = read_ack(&mut reader)?;
    if matches!(kind, SocketPacketType::Ack | SocketPacketType::BinaryAck) && id.is_none() {
        return Err(ParseError::InvalidAckId);
    }

    let rest = &data[reader.position() as usize..];
    let data = if rest.is_empty() {
        Value::None
    } else {
        Value::from_json_str(rest)?
    };

    let mut packet = SocketPacket::new(kind, nsp, data);
    packet.id = id;
    packet.attachments = attachments;
    tracing::trace!(?packet, "decoded packet");
    Ok(packet)
}

fn read_attachments(reader: &mut Cursor<&str>) -> Option<usize> {
    let data = *reader.get_ref();
    let start_index = reader.position() as usize;
    loop {
        match reader.has_remaining().then(|| reader.get_u8()) {
            Some(c) if c.is_ascii_digit() => (),
            Some(b'-') if reader.position() as usize > start_index + 1 => {
                break data[start_index..reader.position() as usize - 1].parse().ok();
            }
            _ => break None,
        }
    }
}

fn read_nsp<'a>(reader: &mut Cursor<&'a str>) -> &'a str {
    let data = *reader.get_ref();
    let start_index = reader.position() as usize;
    loop {
        match reader.has_remaining().then(|| reader.get_u8()) {
            Some(b',') => break &data[start_index..reader.position() as usize - 1],
            // The comma is omitted when nothing follows the namespace, e.g `1/custom`
            None => break &data[start_index..],
            Some(_) => (),
        }
    }
}

fn read_ack(reader: &mut Cursor<&str>) -> Result<Option<u64>, ParseError> {
    let data = *reader.get_ref();
    let start_index = reader.position() as usize;
    while reader.has_remaining() && reader.chunk()[0].is_ascii_digit() {
        reader.advance(1);
    }
    let end_index = reader.position() as usize;
    if end_index == start_index {
        return Ok(None);
    }
    data[start_index..end_index]
        .parse()
        .map(Some)
        .map_err(|_| ParseError::InvalidAckId)
}
