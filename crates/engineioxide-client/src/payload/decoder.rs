use bytes::{Buf, Bytes};
use socketioxide_client_core::{EnginePacket, Frame};

use crate::parser::decode_packet;

/// Longest accepted length header of a binary payload.
const MAX_LENGTH_DIGITS: usize = 310;

/// Iterator over the packets of a payload. Created by [`decode_payload`].
///
/// It stops right after yielding an error packet.
#[derive(Debug)]
pub struct Payload {
    src: Source,
    done: bool,
}

#[derive(Debug)]
enum Source {
    Text { data: String, pos: usize },
    Binary(Bytes),
}

/// Decode a payload received from a polling request.
pub fn decode_payload(frame: Frame) -> Payload {
    let src = match frame {
        Frame::Text(data) => Source::Text { data, pos: 0 },
        Frame::Binary(data) => Source::Binary(data),
    };
    Payload { src, done: false }
}

impl Iterator for Payload {
    type Item = EnginePacket;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let res = match &mut self.src {
            Source::Text { data, pos } if data.is_empty() && *pos == 0 => {
                // An empty body is not a valid payload, unlike `0:`.
                *pos = 1;
                Err(())
            }
            Source::Text { data, pos } => next_text(data, pos),
            Source::Binary(data) => next_binary(data),
        };
        match res {
            Ok(Some(packet)) if packet.is_error() => {
                self.done = true;
                Some(packet)
            }
            Ok(Some(packet)) => Some(packet),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(()) => {
                self.done = true;
                Some(EnginePacket::error())
            }
        }
    }
}

/// Read the next `<len>:<packet>` entry, skipping empty ones.
fn next_text(data: &str, pos: &mut usize) -> Result<Option<EnginePacket>, ()> {
    loop {
        let rest = &data[*pos..];
        if rest.is_empty() {
            return Ok(None);
        }
        let colon = rest.find(':').ok_or(())?;
        let len_str = &rest[..colon];
        if len_str.is_empty() || !len_str.bytes().all(|c| c.is_ascii_digit()) {
            return Err(());
        }
        let len: usize = len_str.parse().map_err(|_| ())?;

        let body = &rest[colon + 1..];
        let mut units = 0;
        let mut end = 0;
        for c in body.chars() {
            if units >= len {
                break;
            }
            units += c.len_utf16();
            end += c.len_utf8();
        }
        if units != len {
            tracing::debug!(len, units, "payload length mismatch");
            return Err(());
        }
        *pos += colon + 1 + end;
        if len > 0 {
            let msg = &body[..end];
            return Ok(Some(decode_packet(&Frame::Text(msg.to_string()), false)));
        }
    }
}

/// Read the next binary payload entry.
fn next_binary(data: &mut Bytes) -> Result<Option<EnginePacket>, ()> {
    if data.is_empty() {
        return Ok(None);
    }
    let is_text = match data.get_u8() {
        0 => true,
        1 => false,
        _ => return Err(()),
    };
    let mut len: usize = 0;
    let mut digits = 0;
    loop {
        if !data.has_remaining() {
            return Err(());
        }
        match data.get_u8() {
            0xFF => break,
            d @ 0..=9 => {
                digits += 1;
                if digits > MAX_LENGTH_DIGITS {
                    return Err(());
                }
                len = len
                    .checked_mul(10)
                    .and_then(|l| l.checked_add(d as usize))
                    .ok_or(())?;
            }
            _ => return Err(()),
        }
    }
    if digits == 0 || data.len() < len {
        return Err(());
    }
    let body = data.split_to(len);
    let frame = if is_text {
        Frame::Text(String::from_utf8(body.to_vec()).map_err(|_| ())?)
    } else {
        Frame::Binary(body)
    };
    Ok(Some(decode_packet(&frame, false)))
}
