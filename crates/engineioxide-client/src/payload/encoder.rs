use bytes::{BufMut, BytesMut};
use socketioxide_client_core::{EnginePacket, Frame};

use crate::parser::encode_packet;

/// Frame `packets` into a single payload.
///
/// With `supports_binary` the binary framing is used, otherwise binary data is base64 encoded
/// inside a text payload. An empty packet list encodes to `0:`.
pub fn encode_payload(packets: &[EnginePacket], supports_binary: bool) -> Frame {
    if supports_binary {
        encode_binary_payload(packets)
    } else {
        encode_text_payload(packets)
    }
}

fn encode_text_payload(packets: &[EnginePacket]) -> Frame {
    if packets.is_empty() {
        return Frame::Text("0:".to_string());
    }
    let mut itoa = itoa::Buffer::new();
    let mut data = String::new();
    for packet in packets {
        let Frame::Text(encoded) = encode_packet(packet, false, false) else {
            unreachable!("packets are always text encoded without binary support")
        };
        data.push_str(itoa.format(encoded.encode_utf16().count()));
        data.push(':');
        data.push_str(&encoded);
    }
    Frame::Text(data)
}

fn encode_binary_payload(packets: &[EnginePacket]) -> Frame {
    let mut itoa = itoa::Buffer::new();
    let mut data = BytesMut::new();
    for packet in packets {
        let (is_binary, encoded) = match encode_packet(packet, true, false) {
            Frame::Text(s) => (0, bytes::Bytes::from(s)),
            Frame::Binary(b) => (1, b),
        };
        data.reserve(encoded.len() + 12);
        data.put_u8(is_binary);
        for digit in itoa.format(encoded.len()).bytes() {
            data.put_u8(digit - b'0');
        }
        data.put_u8(0xFF);
        data.put_slice(&encoded);
    }
    Frame::Binary(data.freeze())
}
