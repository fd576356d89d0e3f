//! Engine.IO v3 single packet codec.
//!
//! A packet is encoded as its type digit followed by its data. Binary data is sent either as
//! a binary frame whose first byte is the type, or, when the transport cannot carry binary,
//! as `b<type digit><base64 data>`.
use base64::{Engine, engine::general_purpose};
use bytes::{BufMut, Bytes, BytesMut};
use socketioxide_client_core::{EnginePacket, EnginePacketType, Frame, Value};

/// Encode a packet to a wire frame.
///
/// With `utf8_encode` the text data is expanded so that every UTF-8 byte becomes one char.
/// The [`EnginePacketType::Error`] sentinel has no wire form and encodes to an empty frame.
pub fn encode_packet(packet: &EnginePacket, supports_binary: bool, utf8_encode: bool) -> Frame {
    let Some(index) = packet.kind.index() else {
        return Frame::Text(String::new());
    };

    if let Value::Binary(data) = &packet.data {
        return if supports_binary {
            let mut buf = BytesMut::with_capacity(data.len() + 1);
            buf.put_u8(index);
            buf.put_slice(data);
            Frame::Binary(buf.freeze())
        } else {
            let mut buf = String::with_capacity(2 + base64::encoded_len(data.len(), true).unwrap_or(0));
            buf.push('b');
            buf.push(char::from(b'0' + index));
            general_purpose::STANDARD.encode_string(data, &mut buf);
            Frame::Text(buf)
        };
    }

    let mut buf = String::new();
    buf.push(char::from(b'0' + index));
    match &packet.data {
        Value::None => {}
        Value::Str(data) if utf8_encode => buf.extend(data.bytes().map(char::from)),
        Value::Str(data) => buf.push_str(data),
        data => buf.push_str(&data.to_json_string()),
    }
    Frame::Text(buf)
}

/// Decode a wire frame into a packet.
///
/// Malformed input produces the [`EnginePacket::error`] sentinel. A text packet without data
/// decodes with [`Value::None`], so an empty string message comes back as a packet without data
/// while encoding to the same frame.
pub fn decode_packet(frame: &Frame, utf8_decode: bool) -> EnginePacket {
    match frame {
        Frame::Text(data) => decode_text(data, utf8_decode),
        Frame::Binary(data) => decode_binary(data),
    }
}

fn decode_text(data: &str, utf8_decode: bool) -> EnginePacket {
    if let Some(b64) = data.strip_prefix('b') {
        return decode_base64(b64);
    }

    let decoded;
    let data = if utf8_decode {
        match utf8_decode_str(data) {
            Some(d) => {
                decoded = d;
                decoded.as_str()
            }
            None => return EnginePacket::error(),
        }
    } else {
        data
    };

    let Some(kind) = data.as_bytes().first().and_then(|c| packet_type(*c)) else {
        return EnginePacket::error();
    };
    // The type digit is ascii so index 1 is a char boundary.
    match &data[1..] {
        "" => EnginePacket::new(kind),
        rest => EnginePacket::with_data(kind, rest),
    }
}

fn decode_base64(data: &str) -> EnginePacket {
    let Some(kind) = data.as_bytes().first().and_then(|c| packet_type(*c)) else {
        return EnginePacket::error();
    };
    match general_purpose::STANDARD.decode(&data[1..]) {
        Ok(bin) => EnginePacket::with_data(kind, Bytes::from(bin)),
        Err(_e) => {
            tracing::debug!("invalid base64 packet: {_e}");
            EnginePacket::error()
        }
    }
}

fn decode_binary(data: &Bytes) -> EnginePacket {
    match data.first().copied().and_then(EnginePacketType::from_index) {
        Some(kind) => EnginePacket::with_data(kind, data.slice(1..)),
        None => EnginePacket::error(),
    }
}

fn packet_type(digit: u8) -> Option<EnginePacketType> {
    digit
        .checked_sub(b'0')
        .and_then(EnginePacketType::from_index)
}

/// Collapse a string where every char holds one UTF-8 byte back to its UTF-8 form.
fn utf8_decode_str(data: &str) -> Option<String> {
    let bytes = data
        .chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use socketioxide_client_core::EnginePacketType::*;

    fn text(frame: Frame) -> String {
        match frame {
            Frame::Text(s) => s,
            Frame::Binary(_) => panic!("expected a text frame"),
        }
    }

    #[test]
    fn encode_message_packet() {
        let packet = EnginePacket::message("hello");
        assert_eq!(text(encode_packet(&packet, true, false)), "4hello");
        assert_eq!(text(encode_packet(&EnginePacket::new(Ping), true, false)), "2");
        let probe = EnginePacket::with_data(Ping, "probe");
        assert_eq!(text(encode_packet(&probe, false, false)), "2probe");
    }

    #[test]
    fn encode_binary_packet_b64() {
        let packet = EnginePacket::message(Bytes::from_static(&[1, 2, 3]));
        assert_eq!(text(encode_packet(&packet, false, false)), "b4AQID");
    }

    #[test]
    fn encode_binary_packet() {
        let packet = EnginePacket::message(Bytes::from_static(&[1, 2, 3]));
        assert_eq!(
            encode_packet(&packet, true, false),
            Frame::Binary(Bytes::from_static(&[4, 1, 2, 3]))
        );
    }

    #[test]
    fn decode_message_packet() {
        let packet = decode_packet(&"4hello".into(), false);
        assert_eq!(packet, EnginePacket::message("hello"));
        let packet = decode_packet(&"3probe".into(), false);
        assert_eq!(packet, EnginePacket::with_data(Pong, "probe"));
        let packet = decode_packet(&"6".into(), false);
        assert_eq!(packet, EnginePacket::new(Noop));
    }

    #[test]
    fn decode_binary_packet_b64() {
        let packet = decode_packet(&"b4AQID".into(), false);
        assert_eq!(packet, EnginePacket::message(Bytes::from_static(&[1, 2, 3])));
    }

    #[test]
    fn decode_binary_frame() {
        let packet = decode_packet(&Frame::Binary(Bytes::from_static(&[4, 1, 2, 3])), false);
        assert_eq!(packet, EnginePacket::message(Bytes::from_static(&[1, 2, 3])));
    }

    #[test]
    fn decode_invalid_packets() {
        assert!(decode_packet(&"".into(), false).is_error());
        assert!(decode_packet(&"9hello".into(), false).is_error());
        assert!(decode_packet(&"b4%%%".into(), false).is_error());
        assert!(decode_packet(&"bz".into(), false).is_error());
        assert!(decode_packet(&Frame::Binary(Bytes::from_static(&[7, 1])), false).is_error());
        assert!(decode_packet(&Frame::Binary(Bytes::new()), false).is_error());
        assert_eq!(
            decode_packet(&"".into(), false).data,
            Value::Str("parser error".into())
        );
    }

    #[test]
    fn utf8_encoding() {
        let packet = EnginePacket::message("€");
        let encoded = text(encode_packet(&packet, false, true));
        assert_eq!(encoded.chars().count(), 4);
        assert_eq!(decode_packet(&Frame::Text(encoded), true), packet);
        // A char above 0xff cannot come out of the utf8 expansion.
        assert!(decode_packet(&"4€".into(), true).is_error());
    }

    #[test]
    fn packet_round_trip() {
        let packets = [
            EnginePacket::new(Close),
            EnginePacket::new(Upgrade),
            EnginePacket::with_data(Ping, "probe"),
            EnginePacket::message("2[\"event\",\"data\"]"),
            EnginePacket::message(Bytes::from_static(b"\x00\xffbin")),
        ];
        for packet in packets {
            for supports_binary in [true, false] {
                let frame = encode_packet(&packet, supports_binary, false);
                assert_eq!(decode_packet(&frame, false), packet);
            }
        }
    }

    #[test]
    fn empty_message_decodes_without_data() {
        let packet = EnginePacket::message("");
        let frame = encode_packet(&packet, true, false);
        assert_eq!(text(frame.clone()), "4");
        let decoded = decode_packet(&frame, false);
        assert_eq!(decoded, EnginePacket::new(Message));
        assert!(decoded.data.is_none());
        assert_eq!(encode_packet(&decoded, true, false), frame);
    }

    #[test]
    fn json_data_is_stringified() {
        let data = Value::from(serde_json::json!({ "sid": "abc" }));
        let packet = EnginePacket::with_data(Open, data);
        assert_eq!(text(encode_packet(&packet, false, false)), "0{\"sid\":\"abc\"}");
    }
}
