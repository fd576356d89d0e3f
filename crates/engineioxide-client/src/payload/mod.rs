//! Engine.IO v3 payload codec: several packets framed together in one polling request body.
//!
//! Text payloads frame each packet as `<length>:<packet>` where the length counts UTF-16 code
//! units, as javascript peers do. Binary payloads frame each packet as
//! `<0 for text | 1 for binary><length digits as byte values 0-9><0xFF><packet>`.
//!
//! Decoding is fail-fast: the first framing or packet error yields the
//! [`EnginePacket::error`](socketioxide_client_core::EnginePacket::error) sentinel and ends
//! the payload.

mod decoder;
mod encoder;

pub use decoder::{Payload, decode_payload};
pub use encoder::encode_payload;
