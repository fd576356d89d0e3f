//! Extraction and reinsertion of the binary attachments of a packet.
//!
//! Binary leaves of the packet data are replaced, depth first, by a placeholder object
//! `{"_placeholder":true,"num":<index>}` and sent as separate frames after the packet header.
//! [`reconstruct_packet`] walks the data in the same order to put them back.
use std::collections::BTreeMap;

use bytes::Bytes;
use socketioxide_client_core::{SocketPacket, Value};

use crate::errors::ParseError;

const PLACEHOLDER: &str = "_placeholder";
const NUM: &str = "num";

/// A packet whose binary leaves were replaced by placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct DeconstructedPacket {
    /// The packet, `attachments` is set to the number of buffers.
    pub packet: SocketPacket,
    /// The extracted buffers, indexed by the placeholders.
    pub buffers: Vec<Bytes>,
}

/// Replace every binary leaf of `packet` by a placeholder.
pub fn deconstruct_packet(mut packet: SocketPacket) -> DeconstructedPacket {
    let mut buffers = Vec::new();
    packet.data = deconstruct(std::mem::take(&mut packet.data), &mut buffers);
    packet.attachments = Some(buffers.len());
    DeconstructedPacket { packet, buffers }
}

fn deconstruct(data: Value, buffers: &mut Vec<Bytes>) -> Value {
    match data {
        Value::Binary(bin) => {
            let num = buffers.len();
            buffers.push(bin);
            placeholder(num)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(|v| deconstruct(v, buffers)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, deconstruct(v, buffers)))
                .collect(),
        ),
        v => v,
    }
}

fn placeholder(num: usize) -> Value {
    let mut map = BTreeMap::new();
    map.insert(PLACEHOLDER.to_string(), Value::Bool(true));
    map.insert(NUM.to_string(), Value::Int(num as i64));
    Value::Object(map)
}

/// The attachment index of a placeholder object.
fn placeholder_index(map: &BTreeMap<String, Value>) -> Option<usize> {
    match (map.get(PLACEHOLDER), map.get(NUM)) {
        (Some(Value::Bool(true)), Some(Value::Int(num))) => usize::try_from(*num).ok(),
        _ => None,
    }
}

/// Put `buffers` back in place of the placeholders of `packet`.
///
/// The attachments of the returned packet are marked as consumed.
pub fn reconstruct_packet(
    mut packet: SocketPacket,
    buffers: &[Bytes],
) -> Result<SocketPacket, ParseError> {
    packet.data = reconstruct(std::mem::take(&mut packet.data), buffers)?;
    packet.attachments = None;
    Ok(packet)
}

fn reconstruct(data: Value, buffers: &[Bytes]) -> Result<Value, ParseError> {
    match data {
        Value::Object(map) => match placeholder_index(&map) {
            Some(num) => buffers
                .get(num)
                .cloned()
                .map(Value::Binary)
                .ok_or(ParseError::MissingAttachment(num)),
            None => map
                .into_iter()
                .map(|(k, v)| Ok((k, reconstruct(v, buffers)?)))
                .collect::<Result<_, _>>()
                .map(Value::Object),
        },
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| reconstruct(v, buffers))
            .collect::<Result<_, _>>()
            .map(Value::Array),
        v => Ok(v),
    }
}
