use engineioxide_client::Error as EngineError;

/// Errors when decoding socket.io packets.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    /// The packet type digit is missing or out of range.
    #[error("invalid packet type")]
    InvalidPacketType,

    /// The attachment count of a binary packet is malformed.
    #[error("invalid attachments")]
    InvalidAttachments,

    /// An ack packet without an ack id.
    #[error("invalid ack id")]
    InvalidAckId,

    /// The packet data is not valid JSON.
    #[error("invalid data: {0}")]
    InvalidData(#[from] serde_json::Error),

    /// Received a binary frame while no binary packet was being reconstructed.
    #[error("received unexpected binary data")]
    UnexpectedBinaryPacket,

    /// Received a text frame while the attachments of a binary packet were expected.
    #[error("received unexpected string data while reconstructing a binary packet")]
    UnexpectedStringPacket,

    /// A placeholder refers to an attachment that was not received.
    #[error("missing attachment {0}")]
    MissingAttachment(usize),
}

/// Socket.io client errors.
///
/// They are reported through the `connect_error`, `reconnect_error` and `error` events as their
/// display string, or to the callback given to
/// [`ManagerHandle::connect_with`](crate::ManagerHandle::connect_with).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The engine.io socket failed.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// The connection attempt did not complete in time.
    #[error("timeout")]
    Timeout,

    /// A malformed packet was received.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The connection closed before the operation completed.
    #[error("connection closed")]
    Closed,

    /// The connection uri is invalid.
    #[error("invalid uri: {0}")]
    InvalidUri(#[from] url::ParseError),
}
