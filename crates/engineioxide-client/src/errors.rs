use socketioxide_client_core::Value;

use crate::transport::TransportType;

/// Errors surfaced by the engine.io socket as [`SocketEvent::Error`](crate::SocketEvent::Error)
/// or [`SocketEvent::UpgradeError`](crate::SocketEvent::UpgradeError).
///
/// None of them is fatal to the process: they close the session and let the owner decide
/// whether to reconnect.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A malformed packet or payload was received.
    #[error("parser error: {0:?}")]
    PacketParse(Value),
    /// The open packet could not be parsed.
    #[error("invalid handshake: {0}")]
    Handshake(#[from] serde_json::Error),
    /// A transport failed.
    #[error("{message}")]
    Transport {
        /// The failing transport.
        transport: TransportType,
        /// What failed: `"xhr poll error"`, `"xhr post error"` or `"websocket error"`.
        message: &'static str,
        /// The underlying failure.
        description: Option<String>,
    },
    /// Every configured transport is unknown.
    #[error("No transports available")]
    NoTransports,
    /// No transport is called like this.
    #[error("unknown transport: {0}")]
    UnknownTransport(String),
    /// The request uri could not be built.
    #[error("invalid uri: {0}")]
    InvalidUri(#[from] url::ParseError),
    /// The http request could not be built.
    #[error("http error: {0}")]
    Http(#[from] http::Error),
    /// The probed transport did not answer the probe ping.
    #[error("probe error")]
    ProbeFailed(TransportType),
}

impl Error {
    /// Extra detail on the failure, if any.
    pub fn description(&self) -> Option<&str> {
        match self {
            Error::Transport { description, .. } => description.as_deref(),
            _ => None,
        }
    }
}
