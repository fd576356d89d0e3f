#![warn(
    clippy::all,
    clippy::todo,
    clippy::mem_forget,
    clippy::unused_self,
    clippy::needless_continue,
    clippy::needless_borrow,
    clippy::match_wildcard_for_single_variants,
    clippy::await_holding_lock,
    clippy::imprecise_flops,
    clippy::suboptimal_flops,
    clippy::unnested_or_patterns,
    rust_2018_idioms,
    future_incompatible,
    nonstandard_style,
    missing_docs
)]

//! Engine.IO v3 client.
//!
//! The [`Socket`] drives an engine.io session over long polling and websocket: handshake,
//! heartbeat, buffered writes and transport upgrades. It is a sans-io state machine, all the
//! I/O goes through the collaborators of an [`Io`] bundle (see the [`io`] module) and their
//! completions are fed back with [`Socket::handle_io`]. The [`runtime`] module provides tokio
//! based collaborators.
//!
//! The packet and payload codecs are available in [`parser`] and [`payload`].

pub mod config;
pub mod errors;
pub mod io;
pub mod parser;
pub mod payload;
pub mod runtime;
pub mod socket;
pub mod transport;

pub use config::{SocketConfig, SocketConfigBuilder};
pub use errors::Error;
pub use io::{Io, IoEvent};
pub use socket::{Handshake, Socket, SocketEvent, UpgradeMemory};
pub use transport::{ReadyState, TransportType};
