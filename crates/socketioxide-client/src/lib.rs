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

//! Socket.IO v4 client over Engine.IO v3.
//!
//! A [`Manager`] holds the engine.io connection to a server and multiplexes the namespace
//! sockets ([`NsSocket`]) over it. It handles the connection timeout, reconnection with
//! exponential backoff, acknowledgements and binary attachments.
//!
//! The manager is a sans-io state machine built on [`engineioxide_client::Socket`]. The
//! [`Client`] runs it on tokio and is controlled through a [`ManagerHandle`] and
//! [`SocketHandle`]s. [`SocketIo`] caches one client per server:
//!
//! ```no_run
//! # use socketioxide_client::{ManagerConfig, SocketIo};
//! # use socketioxide_client_core::Value;
//! # async fn doc() -> Result<(), socketioxide_client::Error> {
//! let io = SocketIo::new();
//! let socket = io.connect("http://localhost:3000/", ManagerConfig::default())?;
//! socket.on("connect", |_| println!("connected"));
//! socket.emit_with_ack("join", vec!["room".into()], |args: Vec<Value>| {
//!     println!("joined: {args:?}");
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! The wire format is implemented by the [`parser`] and [`binary`] modules.

pub mod binary;
pub mod client;
pub mod config;
pub mod errors;
pub mod manager;
pub mod parser;
pub mod socket;

pub use client::{Client, ManagerHandle, SocketHandle, SocketIo};
pub use config::{ManagerConfig, ManagerConfigBuilder};
pub use errors::{Error, ParseError};
pub use manager::{Command, Manager, ManagerState};
pub use socket::{NsSocket, SocketState};
