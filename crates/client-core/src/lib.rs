#![warn(
    clippy::all,
    clippy::todo,
    clippy::mem_forget,
    clippy::unused_self,
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

//! Types shared by the engine.io and socket.io client crates.
//!
//! * [`Value`]: the dynamically typed payload carried by packets and event arguments.
//! * [`Emitter`]: a named event dispatcher used by every user facing handle.
//! * [`Backoff`]: the exponential reconnection delay generator.
//! * [`packet`]: the engine.io and socket.io packet data model.

pub mod backoff;
pub mod emitter;
pub mod packet;
pub mod value;

pub use backoff::Backoff;
pub use emitter::{Emitter, Listener, ListenerKey};
pub use packet::{EnginePacket, EnginePacketType, Frame, PacketOptions, SocketPacket, SocketPacketType};
pub use value::{Function, Value, ValueError, ValueKind};
