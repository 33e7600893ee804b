//! # crossport
//!
//! Cross-thread message ports with zero-copy buffer transfer.
//!
//! A [`Channel`] produces two entangled [`Port`]s. Each port is bound to an
//! [`Environment`] — an isolated event loop — and delivers inbound messages
//! as callbacks on that loop. Posting serializes the value through a
//! pluggable codec and moves the resulting message to the sibling's queue;
//! byte buffers named in the transfer list move their backing memory instead
//! of copying it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ Port (owner side)                                │
//! │ • bound to one Environment                       │
//! │ • post / start / stop / close / detach           │
//! │ • receive task parked on a coalescing wake       │
//! ├──────────────────────────────────────────────────┤
//! │ PortState (shared side)                          │
//! │ • inbound FIFO + receiving flag + owner wake     │
//! │ • entanglement bond shared with the sibling      │
//! │ • survives detach; adoptable by a new Port       │
//! ├──────────────────────────────────────────────────┤
//! │ Message (carrier)                                │
//! │ • codec payload + transferred buffer memory      │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use crossport::{Channel, Environment, JsonCodec, Value};
//!
//! let env = Environment::new("worker")?;
//! let channel = Channel::new(env.handle(), JsonCodec)?;
//!
//! channel.port2.set_on_message(|value| {
//!     println!("got {value:?}");
//!     Ok(())
//! });
//! channel.port2.start()?;
//!
//! channel.port1.post(&Value::from("hello"), &[])?;
//! ```
//!
//! Moving a port across environments goes through [`Port::detach`], which
//! releases the shared state (queue included) as a [`PortStateHandle`], and
//! [`Port::adopt`], which binds it to a new environment.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience.
pub use crossport_core::{
    ByteBuf, CodecError, JsonCodec, PortError, TransferRegistry, TransferTable, Value, ValueCodec,
};

mod channel;
mod environment;
mod message;
mod port;
mod state;

pub use channel::Channel;
pub use environment::{EnvHandle, Environment};
pub use message::Message;
pub use port::{HandlerError, Port};
pub use state::PortStateHandle;
