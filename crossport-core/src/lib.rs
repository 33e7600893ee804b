//! # crossport-core
//!
//! Core abstractions for the crossport cross-thread messaging library.
//!
//! This crate holds the pieces that are independent of any event loop:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`Value`] / [`ByteBuf`] | The structured values ports carry, and the detachable buffer that transfers without copying |
//! | [`ValueCodec`] / [`JsonCodec`] | Pluggable payload serialization with a JSON default |
//! | [`TransferRegistry`] / [`TransferTable`] | Send- and receive-side maps between buffers and transfer IDs |
//! | [`PortError`] | The error taxonomy shared by the whole workspace |
//!
//! Application code depends on these abstractions; the `crossport` crate
//! supplies the ports, channels and environments that move values between
//! threads.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod error;
mod value;

pub use codec::{
    CodecError, JsonCodec, TransferRegistry, TransferTable, ValueCodec, resolve_transferred,
    substitute_transferred,
};
pub use error::PortError;
pub use value::{ByteBuf, Value};
