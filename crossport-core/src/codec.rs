//! Pluggable value serialization for crossport.
//!
//! The [`ValueCodec`] trait lets an embedding bring its own payload format
//! while crossport provides a default [`JsonCodec`] for debugging and
//! getting started quickly.
//!
//! A codec does two jobs beyond plain serialization:
//!
//! - On encode, every buffer registered in the [`TransferRegistry`] must be
//!   written as its transfer ID rather than its contents, so the backing
//!   memory can move instead of copy.
//! - On decode, IDs are resolved back into buffers through the
//!   [`TransferTable`], which the message layer populates *before* the
//!   payload is read.
//!
//! The [`substitute_transferred`] / [`resolve_transferred`] helpers implement
//! both walks over [`Value`] trees so codecs only have to handle bytes.

use std::fmt;

use crate::value::{ByteBuf, Value};

/// Error type for codec operations.
#[derive(Debug)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a value.
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(e) => write!(f, "encode error: {}", e),
            CodecError::Decode(e) => write!(f, "decode error: {}", e),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Encode(e) => Some(e.as_ref()),
            CodecError::Decode(e) => Some(e.as_ref()),
        }
    }
}

/// Send-side registry of buffers whose memory is moving with a message.
///
/// Transfer IDs are assigned in insertion order; registering the same buffer
/// twice returns the existing ID.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    buffers: Vec<ByteBuf>,
}

impl TransferRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer, returning its transfer ID.
    pub fn register(&mut self, buffer: ByteBuf) -> u32 {
        if let Some(id) = self.id_of(&buffer) {
            return id;
        }
        let id = self.buffers.len() as u32;
        self.buffers.push(buffer);
        id
    }

    /// Look up the ID assigned to a buffer, by identity.
    pub fn id_of(&self, buffer: &ByteBuf) -> Option<u32> {
        self.buffers
            .iter()
            .position(|b| b.same_buffer(buffer))
            .map(|i| i as u32)
    }

    /// Number of registered buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Iterate registered buffers in ID order.
    pub fn buffers(&self) -> impl Iterator<Item = &ByteBuf> {
        self.buffers.iter()
    }
}

/// Receive-side table mapping transfer IDs to materialized buffers.
#[derive(Debug, Default)]
pub struct TransferTable {
    buffers: Vec<Option<ByteBuf>>,
}

impl TransferTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a materialized buffer under a transfer ID.
    pub fn register(&mut self, id: u32, buffer: ByteBuf) {
        let index = id as usize;
        if self.buffers.len() <= index {
            self.buffers.resize_with(index + 1, || None);
        }
        self.buffers[index] = Some(buffer);
    }

    /// Resolve a transfer ID.
    pub fn get(&self, id: u32) -> Option<ByteBuf> {
        self.buffers.get(id as usize).and_then(Clone::clone)
    }
}

/// Pluggable payload serialization format.
///
/// Implementations must be shareable across threads: one codec instance
/// serves both ends of a channel, and posts may come from any thread.
pub trait ValueCodec: Send + Sync + 'static {
    /// Encode a value to bytes, writing registered buffers as transfer IDs.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails. The message
    /// layer treats this as a clone failure and leaves every sender buffer
    /// attached.
    fn encode(&self, value: &Value, transfers: &TransferRegistry) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a value, resolving transfer IDs through `transfers`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the payload is malformed or
    /// references an unknown transfer ID.
    fn decode(&self, bytes: &[u8], transfers: &TransferTable) -> Result<Value, CodecError>;
}

/// Replace every registered buffer in `value` with its transfer placeholder.
///
/// Unregistered buffers are left in place and will serialize by copy.
pub fn substitute_transferred(value: &Value, transfers: &TransferRegistry) -> Value {
    match value {
        Value::Bytes(buf) => match transfers.id_of(buf) {
            Some(id) => Value::Transferred(id),
            None => value.clone(),
        },
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|v| substitute_transferred(v, transfers))
                .collect(),
        ),
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), substitute_transferred(v, transfers)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve every transfer placeholder in `value` through the table.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] when a placeholder references an ID the
/// table does not contain.
pub fn resolve_transferred(value: Value, transfers: &TransferTable) -> Result<Value, CodecError> {
    match value {
        Value::Transferred(id) => transfers.get(id).map(Value::Bytes).ok_or_else(|| {
            CodecError::Decode(format!("unknown transfer id {}", id).into())
        }),
        Value::List(items) => items
            .into_iter()
            .map(|v| resolve_transferred(v, transfers))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Value::Map(entries) => entries
            .into_iter()
            .map(|(k, v)| resolve_transferred(v, transfers).map(|v| (k, v)))
            .collect::<Result<_, _>>()
            .map(Value::Map),
        other => Ok(other),
    }
}

/// JSON codec using serde_json.
///
/// This is the default codec. Human-readable output makes it convenient for
/// debugging; it is not the most compact choice for production use.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode(&self, value: &Value, transfers: &TransferRegistry) -> Result<Vec<u8>, CodecError> {
        let wire = substitute_transferred(value, transfers);
        serde_json::to_vec(&wire).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode(&self, bytes: &[u8], transfers: &TransferTable) -> Result<Value, CodecError> {
        let wire: Value =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(Box::new(e)))?;
        resolve_transferred(wire, transfers)
    }
}
