//! The structured value model carried across ports.
//!
//! This module provides the two datatypes user code hands to a port:
//! - [`Value`]: a structured, serializable value tree
//! - [`ByteBuf`]: a shared byte buffer whose backing memory can be detached
//!   from the sending side and handed to the receiver without a copy

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// A structured value that can be posted through a port.
///
/// `Value` is the closed set of shapes the default codec understands. Byte
/// buffers appear as [`Value::Bytes`]; when a buffer is named in a post's
/// transfer list, the codec replaces it in the serialized payload with a
/// [`Value::Transferred`] placeholder carrying the buffer's transfer ID.
///
/// # Examples
///
/// ```
/// use crossport_core::Value;
///
/// let v = Value::from("hello");
/// assert_eq!(v, Value::Text("hello".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// A byte buffer. Serialized by copy unless transferred.
    Bytes(ByteBuf),
    /// Ordered sequence of values.
    List(Vec<Value>),
    /// String-keyed map of values.
    Map(BTreeMap<String, Value>),
    /// Placeholder for a transferred buffer inside a serialized payload.
    ///
    /// Produced and consumed by codecs during transit; decoding resolves it
    /// back into [`Value::Bytes`] through the receive-side transfer table.
    Transferred(u32),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<ByteBuf> for Value {
    fn from(v: ByteBuf) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// A shared, detachable byte buffer.
///
/// All clones of a `ByteBuf` are handles onto the same backing storage, so
/// detaching the bytes through one handle is visible through every other.
/// This mirrors how a transferred buffer becomes unusable in the sending
/// context: after a successful transfer the sender's handle reports
/// `len() == 0` and `is_detached() == true`.
///
/// Buffers created with [`ByteBuf::external`] represent memory owned by some
/// outside party; they can never be detached and are skipped by transfer
/// lists (the value still travels by copy).
#[derive(Debug, Clone)]
pub struct ByteBuf {
    inner: Arc<Mutex<BufInner>>,
}

#[derive(Debug)]
struct BufInner {
    data: Option<Vec<u8>>,
    external: bool,
}

impl ByteBuf {
    /// Create a detachable buffer owning `data`.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufInner {
                data: Some(data),
                external: false,
            })),
        }
    }

    /// Create a buffer backed by externally owned memory.
    ///
    /// External buffers serialize by copy and are silently skipped when
    /// named in a transfer list.
    pub fn external(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufInner {
                data: Some(data),
                external: true,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current length in bytes; zero once detached.
    pub fn len(&self) -> usize {
        self.lock().data.as_ref().map_or(0, Vec::len)
    }

    /// True when the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the backing memory has been taken by a transfer.
    pub fn is_detached(&self) -> bool {
        self.lock().data.is_none()
    }

    /// Whether a transfer may take this buffer's memory.
    pub fn is_detachable(&self) -> bool {
        let inner = self.lock();
        !inner.external && inner.data.is_some()
    }

    /// Copy the current contents out. Empty once detached.
    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().data.clone().unwrap_or_default()
    }

    /// Take the backing memory, leaving every handle detached.
    ///
    /// Returns `None` for external or already-detached buffers.
    pub fn detach(&self) -> Option<Vec<u8>> {
        let mut inner = self.lock();
        if inner.external {
            return None;
        }
        inner.data.take()
    }

    /// Identity comparison: true when both handles share backing storage.
    pub fn same_buffer(&self, other: &ByteBuf) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// Content equality, so assembled values compare naturally in assertions.
impl PartialEq for ByteBuf {
    fn eq(&self, other: &ByteBuf) -> bool {
        self.same_buffer(other) || self.to_vec() == other.to_vec()
    }
}

impl Serialize for ByteBuf {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.to_vec())
    }
}

impl<'de> Deserialize<'de> for ByteBuf {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let data = Vec::<u8>::deserialize(deserializer)?;
        Ok(ByteBuf::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytebuf_len_and_contents() {
        let buf = ByteBuf::new(vec![1, 2, 3]);
        assert_eq!(buf.len(), 3);
        assert!(!buf.is_empty());
        assert_eq!(buf.to_vec(), vec![1, 2, 3]);
        assert!(!buf.is_detached());
        assert!(buf.is_detachable());
    }

    #[test]
    fn test_bytebuf_detach_visible_through_clones() {
        let buf = ByteBuf::new(vec![0, 1, 2, 3]);
        let alias = buf.clone();

        let taken = buf.detach().expect("detachable");
        assert_eq!(taken, vec![0, 1, 2, 3]);

        // Both handles now observe the detached state.
        assert!(buf.is_detached());
        assert!(alias.is_detached());
        assert_eq!(alias.len(), 0);
        assert_eq!(alias.to_vec(), Vec::<u8>::new());
    }

    #[test]
    fn test_bytebuf_detach_twice_returns_none() {
        let buf = ByteBuf::new(vec![9]);
        assert!(buf.detach().is_some());
        assert!(buf.detach().is_none());
        assert!(!buf.is_detachable());
    }

    #[test]
    fn test_external_bytebuf_never_detaches() {
        let buf = ByteBuf::external(vec![7, 7]);
        assert!(!buf.is_detachable());
        assert!(buf.detach().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_bytebuf_identity() {
        let a = ByteBuf::new(vec![1]);
        let b = a.clone();
        let c = ByteBuf::new(vec![1]);
        assert!(a.same_buffer(&b));
        assert!(!a.same_buffer(&c));
        // Distinct buffers with equal contents still compare equal.
        assert_eq!(a, c);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i64), Value::Int(42));
        assert_eq!(Value::from(1.5), Value::Float(1.5));
        assert_eq!(Value::from("hi"), Value::Text("hi".to_string()));

        let list = Value::from(vec![Value::from(1i64), Value::Null]);
        assert_eq!(list, Value::List(vec![Value::Int(1), Value::Null]));
    }

    #[test]
    fn test_value_serde_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::from("crossport"));
        map.insert("count".to_string(), Value::from(3i64));
        let value = Value::List(vec![
            Value::Map(map),
            Value::Bytes(ByteBuf::new(vec![0, 255])),
            Value::Transferred(1),
        ]);

        let json = serde_json::to_vec(&value).expect("serialize");
        let decoded: Value = serde_json::from_slice(&json).expect("deserialize");
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_bytebuf_serializes_current_contents() {
        let buf = ByteBuf::new(vec![5, 6]);
        let json = serde_json::to_string(&Value::Bytes(buf.clone())).expect("serialize");

        buf.detach();
        let after = serde_json::to_string(&Value::Bytes(buf)).expect("serialize");

        assert_ne!(json, after);
    }
}
