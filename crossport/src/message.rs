//! The serialized carrier moved between port states.
//!
//! A [`Message`] owns two things: the codec-produced payload bytes, and the
//! raw memory of every buffer whose ownership travels with the message.
//! Transferred memory is taken from the sender's [`ByteBuf`]s only after the
//! codec has signalled success, so a failed serialization leaves the sender
//! untouched.

use crossport_core::{
    ByteBuf, PortError, TransferRegistry, TransferTable, Value, ValueCodec,
};

/// A serialized value plus its transferred buffers.
///
/// Messages are movable but not copyable: once a message is enqueued on a
/// port state, the sender no longer has access to it.
#[derive(Debug, Default)]
pub struct Message {
    payload: Vec<u8>,
    transferred: Vec<Vec<u8>>,
}

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `value` into this message, transferring the listed buffers.
    ///
    /// Transfer-list entries must be [`Value::Bytes`]. Buffers that cannot
    /// be detached (external, or already detached) are skipped silently; the
    /// value still carries their contents by copy. Eligible buffers are
    /// assigned their insertion index as the transfer ID, and are detached
    /// from the sender only once the codec has produced the payload.
    ///
    /// # Errors
    ///
    /// - [`PortError::AlreadyPopulated`] if this message already holds a payload.
    /// - [`PortError::InvalidTransferObject`] if an entry is not a byte buffer.
    /// - [`PortError::CloneFailure`] if the codec fails; no buffer is detached.
    pub fn serialize(
        &mut self,
        codec: &dyn ValueCodec,
        value: &Value,
        transfer_list: &[Value],
    ) -> Result<(), PortError> {
        if !self.payload.is_empty() {
            return Err(PortError::AlreadyPopulated);
        }

        let mut registry = TransferRegistry::new();
        for entry in transfer_list {
            let Value::Bytes(buffer) = entry else {
                return Err(PortError::InvalidTransferObject);
            };
            if !buffer.is_detachable() {
                tracing::trace!(len = buffer.len(), "skipping non-detachable transfer buffer");
                continue;
            }
            registry.register(buffer.clone());
        }

        let payload = codec.encode(value, &registry)?;

        // The codec succeeded; only now take ownership of the buffer memory
        // and render the sender's handles detached.
        self.transferred = registry
            .buffers()
            .map(|buffer| buffer.detach().unwrap_or_default())
            .collect();
        self.payload = payload;
        Ok(())
    }

    /// Deserialize the message, consuming it.
    ///
    /// Transferred buffers are materialized and registered in the transfer
    /// table before the payload is decoded, so embedded IDs resolve.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::CloneFailure`] when the codec rejects the payload.
    pub fn deserialize(mut self, codec: &dyn ValueCodec) -> Result<Value, PortError> {
        let mut table = TransferTable::new();
        for (id, data) in self.transferred.drain(..).enumerate() {
            table.register(id as u32, ByteBuf::new(data));
        }
        Ok(codec.decode(&self.payload, &table)?)
    }

    /// Bytes held by this message: payload plus transferred memory.
    pub fn size(&self) -> usize {
        self.payload.len() + self.transferred.iter().map(Vec::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossport_core::{CodecError, JsonCodec};

    /// Codec that refuses every value, for exercising the failure paths.
    struct RefusingCodec;

    impl ValueCodec for RefusingCodec {
        fn encode(
            &self,
            _value: &Value,
            _transfers: &TransferRegistry,
        ) -> Result<Vec<u8>, CodecError> {
            Err(CodecError::Encode("host object refused".into()))
        }

        fn decode(&self, _bytes: &[u8], _transfers: &TransferTable) -> Result<Value, CodecError> {
            Err(CodecError::Decode("unreadable".into()))
        }
    }

    #[test]
    fn test_roundtrip_without_transfers() {
        let codec = JsonCodec;
        let value = Value::List(vec![Value::from("hello"), Value::from(7i64)]);

        let mut message = Message::new();
        message.serialize(&codec, &value, &[]).expect("serialize");
        let decoded = message.deserialize(&codec).expect("deserialize");

        assert_eq!(decoded, value);
    }

    #[test]
    fn test_transfer_moves_buffer_memory() {
        let codec = JsonCodec;
        let buffer = ByteBuf::new((0u8..16).collect());
        let value = Value::Bytes(buffer.clone());

        let mut message = Message::new();
        message
            .serialize(&codec, &value, &[Value::Bytes(buffer.clone())])
            .expect("serialize");

        // The sender side is detached once serialization succeeded.
        assert!(buffer.is_detached());
        assert_eq!(buffer.len(), 0);

        let decoded = message.deserialize(&codec).expect("deserialize");
        match decoded {
            Value::Bytes(received) => {
                assert_eq!(received.to_vec(), (0u8..16).collect::<Vec<_>>());
                assert!(!received.same_buffer(&buffer));
            }
            other => panic!("expected bytes, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_serialize_leaves_buffers_attached() {
        let buffer = ByteBuf::new(vec![1, 2, 3]);
        let value = Value::Bytes(buffer.clone());

        let mut message = Message::new();
        let err = message
            .serialize(&RefusingCodec, &value, &[Value::Bytes(buffer.clone())])
            .expect_err("codec refuses");

        assert!(matches!(err, PortError::CloneFailure { .. }));
        assert!(!buffer.is_detached());
        assert_eq!(buffer.len(), 3);
        assert_eq!(message.size(), 0);
    }

    #[test]
    fn test_non_buffer_transfer_entry_is_rejected() {
        let mut message = Message::new();
        let err = message
            .serialize(&JsonCodec, &Value::Null, &[Value::from("not a buffer")])
            .expect_err("must reject");
        assert!(matches!(err, PortError::InvalidTransferObject));
        assert_eq!(message.size(), 0);
    }

    #[test]
    fn test_non_detachable_buffers_are_skipped() {
        let codec = JsonCodec;
        let external = ByteBuf::external(vec![5, 6, 7]);
        let value = Value::Bytes(external.clone());

        let mut message = Message::new();
        message
            .serialize(&codec, &value, &[Value::Bytes(external.clone())])
            .expect("serialize proceeds");

        // Skipped, not transferred: the sender keeps its bytes and the
        // receiver gets a copy.
        assert_eq!(external.len(), 3);
        let decoded = message.deserialize(&codec).expect("deserialize");
        assert_eq!(decoded, Value::Bytes(ByteBuf::new(vec![5, 6, 7])));
    }

    #[test]
    fn test_serialize_twice_is_rejected() {
        let mut message = Message::new();
        message
            .serialize(&JsonCodec, &Value::from(1i64), &[])
            .expect("first serialize");
        let err = message
            .serialize(&JsonCodec, &Value::from(2i64), &[])
            .expect_err("second serialize");
        assert!(matches!(err, PortError::AlreadyPopulated));
    }

    #[test]
    fn test_duplicate_transfer_entries_share_one_id() {
        let codec = JsonCodec;
        let buffer = ByteBuf::new(vec![9, 9]);
        let value = Value::List(vec![
            Value::Bytes(buffer.clone()),
            Value::Bytes(buffer.clone()),
        ]);

        let mut message = Message::new();
        message
            .serialize(
                &codec,
                &value,
                &[Value::Bytes(buffer.clone()), Value::Bytes(buffer.clone())],
            )
            .expect("serialize");

        let decoded = message.deserialize(&codec).expect("deserialize");
        match decoded {
            Value::List(items) => {
                assert_eq!(items.len(), 2);
                match (&items[0], &items[1]) {
                    (Value::Bytes(a), Value::Bytes(b)) => {
                        assert_eq!(a.to_vec(), vec![9, 9]);
                        // Both placeholders resolved to the same buffer.
                        assert!(a.same_buffer(b));
                    }
                    other => panic!("expected bytes pair, got {:?}", other),
                }
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_size_accounts_for_payload_and_transfers() {
        let codec = JsonCodec;
        let buffer = ByteBuf::new(vec![0; 32]);

        let mut message = Message::new();
        message
            .serialize(
                &codec,
                &Value::Bytes(buffer.clone()),
                &[Value::Bytes(buffer)],
            )
            .expect("serialize");

        assert!(message.size() > 32);
    }
}
