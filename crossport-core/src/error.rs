//! Error types for the crossport messaging layer.

use crate::codec::CodecError;

/// Errors surfaced by ports, channels and messages.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The port is closed or has been detached from its state.
    #[error("message port is closed")]
    ClosedPort,

    /// A transfer-list entry is not a transferable byte buffer.
    #[error("transfer list entry is not a transferable buffer")]
    InvalidTransferObject,

    /// The codec failed to serialize or deserialize a value.
    #[error("value clone failed: {message}")]
    CloneFailure {
        /// Codec-reported failure details.
        message: String,
    },

    /// `Message::serialize` was called on an already-populated message.
    #[error("message is already populated")]
    AlreadyPopulated,

    /// The target environment's event loop is no longer running.
    #[error("environment '{name}' is gone")]
    EnvironmentGone {
        /// Name of the environment.
        name: String,
    },

    /// The environment's event-loop thread could not be started.
    #[error("failed to start environment thread: {message}")]
    EnvironmentSpawn {
        /// OS-reported failure details.
        message: String,
    },
}

impl From<CodecError> for PortError {
    fn from(err: CodecError) -> Self {
        PortError::CloneFailure {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_maps_to_clone_failure() {
        let err: PortError = CodecError::Encode("host object".into()).into();
        match err {
            PortError::CloneFailure { message } => {
                assert!(message.contains("encode error"));
                assert!(message.contains("host object"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(PortError::ClosedPort.to_string(), "message port is closed");
        assert_eq!(
            PortError::EnvironmentGone {
                name: "worker".to_string()
            }
            .to_string(),
            "environment 'worker' is gone"
        );
    }
}
