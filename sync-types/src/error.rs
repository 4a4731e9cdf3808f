//! Error types for the wire and snapshot layer.

use thiserror::Error;

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// MessagePack serialization failed
    #[error("msgpack serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("msgpack deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// JSON encoding or decoding failed
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown WAMP message code
    #[error("invalid message type: {0}")]
    InvalidMessageType(u64),

    /// Frame decoded but did not have the expected layout
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Topic string was not `<namespace>.<identifier>`
    #[error("invalid topic: {0:?}")]
    InvalidTopic(String),

    /// Payload could not be mapped to a snapshot
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DecodeError::InvalidMessageType(99);
        assert_eq!(err.to_string(), "invalid message type: 99");

        let err = DecodeError::InvalidTopic("routes".into());
        assert_eq!(err.to_string(), "invalid topic: \"routes\"");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DecodeError>();
    }
}
