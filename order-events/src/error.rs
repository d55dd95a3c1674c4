use thiserror::Error;

/// Errors raised while turning messages into bytes and back.
#[derive(Error, Debug)]
pub enum MessageError {
    /// The message could not be serialized.
    #[error("Serialization error: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload is not a well-formed message.
    #[error("Deserialization error: {0}")]
    Decode(#[source] serde_json::Error),

    /// The message parsed but violates a field constraint.
    #[error("Invalid message: {0}")]
    Invalid(String),
}
