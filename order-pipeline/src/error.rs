//! Error types for the order pipeline.

use order_events::MessageError;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while producing or consuming order events.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Error from the underlying rdkafka library.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// A message could not be serialized for publishing.
    #[error("Encode error: {0}")]
    Encode(#[source] MessageError),

    /// A consumed payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[source] MessageError),

    /// A single publish attempt failed (broker unreachable, timeout).
    #[error("Publish error on topic '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    /// Publishing gave up after exhausting the retry policy.
    #[error("Publish failed after {attempts} attempts: {reason}")]
    PublishFailed { attempts: u32, reason: String },

    /// A single fetch or join attempt failed.
    #[error("Read error for group '{group}': {reason}")]
    Read { group: String, reason: String },

    /// The consumer gave up reading after exhausting the retry policy.
    #[error("Read failed for group '{group}' after {attempts} attempts: {reason}")]
    ReadFailed {
        group: String,
        attempts: u32,
        reason: String,
    },

    /// Offset commit was rejected by the broker.
    #[error("Commit error for group '{group}': {reason}")]
    Commit { group: String, reason: String },

    /// Error from a message handler.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub(crate) fn publish(topic: &str, reason: impl ToString) -> Self {
        Self::Publish {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn read(group: &str, reason: impl ToString) -> Self {
        Self::Read {
            group: group.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failure returned by a message handler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    /// Worth retrying, e.g. a downstream call timed out.
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying will not help; the message is reported and skipped.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

