//! Reporting of messages the pipeline gave up on.
//!
//! Failures are observable through logs by default. `FailureSink` is the seam
//! for a dead-letter topic or an alerting hook.

use async_trait::async_trait;
use tracing::{error, warn};

/// A message or operation the pipeline could not complete.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineFailure {
    /// The producer exhausted its retries; the event is lost.
    PublishFailed {
        topic: String,
        key: Option<String>,
        attempts: u32,
        reason: String,
    },
    /// A payload could not be decoded; it was skipped and its offset advanced.
    DecodeFailed {
        group: String,
        partition: i32,
        offset: i64,
        reason: String,
    },
    /// The handler rejected a message for good; its offset advanced.
    HandlerFailed {
        group: String,
        partition: i32,
        offset: i64,
        key: Option<String>,
        reason: String,
    },
    /// The consumer stopped after repeated read failures.
    ReadFailed {
        group: String,
        attempts: u32,
        reason: String,
    },
}

/// Destination for pipeline failures.
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn report(&self, failure: PipelineFailure);
}

/// Logs every failure through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailureSink;

#[async_trait]
impl FailureSink for LogFailureSink {
    async fn report(&self, failure: PipelineFailure) {
        match failure {
            PipelineFailure::PublishFailed {
                topic,
                key,
                attempts,
                reason,
            } => error!(%topic, ?key, attempts, %reason, "Event dropped after publish retries"),
            PipelineFailure::DecodeFailed {
                group,
                partition,
                offset,
                reason,
            } => warn!(%group, partition, offset, %reason, "Skipped undecodable message"),
            PipelineFailure::HandlerFailed {
                group,
                partition,
                offset,
                key,
                reason,
            } => error!(%group, partition, offset, ?key, %reason, "Handler gave up on message"),
            PipelineFailure::ReadFailed {
                group,
                attempts,
                reason,
            } => error!(%group, attempts, %reason, "Consumer group stopped reading"),
        }
    }
}
