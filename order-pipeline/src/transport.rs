//! Seam between the pipeline and the message broker.
//!
//! The broker owns partitioning, retention and per-group offsets. The pipeline
//! only needs to append keyed records, join a group, pull batches and commit
//! positions. `kafka` implements this over rdkafka, `memory` in process.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Where a published record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// A record pulled from a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

impl Record {
    /// Size counted against fetch byte thresholds.
    pub fn size(&self) -> usize {
        self.key.as_ref().map_or(0, Vec::len) + self.payload.as_ref().map_or(0, Vec::len)
    }
}

/// A group's read position on one partition: the next offset to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CommitPosition {
    pub partition: i32,
    pub next_offset: i64,
}

/// Batching thresholds for a pull.
///
/// A fetch returns once `min_bytes` have accumulated or `max_wait` elapsed,
/// whichever comes first, and never returns more than `max_bytes` (a single
/// oversized record is still returned on its own).
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub max_wait: Duration,
    pub max_records: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            min_bytes: 1,
            max_bytes: 10_000_000,
            max_wait: Duration::from_millis(500),
            max_records: 500,
        }
    }
}

/// Appends keyed records to a topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<Delivery>;
}

/// Joins consumer groups.
#[async_trait]
pub trait GroupConnector: Send + Sync {
    type Subscription: Subscription;

    /// Joins `group_id` on `topic`. The subscription resumes from the group's
    /// last committed offsets.
    async fn join(
        &self,
        topic: &str,
        group_id: &str,
        options: &FetchOptions,
    ) -> Result<Self::Subscription>;
}

/// Group membership on one topic.
#[async_trait]
pub trait Subscription: Send {
    /// Pulls the next batch, possibly empty when `max_wait` elapsed without data.
    async fn fetch(&mut self) -> Result<Vec<Record>>;

    /// Persists read positions for the group.
    async fn commit(&mut self, positions: &[CommitPosition]) -> Result<()>;

    /// Leaves the group, releasing its partitions.
    async fn close(&mut self) -> Result<()>;
}

/// Partition for a routing key: CRC32 of the key modulo the partition count.
///
/// This is librdkafka's `consistent` partitioner, so the in-memory broker and
/// a Kafka topic configured with it route the same key identically.
pub fn partition_for_key(key: &[u8], partitions: u32) -> u32 {
    crc32fast::hash(key) % partitions.max(1)
}
