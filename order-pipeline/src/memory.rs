//! In-process broker with Kafka's topic, partition and consumer-group model.
//!
//! Each topic is a fixed set of append-only partition logs. Groups keep their
//! own committed offsets, which outlive any subscription, so dropping a
//! subscription without committing and joining again redelivers everything
//! after the last commit. Members that share a group id split partitions
//! between them (`partition % members`).

use crate::error::{PipelineError, Result};
use crate::transport::{
    partition_for_key, CommitPosition, Delivery, FetchOptions, GroupConnector, Publisher, Record,
    Subscription,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
}

/// Append-only log for a single partition.
#[derive(Debug, Default)]
struct PartitionLog {
    records: Vec<StoredRecord>,
    start_offset: i64,
}

impl PartitionLog {
    fn end_offset(&self) -> i64 {
        self.start_offset + self.records.len() as i64
    }

    fn append(&mut self, record: StoredRecord) -> i64 {
        let offset = self.end_offset();
        self.records.push(record);
        offset
    }

    fn get(&self, offset: i64) -> Option<&StoredRecord> {
        if offset < self.start_offset {
            return None;
        }
        self.records.get((offset - self.start_offset) as usize)
    }

    fn truncate_before(&mut self, offset: i64) {
        let offset = offset.min(self.end_offset());
        if offset <= self.start_offset {
            return;
        }
        self.records.drain(..(offset - self.start_offset) as usize);
        self.start_offset = offset;
    }
}

struct TopicLog {
    partitions: Vec<RwLock<PartitionLog>>,
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: (0..partitions.max(1))
                .map(|_| RwLock::new(PartitionLog::default()))
                .collect(),
        }
    }
}

type GroupKey = (String, String);

struct Inner {
    partitions: u32,
    topics: DashMap<String, Arc<TopicLog>>,
    /// Committed next offsets keyed by `(group, topic, partition)`.
    offsets: DashMap<(String, String, u32), i64>,
    /// Live members per `(group, topic)`, in join order.
    members: Mutex<HashMap<GroupKey, Vec<u64>>>,
    /// Every group that ever joined a topic.
    groups: DashMap<String, HashSet<String>>,
    next_member: AtomicU64,
    round_robin: AtomicU64,
    available: AtomicBool,
    failing_fetches: AtomicU32,
    failing_commits: AtomicU32,
    appended: Notify,
}

impl Inner {
    fn topic(&self, name: &str) -> Arc<TopicLog> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TopicLog::new(self.partitions)))
            .clone()
    }

    fn committed(&self, group: &str, topic: &str, partition: u32) -> Option<i64> {
        self.offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .map(|offset| *offset)
    }

    fn leave(&self, group: &str, topic: &str, member: u64) {
        let mut members = self.members.lock();
        if let Some(list) = members.get_mut(&(group.to_string(), topic.to_string())) {
            list.retain(|id| *id != member);
        }
    }

    fn assignment(&self, group: &str, topic: &str, member: u64) -> Vec<u32> {
        let members = self.members.lock();
        let Some(list) = members.get(&(group.to_string(), topic.to_string())) else {
            return Vec::new();
        };
        let Some(index) = list.iter().position(|id| *id == member) else {
            return Vec::new();
        };
        let count = list.len() as u32;
        (0..self.partitions)
            .filter(|partition| partition % count == index as u32)
            .collect()
    }
}

/// In-memory broker implementing both [`Publisher`] and [`GroupConnector`].
///
/// Cloning yields another handle to the same broker. Topics are created on
/// first use with the broker's partition count.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(3)
    }
}

impl MemoryBroker {
    pub fn new(partitions: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                topics: DashMap::new(),
                offsets: DashMap::new(),
                members: Mutex::new(HashMap::new()),
                groups: DashMap::new(),
                next_member: AtomicU64::new(1),
                round_robin: AtomicU64::new(0),
                available: AtomicBool::new(true),
                failing_fetches: AtomicU32::new(0),
                failing_commits: AtomicU32::new(0),
                appended: Notify::new(),
            }),
        }
    }

    /// Number of partitions every topic gets.
    pub fn partitions(&self) -> u32 {
        self.inner.partitions
    }

    /// Simulates losing (or regaining) connectivity. While unavailable every
    /// publish, join, fetch and commit fails.
    pub fn set_available(&self, available: bool) {
        info!(available, "Memory broker availability changed");
        self.inner.available.store(available, Ordering::SeqCst);
        self.inner.appended.notify_waiters();
    }

    /// Makes the next `count` fetches, across all subscriptions, fail.
    pub fn fail_next_fetches(&self, count: u32) {
        self.inner.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` commits, across all subscriptions, fail.
    /// Fetches keep working.
    pub fn fail_next_commits(&self, count: u32) {
        self.inner.failing_commits.store(count, Ordering::SeqCst);
    }

    /// The next offset `group` will read on a partition, if it ever committed.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Option<i64> {
        self.inner.committed(group, topic, partition)
    }

    /// Offset the next record appended to the partition will get.
    pub fn end_offset(&self, topic: &str, partition: u32) -> i64 {
        self.inner
            .topic(topic)
            .partitions
            .get(partition as usize)
            .map_or(0, |log| log.read().end_offset())
    }

    /// Number of records currently retained across all partitions of a topic.
    pub fn retained(&self, topic: &str) -> usize {
        self.inner
            .topic(topic)
            .partitions
            .iter()
            .map(|log| log.read().records.len())
            .sum()
    }

    /// Number of live members in a group.
    pub fn members(&self, group: &str, topic: &str) -> usize {
        self.inner
            .members
            .lock()
            .get(&(group.to_string(), topic.to_string()))
            .map_or(0, Vec::len)
    }

    /// Drops records that every group known on the topic has committed past.
    /// Returns how many records were removed.
    pub fn truncate_consumed(&self, topic: &str) -> usize {
        let groups: Vec<String> = self
            .inner
            .groups
            .get(topic)
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default();
        if groups.is_empty() {
            return 0;
        }

        let log = self.inner.topic(topic);
        let mut removed = 0;
        for (partition, partition_log) in log.partitions.iter().enumerate() {
            let low_watermark = groups
                .iter()
                .map(|group| {
                    self.inner
                        .committed(group, topic, partition as u32)
                        .unwrap_or(0)
                })
                .min()
                .unwrap_or(0);

            let mut partition_log = partition_log.write();
            let before = partition_log.records.len();
            partition_log.truncate_before(low_watermark);
            removed += before - partition_log.records.len();
        }

        debug!(topic, removed, "Truncated consumed records");
        removed
    }

    fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<Delivery> {
        if !self.is_available() {
            return Err(PipelineError::publish(topic, "broker unavailable"));
        }

        let partitions = self.inner.partitions;
        let partition = match key {
            Some(key) => partition_for_key(key.as_bytes(), partitions),
            None => (self.inner.round_robin.fetch_add(1, Ordering::Relaxed) % partitions as u64) as u32,
        };

        let log = self.inner.topic(topic);
        let offset = log.partitions[partition as usize].write().append(StoredRecord {
            key: key.map(|key| key.as_bytes().to_vec()),
            payload: payload.to_vec(),
        });
        self.inner.appended.notify_waiters();

        debug!(topic, ?key, partition, offset, "Appended record");
        Ok(Delivery {
            partition: partition as i32,
            offset,
        })
    }
}

#[async_trait]
impl GroupConnector for MemoryBroker {
    type Subscription = MemorySubscription;

    async fn join(
        &self,
        topic: &str,
        group_id: &str,
        options: &FetchOptions,
    ) -> Result<MemorySubscription> {
        if !self.is_available() {
            return Err(PipelineError::read(group_id, "broker unavailable"));
        }

        self.inner.topic(topic);
        self.inner
            .groups
            .entry(topic.to_string())
            .or_default()
            .insert(group_id.to_string());

        let member = self.inner.next_member.fetch_add(1, Ordering::Relaxed);
        self.inner
            .members
            .lock()
            .entry((group_id.to_string(), topic.to_string()))
            .or_default()
            .push(member);

        info!(group = group_id, topic, member, "Joined consumer group");
        Ok(MemorySubscription {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            group: group_id.to_string(),
            member,
            options: options.clone(),
            positions: HashMap::new(),
            cursor: 0,
            closed: false,
        })
    }
}

/// Membership of one group on one topic of a [`MemoryBroker`].
///
/// Dropping it without `close` releases the membership too, like a crashed
/// process whose session expired. Uncommitted progress is lost either way.
pub struct MemorySubscription {
    inner: Arc<Inner>,
    topic: String,
    group: String,
    member: u64,
    options: FetchOptions,
    /// Next offset to hand out, per assigned partition.
    positions: HashMap<u32, i64>,
    /// Partition the next batch starts from, so no partition starves.
    cursor: usize,
    closed: bool,
}

impl MemorySubscription {
    fn sync_assignment(&mut self, log: &TopicLog) -> Vec<u32> {
        let assigned = self.inner.assignment(&self.group, &self.topic, self.member);
        self.positions.retain(|partition, _| assigned.contains(partition));
        for partition in &assigned {
            if !self.positions.contains_key(partition) {
                let start = log.partitions[*partition as usize].read().start_offset;
                let committed = self
                    .inner
                    .committed(&self.group, &self.topic, *partition)
                    .unwrap_or(start);
                self.positions.insert(*partition, committed.max(start));
            }
        }
        assigned
    }

    /// Records available from the current positions, without advancing them.
    fn collect(&mut self) -> Vec<Record> {
        let log = self.inner.topic(&self.topic);
        let assigned = self.sync_assignment(&log);
        let mut batch = Vec::new();
        let mut bytes = 0;

        if assigned.is_empty() {
            return batch;
        }

        let start = self.cursor % assigned.len();
        self.cursor = self.cursor.wrapping_add(1);

        'partitions: for i in 0..assigned.len() {
            let partition = assigned[(start + i) % assigned.len()];
            let partition_log = log.partitions[partition as usize].read();
            let mut offset = self.positions[&partition].max(partition_log.start_offset);

            while let Some(stored) = partition_log.get(offset) {
                let size = stored.payload.len() + stored.key.as_ref().map_or(0, Vec::len);
                let full = batch.len() >= self.options.max_records
                    || (!batch.is_empty() && bytes + size > self.options.max_bytes);
                if full {
                    break 'partitions;
                }

                bytes += size;
                batch.push(Record {
                    topic: self.topic.clone(),
                    partition: partition as i32,
                    offset,
                    key: stored.key.clone(),
                    payload: Some(stored.payload.clone()),
                });
                offset += 1;
            }
        }

        batch
    }

    fn take_injected_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn fetch(&mut self) -> Result<Vec<Record>> {
        let deadline = Instant::now() + self.options.max_wait;
        let inner = Arc::clone(&self.inner);

        loop {
            let notified = inner.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !inner.available.load(Ordering::SeqCst) {
                return Err(PipelineError::read(&self.group, "broker unavailable"));
            }
            if Self::take_injected_failure(&inner.failing_fetches) {
                return Err(PipelineError::read(&self.group, "injected fetch failure"));
            }

            let batch = self.collect();
            let bytes: usize = batch.iter().map(Record::size).sum();
            let expired = Instant::now() >= deadline;

            if (!batch.is_empty() && bytes >= self.options.min_bytes) || expired {
                for record in &batch {
                    self.positions
                        .insert(record.partition as u32, record.offset + 1);
                }
                return Ok(batch);
            }

            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }

    async fn commit(&mut self, positions: &[CommitPosition]) -> Result<()> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(PipelineError::Commit {
                group: self.group.clone(),
                reason: "broker unavailable".to_string(),
            });
        }
        if Self::take_injected_failure(&self.inner.failing_commits) {
            return Err(PipelineError::Commit {
                group: self.group.clone(),
                reason: "injected commit failure".to_string(),
            });
        }

        for position in positions {
            let key = (
                self.group.clone(),
                self.topic.clone(),
                position.partition as u32,
            );
            let mut entry = self.inner.offsets.entry(key).or_insert(position.next_offset);
            // Cursors only move forward.
            if position.next_offset > *entry {
                *entry = position.next_offset;
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.inner.leave(&self.group, &self.topic, self.member);
            self.closed = true;
            info!(group = %self.group, topic = %self.topic, member = self.member, "Left consumer group");
        }
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if !self.closed {
            self.inner.leave(&self.group, &self.topic, self.member);
        }
    }
}
