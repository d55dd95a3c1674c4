//! Kafka transport built on rdkafka.

use crate::error::{PipelineError, Result};
use crate::transport::{CommitPosition, Delivery, FetchOptions, GroupConnector, Publisher, Record, Subscription};
use async_trait::async_trait;
use futures::FutureExt;
use rdkafka::consumer::{CommitMode, Consumer as RdConsumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// librdkafka refuses a `fetch.max.bytes` below `message.max.bytes`.
const DEFAULT_MESSAGE_MAX_BYTES: usize = 1_000_000;

/// Publishes records through an rdkafka `FutureProducer`.
///
/// Keys are routed with librdkafka's `consistent` partitioner (CRC32), the
/// same function as [`crate::transport::partition_for_key`].
pub struct KafkaPublisher {
    inner: FutureProducer,
    timeout: Duration,
}

impl KafkaPublisher {
    /// Creates a new Kafka publisher.
    ///
    /// # Arguments
    ///
    /// * `brokers` - Comma-separated list of Kafka brokers (e.g., "localhost:9092")
    /// * `timeout` - How long one publish may wait for delivery
    ///
    /// # Errors
    ///
    /// Returns an error if the producer cannot be created.
    pub fn new(brokers: &str, timeout: Duration) -> Result<Self> {
        info!("Creating Kafka producer with brokers: {}", brokers);

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("partitioner", "consistent")
            .set("queue.buffering.max.messages", "100000")
            .set("queue.buffering.max.kbytes", "1048576")
            .set("batch.num.messages", "10000");

        Self::from_config(config, timeout)
    }

    /// Creates a publisher from a pre-configured `ClientConfig`.
    pub fn from_config(config: ClientConfig, timeout: Duration) -> Result<Self> {
        let inner: FutureProducer = config.create()?;
        Ok(Self { inner, timeout })
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<Delivery> {
        let mut record = FutureRecord::<str, [u8]>::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        match self.inner.send(record, self.timeout).await {
            Ok((partition, offset)) => {
                debug!(topic, ?key, partition, offset, "Message delivered");
                Ok(Delivery { partition, offset })
            }
            Err((kafka_err, _msg)) => {
                error!(topic, ?key, "Failed to send message: {}", kafka_err);
                Err(PipelineError::publish(topic, kafka_err))
            }
        }
    }
}

/// Joins consumer groups with one `StreamConsumer` per membership.
#[derive(Debug, Clone)]
pub struct KafkaConnector {
    brokers: String,
    overrides: Vec<(String, String)>,
}

impl KafkaConnector {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            overrides: Vec::new(),
        }
    }

    /// Sets an extra librdkafka property on every consumer this connector creates.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    fn client_config(&self, group_id: &str, options: &FetchOptions) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .set("fetch.min.bytes", options.min_bytes.max(1).to_string())
            .set("fetch.max.bytes", options.max_bytes.to_string())
            .set("fetch.wait.max.ms", options.max_wait.as_millis().to_string());

        if options.max_bytes < DEFAULT_MESSAGE_MAX_BYTES {
            config.set("message.max.bytes", options.max_bytes.to_string());
        }
        for (key, value) in &self.overrides {
            config.set(key, value);
        }
        config
    }
}

#[async_trait]
impl GroupConnector for KafkaConnector {
    type Subscription = KafkaSubscription;

    async fn join(
        &self,
        topic: &str,
        group_id: &str,
        options: &FetchOptions,
    ) -> Result<KafkaSubscription> {
        info!(
            "Creating Kafka consumer with brokers: {}, group: {}",
            self.brokers, group_id
        );

        let consumer: StreamConsumer = self
            .client_config(group_id, options)
            .create()
            .map_err(|e| PipelineError::read(group_id, e))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| PipelineError::read(group_id, e))?;

        Ok(KafkaSubscription {
            consumer,
            topic: topic.to_string(),
            group: group_id.to_string(),
            options: options.clone(),
        })
    }
}

/// A joined Kafka consumer group.
pub struct KafkaSubscription {
    consumer: StreamConsumer,
    topic: String,
    group: String,
    options: FetchOptions,
}

fn to_record(message: &BorrowedMessage<'_>) -> Record {
    Record {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
    }
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn fetch(&mut self) -> Result<Vec<Record>> {
        // librdkafka already batches by fetch.min.bytes / fetch.wait.max.ms;
        // this drains whatever is buffered behind the first message.
        let first = match tokio::time::timeout(self.options.max_wait, self.consumer.recv()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(Err(e)) => return Err(PipelineError::read(&self.group, e)),
            Ok(Ok(message)) => to_record(&message),
        };

        let mut bytes = first.size();
        let mut batch = vec![first];
        while batch.len() < self.options.max_records && bytes < self.options.max_bytes {
            match self.consumer.recv().now_or_never() {
                Some(Ok(message)) => {
                    let record = to_record(&message);
                    bytes += record.size();
                    batch.push(record);
                }
                Some(Err(e)) => {
                    warn!(group = %self.group, "Error draining batch: {}", e);
                    break;
                }
                None => break,
            }
        }

        debug!(group = %self.group, records = batch.len(), bytes, "Fetched batch");
        Ok(batch)
    }

    async fn commit(&mut self, positions: &[CommitPosition]) -> Result<()> {
        let mut list = TopicPartitionList::new();
        for position in positions {
            list.add_partition_offset(
                &self.topic,
                position.partition,
                Offset::Offset(position.next_offset),
            )?;
        }

        self.consumer
            .commit(&list, CommitMode::Sync)
            .map_err(|e| PipelineError::Commit {
                group: self.group.clone(),
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) -> Result<()> {
        info!(group = %self.group, topic = %self.topic, "Leaving consumer group");
        self.consumer.unsubscribe();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config_carries_fetch_thresholds() {
        let connector = KafkaConnector::new("localhost:9092").with_property("client.id", "test");
        let options = FetchOptions {
            min_bytes: 10_000,
            max_bytes: 10_000_000,
            max_wait: Duration::from_millis(750),
            max_records: 100,
        };

        let config = connector.client_config("inventory-group", &options);
        assert_eq!(config.get("group.id"), Some("inventory-group"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("fetch.min.bytes"), Some("10000"));
        assert_eq!(config.get("fetch.max.bytes"), Some("10000000"));
        assert_eq!(config.get("fetch.wait.max.ms"), Some("750"));
        assert_eq!(config.get("message.max.bytes"), None);
        assert_eq!(config.get("client.id"), Some("test"));
    }

    #[test]
    fn test_small_max_bytes_lowers_message_limit() {
        let options = FetchOptions {
            max_bytes: 64_000,
            ..FetchOptions::default()
        };
        let config = KafkaConnector::new("localhost:9092").client_config("g", &options);
        assert_eq!(config.get("message.max.bytes"), Some("64000"));
    }
}
