//! Process settings loaded from `PIPELINE_*` environment variables.

use crate::consumer::ConsumerConfig;
use crate::error::{PipelineError, Result};
use crate::producer::ProducerConfig;
use crate::retry::RetryPolicy;
use order_events::{KafkaMessage, OrderEvent};
use serde::Deserialize;
use std::time::Duration;

const ENV_PREFIX: &str = "PIPELINE_";

/// Which roles this process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    All,
    Producer,
    Inventory,
    Notifications,
}

impl Role {
    pub fn runs_producer(self) -> bool {
        matches!(self, Self::All | Self::Producer)
    }

    pub fn runs_inventory(self) -> bool {
        matches!(self, Self::All | Self::Inventory)
    }

    pub fn runs_notifications(self) -> bool {
        matches!(self, Self::All | Self::Notifications)
    }
}

/// Broker backing the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Kafka,
    /// In-process broker, for local runs without Kafka.
    Memory,
}

/// Flat settings, one field per `PIPELINE_<FIELD>` variable.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_brokers")]
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_memory_partitions")]
    pub memory_partitions: u32,
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_produce_interval_ms")]
    pub produce_interval_ms: u64,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_publish_max_retries")]
    pub publish_max_retries: u32,
    #[serde(default)]
    pub max_events: Option<u64>,

    #[serde(default = "default_read_max_retries")]
    pub read_max_retries: u32,
    #[serde(default = "default_handler_max_retries")]
    pub handler_max_retries: u32,
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,

    #[serde(default = "default_inventory_group")]
    pub inventory_group: String,
    #[serde(default = "default_inventory_min_bytes")]
    pub inventory_min_bytes: usize,
    #[serde(default = "default_max_bytes")]
    pub inventory_max_bytes: usize,
    #[serde(default = "default_inventory_max_wait_ms")]
    pub inventory_max_wait_ms: u64,
    #[serde(default)]
    pub inventory_commit_interval_ms: u64,

    #[serde(default = "default_notification_group")]
    pub notification_group: String,
    #[serde(default = "default_notification_min_bytes")]
    pub notification_min_bytes: usize,
    #[serde(default = "default_max_bytes")]
    pub notification_max_bytes: usize,
    #[serde(default = "default_notification_max_wait_ms")]
    pub notification_max_wait_ms: u64,
    #[serde(default = "default_notification_commit_interval_ms")]
    pub notification_commit_interval_ms: u64,
    #[serde(default = "default_notification_latency_ms")]
    pub notification_latency_ms: u64,
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_topic() -> String {
    OrderEvent::TOPIC.to_string()
}

fn default_memory_partitions() -> u32 {
    3
}

fn default_produce_interval_ms() -> u64 {
    500
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

fn default_publish_max_retries() -> u32 {
    3
}

fn default_read_max_retries() -> u32 {
    5
}

fn default_handler_max_retries() -> u32 {
    3
}

fn default_retry_initial_backoff_ms() -> u64 {
    100
}

fn default_retry_max_backoff_ms() -> u64 {
    30_000
}

fn default_inventory_group() -> String {
    "inventory-group".to_string()
}

fn default_inventory_min_bytes() -> usize {
    10_000 // 10KB
}

fn default_max_bytes() -> usize {
    10_000_000 // 10MB
}

fn default_inventory_max_wait_ms() -> u64 {
    10_000
}

fn default_notification_group() -> String {
    "email-group".to_string()
}

fn default_notification_min_bytes() -> usize {
    1
}

fn default_notification_max_wait_ms() -> u64 {
    500
}

fn default_notification_commit_interval_ms() -> u64 {
    1000
}

fn default_notification_latency_ms() -> u64 {
    2000
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let settings: Settings = envy::prefixed(ENV_PREFIX)
            .from_env()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from explicit `(name, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let settings: Settings = envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transport == TransportKind::Kafka && self.brokers.trim().is_empty() {
            return Err(PipelineError::Config("PIPELINE_BROKERS is empty".into()));
        }
        if self.inventory_group == self.notification_group {
            return Err(PipelineError::Config(format!(
                "inventory and notification groups must differ, both are '{}'",
                self.inventory_group
            )));
        }
        if self.topic.trim().is_empty() {
            return Err(PipelineError::Config("PIPELINE_TOPIC is empty".into()));
        }
        self.inventory_config().validate()?;
        self.notification_config().validate()
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn notification_latency(&self) -> Duration {
        Duration::from_millis(self.notification_latency_ms)
    }

    fn backoff(&self, max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries)
            .with_initial_backoff(Duration::from_millis(self.retry_initial_backoff_ms))
            .with_max_backoff(Duration::from_millis(self.retry_max_backoff_ms))
    }

    pub fn producer_config(&self) -> ProducerConfig {
        let config = ProducerConfig::new(&self.topic)
            .with_interval(Duration::from_millis(self.produce_interval_ms))
            .with_retry(self.backoff(self.publish_max_retries));
        match self.max_events {
            Some(max) => config.with_max_events(max),
            None => config,
        }
    }

    pub fn inventory_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(&self.topic, &self.inventory_group)
            .with_min_bytes(self.inventory_min_bytes)
            .with_max_bytes(self.inventory_max_bytes)
            .with_max_wait(Duration::from_millis(self.inventory_max_wait_ms))
            .with_commit_interval(Duration::from_millis(self.inventory_commit_interval_ms))
            .with_read_retry(self.backoff(self.read_max_retries))
            .with_handler_retry(self.backoff(self.handler_max_retries))
    }

    pub fn notification_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(&self.topic, &self.notification_group)
            .with_min_bytes(self.notification_min_bytes)
            .with_max_bytes(self.notification_max_bytes)
            .with_max_wait(Duration::from_millis(self.notification_max_wait_ms))
            .with_commit_interval(Duration::from_millis(self.notification_commit_interval_ms))
            .with_read_retry(self.backoff(self.read_max_retries))
            .with_handler_retry(self.backoff(self.handler_max_retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offsets::CommitPolicy;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_mirror_original_deployment() {
        let settings = Settings::from_vars(Vec::new()).unwrap();
        assert_eq!(settings.brokers, "localhost:9092");
        assert_eq!(settings.topic, "orders");
        assert_eq!(settings.role, Role::All);
        assert_eq!(settings.transport, TransportKind::Kafka);

        let inventory = settings.inventory_config();
        assert_eq!(inventory.group_id, "inventory-group");
        assert_eq!(inventory.fetch.min_bytes, 10_000);
        assert_eq!(inventory.fetch.max_bytes, 10_000_000);
        assert_eq!(inventory.commit, CommitPolicy::PerMessage);

        let notifications = settings.notification_config();
        assert_eq!(notifications.group_id, "email-group");
        assert_eq!(notifications.fetch.max_wait, Duration::from_millis(500));
        assert_eq!(
            notifications.commit,
            CommitPolicy::Interval(Duration::from_secs(1))
        );
        assert_eq!(settings.notification_latency(), Duration::from_secs(2));

        let producer = settings.producer_config();
        assert_eq!(producer.interval, Duration::from_millis(500));
        assert_eq!(producer.retry.max_retries, 3);
        assert_eq!(producer.max_events, None);
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_vars(vars(&[
            ("PIPELINE_BROKERS", "kafka:29092"),
            ("PIPELINE_ROLE", "notifications"),
            ("PIPELINE_TRANSPORT", "memory"),
            ("PIPELINE_PUBLISH_MAX_RETRIES", "0"),
            ("PIPELINE_MAX_EVENTS", "10"),
            ("PIPELINE_NOTIFICATION_COMMIT_INTERVAL_MS", "0"),
        ]))
        .unwrap();

        assert_eq!(settings.brokers, "kafka:29092");
        assert_eq!(settings.role, Role::Notifications);
        assert!(!settings.role.runs_producer());
        assert!(settings.role.runs_notifications());
        assert_eq!(settings.transport, TransportKind::Memory);
        assert_eq!(settings.producer_config().retry.max_retries, 0);
        assert_eq!(settings.producer_config().max_events, Some(10));
        assert_eq!(settings.notification_config().commit, CommitPolicy::PerMessage);
    }

    #[test]
    fn test_rejects_shared_group() {
        let result = Settings::from_vars(vars(&[
            ("PIPELINE_INVENTORY_GROUP", "same"),
            ("PIPELINE_NOTIFICATION_GROUP", "same"),
        ]));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_rejects_inverted_byte_thresholds() {
        let result = Settings::from_vars(vars(&[
            ("PIPELINE_INVENTORY_MIN_BYTES", "100"),
            ("PIPELINE_INVENTORY_MAX_BYTES", "10"),
        ]));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_role() {
        let result = Settings::from_vars(vars(&[("PIPELINE_ROLE", "billing")]));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
