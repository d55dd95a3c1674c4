//! Type-safe order producer.

use crate::error::{PipelineError, Result};
use crate::failure::{FailureSink, LogFailureSink, PipelineFailure};
use crate::retry::{with_retry, Exhausted, RetryPolicy};
use crate::shutdown::ShutdownHandle;
use crate::transport::{Delivery, Publisher};
use order_events::{KafkaMessage, OrderEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Configuration for the producer.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Topic every message is published to.
    pub topic: String,

    /// Pause between synthetic events in `run`.
    pub interval: Duration,

    /// Retries for a failed publish. `RetryPolicy::none()` drops the event
    /// on the first failure.
    pub retry: RetryPolicy,

    /// Stop `run` after this many events, published or dropped.
    pub max_events: Option<u64>,
}

impl ProducerConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            interval: Duration::from_millis(500),
            retry: RetryPolicy::default(),
            max_events: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_max_events(mut self, max_events: u64) -> Self {
        self.max_events = Some(max_events);
        self
    }
}

/// What one `run` did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProducerReport {
    pub published: u64,
    pub dropped: u64,
}

/// Synthesizes random order events.
pub struct OrderGenerator {
    rng: StdRng,
}

impl Default for OrderGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sequence for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn next_event(&mut self) -> OrderEvent {
        let order_id = self.rng.gen_range(0..10_000).to_string();
        let user_id = self.rng.gen_range(0..100).to_string();
        let item_id = format!("ITEM-{}", self.rng.gen_range(0..50));
        let amount = (self.rng.gen::<f64>() * 10_000.0).floor() / 100.0;
        let user_email = format!("user{}@example.com", user_id);

        OrderEvent {
            order_id,
            user_id,
            item_id,
            amount,
            user_email,
        }
    }
}

impl Iterator for OrderGenerator {
    type Item = OrderEvent;

    fn next(&mut self) -> Option<OrderEvent> {
        Some(self.next_event())
    }
}

/// Type-safe producer.
///
/// Messages are encoded as JSON, keyed by `KafkaMessage::key` and published
/// with the configured retry policy. Each call waits for the broker's answer
/// before returning.
///
/// # Example
///
/// ```
/// use order_events::OrderEvent;
/// use order_pipeline::{MemoryBroker, Producer, ProducerConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> order_pipeline::Result<()> {
/// let broker = MemoryBroker::new(3);
/// let producer = Producer::new(ProducerConfig::new("orders"), broker)?;
///
/// let event = OrderEvent::new("42", "7", "ITEM-3", 19.99, "user7@example.com");
/// let delivery = producer.send(&event).await?;
/// assert_eq!(delivery.offset, 0);
/// # Ok(())
/// # }
/// ```
pub struct Producer<P> {
    publisher: P,
    config: ProducerConfig,
    sink: Arc<dyn FailureSink>,
    shutdown: ShutdownHandle,
}

impl<P: Publisher> Producer<P> {
    /// Creates a new producer.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the topic is empty.
    pub fn new(config: ProducerConfig, publisher: P) -> Result<Self> {
        if config.topic.trim().is_empty() {
            return Err(PipelineError::Config("producer topic is empty".into()));
        }

        Ok(Self {
            publisher,
            config,
            sink: Arc::new(LogFailureSink),
            shutdown: ShutdownHandle::new(),
        })
    }

    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Sends a typed message, keyed by its routing key.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Encode` if the message fails validation or
    /// serialization, and `PipelineError::PublishFailed` once every publish
    /// attempt has failed.
    pub async fn send<T: KafkaMessage>(&self, message: &T) -> Result<Delivery> {
        let payload = message.encode().map_err(PipelineError::Encode)?;
        let key = message.key();
        let topic = self.config.topic.as_str();

        debug!(
            "Sending message to topic '{}' with key {:?} ({} bytes)",
            topic,
            key,
            payload.len()
        );

        let outcome = with_retry(
            &self.config.retry,
            "publish",
            |_: &PipelineError| true,
            || self.publisher.publish(topic, key, &payload),
        )
        .await;

        match outcome {
            Ok(delivery) => Ok(delivery),
            Err(Exhausted { attempts, error }) => {
                self.sink
                    .report(PipelineFailure::PublishFailed {
                        topic: topic.to_string(),
                        key: key.map(str::to_string),
                        attempts,
                        reason: error.to_string(),
                    })
                    .await;
                Err(PipelineError::PublishFailed {
                    attempts,
                    reason: error.to_string(),
                })
            }
        }
    }

    /// Publishes one synthetic order per interval until shutdown or
    /// `max_events`.
    ///
    /// A failed event is logged and dropped; the loop moves on to the next.
    pub async fn run(&self, mut generator: OrderGenerator) -> ProducerReport {
        let mut report = ProducerReport::default();
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(topic = %self.config.topic, "Producer started... (simulating new orders)");

        loop {
            if self.shutdown.is_shutdown() {
                info!("Shutdown signal received, stopping producer");
                break;
            }
            if let Some(max) = self.config.max_events {
                if report.published + report.dropped >= max {
                    break;
                }
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => continue,
                _ = ticker.tick() => {}
            }

            let event = generator.next_event();
            match self.send(&event).await {
                Ok(delivery) => {
                    report.published += 1;
                    info!(
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Published order {}",
                        event.order_id
                    );
                }
                Err(PipelineError::Encode(e)) => {
                    report.dropped += 1;
                    warn!("Failed to encode order {}: {}", event.order_id, e);
                }
                Err(e) => {
                    report.dropped += 1;
                    error!("Failed to publish order {}: {}", event.order_id, e);
                }
            }
        }

        info!(
            published = report.published,
            dropped = report.dropped,
            "Producer stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_events_are_valid() {
        let mut generator = OrderGenerator::seeded(7);
        for event in generator.by_ref().take(500) {
            event.check().unwrap();
            assert!(event.item_id.starts_with("ITEM-"));
            assert!((0.0..100.0).contains(&event.amount));
            assert_eq!(event.user_email, format!("user{}@example.com", event.user_id));
        }
    }

    #[test]
    fn test_seeded_generator_is_deterministic() {
        let a: Vec<_> = OrderGenerator::seeded(1).take(5).collect();
        let b: Vec<_> = OrderGenerator::seeded(1).take(5).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_topic_is_rejected() {
        let result = Producer::new(ProducerConfig::new(" "), crate::MemoryBroker::default());
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
