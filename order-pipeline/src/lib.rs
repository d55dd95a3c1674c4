//! Order event pipeline over Kafka.
//!
//! One producer publishes `OrderEvent`s keyed by order id; any number of
//! consumer groups read the full stream independently, each with its own
//! cursor, pace and failure domain.
//!
//! # Features
//!
//! - Type-safe producer with `send<T: KafkaMessage>(&T)` and bounded publish retries
//! - Generic consumer group runtime: join, pull batches, decode, handle, commit
//! - Per-message or interval commits for at-least-once delivery
//! - Read failures retried with backoff before a group stops
//! - Malformed messages skipped without stalling the group
//! - `FailureSink` seam for dead letters and alerting
//! - rdkafka transport and an in-memory broker with the same group semantics
//! - Graceful shutdown shared across roles
//!
//! # Example
//!
//! ```
//! use order_events::OrderEvent;
//! use order_pipeline::{
//!     Consumer, ConsumerConfig, InventoryHandler, MemoryBroker, MemoryStockLedger, Producer,
//!     ProducerConfig,
//! };
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> order_pipeline::Result<()> {
//! let broker = MemoryBroker::new(3);
//! let ledger = MemoryStockLedger::new();
//!
//! let consumer = Consumer::new(
//!     ConsumerConfig::new("orders", "inventory-group").with_max_wait(Duration::from_millis(20)),
//!     broker.clone(),
//!     InventoryHandler::new(ledger.clone()),
//! )?;
//! let shutdown = consumer.shutdown_handle();
//! let running = tokio::spawn(async move { consumer.run().await });
//!
//! let producer = Producer::new(ProducerConfig::new("orders"), broker)?;
//! producer
//!     .send(&OrderEvent::new("42", "7", "ITEM-3", 19.99, "user7@example.com"))
//!     .await?;
//!
//! while ledger.reserved("ITEM-3") == 0 {
//!     tokio::time::sleep(Duration::from_millis(5)).await;
//! }
//! shutdown.shutdown().await;
//! let report = running.await.unwrap()?;
//! assert_eq!(report.handled, 1);
//! # Ok(())
//! # }
//! ```

mod config;
mod consumer;
mod error;
mod failure;
mod handlers;
mod kafka;
mod memory;
mod offsets;
mod producer;
mod retry;
mod shutdown;
mod transport;

pub use config::{Role, Settings, TransportKind};
pub use consumer::{Consumer, ConsumerConfig, ConsumerState, RunReport};
pub use error::{HandlerError, PipelineError, Result};
pub use failure::{FailureSink, LogFailureSink, PipelineFailure};
pub use handlers::{
    handler_fn, HandlerFn, InventoryHandler, MemoryStockLedger, MessageHandler,
    NotificationHandler, Notifier, SimulatedMailer, StockLedger,
};
pub use kafka::{KafkaConnector, KafkaPublisher, KafkaSubscription};
pub use memory::{MemoryBroker, MemorySubscription};
pub use offsets::{CommitPolicy, OffsetTracker};
pub use producer::{OrderGenerator, Producer, ProducerConfig, ProducerReport};
pub use retry::{with_retry, Exhausted, RetryPolicy};
pub use shutdown::ShutdownHandle;
pub use transport::{
    partition_for_key, CommitPosition, Delivery, FetchOptions, GroupConnector, Publisher, Record,
    Subscription,
};

/// Re-export the KafkaMessage trait for convenience
pub use order_events::KafkaMessage;
