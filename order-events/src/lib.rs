//! Order event wire schema.
//!
//! This crate provides the `KafkaMessage` trait that binds a message type to
//! its default topic and routing key, and the `OrderEvent` record published by
//! the order producer and read by every consumer group.

mod error;
mod order;

pub use error::MessageError;
pub use order::OrderEvent;

use serde::{de::DeserializeOwned, Serialize};

/// Trait for types that can be sent as Kafka messages.
///
/// Implementors name the topic they are published to by default and may
/// expose a routing key. Messages travel as JSON; unknown fields are ignored
/// on decode, missing fields are an error.
///
/// # Example
///
/// ```
/// use order_events::KafkaMessage;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct StockAdjusted {
///     item_id: String,
///     delta: i64,
/// }
///
/// impl KafkaMessage for StockAdjusted {
///     const TOPIC: &'static str = "stock.adjusted";
///
///     fn key(&self) -> Option<&str> {
///         Some(&self.item_id)
///     }
/// }
///
/// let msg = StockAdjusted { item_id: "ITEM-1".into(), delta: -1 };
/// let bytes = msg.encode().unwrap();
/// let back = StockAdjusted::decode(&bytes).unwrap();
/// assert_eq!(back.key(), Some("ITEM-1"));
/// ```
pub trait KafkaMessage: Serialize + DeserializeOwned + Send + Sync {
    /// The Kafka topic where messages of this type are sent by default.
    const TOPIC: &'static str;

    /// Partition routing key. Messages with the same key land on the same
    /// partition and are read in publish order by any single group.
    fn key(&self) -> Option<&str> {
        None
    }

    /// Semantic checks applied before encoding and after decoding.
    fn check(&self) -> Result<(), MessageError> {
        Ok(())
    }

    /// Serializes the message to JSON after checking it.
    fn encode(&self) -> Result<Vec<u8>, MessageError> {
        self.check()?;
        serde_json::to_vec(self).map_err(MessageError::Encode)
    }

    /// Parses and checks a JSON payload.
    fn decode(payload: &[u8]) -> Result<Self, MessageError>
    where
        Self: Sized,
    {
        let message: Self = serde_json::from_slice(payload).map_err(MessageError::Decode)?;
        message.check()?;
        Ok(message)
    }
}
