use crate::{KafkaMessage, MessageError};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// An order placed by a user, fanned out to every consumer group.
///
/// `order_id` is the routing key: every event of one order lands on the same
/// partition. There is deliberately no credential field; a `password` key
/// sent by older producers is dropped on decode like any unknown field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct OrderEvent {
    #[validate(length(min = 1))]
    pub order_id: String,

    #[validate(length(min = 1))]
    pub user_id: String,

    #[validate(length(min = 1))]
    pub item_id: String,

    #[validate(range(min = 0.0))]
    pub amount: f64,

    #[validate(email)]
    pub user_email: String,
}

impl OrderEvent {
    pub fn new(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        item_id: impl Into<String>,
        amount: f64,
        user_email: impl Into<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
            item_id: item_id.into(),
            amount,
            user_email: user_email.into(),
        }
    }
}

impl KafkaMessage for OrderEvent {
    const TOPIC: &'static str = "orders";

    fn key(&self) -> Option<&str> {
        Some(&self.order_id)
    }

    fn check(&self) -> Result<(), MessageError> {
        if !self.amount.is_finite() {
            return Err(MessageError::Invalid(format!(
                "amount must be finite, got {}",
                self.amount
            )));
        }
        self.validate()
            .map_err(|e| MessageError::Invalid(e.to_string()))
    }
}
