//! Per-event side effects run by consumer groups.

mod inventory;
mod notification;

pub use inventory::{InventoryHandler, MemoryStockLedger, StockLedger};
pub use notification::{NotificationHandler, Notifier, SimulatedMailer};

use crate::error::HandlerError;
use async_trait::async_trait;
use order_events::KafkaMessage;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Handles one decoded message for a consumer group.
///
/// Returning `Ok` lets the runtime commit the message's offset. A
/// `HandlerError::Transient` is retried under the group's handler policy.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Message type the consumer decodes records into.
    type Message: KafkaMessage + 'static;

    async fn handle(&self, message: &Self::Message) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H> MessageHandler for Arc<H>
where
    H: MessageHandler + ?Sized,
{
    type Message = H::Message;

    async fn handle(&self, message: &H::Message) -> Result<(), HandlerError> {
        (**self).handle(message).await
    }
}

/// Handler built from an async closure, see [`handler_fn`].
pub struct HandlerFn<M, F> {
    f: F,
    _message: PhantomData<fn(M)>,
}

/// Wraps an async closure taking the message by value as a handler.
///
/// ```
/// use order_pipeline::{handler_fn, HandlerError, MessageHandler};
/// use order_events::OrderEvent;
///
/// let handler = handler_fn(|event: OrderEvent| async move {
///     if event.item_id.is_empty() {
///         return Err(HandlerError::permanent("no item"));
///     }
///     Ok(())
/// });
/// # fn assert_handler<H: MessageHandler<Message = OrderEvent>>(_: &H) {}
/// # assert_handler(&handler);
/// ```
pub fn handler_fn<M, F, Fut>(f: F) -> HandlerFn<M, F>
where
    M: KafkaMessage + Clone + 'static,
    F: Fn(M) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    HandlerFn {
        f,
        _message: PhantomData,
    }
}

#[async_trait]
impl<M, F, Fut> MessageHandler for HandlerFn<M, F>
where
    M: KafkaMessage + Clone + 'static,
    F: Fn(M) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    type Message = M;

    async fn handle(&self, message: &M) -> Result<(), HandlerError> {
        (self.f)(message.clone()).await
    }
}
