//! Integration tests for the message and handler API.

use order_events::OrderEvent;
use order_pipeline::{
    handler_fn, Consumer, ConsumerConfig, HandlerError, InventoryHandler, KafkaMessage,
    MemoryBroker, MemoryStockLedger, MessageHandler, PipelineError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn order() -> OrderEvent {
    OrderEvent::new("42", "7", "ITEM-3", 19.99, "user7@example.com")
}

#[tokio::test]
async fn test_kafka_message_trait() {
    assert_eq!(OrderEvent::TOPIC, "orders");
    assert_eq!(order().key(), Some("42"));
}

#[tokio::test]
async fn test_handler_fn_execution() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let handler = handler_fn(move |event: OrderEvent| {
        let counter = Arc::clone(&counter);
        async move {
            assert_eq!(event.item_id, "ITEM-3");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), HandlerError>(())
        }
    });

    handler.handle(&order()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handler_errors_classify_retries() {
    let handler = handler_fn(|event: OrderEvent| async move {
        if event.amount > 10.0 {
            Err::<(), _>(HandlerError::transient("mail server busy"))
        } else {
            Err::<(), _>(HandlerError::permanent("blocked address"))
        }
    });

    let err = handler.handle(&order()).await.unwrap_err();
    assert!(err.is_retryable());

    let cheap = OrderEvent::new("1", "7", "ITEM-3", 1.0, "user7@example.com");
    let err = handler.handle(&cheap).await.unwrap_err();
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_shared_handler_through_arc() {
    let handler = Arc::new(InventoryHandler::new(MemoryStockLedger::new()));
    let shared = Arc::clone(&handler);

    shared.handle(&order()).await.unwrap();
    assert_eq!(handler.ledger().reserved("ITEM-3"), 1);
}

#[tokio::test]
async fn test_invalid_json_does_not_decode() {
    let result = OrderEvent::decode(b"not valid json");
    assert!(result.is_err());
}

#[tokio::test]
async fn test_consumer_rejects_bad_config() {
    let handler = InventoryHandler::new(MemoryStockLedger::new());

    let result = Consumer::new(ConsumerConfig::new("orders", ""), MemoryBroker::default(), handler.clone());
    assert!(matches!(result, Err(PipelineError::Config(_))));

    let config = ConsumerConfig::new("orders", "inventory-group")
        .with_min_bytes(100)
        .with_max_bytes(10);
    let result = Consumer::new(config, MemoryBroker::default(), handler);
    assert!(matches!(result, Err(PipelineError::Config(_))));
}

#[tokio::test]
async fn test_consumer_rejects_unusable_fetch_limits() {
    let handler = InventoryHandler::new(MemoryStockLedger::new());

    let busy_loop = ConsumerConfig::new("orders", "email-group").with_max_wait(Duration::ZERO);
    let result = Consumer::new(busy_loop, MemoryBroker::default(), handler.clone());
    assert!(matches!(result, Err(PipelineError::Config(_))));

    let tiny = ConsumerConfig::new("orders", "email-group").with_max_bytes(999);
    let result = Consumer::new(tiny, MemoryBroker::default(), handler.clone());
    assert!(matches!(result, Err(PipelineError::Config(_))));

    let smallest = ConsumerConfig::new("orders", "email-group").with_max_bytes(1_000);
    assert!(Consumer::new(smallest, MemoryBroker::default(), handler).is_ok());
}
