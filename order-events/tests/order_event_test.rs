//! Wire-format tests for `OrderEvent`.

use order_events::{KafkaMessage, MessageError, OrderEvent};

fn sample() -> OrderEvent {
    OrderEvent::new("42", "7", "ITEM-3", 19.99, "user7@example.com")
}

#[test]
fn test_topic_and_key() {
    let event = sample();
    assert_eq!(OrderEvent::TOPIC, "orders");
    assert_eq!(event.key(), Some("42"));
}

#[test]
fn test_field_names_are_the_contract() {
    let json: serde_json::Value = serde_json::from_slice(&sample().encode().unwrap()).unwrap();
    let object = json.as_object().unwrap();

    let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, ["amount", "item_id", "order_id", "user_email", "user_id"]);
    assert_eq!(object["item_id"], "ITEM-3");
    assert_eq!(object["amount"], 19.99);
}

#[test]
fn test_decode_ignores_unknown_fields() {
    let payload = br#"{
        "order_id": "42",
        "user_id": "7",
        "item_id": "ITEM-3",
        "amount": 19.99,
        "user_email": "user7@example.com",
        "password": "hunter2",
        "Test": "x"
    }"#;

    let event = OrderEvent::decode(payload).unwrap();
    assert_eq!(event, sample());
}

#[test]
fn test_decode_rejects_missing_field() {
    let payload = br#"{"order_id": "42", "user_id": "7", "item_id": "ITEM-3", "amount": 1.0}"#;
    let err = OrderEvent::decode(payload).unwrap_err();
    assert!(matches!(err, MessageError::Decode(_)));
}

#[test]
fn test_decode_rejects_non_json() {
    let err = OrderEvent::decode(b"not valid json").unwrap_err();
    assert!(matches!(err, MessageError::Decode(_)));
}

#[test]
fn test_decode_rejects_invalid_values() {
    let payload = br#"{
        "order_id": "",
        "user_id": "7",
        "item_id": "ITEM-3",
        "amount": 1.0,
        "user_email": "user7@example.com"
    }"#;
    assert!(matches!(
        OrderEvent::decode(payload).unwrap_err(),
        MessageError::Invalid(_)
    ));

    let payload = br#"{
        "order_id": "1",
        "user_id": "7",
        "item_id": "ITEM-3",
        "amount": -0.5,
        "user_email": "user7@example.com"
    }"#;
    assert!(matches!(
        OrderEvent::decode(payload).unwrap_err(),
        MessageError::Invalid(_)
    ));
}

#[test]
fn test_encode_rejects_bad_email() {
    let event = OrderEvent::new("1", "7", "ITEM-3", 5.0, "not-an-address");
    assert!(matches!(event.encode().unwrap_err(), MessageError::Invalid(_)));
}

#[test]
fn test_encode_rejects_non_finite_amount() {
    let event = OrderEvent::new("1", "7", "ITEM-3", f64::NAN, "user7@example.com");
    assert!(matches!(event.encode().unwrap_err(), MessageError::Invalid(_)));
}
