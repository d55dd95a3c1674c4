use super::MessageHandler;
use crate::error::HandlerError;
use async_trait::async_trait;
use dashmap::DashMap;
use order_events::OrderEvent;
use std::sync::Arc;
use tracing::{debug, info};

/// Stock store the inventory group writes to.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Reserves one unit of `item_id` for `order_id`.
    async fn reserve(&self, item_id: &str, order_id: &str) -> Result<(), HandlerError>;
}

/// Counts reservations per item in memory. Clones share the counts.
#[derive(Debug, Default, Clone)]
pub struct MemoryStockLedger {
    reservations: Arc<DashMap<String, u64>>,
}

impl MemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reservations recorded for an item.
    pub fn reserved(&self, item_id: &str) -> u64 {
        self.reservations.get(item_id).map_or(0, |count| *count)
    }

    /// Reservations recorded across all items.
    pub fn total(&self) -> u64 {
        self.reservations.iter().map(|entry| *entry.value()).sum()
    }
}

#[async_trait]
impl StockLedger for MemoryStockLedger {
    async fn reserve(&self, item_id: &str, order_id: &str) -> Result<(), HandlerError> {
        *self.reservations.entry(item_id.to_string()).or_insert(0) += 1;
        debug!(item_id, order_id, "Stock reserved");
        Ok(())
    }
}

/// Fast handler: updates stock for the ordered item with no induced delay.
#[derive(Debug, Default, Clone)]
pub struct InventoryHandler<L = MemoryStockLedger> {
    ledger: L,
}

impl<L: StockLedger> InventoryHandler<L> {
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }
}

#[async_trait]
impl<L: StockLedger> MessageHandler for InventoryHandler<L> {
    type Message = OrderEvent;

    async fn handle(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        info!(
            "📦 [INVENTORY] Received order {}. Updating stock for item {}",
            event.order_id, event.item_id
        );
        self.ledger.reserve(&event.item_id, &event.order_id).await
    }
}
