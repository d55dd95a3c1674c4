use super::MessageHandler;
use crate::error::HandlerError;
use async_trait::async_trait;
use order_events::OrderEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Outbound channel the notification group sends confirmations through.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, to: &str, event: &OrderEvent) -> Result<(), HandlerError>;
}

/// Stands in for an email API: sleeps for `latency`, then logs the send.
#[derive(Debug, Clone)]
pub struct SimulatedMailer {
    latency: Duration,
    sent: Arc<AtomicU64>,
}

impl Default for SimulatedMailer {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl SimulatedMailer {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Confirmations sent so far, shared across clones.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for SimulatedMailer {
    async fn send_confirmation(&self, to: &str, event: &OrderEvent) -> Result<(), HandlerError> {
        tokio::time::sleep(self.latency).await;
        self.sent.fetch_add(1, Ordering::SeqCst);
        info!(order_id = %event.order_id, "✅ Confirmation sent to {}", to);
        Ok(())
    }
}

/// Slow handler: one outbound notification per order, addressed to
/// `user_email`. Its latency only slows its own group.
#[derive(Debug, Default, Clone)]
pub struct NotificationHandler<N = SimulatedMailer> {
    notifier: N,
}

impl<N: Notifier> NotificationHandler<N> {
    pub fn new(notifier: N) -> Self {
        Self { notifier }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }
}

#[async_trait]
impl<N: Notifier> MessageHandler for NotificationHandler<N> {
    type Message = OrderEvent;

    async fn handle(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        info!(
            "🔔 [NOTIFICATION] Received order {}. Sending confirmation to {}",
            event.order_id, event.user_email
        );
        self.notifier
            .send_confirmation(&event.user_email, event)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_mailer_takes_its_latency() {
        let handler = NotificationHandler::new(SimulatedMailer::new(Duration::from_secs(2)));
        let event = OrderEvent::new("42", "7", "ITEM-3", 19.99, "user7@example.com");

        let started = tokio::time::Instant::now();
        handler.handle(&event).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(handler.notifier().sent(), 1);
    }
}
