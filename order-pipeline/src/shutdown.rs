//! Cooperative shutdown shared by the producer and every consumer group.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Handle for requesting shutdown from another task.
///
/// Clones share one signal. Loops check it at the top of every iteration and
/// race their blocking waits against `cancelled()`.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Requests a graceful shutdown.
    pub async fn shutdown(&self) {
        info!("Requesting shutdown via handle");
        self.sender.send_replace(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so `wait_for` only returns once
        // the flag flips.
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clones_share_signal() {
        let handle = ShutdownHandle::new();
        let other = handle.clone();
        assert!(!other.is_shutdown());

        handle.shutdown().await;
        assert!(other.is_shutdown());
        tokio::time::timeout(Duration::from_millis(100), other.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let handle = ShutdownHandle::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
