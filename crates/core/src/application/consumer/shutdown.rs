// Consumer shutdown: one watch channel shared by every worker of the pool

use tokio::sync::watch;

/// Held by each worker; stops new sessions and ends idle receives
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Checked before each new broker session
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested
    ///
    /// Raced against the idle receive and the reconnect delay. Stays pending
    /// if the sender is dropped without signalling.
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Owned by the daemon, fired on SIGINT/SIGTERM
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Messages already received still finish relay and ack
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_after_shutdown() {
        let (tx, mut token) = shutdown_channel();
        assert!(!token.is_shutdown());

        tx.shutdown();
        tokio::time::timeout(Duration::from_secs(1), token.wait())
            .await
            .unwrap();
        assert!(token.is_shutdown());

        // A second wait does not block either
        tokio::time::timeout(Duration::from_secs(1), token.wait())
            .await
            .unwrap();
    }

    #[test]
    fn wait_is_pending_until_shutdown() {
        let (tx, mut token) = shutdown_channel();
        let mut wait = tokio_test::task::spawn(token.wait());

        tokio_test::assert_pending!(wait.poll());
        tx.shutdown();
        assert!(wait.is_woken());
        tokio_test::assert_ready!(wait.poll());
    }

    #[tokio::test]
    async fn dropped_sender_is_not_a_shutdown() {
        let (tx, mut token) = shutdown_channel();
        drop(tx);

        let waited = tokio::time::timeout(Duration::from_millis(20), token.wait()).await;
        assert!(waited.is_err());
        assert!(!token.is_shutdown());
    }
}
