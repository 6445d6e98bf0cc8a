// Consumer - one broker session per worker: subscribe, receive, dispatch, ack

pub mod constants;
mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::dispatcher::Dispatcher;
use crate::domain::QueueDescriptor;
use crate::error::Result;
use crate::port::{BrokerConnector, BrokerError, BrokerSession, Delivery};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Runs broker sessions for one queue slot
pub struct ConnectionManager {
    queue: Arc<QueueDescriptor>,
    connector: Arc<dyn BrokerConnector>,
    dispatcher: Dispatcher,
}

impl ConnectionManager {
    pub fn new(
        queue: Arc<QueueDescriptor>,
        connector: Arc<dyn BrokerConnector>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            queue,
            connector,
            dispatcher,
        }
    }

    pub fn queue(&self) -> &QueueDescriptor {
        &self.queue
    }

    /// Run one session until it fails or shutdown is requested
    ///
    /// Never retries internally: every error ends this call and the caller
    /// decides whether to open a new session. The session is always torn
    /// down before returning.
    pub async fn run(&self, shutdown: &mut ShutdownToken) -> Result<()> {
        let mut session = self.connector.connect().await.map_err(|e| {
            error!(queue = %self.queue.name, error = %e, "Cannot connect to broker");
            e
        })?;

        let result = self.consume(session.as_mut(), shutdown).await;
        self.teardown(session.as_mut()).await;
        result
    }

    async fn consume(
        &self,
        session: &mut dyn BrokerSession,
        shutdown: &mut ShutdownToken,
    ) -> Result<()> {
        let name = &self.queue.name;
        session.subscribe(name).await.map_err(|e| {
            error!(queue = %name, error = %e, "Cannot subscribe to queue");
            e
        })?;
        info!(queue = %name, "Subscribed to queue");

        loop {
            // Only the idle wait is interruptible; a received message is
            // always relayed and acknowledged.
            let delivery = tokio::select! {
                delivery = session.receive() => delivery?,
                _ = shutdown.wait() => {
                    info!(queue = %name, "Shutdown requested, leaving session");
                    return Ok(());
                }
            };

            let message = match delivery {
                Delivery::Closed => {
                    return Err(BrokerError::SubscriptionClosed(name.clone()).into());
                }
                Delivery::Message(message) if !message.is_empty() => message,
                Delivery::Message(_) | Delivery::Empty => {
                    if !session.is_subscribed() {
                        return Err(BrokerError::NotSubscribed(name.clone()).into());
                    }
                    debug!(queue = %name, "Ignoring empty delivery");
                    continue;
                }
            };

            let outcome = self.dispatcher.dispatch(&self.queue, &message).await;
            debug!(queue = %name, ?outcome, "Message handled");

            if let Err(e) = session.ack(&message).await {
                error!(queue = %name, error = %e, "Failed to acknowledge message");
            }
        }
    }

    async fn teardown(&self, session: &mut dyn BrokerSession) {
        if session.is_subscribed() {
            if let Err(e) = session.unsubscribe().await {
                error!(queue = %self.queue.name, error = %e, "Problem unsubscribing");
            }
        }
        if let Err(e) = session.disconnect().await {
            error!(queue = %self.queue.name, error = %e, "Problem disconnecting from broker");
        }
    }
}
