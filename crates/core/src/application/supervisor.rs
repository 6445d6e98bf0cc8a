// Consumer Pool Supervisor - N workers per queue, coordinated shutdown

use crate::application::consumer::constants::DEFAULT_RECONNECT_DELAY;
use crate::application::consumer::{ConnectionManager, ShutdownToken};
use crate::application::dispatcher::Dispatcher;
use crate::domain::QueueDescriptor;
use crate::port::{BrokerConnector, TransportFactory};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, info_span, Instrument};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Pause between a failed session and the next one (zero = immediate)
    pub reconnect_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

pub struct Supervisor {
    queues: Vec<Arc<QueueDescriptor>>,
    connector: Arc<dyn BrokerConnector>,
    transports: Arc<dyn TransportFactory>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        queues: Vec<QueueDescriptor>,
        connector: Arc<dyn BrokerConnector>,
        transports: Arc<dyn TransportFactory>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            queues: queues.into_iter().map(Arc::new).collect(),
            connector,
            transports,
            config,
        }
    }

    /// Spawn every worker and return the running pool
    pub fn start(&self, shutdown: ShutdownToken) -> ConsumerPool {
        let mut workers = JoinSet::new();

        for queue in &self.queues {
            if queue.disabled {
                info!(queue = %queue.name, "Skipping disabled subscriber");
                continue;
            }
            if queue.consumers == 0 {
                info!(queue = %queue.name, "No consumers configured, not subscribing");
                continue;
            }

            for consumer_id in 0..queue.consumers {
                let manager = ConnectionManager::new(
                    Arc::clone(queue),
                    Arc::clone(&self.connector),
                    Dispatcher::new(self.transports.create()),
                );
                let span = info_span!("consumer", queue = %queue.name, consumer = consumer_id);
                workers.spawn(
                    run_worker(manager, shutdown.clone(), self.config.reconnect_delay)
                        .instrument(span),
                );
            }
        }

        info!(workers = workers.len(), "All subscribers are now running");
        ConsumerPool { workers }
    }
}

/// Reconnect loop of one worker; shutdown is checked before every session
async fn run_worker(manager: ConnectionManager, mut shutdown: ShutdownToken, reconnect_delay: Duration) {
    info!("Starting subscriber");
    loop {
        if shutdown.is_shutdown() {
            break;
        }

        if let Err(e) = manager.run(&mut shutdown).await {
            error!(error = %e, "Error processing messages");
        }

        if reconnect_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = sleep(reconnect_delay) => {},
                _ = shutdown.wait() => {}
            }
        }
    }
    info!(queue = %manager.queue().name, "Stopping subscriber");
}

/// Running workers
pub struct ConsumerPool {
    workers: JoinSet<()>,
}

impl ConsumerPool {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Wait until every worker has returned
    pub async fn wait(mut self) {
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!(error = ?e, "Subscriber panicked");
                } else {
                    error!(error = ?e, "Subscriber cancelled");
                }
            }
        }
        info!("All subscribers have stopped");
    }
}
