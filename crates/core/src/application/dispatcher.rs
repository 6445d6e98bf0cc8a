// Message Dispatcher - decode a broker message and hand it to the right relay

use crate::application::relay::{DerivativeRelay, IndexRelay, Relay};
use crate::domain::{BrokerMessage, QueueDescriptor, RepositoryEvent, RoutingType};
use crate::port::HttpTransport;
use std::sync::Arc;
use tracing::{error, info};

/// What happened to one message (it is acknowledged either way)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Relayed,
    DecodeFailed,
    RelayFailed,
}

pub struct Dispatcher {
    derivative: DerivativeRelay,
    index: IndexRelay,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            derivative: DerivativeRelay::new(Arc::clone(&transport)),
            index: IndexRelay::new(transport),
        }
    }

    fn relay_for(&self, routing: RoutingType) -> &dyn Relay {
        match routing {
            RoutingType::Index => &self.index,
            RoutingType::Derivative => &self.derivative,
        }
    }

    /// Decode and relay one message; failures are logged, never returned
    pub async fn dispatch(&self, queue: &QueueDescriptor, message: &BrokerMessage) -> DispatchOutcome {
        let event = match RepositoryEvent::decode(&message.body) {
            Ok(event) => event,
            Err(e) => {
                error!(queue = %queue.name, error = %e, "Unable to decode event message");
                return DispatchOutcome::DecodeFailed;
            }
        };

        info!(
            queue = %queue.name,
            routing = %queue.routing,
            event_type = %event.event_type,
            summary = %event.summary,
            object = %event.object.id,
            "Dispatching event"
        );

        match self.relay_for(queue.routing).relay(queue, &event, message).await {
            Ok(()) => DispatchOutcome::Relayed,
            Err(e) => {
                error!(
                    queue = %queue.name,
                    object = %event.object.id,
                    status = e.status_code(),
                    error = %e,
                    "Relay failed"
                );
                DispatchOutcome::RelayFailed
            }
        }
    }
}
