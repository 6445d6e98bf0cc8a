// Broker Port
// Abstraction over the message broker session (STOMP in production)

use crate::domain::BrokerMessage;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Outcome of waiting on a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A message to dispatch and acknowledge
    Message(BrokerMessage),
    /// Nothing usable was delivered (heart-beat, empty frame)
    Empty,
    /// The delivery channel is gone; the session cannot continue
    Closed,
}

/// Broker errors
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Cannot connect to broker at {addr}: {reason}")]
    Dial { addr: String, reason: String },

    #[error("Handshake with broker failed: {0}")]
    Handshake(String),

    #[error("Cannot subscribe to {queue}: {reason}")]
    Subscribe { queue: String, reason: String },

    #[error("No longer subscribed to {0}")]
    NotSubscribed(String),

    #[error("Subscription to {0} is closed")]
    SubscriptionClosed(String),

    #[error("No data from broker for {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("Broker reported an error: {0}")]
    Remote(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens broker sessions
///
/// Implementations:
/// - StompConnector: TCP + STOMP 1.2 with heart-beating
/// - MockBrokerConnector: scripted sessions for tests
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Dial the broker and complete the protocol handshake
    ///
    /// # Errors
    /// - BrokerError::Dial if the transport cannot be opened
    /// - BrokerError::Handshake if the broker rejects the session
    async fn connect(&self) -> Result<Box<dyn BrokerSession>, BrokerError>;
}

/// One live broker session
#[async_trait]
pub trait BrokerSession: Send {
    /// Subscribe to a destination with client acknowledgment
    async fn subscribe(&mut self, destination: &str) -> Result<(), BrokerError>;

    /// Wait for the next delivery
    ///
    /// Must be cancel-safe: dropping the future loses no message.
    async fn receive(&mut self) -> Result<Delivery, BrokerError>;

    /// Acknowledge a message received on this session
    async fn ack(&mut self, message: &BrokerMessage) -> Result<(), BrokerError>;

    /// Whether the subscription is still active
    fn is_subscribed(&self) -> bool;

    async fn unsubscribe(&mut self) -> Result<(), BrokerError>;

    async fn disconnect(&mut self) -> Result<(), BrokerError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// What one scripted delivery does
    #[derive(Debug, Clone)]
    pub enum ScriptedDelivery {
        Message(BrokerMessage),
        /// Empty delivery on an active subscription
        Empty,
        /// Subscription goes inactive, then an empty delivery arrives
        Unsubscribed,
        Closed,
        Error(String),
    }

    /// Behavior of the session returned by one `connect` call
    #[derive(Debug, Clone)]
    pub enum SessionScript {
        RefuseConnect(String),
        RefuseSubscribe(String),
        Deliver {
            deliveries: Vec<ScriptedDelivery>,
            fail_acks: bool,
        },
    }

    impl SessionScript {
        pub fn deliver(deliveries: Vec<ScriptedDelivery>) -> Self {
            SessionScript::Deliver {
                deliveries,
                fail_acks: false,
            }
        }

        /// A session that subscribes and then waits forever
        pub fn idle() -> Self {
            Self::deliver(Vec::new())
        }
    }

    /// Calls observed across every session of a connector
    #[derive(Debug, Clone, Default)]
    pub struct BrokerCalls {
        pub connects: usize,
        pub subscribes: Vec<String>,
        pub acks: Vec<String>,
        pub unsubscribes: usize,
        pub disconnects: usize,
    }

    /// Mock connector handing out scripted sessions in order
    ///
    /// Once the scripts are used up every further session is idle.
    pub struct MockBrokerConnector {
        scripts: Mutex<VecDeque<SessionScript>>,
        calls: Arc<Mutex<BrokerCalls>>,
    }

    impl MockBrokerConnector {
        pub fn new(scripts: Vec<SessionScript>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                calls: Arc::new(Mutex::new(BrokerCalls::default())),
            }
        }

        pub fn idle() -> Self {
            Self::new(Vec::new())
        }

        pub fn calls(&self) -> BrokerCalls {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BrokerConnector for MockBrokerConnector {
        async fn connect(&self) -> Result<Box<dyn BrokerSession>, BrokerError> {
            self.calls.lock().unwrap().connects += 1;
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(SessionScript::idle);

            match script {
                SessionScript::RefuseConnect(reason) => Err(BrokerError::Dial {
                    addr: "mock:61613".to_string(),
                    reason,
                }),
                SessionScript::RefuseSubscribe(reason) => Ok(Box::new(MockBrokerSession {
                    deliveries: VecDeque::new(),
                    fail_acks: false,
                    refuse_subscribe: Some(reason),
                    destination: None,
                    calls: Arc::clone(&self.calls),
                })),
                SessionScript::Deliver {
                    deliveries,
                    fail_acks,
                } => Ok(Box::new(MockBrokerSession {
                    deliveries: deliveries.into(),
                    fail_acks,
                    refuse_subscribe: None,
                    destination: None,
                    calls: Arc::clone(&self.calls),
                })),
            }
        }
    }

    pub struct MockBrokerSession {
        deliveries: VecDeque<ScriptedDelivery>,
        fail_acks: bool,
        refuse_subscribe: Option<String>,
        destination: Option<String>,
        calls: Arc<Mutex<BrokerCalls>>,
    }

    #[async_trait]
    impl BrokerSession for MockBrokerSession {
        async fn subscribe(&mut self, destination: &str) -> Result<(), BrokerError> {
            if let Some(reason) = self.refuse_subscribe.take() {
                return Err(BrokerError::Subscribe {
                    queue: destination.to_string(),
                    reason,
                });
            }
            self.calls
                .lock()
                .unwrap()
                .subscribes
                .push(destination.to_string());
            self.destination = Some(destination.to_string());
            Ok(())
        }

        async fn receive(&mut self) -> Result<Delivery, BrokerError> {
            match self.deliveries.pop_front() {
                Some(ScriptedDelivery::Message(msg)) => Ok(Delivery::Message(msg)),
                Some(ScriptedDelivery::Empty) => Ok(Delivery::Empty),
                Some(ScriptedDelivery::Unsubscribed) => {
                    self.destination = None;
                    Ok(Delivery::Empty)
                }
                Some(ScriptedDelivery::Closed) => Ok(Delivery::Closed),
                Some(ScriptedDelivery::Error(reason)) => Err(BrokerError::Remote(reason)),
                None => std::future::pending().await,
            }
        }

        async fn ack(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
            self.calls.lock().unwrap().acks.push(message.ack_id.clone());
            if self.fail_acks {
                return Err(BrokerError::Protocol("ack rejected".to_string()));
            }
            Ok(())
        }

        fn is_subscribed(&self) -> bool {
            self.destination.is_some()
        }

        async fn unsubscribe(&mut self) -> Result<(), BrokerError> {
            self.calls.lock().unwrap().unsubscribes += 1;
            self.destination = None;
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), BrokerError> {
            self.calls.lock().unwrap().disconnects += 1;
            Ok(())
        }
    }
}
