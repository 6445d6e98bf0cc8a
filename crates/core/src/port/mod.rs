// Port Layer - Interfaces for external dependencies

pub mod broker;
pub mod http_transport;

// Re-exports
pub use broker::{BrokerConnector, BrokerError, BrokerSession, Delivery};
pub use http_transport::{
    HttpRequest, HttpResponse, HttpTransport, TransportError, TransportFactory,
};
