// Eventbus Infrastructure - HTTP adapter
// Implements: HttpTransport, TransportFactory

pub mod reqwest_transport;

pub use reqwest_transport::{ReqwestTransport, ReqwestTransportFactory};
