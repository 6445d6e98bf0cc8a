// Relays - turn one repository event into HTTP calls

mod derivative;
pub mod http;
mod index;

pub use derivative::{DerivativeRelay, SourceMime};
pub use index::{expand_template, IndexRelay, VERSION_SUFFIX};

use crate::domain::{BrokerMessage, QueueDescriptor, RepositoryEvent};
use crate::port::TransportError;
use async_trait::async_trait;
use thiserror::Error;

/// Why a relay gave up on an event
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed dependency fetching {url}: status {status}")]
    FailedDependency { url: String, status: u16 },

    #[error("Unable to fetch source {url}: {source}")]
    SourceUnavailable {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("Unable to probe content type of {url}: {source}")]
    Probe {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("Error sending request to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to deliver message to {url}: status {status}")]
    Downstream { url: String, status: u16 },

    #[error("Failed to PUT data to {url}: status {status}")]
    Store { url: String, status: u16 },

    #[error("Server error from {url}: status {status}")]
    ServerError { url: String, status: u16 },

    #[error("Can not process event {object_id} with no {media_type} URL")]
    MissingLocation {
        object_id: String,
        media_type: String,
    },
}

impl RelayError {
    /// HTTP-style classification of the failure
    ///
    /// Source problems map to 424 (remote said no) or 500 (we could not ask).
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::FailedDependency { .. } | RelayError::Probe { .. } => 424,
            RelayError::SourceUnavailable { .. } => 500,
            RelayError::Transport { .. } => 500,
            RelayError::Downstream { .. }
            | RelayError::Store { .. }
            | RelayError::ServerError { .. } => 502,
            RelayError::MissingLocation { .. } => 400,
        }
    }
}

/// One way of relaying an event; selected per queue by `RoutingType`
#[async_trait]
pub trait Relay: Send + Sync {
    async fn relay(
        &self,
        queue: &QueueDescriptor,
        event: &RepositoryEvent,
        message: &BrokerMessage,
    ) -> Result<(), RelayError>;
}
