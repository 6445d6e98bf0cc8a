// Domain Layer - descriptors, events and messages

pub mod error;
pub mod event;
pub mod message;
pub mod method;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use event::{
    Actor, Attachment, AttachmentContent, EventObject, Link, RepositoryEvent, JSON_LD_MEDIA_TYPE,
};
pub use message::BrokerMessage;
pub use method::HttpMethod;
pub use queue::{QueueDescriptor, RoutingType};
