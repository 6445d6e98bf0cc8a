// Queue Descriptor - one broker subscription and where its events go

use serde::{Deserialize, Serialize};

use super::event::JSON_LD_MEDIA_TYPE;
use super::{DomainError, HttpMethod};

/// Selects which relay handles a queue's events
///
/// Only `index` selects the index relay; any other value (or none) is a
/// derivative queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Option<String>")]
pub enum RoutingType {
    #[default]
    Derivative,
    Index,
}

impl From<Option<String>> for RoutingType {
    fn from(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("index") => RoutingType::Index,
            _ => RoutingType::Derivative,
        }
    }
}

fn default_location_mime_type() -> String {
    JSON_LD_MEDIA_TYPE.to_string()
}

impl std::fmt::Display for RoutingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingType::Derivative => write!(f, "derivative"),
            RoutingType::Index => write!(f, "index"),
        }
    }
}

/// Queue configuration, immutable once loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDescriptor {
    #[serde(rename = "queueName")]
    pub name: String,

    /// Processing URL (derivative) or URL template (index)
    #[serde(default)]
    pub url: String,

    #[serde(rename = "type", default)]
    pub routing: RoutingType,

    #[serde(default)]
    pub consumers: usize,

    #[serde(default)]
    pub forward_auth: bool,

    /// Skip the final store step (services that produce no derivative)
    #[serde(default)]
    pub no_put: bool,

    /// Push the source file to the processing service instead of only the event
    #[serde(default)]
    pub put_file: bool,

    #[serde(default)]
    pub event_method: HttpMethod,

    #[serde(default)]
    pub disabled: bool,

    /// Media type of the event link sent as `Content-Location` (index)
    #[serde(rename = "locationMimetype", default = "default_location_mime_type")]
    pub location_mime_type: String,
}

impl QueueDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>, routing: RoutingType) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            routing,
            consumers: 1,
            forward_auth: false,
            no_put: false,
            put_file: false,
            event_method: HttpMethod::default(),
            disabled: false,
            location_mime_type: default_location_mime_type(),
        }
    }

    pub fn with_consumers(mut self, consumers: usize) -> Self {
        self.consumers = consumers;
        self
    }

    /// Whether the supervisor should start workers for this queue
    pub fn is_subscribed(&self) -> bool {
        !self.disabled && self.consumers > 0
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "queueName cannot be empty".to_string(),
            ));
        }
        if self.is_subscribed() && self.url.trim().is_empty() {
            return Err(DomainError::ValidationError(format!(
                "queue {} has consumers but no url",
                self.name
            )));
        }
        Ok(())
    }
}
