// Repository Event - Activity Streams payload describing an object change

use serde::{Deserialize, Serialize};

use super::DomainError;

/// Media type of the linked-data representation the index relay publishes
pub const JSON_LD_MEDIA_TYPE: &str = "application/ld+json";

/// Prefix stripped from object ids before URL templating
pub const UUID_URN_PREFIX: &str = "urn:uuid:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub summary: String,
    pub actor: Actor,
    pub object: EventObject,
    pub attachment: Attachment,
    /// Originating repository endpoint
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Actor {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventObject {
    pub id: String,
    pub url: Vec<Link>,
    #[serde(rename = "isNewVersion")]
    pub is_new_version: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Link {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub href: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attachment {
    pub content: AttachmentContent,
}

/// Where the derivative comes from and where it goes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentContent {
    pub source_uri: String,
    /// May be empty until resolved from the source
    #[serde(rename = "source_mimetype")]
    pub source_mime_type: String,
    pub destination_uri: String,
    #[serde(rename = "mimetype")]
    pub destination_mime_type: String,
    pub file_upload_uri: String,
    pub source_field: String,
    pub args: String,
}

impl RepositoryEvent {
    /// Decode an event from a raw message body
    pub fn decode(body: &[u8]) -> Result<Self, DomainError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(DomainError::EmptyEvent);
        }
        Ok(serde_json::from_slice(body)?)
    }

    /// Object id with the `urn:uuid:` prefix removed
    pub fn object_uuid(&self) -> &str {
        self.object
            .id
            .strip_prefix(UUID_URN_PREFIX)
            .unwrap_or(&self.object.id)
    }

    /// Href of the first link with `media_type`; None if that href is empty
    pub fn link_href(&self, media_type: &str) -> Option<&str> {
        self.object
            .url
            .iter()
            .find(|link| link.media_type == media_type)
            .map(|link| link.href.as_str())
            .filter(|href| !href.is_empty())
    }

    pub fn json_ld_url(&self) -> Option<&str> {
        self.link_href(JSON_LD_MEDIA_TYPE)
    }

    pub fn content(&self) -> &AttachmentContent {
        &self.attachment.content
    }
}
