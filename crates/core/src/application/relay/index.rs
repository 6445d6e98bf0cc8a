// Index relay: publish an object (and possibly its new version) to an indexer

use super::http::{is_server_error, non_empty, AUTHORIZATION, CONTENT_LOCATION, ENDPOINT_HEADER};
use super::{Relay, RelayError};
use crate::domain::{BrokerMessage, HttpMethod, QueueDescriptor, RepositoryEvent};
use crate::port::{HttpRequest, HttpTransport};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Appended to the primary URL for version publication
pub const VERSION_SUFFIX: &str = "/version";

/// Substitute `:uuid` and `:sourceField` (first occurrence of each)
pub fn expand_template(template: &str, uuid: &str, source_field: &str) -> String {
    template
        .replacen(":uuid", uuid, 1)
        .replacen(":sourceField", source_field, 1)
}

/// Concurrent fan-out to the primary and version targets
pub struct IndexRelay {
    transport: Arc<dyn HttpTransport>,
}

impl IndexRelay {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    async fn publish(
        &self,
        method: HttpMethod,
        url: &str,
        auth: Option<&str>,
        location_url: &str,
        endpoint: &str,
    ) -> Result<(), RelayError> {
        let request = HttpRequest::new(method, url)
            .header_opt(AUTHORIZATION, auth)
            .header_opt(ENDPOINT_HEADER, non_empty(endpoint))
            .header_opt(CONTENT_LOCATION, non_empty(location_url));

        let response = self.transport.send(request).await.map_err(|source| {
            error!(url = %url, error = %source, "Request failed");
            RelayError::Transport {
                url: url.to_string(),
                source,
            }
        })?;

        if is_server_error(response.status) {
            return Err(RelayError::ServerError {
                url: url.to_string(),
                status: response.status,
            });
        }

        info!(url = %url, status = response.status, "Request sent");
        Ok(())
    }
}

#[async_trait]
impl Relay for IndexRelay {
    async fn relay(
        &self,
        queue: &QueueDescriptor,
        event: &RepositoryEvent,
        message: &BrokerMessage,
    ) -> Result<(), RelayError> {
        let uuid = event.object_uuid();
        debug!(uuid = %uuid, "Got UUID");

        let location_url = event
            .link_href(&queue.location_mime_type)
            .ok_or_else(|| RelayError::MissingLocation {
                object_id: event.object.id.clone(),
                media_type: queue.location_mime_type.clone(),
            })?;

        let url = expand_template(&queue.url, uuid, &event.content().source_field);
        let version_url = format!("{url}{VERSION_SUFFIX}");
        let auth = message.authorization();
        let method = queue.event_method;
        let publish_version = event.object.is_new_version && method != HttpMethod::Delete;

        // Single slot: the first error wins, later ones are dropped
        let (err_tx, mut err_rx) = mpsc::channel::<RelayError>(1);

        let primary = async {
            if let Err(e) = self
                .publish(method, &url, auth, location_url, &event.target)
                .await
            {
                let _ = err_tx.try_send(e);
            }
        };
        let version = async {
            if !publish_version {
                return;
            }
            if let Err(e) = self
                .publish(method, &version_url, auth, location_url, &event.target)
                .await
            {
                let _ = err_tx.try_send(e);
            }
        };
        tokio::join!(primary, version);

        if let Ok(e) = err_rx.try_recv() {
            return Err(e);
        }

        info!(object = %event.object.id, "Processed event");
        Ok(())
    }
}
