// Derivative relay: fetch source -> processing service -> store result

use super::http::{
    encode_event, fetch_source, is_delivery_failure, non_empty, probe_content_type, ACCEPT,
    AUTHORIZATION, CONTENT_LOCATION, CONTENT_TYPE, EVENT_HEADER,
};
use super::{Relay, RelayError};
use crate::domain::{BrokerMessage, HttpMethod, QueueDescriptor, RepositoryEvent};
use crate::port::{HttpRequest, HttpTransport};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Source MIME type for one event, resolved at most once
#[derive(Debug, Clone, Default)]
pub struct SourceMime {
    value: String,
    resolved: bool,
}

impl SourceMime {
    /// Start from the MIME type carried by the event (empty = unknown)
    pub fn from_event(value: &str) -> Self {
        Self {
            value: value.to_string(),
            resolved: !value.is_empty(),
        }
    }

    /// Take the content type a source response advertised
    pub fn record(&mut self, value: &str) {
        self.value = value.to_string();
        self.resolved = true;
    }

    /// Probe the source with HEAD unless the type is already known
    pub async fn resolve(
        &mut self,
        transport: &dyn HttpTransport,
        source_uri: &str,
        auth: Option<&str>,
    ) -> Result<&str, RelayError> {
        if !self.resolved {
            let probed = probe_content_type(transport, source_uri, auth).await?;
            self.record(&probed);
        }
        Ok(&self.value)
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

/// Sequential derivative pipeline
pub struct DerivativeRelay {
    transport: Arc<dyn HttpTransport>,
}

impl DerivativeRelay {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Relay for DerivativeRelay {
    async fn relay(
        &self,
        queue: &QueueDescriptor,
        event: &RepositoryEvent,
        message: &BrokerMessage,
    ) -> Result<(), RelayError> {
        let content = event.content();
        let auth = message.authorization();
        let transport = self.transport.as_ref();
        let mut mime = SourceMime::from_event(&content.source_mime_type);

        // Push mode sends the file itself, pull mode only the event
        let mut method = HttpMethod::Get;
        let mut body = None;
        if queue.put_file {
            let source = fetch_source(transport, &content.source_uri, auth).await?;
            if let Some(content_type) = source.content_type() {
                mime.record(content_type);
            }
            method = HttpMethod::Post;
            body = Some(source.body);
        }

        if !queue.no_put {
            mime.resolve(transport, &content.source_uri, auth).await?;
        }

        let mut request = HttpRequest::new(method, &queue.url)
            .header(EVENT_HEADER, encode_event(&message.body))
            .header_opt(ACCEPT, non_empty(&content.destination_mime_type))
            .header_opt(CONTENT_TYPE, non_empty(mime.as_str()));
        if queue.forward_auth {
            request = request.header_opt(AUTHORIZATION, auth);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = transport
            .send(request)
            .await
            .map_err(|source| RelayError::Transport {
                url: queue.url.clone(),
                source,
            })?;
        if is_delivery_failure(response.status) {
            return Err(RelayError::Downstream {
                url: queue.url.clone(),
                status: response.status,
            });
        }

        if queue.no_put {
            debug!(url = %queue.url, status = response.status, "Delivered event");
            return Ok(());
        }

        let destination = &content.destination_uri;
        let put = HttpRequest::new(HttpMethod::Put, destination)
            .header_opt(AUTHORIZATION, auth)
            .header_opt(CONTENT_TYPE, non_empty(&content.destination_mime_type))
            .header_opt(CONTENT_LOCATION, non_empty(&content.file_upload_uri))
            .body(response.body);

        let stored = transport
            .send(put)
            .await
            .map_err(|source| RelayError::Transport {
                url: destination.clone(),
                source,
            })?;
        if is_delivery_failure(stored.status) {
            return Err(RelayError::Store {
                url: destination.clone(),
                status: stored.status,
            });
        }

        info!(url = %destination, status = stored.status, "Successfully PUT data");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AttachmentContent, RoutingType};
    use crate::port::http_transport::mocks::{MockReply, MockTransport};
    use crate::port::HttpResponse;

    const PROCESSOR: &str = "http://houdini:8080/";
    const SOURCE: &str = "http://drupal/files/a.png";
    const DESTINATION: &str = "http://drupal/node/1/media/thumb";

    fn queue() -> QueueDescriptor {
        QueueDescriptor::new("islandora-connector-houdini", PROCESSOR, RoutingType::Derivative)
    }

    fn event(source_mime: &str) -> RepositoryEvent {
        let mut event = RepositoryEvent::default();
        event.attachment.content = AttachmentContent {
            source_uri: SOURCE.to_string(),
            source_mime_type: source_mime.to_string(),
            destination_uri: DESTINATION.to_string(),
            destination_mime_type: "image/jpeg".to_string(),
            file_upload_uri: "public://a-thumb.jpg".to_string(),
            ..Default::default()
        };
        event
    }

    fn message() -> BrokerMessage {
        BrokerMessage::new("m-1", br#"{"type":"Create"}"#.to_vec())
            .with_header("authorization", "Bearer abc")
    }

    #[tokio::test]
    async fn pull_mode_gets_processor_then_puts_result() {
        let transport = Arc::new(MockTransport::new().respond(
            HttpMethod::Get,
            PROCESSOR,
            HttpResponse::new(200).with_body(b"jpeg-bytes".to_vec()),
        ));
        let relay = DerivativeRelay::new(transport.clone());

        relay.relay(&queue(), &event("image/png"), &message()).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);

        let get = &requests[0];
        assert_eq!(get.method, HttpMethod::Get);
        assert_eq!(get.header_value(CONTENT_TYPE), Some("image/png"));
        assert_eq!(get.header_value(ACCEPT), Some("image/jpeg"));
        assert_eq!(
            get.header_value(EVENT_HEADER),
            Some(encode_event(br#"{"type":"Create"}"#).as_str())
        );
        assert_eq!(get.header_value(AUTHORIZATION), None);
        assert!(get.body.is_none());

        let put = &requests[1];
        assert_eq!(put.method, HttpMethod::Put);
        assert_eq!(put.url, DESTINATION);
        assert_eq!(put.header_value(CONTENT_TYPE), Some("image/jpeg"));
        assert_eq!(put.header_value(CONTENT_LOCATION), Some("public://a-thumb.jpg"));
        assert_eq!(put.header_value(AUTHORIZATION), Some("Bearer abc"));
        assert_eq!(put.body.as_deref(), Some(&b"jpeg-bytes"[..]));
    }

    #[tokio::test]
    async fn forward_auth_adds_credential_to_processor_call() {
        let transport = Arc::new(MockTransport::new());
        let relay = DerivativeRelay::new(transport.clone());
        let mut q = queue();
        q.forward_auth = true;

        relay.relay(&q, &event("image/png"), &message()).await.unwrap();

        assert_eq!(
            transport.requests()[0].header_value(AUTHORIZATION),
            Some("Bearer abc")
        );
    }

    #[tokio::test]
    async fn no_put_never_stores() {
        for status in [200, 500] {
            let transport = Arc::new(MockTransport::new().respond(
                HttpMethod::Get,
                PROCESSOR,
                HttpResponse::new(status),
            ));
            let relay = DerivativeRelay::new(transport.clone());
            let mut q = queue();
            q.no_put = true;

            let _ = relay.relay(&q, &event(""), &message()).await;

            assert_eq!(transport.count_method(HttpMethod::Put), 0);
            // Empty MIME tolerated: no HEAD probe either
            assert_eq!(transport.count_method(HttpMethod::Head), 0);
        }
    }

    #[tokio::test]
    async fn put_file_posts_source_body_and_records_its_type() {
        let transport = Arc::new(
            MockTransport::new().respond(
                HttpMethod::Get,
                SOURCE,
                HttpResponse::new(200)
                    .with_header("Content-Type", "image/tiff")
                    .with_body(b"tiff".to_vec()),
            ),
        );
        let relay = DerivativeRelay::new(transport.clone());
        let mut q = queue();
        q.put_file = true;

        relay.relay(&q, &event(""), &message()).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].url, SOURCE);
        assert_eq!(requests[0].header_value(AUTHORIZATION), Some("Bearer abc"));

        let post = &requests[1];
        assert_eq!(post.method, HttpMethod::Post);
        assert_eq!(post.url, PROCESSOR);
        assert_eq!(post.header_value(CONTENT_TYPE), Some("image/tiff"));
        assert_eq!(post.body.as_deref(), Some(&b"tiff"[..]));
        assert_eq!(transport.count_method(HttpMethod::Head), 0);
    }

    #[tokio::test]
    async fn put_file_aborts_when_source_fails() {
        let transport = Arc::new(MockTransport::new().respond(
            HttpMethod::Get,
            SOURCE,
            HttpResponse::new(403),
        ));
        let relay = DerivativeRelay::new(transport.clone());
        let mut q = queue();
        q.put_file = true;

        let err = relay.relay(&q, &event(""), &message()).await.unwrap_err();

        assert_eq!(err.status_code(), 424);
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.count(HttpMethod::Post, PROCESSOR), 0);
    }

    #[tokio::test]
    async fn missing_mime_is_probed_with_head() {
        let transport = Arc::new(MockTransport::new().respond(
            HttpMethod::Head,
            SOURCE,
            HttpResponse::new(200).with_header("Content-Type", "application/pdf"),
        ));
        let relay = DerivativeRelay::new(transport.clone());

        relay.relay(&queue(), &event(""), &message()).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].method, HttpMethod::Head);
        assert_eq!(requests[0].header_value(AUTHORIZATION), Some("Bearer abc"));
        assert_eq!(requests[1].header_value(CONTENT_TYPE), Some("application/pdf"));
    }

    #[tokio::test]
    async fn probe_failure_aborts_before_processor() {
        let transport = Arc::new(MockTransport::new().route(
            HttpMethod::Head,
            SOURCE,
            MockReply::Fail("dns".to_string()),
        ));
        let relay = DerivativeRelay::new(transport.clone());

        let err = relay.relay(&queue(), &event(""), &message()).await.unwrap_err();

        assert!(matches!(err, RelayError::Probe { .. }));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn processor_failure_skips_store() {
        let transport = Arc::new(MockTransport::new().respond(
            HttpMethod::Get,
            PROCESSOR,
            HttpResponse::new(299),
        ));
        let relay = DerivativeRelay::new(transport.clone());

        let err = relay.relay(&queue(), &event("image/png"), &message()).await.unwrap_err();

        assert!(matches!(err, RelayError::Downstream { status: 299, .. }));
        assert_eq!(transport.count_method(HttpMethod::Put), 0);
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let transport = Arc::new(MockTransport::new().respond(
            HttpMethod::Put,
            DESTINATION,
            HttpResponse::new(403),
        ));
        let relay = DerivativeRelay::new(transport.clone());

        let err = relay.relay(&queue(), &event("image/png"), &message()).await.unwrap_err();

        assert!(matches!(err, RelayError::Store { status: 403, .. }));
    }

    #[tokio::test]
    async fn mime_resolution_happens_once() {
        let transport = MockTransport::new().respond(
            HttpMethod::Head,
            SOURCE,
            HttpResponse::new(200),
        );
        let mut mime = SourceMime::from_event("");

        mime.resolve(&transport, SOURCE, None).await.unwrap();
        mime.resolve(&transport, SOURCE, None).await.unwrap();

        // Resolved to empty still counts as resolved
        assert_eq!(transport.count(HttpMethod::Head, SOURCE), 1);
        assert_eq!(mime.as_str(), "");
    }

    #[tokio::test]
    async fn known_mime_is_never_probed() {
        let transport = MockTransport::new();
        let mut mime = SourceMime::from_event("image/png");

        let resolved = mime.resolve(&transport, SOURCE, None).await.unwrap().to_string();

        assert_eq!(resolved, "image/png");
        assert!(transport.requests().is_empty());
    }
}
