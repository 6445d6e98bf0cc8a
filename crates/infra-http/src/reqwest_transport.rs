// reqwest-backed HttpTransport

use async_trait::async_trait;
use eventbus_core::domain::HttpMethod;
use eventbus_core::port::{HttpRequest, HttpResponse, HttpTransport, TransportError, TransportFactory};
use std::sync::Arc;
use tracing::debug;

/// HttpTransport over a reqwest client
///
/// Redirects are followed; any status is returned as a response.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

pub(crate) fn to_reqwest(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(to_reqwest(method), url.as_str());
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let built = builder.build().map_err(|e| TransportError::InvalidRequest {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        debug!(%method, %url, "Sending request");
        let response = self
            .client
            .execute(built)
            .await
            .map_err(|e| TransportError::Send {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| TransportError::Body {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        debug!(%method, %url, status, "Response received");
        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Hands every worker its own client (own connection pool)
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestTransportFactory;

impl TransportFactory for ReqwestTransportFactory {
    fn create(&self) -> Arc<dyn HttpTransport> {
        Arc::new(ReqwestTransport::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one connection, capture the request head, answer with `reply`
    async fn one_shot_server(reply: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&seen).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn method_mapping() {
        assert_eq!(to_reqwest(HttpMethod::Get), reqwest::Method::GET);
        assert_eq!(to_reqwest(HttpMethod::Head), reqwest::Method::HEAD);
        assert_eq!(to_reqwest(HttpMethod::Post), reqwest::Method::POST);
        assert_eq!(to_reqwest(HttpMethod::Put), reqwest::Method::PUT);
        assert_eq!(to_reqwest(HttpMethod::Patch), reqwest::Method::PATCH);
        assert_eq!(to_reqwest(HttpMethod::Delete), reqwest::Method::DELETE);
    }

    #[tokio::test]
    async fn sends_headers_and_reads_response() {
        let (base, server) = one_shot_server(
            "HTTP/1.1 201 Created\r\nContent-Type: image/png\r\nContent-Length: 3\r\nConnection: close\r\n\r\nabc",
        )
        .await;

        let transport = ReqwestTransport::new();
        let request = HttpRequest::new(HttpMethod::Get, format!("{base}/node/1"))
            .header("Authorization", "Bearer t")
            .header("X-Islandora-Event", "e30=");
        let response = transport.send(request).await.unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.content_type(), Some("image/png"));
        assert_eq!(response.body, b"abc");

        let head = server.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /node/1 http/1.1"));
        assert!(head.contains("authorization: bearer t"));
        assert!(head.contains("x-islandora-event: e30="));
    }

    #[tokio::test]
    async fn error_status_is_a_response() {
        let (base, _server) = one_shot_server(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let response = ReqwestTransport::new()
            .send(HttpRequest::new(HttpMethod::Head, base))
            .await
            .unwrap();
        assert_eq!(response.status, 503);
    }

    #[tokio::test]
    async fn refused_connection_is_a_send_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = ReqwestTransport::new()
            .send(HttpRequest::new(HttpMethod::Get, format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Send { .. }));
    }

    #[tokio::test]
    async fn bad_url_is_an_invalid_request() {
        let err = ReqwestTransport::new()
            .send(HttpRequest::new(HttpMethod::Get, "not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest { .. }));
    }
}
