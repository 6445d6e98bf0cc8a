// HTTP Transport Port
// Outbound HTTP used by the relays, kept behind a trait so relays stay testable

use crate::domain::HttpMethod;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Outbound request, fully buffered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Set a header, replacing any previous value with the same name
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Set a header only when a value is present
    pub fn header_opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.header(name, v),
            None => self,
        }
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Response with its body read to the end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// `Content-Type` header, if present and non-empty
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type").filter(|v| !v.is_empty())
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Transport errors (nothing came back from the server)
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid request to {url}: {reason}")]
    InvalidRequest { url: String, reason: String },

    #[error("Request to {url} failed: {reason}")]
    Send { url: String, reason: String },

    #[error("Reading response from {url} failed: {reason}")]
    Body { url: String, reason: String },
}

/// HTTP Transport trait
///
/// Implementations:
/// - ReqwestTransport: real HTTP client
/// - MockTransport: scripted responses, records every request
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and read the whole response
    ///
    /// Non-2xx statuses are returned as responses, not errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Builds one transport per worker so workers share no client state
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Arc<dyn HttpTransport>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted reply for one route
    #[derive(Debug, Clone)]
    pub enum MockReply {
        Respond(HttpResponse),
        /// Respond after a delay (for fan-out ordering tests)
        Delayed(Duration, HttpResponse),
        Fail(String),
    }

    /// Mock HTTP transport
    ///
    /// Unrouted requests get an empty 200.
    #[derive(Default)]
    pub struct MockTransport {
        routes: Mutex<Vec<(HttpMethod, String, MockReply)>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(self, method: HttpMethod, url: impl Into<String>, reply: MockReply) -> Self {
            self.routes.lock().unwrap().push((method, url.into(), reply));
            self
        }

        pub fn respond(self, method: HttpMethod, url: impl Into<String>, response: HttpResponse) -> Self {
            self.route(method, url, MockReply::Respond(response))
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn count(&self, method: HttpMethod, url: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.method == method && r.url == url)
                .count()
        }

        pub fn count_method(&self, method: HttpMethod) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.method == method)
                .count()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let reply = self
                .routes
                .lock()
                .unwrap()
                .iter()
                .find(|(m, u, _)| *m == request.method && *u == request.url)
                .map(|(_, _, reply)| reply.clone());
            let url = request.url.clone();
            self.requests.lock().unwrap().push(request);

            match reply {
                None => Ok(HttpResponse::new(200)),
                Some(MockReply::Respond(resp)) => Ok(resp),
                Some(MockReply::Delayed(delay, resp)) => {
                    tokio::time::sleep(delay).await;
                    Ok(resp)
                }
                Some(MockReply::Fail(reason)) => Err(TransportError::Send { url, reason }),
            }
        }
    }

    /// Hands out the same mock to every worker so tests can inspect all calls
    pub struct SharedMockFactory(pub Arc<MockTransport>);

    impl TransportFactory for SharedMockFactory {
        fn create(&self) -> Arc<dyn HttpTransport> {
            self.0.clone()
        }
    }
}
