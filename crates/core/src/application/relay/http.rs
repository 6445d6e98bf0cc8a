// Shared HTTP helpers for the relays

use super::RelayError;
use crate::domain::HttpMethod;
use crate::port::{HttpRequest, HttpResponse, HttpTransport};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Base64 copy of the raw event, read by processing services
pub const EVENT_HEADER: &str = "X-Islandora-Event";

/// Originating repository endpoint, read by indexers
pub const ENDPOINT_HEADER: &str = "X-Islandora-Fedora-Endpoint";

pub const AUTHORIZATION: &str = "Authorization";
pub const ACCEPT: &str = "Accept";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_LOCATION: &str = "Content-Location";

/// Derivative calls treat anything from 299 up as a failed delivery
pub fn is_delivery_failure(status: u16) -> bool {
    status >= 299
}

/// Index calls only fail on server errors; 4xx is logged and ignored
pub fn is_server_error(status: u16) -> bool {
    status >= 500
}

pub fn encode_event(body: &[u8]) -> String {
    STANDARD.encode(body)
}

pub fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

/// GET the source file, forwarding the inbound credential
///
/// # Errors
/// - RelayError::SourceUnavailable if the request could not be made (500)
/// - RelayError::FailedDependency if the source did not answer 200 (424)
pub async fn fetch_source(
    transport: &dyn HttpTransport,
    url: &str,
    auth: Option<&str>,
) -> Result<HttpResponse, RelayError> {
    let request = HttpRequest::new(HttpMethod::Get, url).header_opt(AUTHORIZATION, auth);
    let response = transport
        .send(request)
        .await
        .map_err(|source| RelayError::SourceUnavailable {
            url: url.to_string(),
            source,
        })?;

    if response.status != 200 {
        return Err(RelayError::FailedDependency {
            url: url.to_string(),
            status: response.status,
        });
    }
    Ok(response)
}

/// HEAD the source only to learn its content type (empty if not advertised)
pub async fn probe_content_type(
    transport: &dyn HttpTransport,
    url: &str,
    auth: Option<&str>,
) -> Result<String, RelayError> {
    let request = HttpRequest::new(HttpMethod::Head, url).header_opt(AUTHORIZATION, auth);
    let response = transport
        .send(request)
        .await
        .map_err(|source| RelayError::Probe {
            url: url.to_string(),
            source,
        })?;
    Ok(response.content_type().unwrap_or_default().to_string())
}
