// Broker Message - raw delivery as handed over by the broker port

/// Header carrying the inbound credential
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// A message received from the broker, owned by the worker until acknowledged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Broker acknowledgment id (`ack` or `message-id` header)
    pub ack_id: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl BrokerMessage {
    pub fn new(ack_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            ack_id: ack_id.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Inbound `Authorization` value, if non-empty
    pub fn authorization(&self) -> Option<&str> {
        self.header(AUTHORIZATION_HEADER).filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}
