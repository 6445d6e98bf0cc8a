// STOMP connector: TCP dial, keepalive, CONNECT handshake, heart-beat negotiation

use crate::frame::Frame;
use crate::session::{FrameReader, StompSession};
use async_trait::async_trait;
use eventbus_core::application::consumer::constants::{
    BROKER_ADDR_ENV, DEFAULT_BROKER_ADDR, HEARTBEAT_ERROR_THRESHOLD, HEARTBEAT_GRACE_MULTIPLIER,
    HEARTBEAT_INTERVAL, KEEPALIVE_INTERVAL,
};
use eventbus_core::port::{BrokerConnector, BrokerError, BrokerSession};
use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// Broker session parameters
#[derive(Debug, Clone)]
pub struct StompConfig {
    /// `host:port` of the broker
    pub addr: String,
    /// Heart-beat interval offered in both directions
    pub heartbeat: Duration,
    pub grace_multiplier: f64,
    /// Broker silence tolerated before the session is declared dead
    pub heartbeat_error: Duration,
    pub keepalive: Duration,
}

impl Default for StompConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_BROKER_ADDR.to_string(),
            heartbeat: HEARTBEAT_INTERVAL,
            grace_multiplier: HEARTBEAT_GRACE_MULTIPLIER,
            heartbeat_error: HEARTBEAT_ERROR_THRESHOLD,
            keepalive: KEEPALIVE_INTERVAL,
        }
    }
}

impl StompConfig {
    /// Defaults, with the broker address taken from the environment if set
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var(BROKER_ADDR_ENV) {
            if !addr.trim().is_empty() {
                config.addr = addr;
            }
        }
        config
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }
}

/// Negotiated heart-beating for one session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Heartbeat {
    /// How often we must send something (None = never)
    pub send_every: Option<Duration>,
    /// How often the broker promised to send something (None = never)
    pub expect_every: Option<Duration>,
}

impl Heartbeat {
    /// Combine our offer with the broker's `heart-beat` header
    ///
    /// Each direction uses the larger of the two values, or is off if
    /// either side declines it.
    pub fn negotiate(offer: Duration, server_header: Option<&str>) -> Heartbeat {
        let (sx, sy) = server_header
            .and_then(|h| h.split_once(','))
            .and_then(|(x, y)| Some((x.trim().parse::<u64>().ok()?, y.trim().parse::<u64>().ok()?)))
            .unwrap_or((0, 0));
        let ours = offer.as_millis() as u64;

        let combine = |client: u64, server: u64| {
            (client != 0 && server != 0).then(|| Duration::from_millis(client.max(server)))
        };
        Heartbeat {
            send_every: combine(ours, sy),
            expect_every: combine(ours, sx),
        }
    }
}

type Established = (FrameReader<OwnedReadHalf>, OwnedWriteHalf, Heartbeat);

pub struct StompConnector {
    config: StompConfig,
}

impl StompConnector {
    pub fn new(config: StompConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StompConfig {
        &self.config
    }

    fn dial_error(&self, reason: impl ToString) -> BrokerError {
        BrokerError::Dial {
            addr: self.config.addr.clone(),
            reason: reason.to_string(),
        }
    }

    async fn dial(&self) -> Result<TcpStream, BrokerError> {
        let stream = TcpStream::connect(&self.config.addr)
            .await
            .map_err(|e| self.dial_error(e))?;

        let keepalive = TcpKeepalive::new()
            .with_time(self.config.keepalive)
            .with_interval(self.config.keepalive);
        SockRef::from(&stream)
            .set_tcp_keepalive(&keepalive)
            .map_err(|e| self.dial_error(format!("cannot set keepalive: {e}")))?;

        Ok(stream)
    }

    async fn handshake(&self, stream: TcpStream) -> Result<Established, BrokerError> {
        let (read_half, mut write_half) = stream.into_split();
        let host = self
            .config
            .addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.config.addr);
        let offer = self.config.heartbeat.as_millis();

        let connect = Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", format!("{offer},{offer}"));
        write_half.write_all(&connect.encode()).await?;
        write_half.flush().await?;

        let mut reader = FrameReader::new(read_half);
        let reply = timeout(self.config.heartbeat_error, reader.next_frame())
            .await
            .map_err(|_| BrokerError::Handshake("timed out waiting for CONNECTED".to_string()))??;

        let frame = match reply {
            Some(frame) => frame,
            None => {
                return Err(BrokerError::Handshake(
                    "connection closed during handshake".to_string(),
                ))
            }
        };
        match frame.command.as_str() {
            "CONNECTED" => {}
            "ERROR" => {
                return Err(BrokerError::Handshake(error_text(&frame)));
            }
            other => {
                return Err(BrokerError::Handshake(format!("unexpected {other} frame")));
            }
        }

        let heartbeat = Heartbeat::negotiate(self.config.heartbeat, frame.get("heart-beat"));
        debug!(
            version = frame.get("version").unwrap_or("1.0"),
            ?heartbeat,
            "STOMP session established"
        );
        Ok((reader, write_half, heartbeat))
    }
}

/// Human-readable text of an ERROR frame
pub(crate) fn error_text(frame: &Frame) -> String {
    let message = frame.get("message").unwrap_or("broker error");
    let body = String::from_utf8_lossy(&frame.body);
    let body = body.trim();
    if body.is_empty() {
        message.to_string()
    } else {
        format!("{message}: {body}")
    }
}

#[async_trait]
impl BrokerConnector for StompConnector {
    async fn connect(&self) -> Result<Box<dyn BrokerSession>, BrokerError> {
        let stream = self.dial().await?;
        let (reader, writer, heartbeat) = self.handshake(stream).await?;
        info!(addr = %self.config.addr, "Connected to STOMP broker");

        Ok(Box::new(StompSession::start(
            reader,
            writer,
            heartbeat,
            &self.config,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiates_larger_interval_each_way() {
        let hb = Heartbeat::negotiate(Duration::from_secs(10), Some("5000,20000"));
        assert_eq!(hb.send_every, Some(Duration::from_secs(20)));
        assert_eq!(hb.expect_every, Some(Duration::from_secs(10)));
    }

    #[test]
    fn zero_on_either_side_disables_direction() {
        let hb = Heartbeat::negotiate(Duration::from_secs(10), Some("0,10000"));
        assert_eq!(hb.send_every, Some(Duration::from_secs(10)));
        assert_eq!(hb.expect_every, None);

        let none = Heartbeat::negotiate(Duration::from_secs(10), None);
        assert_eq!(none.send_every, None);
        assert_eq!(none.expect_every, None);
    }

    #[test]
    fn defaults_match_broker_constants() {
        let config = StompConfig::default();
        assert_eq!(config.addr, "activemq:61613");
        assert_eq!(config.heartbeat, Duration::from_secs(10));
        assert_eq!(config.heartbeat_error, Duration::from_secs(60));
        assert_eq!(config.grace_multiplier, 1.5);
    }

    #[test]
    fn error_text_includes_body() {
        let frame = Frame::new("ERROR")
            .header("message", "access denied")
            .body(b"bad login\n".to_vec());
        assert_eq!(error_text(&frame), "access denied: bad login");
    }
}
