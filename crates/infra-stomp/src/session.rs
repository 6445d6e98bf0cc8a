// STOMP session: background reader and writer tasks around one connection

use crate::connector::{error_text, Heartbeat, StompConfig};
use crate::frame::{decode, Frame, ReadItem};
use async_trait::async_trait;
use eventbus_core::domain::BrokerMessage;
use eventbus_core::port::{BrokerError, BrokerSession, Delivery};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

const READ_CHUNK: usize = 8 * 1024;
const INBOUND_CAPACITY: usize = 16;
const OUTBOUND_CAPACITY: usize = 64;

/// How long DISCONNECT waits for the broker's receipt
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffered frame reader; `fill` is cancel-safe so reads can be timed out
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    chunk: Box<[u8]>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
            chunk: vec![0; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Next item already in the buffer, if complete
    pub fn decode_buffered(&mut self) -> Result<Option<ReadItem>, BrokerError> {
        decode(&mut self.buf).map_err(|e| BrokerError::Protocol(e.to_string()))
    }

    /// One read from the connection; `Ok(0)` at EOF
    pub async fn fill(&mut self) -> io::Result<usize> {
        let n = self.inner.read(&mut self.chunk).await?;
        self.buf.extend_from_slice(&self.chunk[..n]);
        Ok(n)
    }

    pub async fn next_item(&mut self) -> Result<Option<ReadItem>, BrokerError> {
        loop {
            if let Some(item) = self.decode_buffered()? {
                return Ok(Some(item));
            }
            if self.fill().await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Next real frame, skipping heart-beats (None at EOF)
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, BrokerError> {
        loop {
            match self.next_item().await? {
                Some(ReadItem::Heartbeat) => continue,
                Some(ReadItem::Frame(frame)) => return Ok(Some(frame)),
                None => return Ok(None),
            }
        }
    }
}

struct Subscription {
    id: String,
    destination: String,
}

/// A connected STOMP session
pub struct StompSession {
    outbound: mpsc::Sender<Frame>,
    inbound: mpsc::Receiver<Result<Frame, BrokerError>>,
    subscription: Option<Subscription>,
    next_id: u64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl StompSession {
    /// Spawn the reader and writer for an already-handshaken connection
    pub fn start<R, W>(reader: FrameReader<R>, writer: W, heartbeat: Heartbeat, config: &StompConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let window = heartbeat
            .expect_every
            .map(|every| every.mul_f64(config.grace_multiplier));
        let reader = tokio::spawn(read_loop(reader, inbound_tx, window, config.heartbeat_error));
        let writer = tokio::spawn(write_loop(writer, outbound_rx, heartbeat.send_every));

        Self {
            outbound,
            inbound,
            subscription: None,
            next_id: 0,
            reader,
            writer,
        }
    }

    fn next_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    async fn send(&self, frame: Frame) -> Result<(), BrokerError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| BrokerError::Protocol("connection to broker is closed".to_string()))
    }
}

impl Drop for StompSession {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

fn into_message(frame: Frame) -> BrokerMessage {
    let ack_id = frame
        .get("ack")
        .or_else(|| frame.get("message-id"))
        .unwrap_or_default()
        .to_string();
    BrokerMessage {
        ack_id,
        headers: frame.headers,
        body: frame.body,
    }
}

#[async_trait]
impl BrokerSession for StompSession {
    async fn subscribe(&mut self, destination: &str) -> Result<(), BrokerError> {
        let id = self.next_id();
        let frame = Frame::new("SUBSCRIBE")
            .header("id", id.as_str())
            .header("destination", destination)
            .header("ack", "client");
        self.send(frame).await.map_err(|e| BrokerError::Subscribe {
            queue: destination.to_string(),
            reason: e.to_string(),
        })?;

        self.subscription = Some(Subscription {
            id,
            destination: destination.to_string(),
        });
        Ok(())
    }

    async fn receive(&mut self) -> Result<Delivery, BrokerError> {
        match self.inbound.recv().await {
            None => Ok(Delivery::Closed),
            Some(Err(e)) => Err(e),
            Some(Ok(frame)) => match frame.command.as_str() {
                "MESSAGE" => Ok(Delivery::Message(into_message(frame))),
                "ERROR" => Err(BrokerError::Remote(error_text(&frame))),
                other => {
                    debug!(command = other, "Ignoring frame");
                    Ok(Delivery::Empty)
                }
            },
        }
    }

    async fn ack(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        if message.ack_id.is_empty() {
            return Err(BrokerError::Protocol(
                "message carries no ack id".to_string(),
            ));
        }

        // 1.2 brokers read `id`; 1.1 brokers read `message-id` + `subscription`
        let mut frame = Frame::new("ACK").header("id", message.ack_id.as_str());
        if let Some(message_id) = message.header("message-id") {
            frame = frame.header("message-id", message_id);
        }
        if let Some(sub) = &self.subscription {
            frame = frame.header("subscription", sub.id.as_str());
        }
        self.send(frame).await
    }

    fn is_subscribed(&self) -> bool {
        self.subscription.is_some() && !self.outbound.is_closed()
    }

    async fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        if let Some(sub) = self.subscription.take() {
            debug!(destination = %sub.destination, "Unsubscribing");
            self.send(Frame::new("UNSUBSCRIBE").header("id", sub.id)).await?;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        let receipt = format!("disconnect-{}", self.next_id());
        if self
            .send(Frame::new("DISCONNECT").header("receipt", receipt.as_str()))
            .await
            .is_err()
        {
            // Writer already gone: nothing left to close politely
            return Ok(());
        }

        let inbound = &mut self.inbound;
        let wait_for_receipt = async {
            while let Some(item) = inbound.recv().await {
                if let Ok(frame) = item {
                    if frame.command == "RECEIPT" && frame.get("receipt-id") == Some(receipt.as_str()) {
                        return;
                    }
                }
            }
        };
        if timeout(DISCONNECT_TIMEOUT, wait_for_receipt).await.is_err() {
            warn!("No receipt for DISCONNECT, closing anyway");
        }

        self.reader.abort();
        Ok(())
    }
}

/// Forward decoded frames; enforce the broker's heart-beat promise
async fn read_loop<R>(
    mut reader: FrameReader<R>,
    inbound: mpsc::Sender<Result<Frame, BrokerError>>,
    window: Option<Duration>,
    error_after: Duration,
) where
    R: AsyncRead + Unpin,
{
    let mut silent = Duration::ZERO;
    loop {
        loop {
            match reader.decode_buffered() {
                Ok(Some(ReadItem::Heartbeat)) => trace!("Broker heart-beat"),
                Ok(Some(ReadItem::Frame(frame))) => {
                    if inbound.send(Ok(frame)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = inbound.send(Err(e)).await;
                    return;
                }
            }
        }

        let read = match window {
            None => reader.fill().await,
            Some(window) => match timeout(window, reader.fill()).await {
                Ok(read) => read,
                Err(_) => {
                    silent += window;
                    if silent >= error_after {
                        let _ = inbound.send(Err(BrokerError::HeartbeatTimeout(silent))).await;
                        return;
                    }
                    warn!(silence = ?silent, "Missed broker heart-beat");
                    continue;
                }
            },
        };

        match read {
            Ok(0) => {
                debug!("Broker closed the connection");
                return;
            }
            Ok(_) => silent = Duration::ZERO,
            Err(e) => {
                let _ = inbound.send(Err(e.into())).await;
                return;
            }
        }
    }
}

/// Write queued frames, plus an EOL every heart-beat interval
async fn write_loop<W>(mut writer: W, mut outbound: mpsc::Receiver<Frame>, send_every: Option<Duration>)
where
    W: AsyncWrite + Unpin,
{
    let mut ticker = send_every.map(|every| {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let bytes = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => frame.encode(),
                None => break,
            },
            _ = tick(&mut ticker) => vec![b'\n'],
        };
        let written = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            warn!(error = %e, "Write to broker failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

    struct Peer {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn expect(&mut self, command: &str) -> Frame {
            let frame = timeout(Duration::from_secs(1), self.reader.next_frame())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(frame.command, command);
            frame
        }

        async fn send(&mut self, frame: Frame) {
            self.writer.write_all(&frame.encode()).await.unwrap();
        }
    }

    fn session(heartbeat: Heartbeat, config: &StompConfig) -> (StompSession, Peer) {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = split(client);
        let (server_read, server_write) = split(server);
        let session = StompSession::start(FrameReader::new(client_read), client_write, heartbeat, config);
        let peer = Peer {
            reader: FrameReader::new(server_read),
            writer: server_write,
        };
        (session, peer)
    }

    fn no_heartbeat() -> Heartbeat {
        Heartbeat {
            send_every: None,
            expect_every: None,
        }
    }

    #[tokio::test]
    async fn reader_reassembles_split_frames() {
        let io = tokio_test::io::Builder::new()
            .read(b"\nMESSAGE\nmessage-id:1\ncontent-le")
            .read(b"ngth:2\n\n{}")
            .read(b"\0\n")
            .build();
        let mut reader = FrameReader::new(io);

        assert_eq!(reader.next_item().await.unwrap(), Some(ReadItem::Heartbeat));
        let frame = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.command, "MESSAGE");
        assert_eq!(frame.get("message-id"), Some("1"));
        assert_eq!(frame.body, b"{}");
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn subscribe_receive_ack_disconnect() {
        let (mut session, mut peer) = session(no_heartbeat(), &StompConfig::default());

        session.subscribe("/queue/derivatives").await.unwrap();
        let sub = peer.expect("SUBSCRIBE").await;
        assert_eq!(sub.get("destination"), Some("/queue/derivatives"));
        assert_eq!(sub.get("ack"), Some("client"));
        assert!(session.is_subscribed());

        peer.send(
            Frame::new("MESSAGE")
                .header("subscription", sub.get("id").unwrap())
                .header("message-id", "m-1")
                .header("ack", "a-1")
                .header("Authorization", "Bearer abc")
                .body(b"{}".to_vec()),
        )
        .await;

        let Delivery::Message(message) = session.receive().await.unwrap() else {
            panic!("expected message");
        };
        assert_eq!(message.ack_id, "a-1");
        assert_eq!(message.authorization(), Some("Bearer abc"));
        assert_eq!(message.body, b"{}");

        session.ack(&message).await.unwrap();
        let ack = peer.expect("ACK").await;
        assert_eq!(ack.get("id"), Some("a-1"));
        assert_eq!(ack.get("message-id"), Some("m-1"));

        session.unsubscribe().await.unwrap();
        peer.expect("UNSUBSCRIBE").await;
        assert!(!session.is_subscribed());

        let disconnect = tokio::spawn(async move {
            session.disconnect().await.unwrap();
        });
        let frame = peer.expect("DISCONNECT").await;
        peer.send(Frame::new("RECEIPT").header("receipt-id", frame.get("receipt").unwrap()))
            .await;
        timeout(Duration::from_secs(1), disconnect).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn error_frame_is_a_broker_error() {
        let (mut session, mut peer) = session(no_heartbeat(), &StompConfig::default());

        peer.send(Frame::new("ERROR").header("message", "queue deleted")).await;

        let err = session.receive().await.unwrap_err();
        assert!(matches!(err, BrokerError::Remote(ref m) if m == "queue deleted"));
    }

    #[tokio::test]
    async fn oversized_frame_is_a_protocol_error() {
        let (mut session, mut peer) = session(no_heartbeat(), &StompConfig::default());

        peer.writer
            .write_all(b"MESSAGE\ncontent-length:18446744073709551615\n\nx\0")
            .await
            .unwrap();

        let err = session.receive().await.unwrap_err();
        assert!(matches!(err, BrokerError::Protocol(_)));
    }

    #[tokio::test]
    async fn closed_connection_is_a_closed_delivery() {
        let (mut session, peer) = session(no_heartbeat(), &StompConfig::default());
        drop(peer);

        assert_eq!(session.receive().await.unwrap(), Delivery::Closed);
    }

    #[tokio::test]
    async fn writer_sends_heartbeats() {
        let heartbeat = Heartbeat {
            send_every: Some(Duration::from_millis(10)),
            expect_every: None,
        };
        let (_session, mut peer) = session(heartbeat, &StompConfig::default());

        let item = timeout(Duration::from_secs(1), peer.reader.next_item())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item, Some(ReadItem::Heartbeat));
    }

    #[tokio::test]
    async fn silent_broker_times_out() {
        let heartbeat = Heartbeat {
            send_every: None,
            expect_every: Some(Duration::from_millis(10)),
        };
        let config = StompConfig {
            heartbeat_error: Duration::from_millis(40),
            ..StompConfig::default()
        };
        let (mut session, _peer) = session(heartbeat, &config);

        let err = timeout(Duration::from_secs(1), session.receive())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, BrokerError::HeartbeatTimeout(_)));
    }
}
