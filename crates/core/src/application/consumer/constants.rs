// Broker session constants
use std::time::Duration;

/// Environment variable overriding the broker address
pub const BROKER_ADDR_ENV: &str = "STOMP_SERVER_ADDR";

/// Broker address used when nothing else is configured
pub const DEFAULT_BROKER_ADDR: &str = "activemq:61613";

/// Heart-beat interval requested in both directions (10s)
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// How late a broker heart-beat may be before it is reported as missed
pub const HEARTBEAT_GRACE_MULTIPLIER: f64 = 1.5;

/// Silence from the broker beyond this ends the session (60s)
pub const HEARTBEAT_ERROR_THRESHOLD: Duration = Duration::from_secs(60);

/// TCP keepalive probe interval (10s)
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Delay between sessions of one worker; zero reconnects immediately
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::ZERO;
