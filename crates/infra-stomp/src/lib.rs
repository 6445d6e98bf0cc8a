// Eventbus Infrastructure - STOMP broker adapter
// Implements: BrokerConnector, BrokerSession

pub mod connector;
pub mod frame;
pub mod session;

pub use connector::{Heartbeat, StompConfig, StompConnector};
pub use frame::{Frame, FrameError, ReadItem, MAX_FRAME_SIZE};
pub use session::{FrameReader, StompSession};
