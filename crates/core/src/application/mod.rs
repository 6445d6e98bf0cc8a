// Application Layer - Use Cases

pub mod consumer;
pub mod dispatcher;
pub mod relay;
pub mod supervisor;

// Re-exports
pub use consumer::{shutdown_channel, ConnectionManager, ShutdownSender, ShutdownToken};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use relay::{DerivativeRelay, IndexRelay, Relay, RelayError};
pub use supervisor::{ConsumerPool, Supervisor, SupervisorConfig};
