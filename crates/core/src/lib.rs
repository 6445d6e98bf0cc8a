// Eventbus Core - Relay Logic & Ports
// NO infrastructure dependencies: sockets and HTTP clients live in infra crates

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, Result};
