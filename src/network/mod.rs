//! Network Layer
//!
//! WebSocket relay for two-player sessions plus the leaderboard HTTP API.
//! All session state lives in [`relay::Relay`], driven by a single task.

pub mod connection;
pub mod http;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;

pub use connection::ConnectionManager;
pub use protocol::{ClientMessage, ServerMessage};
pub use relay::{ConnectionState, Relay, RelayError};
pub use server::{ConfigError, RelayServer, RelayServerError, ServerConfig};
pub use session::{Session, SessionError, SessionRegistry, SessionState};
