//! # Pong Relay Server
//!
//! Real-time relay for two-player browser pong, with a persistent
//! win leaderboard.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PONG RELAY SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Identifiers                               │
//! │  ├── code.rs     - Shareable 6-character session codes       │
//! │  └── ids.rs      - Per-connection ids                        │
//! │                                                              │
//! │  leaderboard/    - Win tally                                 │
//! │  ├── mod.rs      - Ranking and merging wins                  │
//! │  └── store.rs    - JSON file and in-memory stores            │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── server.rs   - WebSocket server, relay loop, config      │
//! │  ├── relay.rs    - Event rules and forwarding                │
//! │  ├── session.rs  - Session registry                          │
//! │  ├── connection.rs - Live connections, outbound queues       │
//! │  ├── protocol.rs - Message types                             │
//! │  └── http.rs     - Leaderboard HTTP API                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! The server runs no physics. The session creator (host) is trusted for
//! ball state, score, power-ups and the match result; the server only
//! checks that each event comes from the right member of the right
//! session and forwards it to the opponent.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod leaderboard;
pub mod network;

// Re-export commonly used types
pub use core::{ConnectionId, SessionCode};
pub use leaderboard::{FileStore, Leaderboard, LeaderboardEntry, MemoryStore, WinRecord};
pub use network::{RelayServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
