//! Core identifiers.
//!
//! Session codes shared between players and per-connection ids.

pub mod code;
pub mod ids;

// Re-export core types
pub use code::{generate_code, SessionCode, SESSION_CODE_LEN};
pub use ids::ConnectionId;
