//! Session Codes
//!
//! Short, human-shareable codes that players read out to each other.
//! Codes are drawn from `A-Z0-9` and are always stored uppercase.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of characters in a session code.
pub const SESSION_CODE_LEN: usize = 6;

/// Alphabet codes are drawn from.
pub const SESSION_CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Attempts before generation gives up on finding a free code.
pub const MAX_CODE_ATTEMPTS: usize = 1024;

/// A session code such as `AB12CD`.
///
/// Values built through [`SessionCode::normalize`] or [`generate_code`] are
/// trimmed and uppercase, so the code is a case-sensitive map key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(String);

impl SessionCode {
    /// Normalize a client-supplied code (trim + ASCII uppercase).
    pub fn normalize(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }

    /// Borrow the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this has the shape of a generated code.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == SESSION_CODE_LEN
            && self.0.bytes().all(|b| SESSION_CODE_ALPHABET.contains(&b))
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Draw a single random code. May collide with an existing one.
pub fn random_code<R: Rng + ?Sized>(rng: &mut R) -> SessionCode {
    let code = (0..SESSION_CODE_LEN)
        .map(|_| SESSION_CODE_ALPHABET[rng.gen_range(0..SESSION_CODE_ALPHABET.len())] as char)
        .collect();
    SessionCode(code)
}

/// Generate a code not rejected by `is_taken`.
///
/// Rejection sampling: draws until a free code is found. Returns `None`
/// after [`MAX_CODE_ATTEMPTS`] collisions in a row.
pub fn generate_code<R, F>(rng: &mut R, mut is_taken: F) -> Option<SessionCode>
where
    R: Rng + ?Sized,
    F: FnMut(&SessionCode) -> bool,
{
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = random_code(rng);
        if !is_taken(&code) {
            return Some(code);
        }
    }
    None
}
