//! Leaderboard
//!
//! Win tally per player, ranked by wins and truncated to a top list.
//! Merging happens here; the [`LeaderboardStore`] only reads and replaces
//! the whole list.

pub mod store;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use store::{FileStore, LeaderboardStore, MemoryStore, StoreError};

/// Number of entries kept after every write.
pub const LEADERBOARD_SIZE: usize = 10;

/// One persisted leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// Display name at the time of the latest win.
    pub name: String,
    /// Total wins.
    pub wins: u32,
    /// Client-chosen persistent identity.
    pub player_id: String,
}

/// A win to credit, produced by the relay when a match ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinRecord {
    /// Winner's persistent identity.
    pub player_id: String,
    /// Winner's display name.
    pub name: String,
}

/// Sort descending by wins (ties keep their order) and keep the top list.
pub fn rank(mut entries: Vec<LeaderboardEntry>) -> Vec<LeaderboardEntry> {
    entries.sort_by(|a, b| b.wins.cmp(&a.wins));
    entries.truncate(LEADERBOARD_SIZE);
    entries
}

/// Credit one win to `win.player_id`, inserting the player if absent.
pub fn merge_win(mut entries: Vec<LeaderboardEntry>, win: &WinRecord) -> Vec<LeaderboardEntry> {
    match entries.iter_mut().find(|e| e.player_id == win.player_id) {
        Some(entry) => {
            entry.wins = entry.wins.saturating_add(1);
            entry.name = win.name.clone();
        }
        None => entries.push(LeaderboardEntry {
            name: win.name.clone(),
            wins: 1,
            player_id: win.player_id.clone(),
        }),
    }
    rank(entries)
}

/// Leaderboard backed by a store.
#[derive(Clone)]
pub struct Leaderboard {
    store: Arc<dyn LeaderboardStore>,
}

impl Leaderboard {
    /// Wrap a store.
    pub fn new(store: Arc<dyn LeaderboardStore>) -> Self {
        Self { store }
    }

    /// Current top list.
    pub fn top(&self) -> Result<Vec<LeaderboardEntry>, StoreError> {
        Ok(rank(self.store.read()?))
    }

    /// Read, merge one win, rank, write. Returns the stored list.
    pub fn record_win(&self, win: &WinRecord) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let entries = merge_win(self.store.read()?, win);
        self.store.write(&entries)?;
        Ok(entries)
    }
}
