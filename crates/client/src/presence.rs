// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence: collaborator colors, default nicknames, cursor word
//! highlights, and join/leave notifications.
//!
//! Colors come from a fixed distinct palette that avoids reds and greens so
//! collaborator highlights never read as error or verified marks. The local
//! user always renders with [`HOME_COLOR`] regardless of palette rotation.

use std::collections::{HashMap, HashSet};

use crate::peer::awareness::{Awareness, AwarenessChange, AwarenessState, Cursor, Direction};

/// Collaborator palette: blues, purples, oranges, teals, pinks, golds.
/// No reds (error flags) and no greens (verified cells).
pub const PALETTE: [&str; 12] = [
    "#4c6ef5", "#9775fa", "#f59f00", "#22b8cf", "#e64980", "#748ffc",
    "#fcc419", "#3bc9db", "#b197fc", "#ff922b", "#f783ac", "#5c7cfa",
];

/// The local user's own accent, outside the collaborator rotation.
pub const HOME_COLOR: &str = "#364fc7";

/// Cursor crowding threshold: at and beyond this many collaborators on a
/// cell, the UI shows a crowd marker instead of more border segments.
pub const CROWD_AT: usize = 3;

const ADJECTIVES: [&str; 24] = [
    "Amber", "Bold", "Brisk", "Calm", "Clever", "Daring", "Eager", "Gentle", "Humble", "Keen",
    "Lively", "Lucky", "Mellow", "Nimble", "Patient", "Plucky", "Quiet", "Rapid", "Sly",
    "Snug", "Spry", "Sunny", "Swift", "Witty",
];

const ANIMALS: [&str; 24] = [
    "Badger", "Bison", "Crane", "Dolphin", "Falcon", "Gecko", "Heron", "Ibex", "Jackdaw",
    "Koala", "Lemur", "Lynx", "Marmot", "Narwhal", "Otter", "Owl", "Panda", "Puffin", "Quokka",
    "Raven", "Seal", "Tapir", "Vole", "Wombat",
];

/// Random `"{Adjective} {Animal}"` default nickname.
pub fn random_nickname() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let animal = ANIMALS[rng.random_range(0..ANIMALS.len())];
    format!("{adjective} {animal}")
}

/// Local user profile, kept in the key-value store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub nickname: String,
    pub avatar: Option<String>,
}

/// Load the profile, minting and persisting a random nickname on first use
/// so the same identity shows up across sessions.
pub fn load_profile(kv: &crate::storage::KvStore) -> Profile {
    let nickname = match kv.get_string("profile:nickname") {
        Some(name) => name,
        None => {
            let name = random_nickname();
            kv.set_string("profile:nickname", &name);
            name
        }
    };
    Profile { nickname, avatar: kv.get_string("profile:avatar") }
}

pub fn save_profile(kv: &crate::storage::KvStore, profile: &Profile) {
    kv.set_string("profile:nickname", &profile.nickname);
    match &profile.avatar {
        Some(avatar) => kv.set_string("profile:avatar", avatar),
        None => kv.remove("profile:avatar"),
    }
}

/// Pick a collaborator color: the first palette entry no other peer holds,
/// falling back to a tag-hash slot when the palette is exhausted.
pub fn pick_color(tag: &str, taken: &[String]) -> &'static str {
    PALETTE
        .iter()
        .find(|color| !taken.iter().any(|t| t.eq_ignore_ascii_case(color)))
        .copied()
        .unwrap_or_else(|| fallback_color(tag))
}

fn fallback_color(tag: &str) -> &'static str {
    let sum: usize = tag.bytes().map(usize::from).sum();
    PALETTE[sum % PALETTE.len()]
}

/// Colors currently held by other peers, as read from awareness.
pub fn taken_colors(awareness: &Awareness) -> Vec<String> {
    awareness
        .peer_states()
        .into_iter()
        .filter_map(|(_, state)| state.user.map(|u| u.color))
        .collect()
}

// -- Word highlights ----------------------------------------------------------

/// Minimal grid topology the embedder supplies: enough to walk a word.
#[derive(Debug, Clone)]
pub struct GridShape {
    pub rows: u16,
    pub cols: u16,
    blocked: HashSet<(u16, u16)>,
}

impl GridShape {
    pub fn new(rows: u16, cols: u16, blocked: impl IntoIterator<Item = (u16, u16)>) -> Self {
        Self { rows, cols, blocked: blocked.into_iter().collect() }
    }

    pub fn is_open(&self, row: u16, col: u16) -> bool {
        row < self.rows && col < self.cols && !self.blocked.contains(&(row, col))
    }

    /// The cells of the word containing the cursor, along its direction.
    pub fn word_cells(&self, cursor: &Cursor) -> Vec<(u16, u16)> {
        if !self.is_open(cursor.row, cursor.col) {
            return Vec::new();
        }
        let (dr, dc): (i32, i32) = match cursor.direction {
            Direction::Across => (0, 1),
            Direction::Down => (1, 0),
        };

        // Walk back to the word start, then forward to its end.
        let (mut row, mut col) = (i32::from(cursor.row), i32::from(cursor.col));
        while row - dr >= 0
            && col - dc >= 0
            && self.is_open((row - dr) as u16, (col - dc) as u16)
        {
            row -= dr;
            col -= dc;
        }

        let mut cells = Vec::new();
        while row >= 0 && col >= 0 && self.is_open(row as u16, col as u16) {
            cells.push((row as u16, col as u16));
            row += dr;
            col += dc;
        }
        cells
    }
}

/// Per-cell collaborator highlight: the colors whose word covers the cell
/// (capped at [`CROWD_AT`]) and whether the cell is crowded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellHighlight {
    pub colors: Vec<String>,
    pub crowded: bool,
}

/// Compute collaborator highlights for every cell touched by a peer cursor.
pub fn cell_highlights(
    shape: &GridShape,
    peers: &[(String, AwarenessState)],
) -> HashMap<(u16, u16), CellHighlight> {
    let mut highlights: HashMap<(u16, u16), CellHighlight> = HashMap::new();
    for (_, state) in peers {
        let (Some(user), Some(cursor)) = (&state.user, &state.cursor) else {
            continue;
        };
        for cell in shape.word_cells(cursor) {
            let slot = highlights.entry(cell).or_default();
            if !slot.colors.contains(&user.color) {
                slot.colors.push(user.color.clone());
            }
        }
    }
    for slot in highlights.values_mut() {
        slot.crowded = slot.colors.len() >= CROWD_AT;
        slot.colors.truncate(CROWD_AT);
    }
    highlights
}

// -- Join/leave notifications -------------------------------------------------

/// A rendered presence notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceNote {
    Joined(String),
    Left(String),
}

/// Turns awareness changes into join/leave notes.
///
/// The initial-load flag suppresses notes for peers already present when
/// this client connects, and is re-armed on every transport teardown.
/// Nicknames are remembered separately because awareness entries are gone
/// by the time the `removed` change fires.
pub struct PresenceTracker {
    initial_load: bool,
    names: HashMap<String, String>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self { initial_load: true, names: HashMap::new() }
    }

    /// Re-arm the initial-load suppression after a full transport teardown,
    /// so reconnects do not replay join notifications.
    pub fn re_arm(&mut self) {
        self.initial_load = true;
        self.names.clear();
    }

    /// Digest one awareness change into notifications.
    pub fn note(&mut self, change: &AwarenessChange, awareness: &Awareness) -> Vec<PresenceNote> {
        let states: HashMap<String, AwarenessState> =
            awareness.peer_states().into_iter().collect();

        // Record last-known nicknames for everyone still visible.
        for (tag, state) in &states {
            if let Some(user) = &state.user {
                self.names.insert(tag.clone(), user.name.clone());
            }
        }

        if self.initial_load {
            // Peers present at connect time are not "joining".
            self.initial_load = false;
            return Vec::new();
        }

        let mut notes = Vec::new();
        for tag in &change.added {
            let name = self.names.get(tag).cloned().unwrap_or_else(|| "Someone".to_owned());
            notes.push(PresenceNote::Joined(name));
        }
        for tag in &change.removed {
            let name = self.names.remove(tag).unwrap_or_else(|| "Someone".to_owned());
            notes.push(PresenceNote::Left(name));
        }
        notes
    }
}

#[cfg(test)]
#[path = "presence_tests.rs"]
mod tests;
