// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session URL fragments.
//!
//! Canonical form: `#puzzle=<percent-encoded id>&timeline=<16-char token>`.
//! The legacy `#room=<id>` form is accepted and used directly as the room
//! key. Opening the URL is sufficient to join; puzzle content travels
//! through the document, never the URL.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Parsed session fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLocator {
    Puzzle { puzzle_id: String, timeline_id: String },
    Room { room_id: String },
}

impl SessionLocator {
    /// Parse a URL fragment, with or without the leading `#`.
    pub fn parse(fragment: &str) -> Option<Self> {
        let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
        if fragment.is_empty() {
            return None;
        }

        let mut puzzle = None;
        let mut timeline = None;
        let mut room = None;
        for pair in fragment.split('&') {
            let (key, value) = pair.split_once('=')?;
            match key {
                "puzzle" => puzzle = Some(percent_decode(value)?),
                "timeline" => timeline = Some(value.to_owned()),
                "room" => room = Some(value.to_owned()),
                _ => {} // unknown params are ignored for forward compatibility
            }
        }

        match (puzzle, timeline, room) {
            (Some(puzzle_id), Some(timeline_id), _) if !puzzle_id.is_empty() => {
                Some(Self::Puzzle { puzzle_id, timeline_id })
            }
            (_, _, Some(room_id)) if !room_id.is_empty() => Some(Self::Room { room_id }),
            _ => None,
        }
    }

    /// Encode back to a fragment. `parse(encode(x)) == x`.
    pub fn encode(&self) -> String {
        match self {
            Self::Puzzle { puzzle_id, timeline_id } => {
                format!("#puzzle={}&timeline={timeline_id}", percent_encode(puzzle_id))
            }
            Self::Room { room_id } => format!("#room={room_id}"),
        }
    }

    /// The signaling room key for this session.
    pub fn room_key(&self) -> String {
        match self {
            Self::Puzzle { puzzle_id, timeline_id } => format!("puzzle:{puzzle_id}:{timeline_id}"),
            Self::Room { room_id } => room_id.clone(),
        }
    }

    /// The document identity. Legacy rooms keep one document per room.
    pub fn doc_id(&self) -> &str {
        match self {
            Self::Puzzle { puzzle_id, .. } => puzzle_id,
            Self::Room { room_id } => room_id,
        }
    }
}

/// Deterministic puzzle id: everyone holding the same payload derives the
/// same id.
pub fn puzzle_id_for(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut id = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

/// Random 16-char timeline token, minted on first share.
pub fn timeline_token() -> String {
    rand::rng().sample_iter(rand::distr::Alphanumeric).take(16).map(char::from).collect()
}

/// Minimal RFC 3986 percent-encoding over the unreserved set.
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

pub fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
#[path = "locator_tests.rs"]
mod tests;
