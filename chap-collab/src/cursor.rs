//! Cursor presence for the open file.
//!
//! ```text
//! local cursor activity ──► CursorTracker::update_local() ──► Frame::Cursor
//!                                                              (to peers)
//! peer Frame::Cursor ─────► CursorTracker::handle_remote() ──► upsert
//! remove-cursor ──────────► CursorTracker::remove()        ──► delete
//! teardown ───────────────► CursorTracker::departure()     ──► Frame::RemoveCursor
//! ```
//!
//! There is no idle expiry: a peer that disconnects without a departure
//! notice keeps its entry until a removal event arrives.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::patch::Position;
use crate::protocol::{CursorEvent, FileId, Frame};

/// RGBA color for a cursor indicator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl CursorColor {
    /// Stable color for a username: `hsl(hash % 360, 70%, 50%)`.
    ///
    /// The hash is the classic `c + ((h << 5) - h)` over UTF-16 code units.
    /// Only the shift wraps to 32 bits; the running sum does not, so long
    /// names keep the color browser clients compute for them.
    pub fn from_username(username: &str) -> Self {
        let hue = username_hue(username);
        let (r, g, b) = hsl_to_rgb(hue as f32 / 360.0, 0.7, 0.5);
        Self { r, g, b, a: 1.0 }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

fn username_hue(username: &str) -> u32 {
    let hash = username.encode_utf16().fold(0i64, |hash, unit| {
        let shifted = i64::from((hash as i32).wrapping_shl(5));
        i64::from(unit) + (shifted - hash)
    });
    hash.rem_euclid(360) as u32
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Everything a UI needs to draw one cursor indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorIndicator {
    pub username: String,
    /// "You" for the local user, the username otherwise.
    pub label: String,
    pub color: CursorColor,
    pub position: Position,
}

/// `username → position` for one open file.
#[derive(Debug, Clone)]
pub struct CursorTracker {
    file_id: FileId,
    local_username: String,
    cursors: BTreeMap<String, Position>,
}

impl CursorTracker {
    pub fn new(file_id: FileId, local_username: impl Into<String>) -> Self {
        Self {
            file_id,
            local_username: local_username.into(),
            cursors: BTreeMap::new(),
        }
    }

    /// Record the local cursor and build the event to publish.
    pub fn update_local(&mut self, position: Position) -> CursorEvent {
        self.cursors.insert(self.local_username.clone(), position);
        CursorEvent {
            file_id: self.file_id.clone(),
            username: self.local_username.clone(),
            position,
        }
    }

    /// Upsert a peer's cursor. Events for other files or for the local
    /// user are ignored.
    pub fn handle_remote(&mut self, event: &CursorEvent) -> bool {
        if event.file_id != self.file_id || event.username == self.local_username {
            return false;
        }
        self.cursors.insert(event.username.clone(), event.position);
        true
    }

    pub fn remove(&mut self, username: &str) -> Option<Position> {
        self.cursors.remove(username)
    }

    /// Replace peers' entries with a snapshot. The local entry is kept.
    pub fn merge_snapshot(&mut self, users: &BTreeMap<String, Position>) {
        let local = self.cursors.get(&self.local_username).copied();
        self.cursors = users
            .iter()
            .filter(|(name, _)| **name != self.local_username)
            .map(|(name, pos)| (name.clone(), *pos))
            .collect();
        if let Some(pos) = local {
            self.cursors.insert(self.local_username.clone(), pos);
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, Position> {
        self.cursors.clone()
    }

    /// Departure notice for the local user.
    pub fn departure(&self) -> Frame {
        Frame::RemoveCursor {
            file_id: self.file_id.clone(),
            username: self.local_username.clone(),
        }
    }

    pub fn clear(&mut self) {
        self.cursors.clear();
    }

    pub fn position(&self, username: &str) -> Option<Position> {
        self.cursors.get(username).copied()
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn indicators(&self) -> Vec<CursorIndicator> {
        self.cursors
            .iter()
            .map(|(username, position)| CursorIndicator {
                username: username.clone(),
                label: if *username == self.local_username {
                    "You".to_string()
                } else {
                    username.clone()
                },
                color: CursorColor::from_username(username),
                position: *position,
            })
            .collect()
    }
}
