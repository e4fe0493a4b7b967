// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2026 Peerspace Project Contributors
//
// This file is part of Peerspace.
//
// Peerspace is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Peerspace is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Peerspace. If not, see <https://www.gnu.org/licenses/>.

//! Hierarchical tuple keys.
//!
//! Keys are dot-separated paths, at most [`MAX_KEY_SEGMENTS`] deep and
//! [`MAX_KEY_LENGTH`] bytes encoded. [`TupleKey`] is always concrete;
//! [`KeyPattern`] additionally allows `*` segments and the empty pattern
//! that matches any key. Segment comparison ignores ASCII case.

use serde::{Deserialize, Serialize};

use crate::error::TupleError;

/// Maximum number of dot-separated segments in a key.
pub const MAX_KEY_SEGMENTS: usize = 7;

/// Maximum encoded length of a key, in bytes.
pub const MAX_KEY_LENGTH: usize = 128;

fn check_common(text: &str) -> Result<(), TupleError> {
    if text.len() > MAX_KEY_LENGTH {
        return Err(TupleError::BadKey(format!(
            "key longer than {MAX_KEY_LENGTH} bytes"
        )));
    }
    if text.split('.').count() > MAX_KEY_SEGMENTS {
        return Err(TupleError::BadKey(format!(
            "key deeper than {MAX_KEY_SEGMENTS} segments"
        )));
    }
    Ok(())
}

/// A concrete tuple key such as `robot.arm.position`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TupleKey {
    text: String,
}

impl TupleKey {
    /// Parse and validate a concrete key.
    pub fn parse(text: &str) -> Result<TupleKey, TupleError> {
        if text.is_empty() {
            return Err(TupleError::BadKey("empty key".into()));
        }
        check_common(text)?;
        for segment in text.split('.') {
            if segment.is_empty() {
                return Err(TupleError::BadKey(format!("empty segment in '{text}'")));
            }
            if segment.contains('*') {
                return Err(TupleError::BadKey(format!(
                    "wildcard in concrete key '{text}'"
                )));
            }
        }
        Ok(TupleKey { text: text.into() })
    }

    /// The full dotted key text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.text.split('.').count()
    }

    /// Iterate the segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.text.split('.')
    }

    /// Last segment of the key.
    pub fn leaf(&self) -> &str {
        self.text.rsplit('.').next().unwrap_or(&self.text)
    }

    /// Key equality, ignoring ASCII case.
    pub fn eq_ignore_case(&self, other: &TupleKey) -> bool {
        self.text.eq_ignore_ascii_case(&other.text)
    }
}

impl std::fmt::Display for TupleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// One segment of a [`KeyPattern`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySegment {
    /// Matches exactly this segment text (ASCII case-insensitive).
    Literal(String),
    /// `*`: matches any single segment.
    Any,
}

/// A key pattern: either the whole-key wildcard (matches any key of any
/// depth) or a fixed-depth list of segments where `*` matches one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPattern {
    segments: Option<Vec<KeySegment>>,
}

impl KeyPattern {
    /// The pattern that matches every key.
    pub fn any() -> KeyPattern {
        KeyPattern { segments: None }
    }

    /// Parse a pattern. The empty string yields the whole-key wildcard.
    ///
    /// A `*` must stand alone as a segment; `a.*b.c` is rejected.
    pub fn parse(text: &str) -> Result<KeyPattern, TupleError> {
        if text.is_empty() {
            return Ok(KeyPattern::any());
        }
        check_common(text)?;
        let mut segments = Vec::new();
        for segment in text.split('.') {
            if segment.is_empty() {
                return Err(TupleError::BadKey(format!("empty segment in '{text}'")));
            }
            if segment == "*" {
                segments.push(KeySegment::Any);
            } else if segment.contains('*') {
                return Err(TupleError::BadKey(format!(
                    "wildcard must be a whole segment in '{text}'"
                )));
            } else {
                segments.push(KeySegment::Literal(segment.into()));
            }
        }
        Ok(KeyPattern {
            segments: Some(segments),
        })
    }

    /// Pattern for exactly one concrete key.
    pub fn exact(key: &TupleKey) -> KeyPattern {
        KeyPattern {
            segments: Some(
                key.segments()
                    .map(|s| KeySegment::Literal(s.into()))
                    .collect(),
            ),
        }
    }

    /// True when this is the whole-key wildcard.
    pub fn is_any(&self) -> bool {
        self.segments.is_none()
    }

    /// True when the pattern contains no wildcard at all.
    pub fn is_concrete(&self) -> bool {
        match &self.segments {
            None => false,
            Some(segs) => segs.iter().all(|s| matches!(s, KeySegment::Literal(_))),
        }
    }

    /// Recover the concrete key if the pattern has no wildcards.
    pub fn as_concrete(&self) -> Option<TupleKey> {
        let segs = self.segments.as_ref()?;
        let mut parts = Vec::with_capacity(segs.len());
        for seg in segs {
            match seg {
                KeySegment::Literal(s) => parts.push(s.as_str()),
                KeySegment::Any => return None,
            }
        }
        Some(TupleKey {
            text: parts.join("."),
        })
    }

    /// Does the pattern match the given concrete key?
    ///
    /// Depth must be equal (unless whole-key wildcard); literal segments
    /// compare ignoring ASCII case.
    pub fn matches(&self, key: &TupleKey) -> bool {
        let segs = match &self.segments {
            None => return true,
            Some(segs) => segs,
        };
        if segs.len() != key.depth() {
            return false;
        }
        segs.iter().zip(key.segments()).all(|(pat, seg)| match pat {
            KeySegment::Any => true,
            KeySegment::Literal(lit) => lit.eq_ignore_ascii_case(seg),
        })
    }

    /// Could both patterns match some common key?
    ///
    /// Segments are compared only where both sides are literal; a depth
    /// mismatch (with neither side the whole-key wildcard) never overlaps.
    pub fn overlaps(&self, other: &KeyPattern) -> bool {
        let (a, b) = match (&self.segments, &other.segments) {
            (None, _) | (_, None) => return true,
            (Some(a), Some(b)) => (a, b),
        };
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b.iter()).all(|(x, y)| match (x, y) {
            (KeySegment::Literal(x), KeySegment::Literal(y)) => x.eq_ignore_ascii_case(y),
            _ => true,
        })
    }

    /// Is `self` at least as general as `other`? Every key matched by
    /// `other` must be matched by `self`.
    pub fn generalizes(&self, other: &KeyPattern) -> bool {
        let (a, b) = match (&self.segments, &other.segments) {
            (None, _) => return true,
            (_, None) => return false,
            (Some(a), Some(b)) => (a, b),
        };
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b.iter()).all(|(x, y)| match (x, y) {
            (KeySegment::Any, _) => true,
            (KeySegment::Literal(_), KeySegment::Any) => false,
            (KeySegment::Literal(x), KeySegment::Literal(y)) => x.eq_ignore_ascii_case(y),
        })
    }

    /// Render for the wire and the subscriber listing: dotted text with
    /// `*` segments, empty string for the whole-key wildcard.
    pub fn to_wire_string(&self) -> String {
        match &self.segments {
            None => String::new(),
            Some(segs) => segs
                .iter()
                .map(|s| match s {
                    KeySegment::Literal(l) => l.as_str(),
                    KeySegment::Any => "*",
                })
                .collect::<Vec<_>>()
                .join("."),
        }
    }
}

impl std::fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_any() {
            f.write_str("*")
        } else {
            f.write_str(&self.to_wire_string())
        }
    }
}
