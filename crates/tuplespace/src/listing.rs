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

//! Derived-tuple listings.
//!
//! The kernel republishes two self-owned tuples describing its own state:
//! `kernel.all-keys`, an s-expression list of every owned key, and
//! `kernel.subscribers`, a list of `(peer pattern)` entries for every
//! registered subscription. Both texts flow through this one
//! encoder/decoder pair so producers and consumers cannot drift apart.

use peerspace_transport::PeerId;

use crate::error::TupleError;
use crate::key::TupleKey;

/// Key of the derived tuple listing every owned key.
pub const ALL_KEYS_KEY: &str = "kernel.all-keys";

/// Key of the derived tuple listing registered subscriptions.
pub const SUBSCRIBERS_KEY: &str = "kernel.subscribers";

/// One entry of the subscriber listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberEntry {
    /// Peer holding the subscription.
    pub peer: PeerId,
    /// Pattern text, `<owner>.<key-pattern>` with `*` for wildcards.
    pub pattern: String,
}

/// Render a key listing, e.g. `(robot.pos kernel.all-keys)`.
pub fn encode_key_listing<'a>(keys: impl Iterator<Item = &'a TupleKey>) -> String {
    let mut out = String::from("(");
    let mut first = true;
    for key in keys {
        if !first {
            out.push(' ');
        }
        out.push_str(key.as_str());
        first = false;
    }
    out.push(')');
    out
}

/// Parse a key listing produced by [`encode_key_listing`].
pub fn decode_key_listing(text: &str) -> Result<Vec<TupleKey>, TupleError> {
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or(TupleError::BadArgument("key listing not parenthesized".into()))?;
    inner.split_whitespace().map(TupleKey::parse).collect()
}

/// Render the subscriber listing, one `(peer pattern)` entry per line.
pub fn encode_subscriber_listing(entries: &[SubscriberEntry]) -> String {
    let mut out = String::from("(\n");
    for entry in entries {
        out.push_str(&format!("  ( {} {} )\n", entry.peer, entry.pattern));
    }
    out.push_str(")\n");
    out
}

/// Parse a subscriber listing produced by [`encode_subscriber_listing`].
pub fn decode_subscriber_listing(text: &str) -> Result<Vec<SubscriberEntry>, TupleError> {
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or(TupleError::BadArgument(
            "subscriber listing not parenthesized".into(),
        ))?;
    let mut entries = Vec::new();
    for line in inner.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let body = line
            .strip_prefix('(')
            .and_then(|l| l.strip_suffix(')'))
            .ok_or(TupleError::BadArgument("subscriber entry malformed".into()))?;
        let mut parts = body.split_whitespace();
        let peer = parts
            .next()
            .and_then(|p| p.parse::<i32>().ok())
            .ok_or(TupleError::BadArgument("subscriber peer malformed".into()))?;
        let pattern = parts
            .next()
            .ok_or(TupleError::BadArgument("subscriber pattern missing".into()))?
            .to_owned();
        if parts.next().is_some() {
            return Err(TupleError::BadArgument("subscriber entry malformed".into()));
        }
        entries.push(SubscriberEntry {
            peer: PeerId(peer),
            pattern,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_listing_round_trip() {
        let keys = vec![
            TupleKey::parse("robot.pos").unwrap(),
            TupleKey::parse("kernel.all-keys").unwrap(),
        ];
        let text = encode_key_listing(keys.iter());
        assert_eq!(text, "(robot.pos kernel.all-keys)");
        assert_eq!(decode_key_listing(&text).unwrap(), keys);
    }

    #[test]
    fn empty_key_listing() {
        let text = encode_key_listing(std::iter::empty());
        assert_eq!(text, "()");
        assert!(decode_key_listing(&text).unwrap().is_empty());
    }

    #[test]
    fn subscriber_listing_round_trip() {
        let entries = vec![
            SubscriberEntry {
                peer: PeerId(7),
                pattern: "10.robot.*".into(),
            },
            SubscriberEntry {
                peer: PeerId(3),
                pattern: "*.kernel.all-keys".into(),
            },
        ];
        let text = encode_subscriber_listing(&entries);
        assert_eq!(decode_subscriber_listing(&text).unwrap(), entries);
        assert!(decode_subscriber_listing("(\n)\n").unwrap().is_empty());
    }

    #[test]
    fn rejects_unparenthesized_text() {
        assert!(decode_key_listing("a b c").is_err());
        assert!(decode_subscriber_listing("( 7 x").is_err());
    }
}
