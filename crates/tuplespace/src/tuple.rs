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

//! Tuple values and tuple patterns.
//!
//! ## Purpose
//! [`Tuple`] is a concrete record in the space, addressed by (owner, key).
//! [`TuplePattern`] is the query form: every field optional, `None` meaning
//! "don't care". Keeping the two as separate types means lookups can never
//! accidentally store a wildcard and stores can never accidentally match
//! loosely; the old trick of using one struct with sentinel values for both
//! roles is deliberately not reproduced.
//!
//! ## Matching laws
//! - `TuplePattern::from_concrete(t).matches(t)` always holds.
//! - `generalizes` is reflexive and transitive.
//! - `overlaps` compares fields only where both sides are concrete.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::TupleError;
use crate::key::{KeyPattern, TupleKey};
use peerspace_transport::PeerId;

/// A second/microsecond timestamp on the shared wall clock.
///
/// `(0, 0)` is "never" when used as an expiry date. Ordering is
/// lexicographic on (sec, usec).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TimeVal {
    /// Whole seconds since the Unix epoch.
    pub sec: i64,
    /// Microseconds within the second, `0..1_000_000`.
    pub usec: i32,
}

impl TimeVal {
    /// The zero timestamp; as an expiry date it means "never expire".
    pub const NEVER: TimeVal = TimeVal { sec: 0, usec: 0 };

    /// The conventional "expire immediately" date. Any live clock is past
    /// second 1, so a sweep removes the tuple on its next pass.
    pub const EXPIRE_NOW: TimeVal = TimeVal { sec: 1, usec: 0 };

    /// Current wall-clock time.
    pub fn now() -> TimeVal {
        let now = Utc::now();
        TimeVal {
            sec: now.timestamp(),
            usec: now.timestamp_subsec_micros() as i32,
        }
    }

    /// Construct from whole seconds.
    pub fn from_secs(sec: i64) -> TimeVal {
        TimeVal { sec, usec: 0 }
    }

    /// This timestamp plus a duration.
    pub fn after(self, duration: std::time::Duration) -> TimeVal {
        let usec = self.usec as i64 + duration.subsec_micros() as i64;
        TimeVal {
            sec: self.sec + duration.as_secs() as i64 + usec / 1_000_000,
            usec: (usec % 1_000_000) as i32,
        }
    }

    /// True for the "never expire" sentinel.
    pub fn is_never(self) -> bool {
        self == TimeVal::NEVER
    }
}

impl std::fmt::Display for TimeVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:06}", self.sec, self.usec)
    }
}

/// How tuple data should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    /// Plain text; data matching ignores ASCII case.
    Text,
    /// Opaque bytes; data matching is exact.
    Binary,
}

/// The (owner, key) address of a tuple. One tuple exists per address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleAddress {
    /// Peer responsible for the tuple.
    pub owner: PeerId,
    /// Key within the owner's namespace.
    pub key: TupleKey,
}

impl std::fmt::Display for TupleAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.owner, self.key)
    }
}

/// A concrete tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    /// Peer whose namespace the tuple lives in.
    pub owner: PeerId,
    /// Peer that produced the current value.
    pub creator: PeerId,
    /// Key within the owner's namespace.
    pub key: TupleKey,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// MIME type of the payload, e.g. `text/plain`.
    pub mimetype: String,
    /// Payload interpretation.
    pub encoding: Encoding,
    /// When the owner last committed this value.
    pub write_time: TimeVal,
    /// Application-defined timestamp.
    pub user_time: TimeVal,
    /// When the tuple stops existing; [`TimeVal::NEVER`] for never.
    pub expire_time: TimeVal,
    /// Version counter; higher wins.
    pub seqno: u32,
    /// Counts appends since the last full write.
    pub append_seqno: u32,
    /// True until the local application reads the tuple.
    pub is_new: bool,
}

impl Tuple {
    /// A text tuple with default metadata: creator = owner, never expires,
    /// unread, counters at zero.
    pub fn text(owner: PeerId, key: TupleKey, value: &str) -> Tuple {
        Tuple::new(owner, key, value.as_bytes().to_vec(), "text/plain", Encoding::Text)
    }

    /// A tuple with explicit payload, mimetype and encoding.
    pub fn new(
        owner: PeerId,
        key: TupleKey,
        data: Vec<u8>,
        mimetype: &str,
        encoding: Encoding,
    ) -> Tuple {
        Tuple {
            owner,
            creator: owner,
            key,
            data,
            mimetype: mimetype.into(),
            encoding,
            write_time: TimeVal::NEVER,
            user_time: TimeVal::NEVER,
            expire_time: TimeVal::NEVER,
            seqno: 0,
            append_seqno: 0,
            is_new: true,
        }
    }

    /// The tuple's (owner, key) address.
    pub fn address(&self) -> TupleAddress {
        TupleAddress {
            owner: self.owner,
            key: self.key.clone(),
        }
    }

    /// Payload as UTF-8 text, if it is valid UTF-8.
    pub fn data_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Has the expiry date passed at time `now`?
    pub fn is_expired_at(&self, now: TimeVal) -> bool {
        !self.expire_time.is_never() && self.expire_time <= now
    }
}

impl std::fmt::Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<{}.{} creator={} seqno={} ts={} data={}>",
            self.owner,
            self.key,
            self.creator,
            self.seqno,
            self.write_time,
            match self.data_str() {
                Some(text) => text.to_string(),
                None => format!("{} bytes", self.data.len()),
            }
        )
    }
}

fn data_eq(encoding: Encoding, a: &[u8], b: &[u8]) -> bool {
    match encoding {
        Encoding::Text => a.eq_ignore_ascii_case(b),
        Encoding::Binary => a == b,
    }
}

/// A tuple query: every field optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuplePattern {
    /// Required owner, or any.
    pub owner: Option<PeerId>,
    /// Required creator, or any.
    pub creator: Option<PeerId>,
    /// Key pattern; [`KeyPattern::any`] matches every key.
    pub key: KeyPattern,
    /// Required payload, or any. Text payloads compare case-insensitively.
    pub data: Option<Vec<u8>>,
    /// Required mimetype (ASCII case-insensitive), or any.
    pub mimetype: Option<String>,
    /// Required encoding, or any.
    pub encoding: Option<Encoding>,
    /// Required write time, or any.
    pub write_time: Option<TimeVal>,
    /// Required user time, or any.
    pub user_time: Option<TimeVal>,
    /// Required expiry date, or any.
    pub expire_time: Option<TimeVal>,
    /// Required seqno, or any.
    pub seqno: Option<u32>,
    /// Required append counter, or any.
    pub append_seqno: Option<u32>,
    /// `Some(true)` matches only unread tuples, `Some(false)` only read.
    pub is_new: Option<bool>,
}

impl TuplePattern {
    /// The pattern matching every tuple.
    pub fn any() -> TuplePattern {
        TuplePattern {
            owner: None,
            creator: None,
            key: KeyPattern::any(),
            data: None,
            mimetype: None,
            encoding: None,
            write_time: None,
            user_time: None,
            expire_time: None,
            seqno: None,
            append_seqno: None,
            is_new: None,
        }
    }

    /// Pattern constraining only owner and key.
    pub fn for_key(owner: Option<PeerId>, key: KeyPattern) -> TuplePattern {
        TuplePattern {
            owner,
            key,
            ..TuplePattern::any()
        }
    }

    /// Parse a key-pattern string into an owner+key pattern.
    pub fn parse(owner: Option<PeerId>, key: &str) -> Result<TuplePattern, TupleError> {
        Ok(TuplePattern::for_key(owner, KeyPattern::parse(key)?))
    }

    /// The fully concrete pattern matching exactly `tuple`.
    pub fn from_concrete(tuple: &Tuple) -> TuplePattern {
        TuplePattern {
            owner: Some(tuple.owner),
            creator: Some(tuple.creator),
            key: KeyPattern::exact(&tuple.key),
            data: Some(tuple.data.clone()),
            mimetype: Some(tuple.mimetype.clone()),
            encoding: Some(tuple.encoding),
            write_time: Some(tuple.write_time),
            user_time: Some(tuple.user_time),
            expire_time: Some(tuple.expire_time),
            seqno: Some(tuple.seqno),
            append_seqno: Some(tuple.append_seqno),
            is_new: Some(tuple.is_new),
        }
    }

    /// Does this pattern match the concrete tuple?
    ///
    /// Every `Some` field must agree with the tuple. Text data and
    /// mimetypes compare ignoring ASCII case.
    pub fn matches(&self, tuple: &Tuple) -> bool {
        if let Some(owner) = self.owner {
            if owner != tuple.owner {
                return false;
            }
        }
        if let Some(creator) = self.creator {
            if creator != tuple.creator {
                return false;
            }
        }
        if !self.key.matches(&tuple.key) {
            return false;
        }
        if let Some(ref data) = self.data {
            if !data_eq(tuple.encoding, data, &tuple.data) {
                return false;
            }
        }
        if let Some(ref mimetype) = self.mimetype {
            if !mimetype.eq_ignore_ascii_case(&tuple.mimetype) {
                return false;
            }
        }
        if let Some(encoding) = self.encoding {
            if encoding != tuple.encoding {
                return false;
            }
        }
        if let Some(write_time) = self.write_time {
            if write_time != tuple.write_time {
                return false;
            }
        }
        if let Some(user_time) = self.user_time {
            if user_time != tuple.user_time {
                return false;
            }
        }
        if let Some(expire_time) = self.expire_time {
            if expire_time != tuple.expire_time {
                return false;
            }
        }
        if let Some(seqno) = self.seqno {
            if seqno != tuple.seqno {
                return false;
            }
        }
        if let Some(append_seqno) = self.append_seqno {
            if append_seqno != tuple.append_seqno {
                return false;
            }
        }
        if let Some(is_new) = self.is_new {
            if is_new != tuple.is_new {
                return false;
            }
        }
        true
    }

    /// Could both patterns match some common tuple? Fields are compared
    /// only where both sides are concrete.
    pub fn overlaps(&self, other: &TuplePattern) -> bool {
        fn both<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }
        both(&self.owner, &other.owner)
            && both(&self.creator, &other.creator)
            && self.key.overlaps(&other.key)
            && match (&self.data, &other.data) {
                (Some(a), Some(b)) => {
                    let encoding = self.encoding.or(other.encoding).unwrap_or(Encoding::Text);
                    data_eq(encoding, a, b)
                }
                _ => true,
            }
            && match (&self.mimetype, &other.mimetype) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => true,
            }
            && both(&self.encoding, &other.encoding)
            && both(&self.write_time, &other.write_time)
            && both(&self.user_time, &other.user_time)
            && both(&self.expire_time, &other.expire_time)
            && both(&self.seqno, &other.seqno)
            && both(&self.append_seqno, &other.append_seqno)
            && both(&self.is_new, &other.is_new)
    }

    /// Is `self` at least as general as `other`: does every tuple matched
    /// by `other` also match `self`?
    pub fn generalizes(&self, other: &TuplePattern) -> bool {
        fn gen<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            match (a, b) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(a), Some(b)) => a == b,
            }
        }
        gen(&self.owner, &other.owner)
            && gen(&self.creator, &other.creator)
            && self.key.generalizes(&other.key)
            && match (&self.data, &other.data) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(a), Some(b)) => {
                    let encoding = self.encoding.or(other.encoding).unwrap_or(Encoding::Text);
                    data_eq(encoding, a, b)
                }
            }
            && match (&self.mimetype, &other.mimetype) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            }
            && gen(&self.encoding, &other.encoding)
            && gen(&self.write_time, &other.write_time)
            && gen(&self.user_time, &other.user_time)
            && gen(&self.expire_time, &other.expire_time)
            && gen(&self.seqno, &other.seqno)
            && gen(&self.append_seqno, &other.append_seqno)
            && gen(&self.is_new, &other.is_new)
    }

    /// Convert to a concrete tuple, failing with
    /// [`TupleError::TupleIsAbstract`] if owner, key, data, mimetype or
    /// encoding are wildcards. Wildcard timestamps and counters fall back
    /// to their defaults.
    pub fn into_concrete(self) -> Result<Tuple, TupleError> {
        let owner = self.owner.ok_or(TupleError::TupleIsAbstract)?;
        let key = self.key.as_concrete().ok_or(TupleError::TupleIsAbstract)?;
        let data = self.data.ok_or(TupleError::TupleIsAbstract)?;
        let mimetype = self.mimetype.ok_or(TupleError::TupleIsAbstract)?;
        let encoding = self.encoding.ok_or(TupleError::TupleIsAbstract)?;
        Ok(Tuple {
            owner,
            creator: self.creator.unwrap_or(owner),
            key,
            data,
            mimetype,
            encoding,
            write_time: self.write_time.unwrap_or(TimeVal::NEVER),
            user_time: self.user_time.unwrap_or(TimeVal::NEVER),
            expire_time: self.expire_time.unwrap_or(TimeVal::NEVER),
            seqno: self.seqno.unwrap_or(0),
            append_seqno: self.append_seqno.unwrap_or(0),
            is_new: self.is_new.unwrap_or(true),
        })
    }
}
