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

//! The local tuple store.
//!
//! Records live in a slab arena and keep their [`TupleId`] across value
//! updates, so expiry-queue entries and retry entries stay valid when a
//! tuple is rewritten in place. A hash index maps (owner, key) to the
//! arena slot; exactly one record exists per address.

use std::collections::HashMap;

use crate::error::TupleError;
use crate::tuple::{TimeVal, Tuple, TupleAddress, TuplePattern};

/// Stable handle to a record in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TupleId(usize);

/// Result of [`TupleStore::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted {
    /// Handle of the created or updated record.
    pub id: TupleId,
    /// True when no tuple existed at the address before.
    pub created: bool,
    /// Expiry date the record carried before the write ([`TimeVal::NEVER`]
    /// for a fresh record); the caller re-threads the expiry queue only
    /// when it differs from the new date.
    pub old_expire: TimeVal,
}

/// Arena of tuple records with an (owner, key) index.
#[derive(Debug, Default)]
pub struct TupleStore {
    slots: Vec<Option<Tuple>>,
    free: Vec<usize>,
    index: HashMap<TupleAddress, TupleId>,
}

impl TupleStore {
    /// An empty store.
    pub fn new() -> TupleStore {
        TupleStore::default()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Insert or update the tuple at its (owner, key) address.
    ///
    /// The version rule: an incoming seqno of 0 means "next version" and
    /// the stored seqno increments; a nonzero seqno replaces the stored
    /// one but must exceed it, otherwise the write is rejected as
    /// [`TupleError::Stale`]. The append counter resets and the record is
    /// marked unread. Updates keep the record's [`TupleId`].
    pub fn upsert(&mut self, mut tuple: Tuple) -> Result<Upserted, TupleError> {
        tuple.is_new = true;
        tuple.append_seqno = 0;
        match self.index.get(&tuple.address()) {
            Some(&id) => {
                let slot = self.slots[id.0]
                    .as_mut()
                    .ok_or(TupleError::NotFound)?;
                if tuple.seqno == 0 {
                    tuple.seqno = slot.seqno + 1;
                } else if tuple.seqno <= slot.seqno {
                    return Err(TupleError::Stale {
                        stored: slot.seqno,
                        offered: tuple.seqno,
                    });
                }
                let old_expire = slot.expire_time;
                *slot = tuple;
                Ok(Upserted {
                    id,
                    created: false,
                    old_expire,
                })
            }
            None => {
                if tuple.seqno == 0 {
                    tuple.seqno = 1;
                }
                let address = tuple.address();
                let id = match self.free.pop() {
                    Some(slot) => {
                        self.slots[slot] = Some(tuple);
                        TupleId(slot)
                    }
                    None => {
                        self.slots.push(Some(tuple));
                        TupleId(self.slots.len() - 1)
                    }
                };
                self.index.insert(address, id);
                Ok(Upserted {
                    id,
                    created: true,
                    old_expire: TimeVal::NEVER,
                })
            }
        }
    }

    /// Look up the record id at an address.
    pub fn lookup(&self, address: &TupleAddress) -> Option<TupleId> {
        self.index.get(address).copied()
    }

    /// Borrow a record by id.
    pub fn get(&self, id: TupleId) -> Option<&Tuple> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// Mutably borrow a record by id.
    ///
    /// Callers must not change owner or key through this borrow; the
    /// index is keyed on them.
    pub fn get_mut(&mut self, id: TupleId) -> Option<&mut Tuple> {
        self.slots.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    /// Remove a record, returning it. The slot is recycled.
    pub fn remove(&mut self, id: TupleId) -> Option<Tuple> {
        let tuple = self.slots.get_mut(id.0)?.take()?;
        self.index.remove(&tuple.address());
        self.free.push(id.0);
        Some(tuple)
    }

    /// Iterate all live records.
    pub fn iter(&self) -> impl Iterator<Item = (TupleId, &Tuple)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|t| (TupleId(i), t)))
    }

    /// Ids of all live records matching `pattern`, excluding tuples
    /// already past their expiry date at `now`.
    pub fn matching(&self, pattern: &TuplePattern, now: TimeVal) -> Vec<TupleId> {
        self.iter()
            .filter(|(_, t)| !t.is_expired_at(now) && pattern.matches(t))
            .map(|(id, _)| id)
            .collect()
    }
}
