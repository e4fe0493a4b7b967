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

//! Expiry scheduling.
//!
//! An ordered set of (deadline, record) pairs. Tuples with the
//! [`TimeVal::NEVER`] sentinel are simply never enqueued. The sweep pops
//! every entry whose deadline is at or before the current time; re-threading
//! a record after its expiry date changed is a remove plus an insert.

use std::collections::BTreeSet;

use crate::store::TupleId;
use crate::tuple::TimeVal;

/// Deadline-ordered queue of tuple expiry dates.
#[derive(Debug, Default)]
pub struct ExpiryQueue {
    entries: BTreeSet<(TimeVal, TupleId)>,
}

impl ExpiryQueue {
    /// An empty queue.
    pub fn new() -> ExpiryQueue {
        ExpiryQueue::default()
    }

    /// Number of scheduled expiries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Schedule `id` to expire at `deadline`. The never-expire sentinel is
    /// ignored.
    pub fn insert(&mut self, deadline: TimeVal, id: TupleId) {
        if !deadline.is_never() {
            self.entries.insert((deadline, id));
        }
    }

    /// Drop the entry for `id` at `deadline`, if present.
    pub fn remove(&mut self, deadline: TimeVal, id: TupleId) {
        self.entries.remove(&(deadline, id));
    }

    /// Move `id` from one deadline to another. No-op when equal.
    pub fn rethread(&mut self, old: TimeVal, new: TimeVal, id: TupleId) {
        if old != new {
            self.remove(old, id);
            self.insert(new, id);
        }
    }

    /// Remove and return every record whose deadline is at or before
    /// `now`, in deadline order.
    pub fn drain_due(&mut self, now: TimeVal) -> Vec<TupleId> {
        let mut due = Vec::new();
        while let Some(&(deadline, id)) = self.entries.iter().next() {
            if deadline > now {
                break;
            }
            self.entries.remove(&(deadline, id));
            due.push(id);
        }
        due
    }
}
