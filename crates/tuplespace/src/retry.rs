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

//! Retry queue for failed pushes.
//!
//! When a push to a subscriber fails at the transport, the tuple's address
//! and destination are queued here. Each retry pass drains the queue; the
//! kernel re-resolves the current tuple (a queued entry is skipped when the
//! tuple is gone or a later version has already been pushed) and requeues
//! on repeated failure until the attempt budget runs out.

use peerspace_transport::PeerId;

use crate::tuple::TupleAddress;

/// A push that failed and is waiting to be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPush {
    /// Address of the tuple to re-push.
    pub address: TupleAddress,
    /// Subscriber the push was headed for.
    pub dest: PeerId,
    /// Version the failed push carried; a higher stored seqno means a
    /// fresher push has superseded this entry.
    pub seqno: u32,
    /// Attempts left before the entry is dropped.
    pub tries_left: u32,
}

/// Queue of pushes awaiting retry.
#[derive(Debug, Default)]
pub struct RetryManager {
    entries: Vec<PendingPush>,
}

impl RetryManager {
    /// An empty queue.
    pub fn new() -> RetryManager {
        RetryManager::default()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue a failed push with the given attempt budget.
    ///
    /// An entry for the same (address, destination) pair is replaced: the
    /// newer seqno wins and the budget resets.
    pub fn insert(&mut self, address: TupleAddress, dest: PeerId, seqno: u32, budget: u32) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.dest == dest && e.address == address)
        {
            existing.seqno = existing.seqno.max(seqno);
            existing.tries_left = budget;
            return;
        }
        self.entries.push(PendingPush {
            address,
            dest,
            seqno,
            tries_left: budget,
        });
    }

    /// Take every queued entry for one retry pass, each with one attempt
    /// consumed. Entries whose budget is exhausted are dropped.
    pub fn begin_pass(&mut self) -> Vec<PendingPush> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .filter_map(|mut e| {
                if e.tries_left == 0 {
                    return None;
                }
                e.tries_left -= 1;
                Some(e)
            })
            .collect()
    }

    /// Put an entry back after another failed attempt. Entries with no
    /// budget left are dropped.
    pub fn requeue(&mut self, entry: PendingPush) {
        if entry.tries_left > 0 {
            self.entries.push(entry);
        }
    }

    /// Drop every entry headed for `dest`.
    pub fn remove_dest(&mut self, dest: PeerId) {
        self.entries.retain(|e| e.dest != dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::TupleKey;

    fn address(key: &str) -> TupleAddress {
        TupleAddress {
            owner: PeerId(1),
            key: TupleKey::parse(key).unwrap(),
        }
    }

    #[test]
    fn dedups_per_destination() {
        let mut retry = RetryManager::new();
        retry.insert(address("k"), PeerId(2), 3, 15);
        retry.insert(address("k"), PeerId(2), 4, 15);
        retry.insert(address("k"), PeerId(3), 3, 15);
        assert_eq!(retry.len(), 2);

        let pass = retry.begin_pass();
        let to_two = pass.iter().find(|e| e.dest == PeerId(2)).unwrap();
        assert_eq!(to_two.seqno, 4);
    }

    #[test]
    fn budget_runs_out() {
        let mut retry = RetryManager::new();
        retry.insert(address("k"), PeerId(2), 1, 2);

        let pass = retry.begin_pass();
        assert_eq!(pass.len(), 1);
        assert_eq!(pass[0].tries_left, 1);
        retry.requeue(pass[0].clone());

        let pass = retry.begin_pass();
        assert_eq!(pass[0].tries_left, 0);
        retry.requeue(pass[0].clone());
        assert!(retry.is_empty());
        assert!(retry.begin_pass().is_empty());
    }

    #[test]
    fn remove_dest_clears_only_that_peer() {
        let mut retry = RetryManager::new();
        retry.insert(address("a"), PeerId(2), 1, 15);
        retry.insert(address("b"), PeerId(3), 1, 15);
        retry.remove_dest(PeerId(2));
        assert_eq!(retry.len(), 1);
        assert_eq!(retry.begin_pass()[0].dest, PeerId(3));
    }
}
