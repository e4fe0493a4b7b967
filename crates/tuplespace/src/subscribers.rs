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

//! Subscription registry.
//!
//! Holds every subscription this kernel knows about: its own (local,
//! peer = self, no expiry) and those received from remote peers (expire
//! unless refreshed). Re-subscribing with an equal pattern refreshes the
//! existing record instead of creating a second one.
//!
//! The registry also tracks, per remote peer, whether that peer has been
//! given all of our local subscriptions since the link last worked; the
//! manage tick resends everything to peers not yet marked.

use std::collections::{HashMap, HashSet};

use peerspace_transport::PeerId;

use crate::callbacks::CallbackHandle;
use crate::tuple::{TimeVal, Tuple, TuplePattern};

/// Handle identifying a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberHandle(pub(crate) u64);

/// Bookkeeping for an indirect (meta) subscription: the retargeting
/// callback plus the current subscription to the referenced tuple.
#[derive(Debug, Clone, Copy)]
pub struct MetaLinks {
    /// Change callback watching the meta tuple itself.
    pub callback: CallbackHandle,
    /// Subscription to the tuple the meta tuple currently points at.
    pub target: Option<SubscriberHandle>,
}

/// One subscription record.
#[derive(Clone)]
pub struct Subscriber {
    /// Registry handle.
    pub handle: SubscriberHandle,
    /// Peer holding the subscription (self for local ones).
    pub peer: PeerId,
    /// What the subscriber wants pushed.
    pub pattern: TuplePattern,
    /// Deadline after which a remote subscription lapses; local
    /// subscriptions never expire.
    pub expires: Option<TimeVal>,
    /// Present on local indirect subscriptions.
    pub meta: Option<MetaLinks>,
}

/// Registry of local and remote subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_handle: u64,
    entries: HashMap<SubscriberHandle, Subscriber>,
    given: HashSet<PeerId>,
}

impl SubscriptionRegistry {
    /// An empty registry.
    pub fn new() -> SubscriptionRegistry {
        SubscriptionRegistry::default()
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no subscriptions are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a subscription, deduplicating on (peer, pattern).
    ///
    /// When a record with an equal pattern already exists for the peer its
    /// expiry is refreshed and `created` comes back false.
    pub fn insert(
        &mut self,
        peer: PeerId,
        pattern: TuplePattern,
        expires: Option<TimeVal>,
    ) -> (SubscriberHandle, bool) {
        if let Some(existing) = self
            .entries
            .values_mut()
            .find(|s| s.peer == peer && s.pattern == pattern)
        {
            existing.expires = expires;
            return (existing.handle, false);
        }
        self.next_handle += 1;
        let handle = SubscriberHandle(self.next_handle);
        self.entries.insert(
            handle,
            Subscriber {
                handle,
                peer,
                pattern,
                expires,
                meta: None,
            },
        );
        (handle, true)
    }

    /// Remove a subscription by handle.
    pub fn remove(&mut self, handle: SubscriberHandle) -> Option<Subscriber> {
        self.entries.remove(&handle)
    }

    /// Borrow a subscription.
    pub fn get(&self, handle: SubscriberHandle) -> Option<&Subscriber> {
        self.entries.get(&handle)
    }

    /// Mutably borrow a subscription.
    pub fn get_mut(&mut self, handle: SubscriberHandle) -> Option<&mut Subscriber> {
        self.entries.get_mut(&handle)
    }

    /// Find the subscription a peer holds with exactly this pattern.
    pub fn find(&self, peer: PeerId, pattern: &TuplePattern) -> Option<SubscriberHandle> {
        self.entries
            .values()
            .find(|s| s.peer == peer && s.pattern == *pattern)
            .map(|s| s.handle)
    }

    /// Iterate every subscription.
    pub fn iter(&self) -> impl Iterator<Item = &Subscriber> {
        self.entries.values()
    }

    /// Remote peers whose subscriptions match `tuple`, deduplicated,
    /// excluding `exclude`.
    pub fn peers_wanting(&self, tuple: &Tuple, exclude: PeerId) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .entries
            .values()
            .filter(|s| s.peer != exclude && s.pattern.matches(tuple))
            .map(|s| s.peer)
            .collect();
        peers.sort();
        peers.dedup();
        peers
    }

    /// Does any registered subscription overlap the given pattern?
    pub fn has_overlapping(&self, pattern: &TuplePattern) -> bool {
        self.entries.values().any(|s| s.pattern.overlaps(pattern))
    }

    /// Drop every subscription held by `peer`, returning the records.
    pub fn remove_peer(&mut self, peer: PeerId) -> Vec<Subscriber> {
        let handles: Vec<SubscriberHandle> = self
            .entries
            .values()
            .filter(|s| s.peer == peer)
            .map(|s| s.handle)
            .collect();
        handles
            .into_iter()
            .filter_map(|h| self.entries.remove(&h))
            .collect()
    }

    /// Drop remote subscriptions whose deadline passed, returning them.
    pub fn prune_expired(&mut self, now: TimeVal) -> Vec<Subscriber> {
        let handles: Vec<SubscriberHandle> = self
            .entries
            .values()
            .filter(|s| matches!(s.expires, Some(deadline) if deadline <= now))
            .map(|s| s.handle)
            .collect();
        handles
            .into_iter()
            .filter_map(|h| self.entries.remove(&h))
            .collect()
    }

    /// Mark a peer as having been sent all local subscriptions.
    pub fn mark_given(&mut self, peer: PeerId) {
        self.given.insert(peer);
    }

    /// Forget the mark, forcing a resend on the next manage tick.
    pub fn clear_given(&mut self, peer: PeerId) {
        self.given.remove(&peer);
    }

    /// Has the peer been given all local subscriptions?
    pub fn is_given(&self, peer: PeerId) -> bool {
        self.given.contains(&peer)
    }
}
