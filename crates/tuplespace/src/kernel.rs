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

//! The tuplespace kernel.
//!
//! ## Purpose
//! [`Kernel`] ties the components together: the local store, the expiry
//! queue, subscriptions, callbacks and the retry queue all live under one
//! exclusive lock, and every public operation is a short critical section
//! over that state.
//!
//! ## Concurrency
//! No await point ever runs with the lock held. Mutating operations
//! collect their side effects while locked: outbound frames go into an
//! outbox and matching callbacks into a batch, both processed after the
//! guard is dropped. A callback may therefore freely call back into the
//! kernel. Blocking variants wait on a [`Notify`] that is signalled after
//! every mutation.
//!
//! ## Driving the kernel
//! [`Kernel::spawn_worker`] starts the task that dispatches inbound
//! messages and runs the periodic sweeps. The individual steps
//! ([`Kernel::handle_inbound`], [`Kernel::run_manage_tick`],
//! [`Kernel::run_expiry_sweep`]) are public so embedders and tests can
//! drive them deterministically instead.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use peerspace_transport::{InboundMessage, PeerId, Port, Transport};

use crate::callbacks::{CallbackDispatcher, CallbackHandle, CallbackKind, TupleCallback};
use crate::config::KernelConfig;
use crate::error::TupleError;
use crate::expiry::ExpiryQueue;
use crate::key::{KeyPattern, TupleKey};
use crate::listing::{self, SubscriberEntry, ALL_KEYS_KEY, SUBSCRIBERS_KEY};
use crate::meta::{MetaReference, META_MIMETYPE};
use crate::results::TupleResults;
use crate::retry::{PendingPush, RetryManager};
use crate::store::{TupleId, TupleStore};
use crate::subscribers::{MetaLinks, SubscriberHandle, SubscriptionRegistry};
use crate::tuple::{Encoding, TimeVal, Tuple, TupleAddress, TuplePattern};
use crate::wire;

/// Read-state filter for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Return the tuple whether or not it has been read before.
    Any,
    /// Only return a tuple not yet read by this application.
    FreshOnly,
}

enum FailAction {
    Ignore,
    /// Queue the push for retry and force a full resubscription exchange
    /// with the destination.
    RetryPush { address: TupleAddress, seqno: u32 },
    /// Requeue an already-budgeted retry entry.
    Requeue(PendingPush),
    /// Destination must be resent all our subscriptions.
    MarkNotGiven,
}

struct OutboundFrame {
    dest: PeerId,
    port: Port,
    payload: Vec<u8>,
    on_fail: FailAction,
}

type CallbackBatch = Vec<(TupleCallback, Tuple)>;

struct KernelState {
    store: TupleStore,
    expiry: ExpiryQueue,
    subscriptions: SubscriptionRegistry,
    callbacks: CallbackDispatcher,
    retries: RetryManager,
    known_peers: BTreeSet<PeerId>,
    outbox: Vec<OutboundFrame>,
    default_user_time: Option<TimeVal>,
    last_error: Option<TupleError>,
    manage_ticks: u64,
    last_subscriber_listing: String,
}

struct Shared {
    config: KernelConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<KernelState>,
    changed: Notify,
}

/// A tuplespace kernel instance.
///
/// Cheap to clone; all clones share the same state. Any number of kernels
/// can coexist in one process, each with its own peer id and transport.
#[derive(Clone)]
pub struct Kernel {
    shared: Arc<Shared>,
}

impl Kernel {
    /// Create a kernel over the given transport.
    pub fn new(config: KernelConfig, transport: Arc<dyn Transport>) -> Kernel {
        Kernel {
            shared: Arc::new(Shared {
                config,
                transport,
                state: Mutex::new(KernelState {
                    store: TupleStore::new(),
                    expiry: ExpiryQueue::new(),
                    subscriptions: SubscriptionRegistry::new(),
                    callbacks: CallbackDispatcher::new(),
                    retries: RetryManager::new(),
                    known_peers: BTreeSet::new(),
                    outbox: Vec::new(),
                    default_user_time: None,
                    last_error: None,
                    manage_ticks: 0,
                    last_subscriber_listing: String::new(),
                }),
                changed: Notify::new(),
            }),
        }
    }

    /// This kernel's peer id.
    pub fn peer_id(&self) -> PeerId {
        PeerId(self.shared.config.peer_id)
    }

    /// Start the worker task: inbound dispatch plus the periodic manage
    /// tick and expiry sweep.
    pub fn spawn_worker(
        &self,
        mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    ) -> tokio::task::JoinHandle<()> {
        let kernel = self.clone();
        tokio::spawn(async move {
            let mut manage = tokio::time::interval(kernel.shared.config.manage_interval);
            let mut sweep = tokio::time::interval(kernel.shared.config.expiry_interval);
            manage.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    msg = inbound.recv() => match msg {
                        Some(msg) => kernel.handle_inbound(msg).await,
                        None => break,
                    },
                    _ = manage.tick() => kernel.run_manage_tick().await,
                    _ = sweep.tick() => kernel.run_expiry_sweep().await,
                }
            }
        })
    }

    // ---- writes ----------------------------------------------------------

    /// Write a tuple into the space.
    ///
    /// Owned tuples are committed locally and pushed to subscribers;
    /// tuples owned by another peer are forwarded to their owner.
    pub async fn insert_tuple(&self, mut tuple: Tuple) -> Result<(), TupleError> {
        self.check_capacity(&tuple)?;
        let mut batch = CallbackBatch::new();
        let result = {
            let mut st = self.shared.state.lock();
            if tuple.user_time.is_never() {
                if let Some(user_time) = st.default_user_time {
                    tuple.user_time = user_time;
                }
            }
            if tuple.owner == self.peer_id() {
                tuple.write_time = TimeVal::now();
                self.insert_local(&mut st, tuple, &mut batch)
            } else {
                let dest = tuple.owner;
                let payload = wire::encode_push(&tuple);
                st.outbox.push(OutboundFrame {
                    dest,
                    port: Port::SetRemoteTuple,
                    payload,
                    on_fail: FailAction::Ignore,
                });
                Ok(())
            }
        };
        self.record_error(&result);
        self.finish(batch).await;
        result
    }

    /// Write a self-owned tuple.
    pub async fn set_tuple(
        &self,
        key: &str,
        data: Vec<u8>,
        mimetype: &str,
        encoding: Encoding,
    ) -> Result<(), TupleError> {
        let key = self.checked_key(key)?;
        self.insert_tuple(Tuple::new(self.peer_id(), key, data, mimetype, encoding))
            .await
    }

    /// Write a self-owned text tuple.
    pub async fn set_string_tuple(&self, key: &str, value: &str) -> Result<(), TupleError> {
        self.set_tuple(key, value.as_bytes().to_vec(), "text/plain", Encoding::Text)
            .await
    }

    /// Ask another peer to adopt a tuple in its namespace.
    pub async fn set_remote_tuple(
        &self,
        owner: PeerId,
        key: &str,
        data: Vec<u8>,
        mimetype: &str,
        encoding: Encoding,
    ) -> Result<(), TupleError> {
        let key = self.checked_key(key)?;
        let mut tuple = Tuple::new(owner, key, data, mimetype, encoding);
        tuple.creator = self.peer_id();
        self.insert_tuple(tuple).await
    }

    /// Like [`Kernel::set_remote_tuple`] but waits for the fabric to
    /// accept the message, reporting delivery failure to the caller.
    pub async fn set_remote_tuple_blocking(
        &self,
        owner: PeerId,
        key: &str,
        data: Vec<u8>,
        mimetype: &str,
        encoding: Encoding,
    ) -> Result<(), TupleError> {
        let key = self.checked_key(key)?;
        let mut tuple = Tuple::new(owner, key, data, mimetype, encoding);
        tuple.creator = self.peer_id();
        if owner == self.peer_id() {
            return self.insert_tuple(tuple).await;
        }
        self.check_capacity(&tuple)?;
        let payload = wire::encode_push(&tuple);
        let result = self
            .shared
            .transport
            .send(owner, Port::SetRemoteTuple, payload)
            .await
            .map_err(TupleError::from);
        self.record_error(&result);
        result
    }

    /// Write a self-owned text tuple only if the key is absent.
    pub async fn set_default_tuple(&self, key: &str, value: &str) -> Result<(), TupleError> {
        if self.tuple_exists(key)? {
            return Ok(());
        }
        self.set_string_tuple(key, value).await
    }

    /// Like [`Kernel::set_default_tuple`], and additionally publish a
    /// sibling meta tuple (leaf prefixed `mi-`) pointing at the key, so
    /// other components can retarget the reference later.
    pub async fn set_default_meta_tuple(&self, key: &str, value: &str) -> Result<(), TupleError> {
        self.set_default_tuple(key, value).await?;
        let parsed = TupleKey::parse(key)?;
        let meta_key = match parsed.as_str().rfind('.') {
            Some(dot) => format!("{}.mi-{}", &parsed.as_str()[..dot], parsed.leaf()),
            None => format!("mi-{}", parsed.as_str()),
        };
        if self.tuple_exists(&meta_key)? {
            return Ok(());
        }
        self.set_meta_tuple(self.peer_id(), &meta_key, Some((self.peer_id(), key)))
            .await
    }

    /// Delete a tuple by writing a tombstone that expires immediately.
    pub async fn delete_tuple(&self, owner: PeerId, key: &str) -> Result<(), TupleError> {
        let key = self.checked_key(key)?;
        let mut tuple = Tuple::new(owner, key, Vec::new(), "text/plain", Encoding::Text);
        tuple.creator = self.peer_id();
        tuple.expire_time = TimeVal::EXPIRE_NOW;
        self.insert_tuple(tuple).await
    }

    /// Default user timestamp stamped on subsequently written tuples that
    /// carry none.
    pub fn set_user_time(&self, user_time: Option<TimeVal>) {
        self.shared.state.lock().default_user_time = user_time;
    }

    // ---- reads -----------------------------------------------------------

    /// Fetch the tuple at (owner, key) from the local store.
    ///
    /// Reading consumes the tuple's unread flag. With
    /// [`Freshness::FreshOnly`] an already-read tuple comes back as
    /// [`TupleError::NotFound`]. The returned snapshot reflects the state
    /// before the read.
    pub fn get_tuple(
        &self,
        owner: PeerId,
        key: &str,
        fresh: Freshness,
    ) -> Result<Tuple, TupleError> {
        let key = TupleKey::parse(key)?;
        let mut st = self.shared.state.lock();
        let address = TupleAddress { owner, key };
        let id = st.store.lookup(&address).ok_or(TupleError::NotFound)?;
        let now = TimeVal::now();
        let tuple = st.store.get_mut(id).ok_or(TupleError::NotFound)?;
        if tuple.is_expired_at(now) {
            return Err(TupleError::NotFound);
        }
        if fresh == Freshness::FreshOnly && !tuple.is_new {
            return Err(TupleError::NotFound);
        }
        let snapshot = tuple.clone();
        tuple.is_new = false;
        Ok(snapshot)
    }

    /// Like [`Kernel::get_tuple`] but waits until a matching tuple (a
    /// fresh one under [`Freshness::FreshOnly`]) exists.
    pub async fn get_tuple_blocking(
        &self,
        owner: PeerId,
        key: &str,
        fresh: Freshness,
    ) -> Result<Tuple, TupleError> {
        TupleKey::parse(key)?;
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.get_tuple(owner, key, fresh) {
                Err(TupleError::NotFound) => {}
                other => return other,
            }
            notified.await;
        }
    }

    /// Append every tuple matching `pattern` to `results`, marking them
    /// read. Returns how many were added.
    pub fn get_tuples(&self, pattern: &TuplePattern, results: &mut TupleResults) -> usize {
        let mut st = self.shared.state.lock();
        let now = TimeVal::now();
        let ids = st.store.matching(pattern, now);
        let mut added = 0;
        for id in ids {
            if let Some(tuple) = st.store.get_mut(id) {
                results.push(tuple.clone());
                tuple.is_new = false;
                added += 1;
            }
        }
        added
    }

    /// Is there a live self-owned tuple under `key`?
    pub fn tuple_exists(&self, key: &str) -> Result<bool, TupleError> {
        let key = TupleKey::parse(key)?;
        let st = self.shared.state.lock();
        let address = TupleAddress {
            owner: self.peer_id(),
            key,
        };
        let now = TimeVal::now();
        Ok(st
            .store
            .lookup(&address)
            .and_then(|id| st.store.get(id))
            .is_some_and(|t| !t.is_expired_at(now)))
    }

    /// Wait until any peer publishes a tuple under `key` and return that
    /// peer.
    pub async fn find_owner(&self, key: &str) -> Result<PeerId, TupleError> {
        let key = TupleKey::parse(key)?;
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let st = self.shared.state.lock();
                let now = TimeVal::now();
                let found = st
                    .store
                    .iter()
                    .find(|(_, t)| !t.is_expired_at(now) && t.key.eq_ignore_case(&key))
                    .map(|(_, tuple)| tuple.owner);
                if let Some(owner) = found {
                    return Ok(owner);
                }
            }
            notified.await;
        }
    }

    /// Most recent error recorded by a fire-and-forget operation.
    pub fn last_error(&self) -> Option<TupleError> {
        self.shared.state.lock().last_error.clone()
    }

    // ---- subscriptions and callbacks ------------------------------------

    /// Subscribe to tuples under `key` (a pattern) owned by `owner`, or
    /// by anyone when `owner` is `None`.
    pub async fn subscribe(
        &self,
        owner: Option<PeerId>,
        key: &str,
    ) -> Result<SubscriberHandle, TupleError> {
        self.subscribe_pattern(TuplePattern::parse(owner, key)?).await
    }

    /// Subscribe with a full tuple pattern.
    pub async fn subscribe_pattern(
        &self,
        pattern: TuplePattern,
    ) -> Result<SubscriberHandle, TupleError> {
        let handle = {
            let mut st = self.shared.state.lock();
            let (handle, _created) = st.subscriptions.insert(self.peer_id(), pattern.clone(), None);
            self.queue_subscribe_frames(&mut st, &pattern, true);
            handle
        };
        self.finish(CallbackBatch::new()).await;
        Ok(handle)
    }

    /// Withdraw a subscription, notifying remote owners.
    pub async fn unsubscribe(&self, handle: SubscriberHandle) -> Result<(), TupleError> {
        let result = {
            let mut st = self.shared.state.lock();
            self.remove_subscription(&mut st, handle, true)
        };
        self.record_error(&result);
        self.finish(CallbackBatch::new()).await;
        result
    }

    /// Resend a subscription with the force flag, making the owner
    /// re-push all currently matching tuples.
    pub async fn reload_subscription(&self, handle: SubscriberHandle) -> Result<(), TupleError> {
        let result = {
            let mut st = self.shared.state.lock();
            match st.subscriptions.get(handle) {
                Some(sub) if sub.peer == self.peer_id() => {
                    let pattern = sub.pattern.clone();
                    self.queue_subscribe_frames(&mut st, &pattern, true);
                    Ok(())
                }
                _ => Err(TupleError::HandleNotFound),
            }
        };
        self.finish(CallbackBatch::new()).await;
        result
    }

    /// Does any registered subscription overlap `pattern`?
    pub fn has_subscriber(&self, pattern: &TuplePattern) -> bool {
        self.shared.state.lock().subscriptions.has_overlapping(pattern)
    }

    /// Run `func` whenever a tuple matching `pattern` sees the given
    /// mutation. The closure runs with no kernel lock held.
    pub fn register_callback(
        &self,
        pattern: TuplePattern,
        kind: CallbackKind,
        func: impl Fn(&Tuple) + Send + Sync + 'static,
    ) -> CallbackHandle {
        self.shared
            .state
            .lock()
            .callbacks
            .register(pattern, kind, Arc::new(func))
    }

    /// Remove a callback registration.
    pub fn unregister_callback(&self, handle: CallbackHandle) -> Result<(), TupleError> {
        self.shared.state.lock().callbacks.unregister(handle)
    }

    // ---- appends ---------------------------------------------------------

    /// Append `diff` to every tuple matching (owner, key).
    ///
    /// Matching tuples owned by this kernel grow in place and the diff is
    /// pushed to their subscribers; matching tuples owned elsewhere cause
    /// an append request to their owner. Only locally known tuples are
    /// considered, so appending to a remote tuple requires a subscription
    /// to it.
    pub async fn append_tuple(
        &self,
        owner: Option<PeerId>,
        key: &str,
        diff: &[u8],
    ) -> Result<(), TupleError> {
        let pattern = self.checked_pattern(owner, key)?;
        let mut batch = CallbackBatch::new();
        let result = {
            let mut st = self.shared.state.lock();
            let now = TimeVal::now();
            let ids = st.store.matching(&pattern, now);
            if ids.is_empty() {
                Err(TupleError::NotFound)
            } else {
                for id in ids {
                    let (tuple_owner, tuple_key, tuple_seqno) = match st.store.get(id) {
                        Some(tuple) => (tuple.owner, tuple.key.clone(), tuple.seqno),
                        None => continue,
                    };
                    if tuple_owner == self.peer_id() {
                        self.apply_local_append(&mut st, id, diff, &mut batch);
                    } else {
                        let mut header =
                            TuplePattern::for_key(Some(tuple_owner), KeyPattern::exact(&tuple_key));
                        header.seqno = Some(tuple_seqno);
                        st.outbox.push(OutboundFrame {
                            dest: tuple_owner,
                            port: Port::SetAppend,
                            payload: wire::encode_append(&header, diff),
                            on_fail: FailAction::Ignore,
                        });
                    }
                }
                Ok(())
            }
        };
        self.record_error(&result);
        self.finish(batch).await;
        result
    }

    // ---- meta tuples -----------------------------------------------------

    /// Publish an unresolved meta tuple under `meta_key` unless it
    /// already exists.
    pub async fn declare_meta_tuple(&self, meta_key: &str) -> Result<(), TupleError> {
        if self.tuple_exists(meta_key)? {
            return Ok(());
        }
        self.set_meta_tuple(self.peer_id(), meta_key, None).await
    }

    /// Point the meta tuple at (owner, key), or mark it unresolved with
    /// `None`. Works on meta tuples owned by other peers too.
    pub async fn set_meta_tuple(
        &self,
        meta_owner: PeerId,
        meta_key: &str,
        target: Option<(PeerId, &str)>,
    ) -> Result<(), TupleError> {
        let reference = match target {
            Some((owner, key)) => MetaReference::to(owner, TupleKey::parse(key)?),
            None => MetaReference::unresolved(),
        };
        let key = TupleKey::parse(meta_key)?;
        let mut tuple = Tuple::new(
            meta_owner,
            key,
            reference.to_text().into_bytes(),
            META_MIMETYPE,
            Encoding::Text,
        );
        tuple.creator = self.peer_id();
        self.insert_tuple(tuple).await
    }

    /// Is the tuple at (owner, key) a meta tuple?
    pub fn is_meta_tuple(&self, owner: PeerId, key: &str) -> bool {
        matches!(
            self.peek_tuple(owner, key),
            Some(t) if t.mimetype.eq_ignore_ascii_case(META_MIMETYPE)
        )
    }

    /// Resolve the meta tuple at (meta_owner, meta_key) and fetch the
    /// tuple it references.
    ///
    /// The caller's freshness flag applies to the referenced tuple,
    /// except right after a retarget: while the meta tuple itself is
    /// unread, any current value of the new target is accepted.
    pub fn get_tuple_indirectly(
        &self,
        meta_owner: PeerId,
        meta_key: &str,
        fresh: Freshness,
    ) -> Result<Tuple, TupleError> {
        let meta = self.get_tuple(meta_owner, meta_key, Freshness::Any)?;
        let text = meta.data_str().ok_or(TupleError::InvalidMeta)?;
        let target = MetaReference::parse(text)?.target.ok_or(TupleError::InvalidMeta)?;
        let effective = if meta.is_new { Freshness::Any } else { fresh };
        self.get_tuple(target.owner, target.key.as_str(), effective)
    }

    /// Resolve the meta tuple and write through it to the referenced
    /// tuple.
    pub async fn set_tuple_indirectly(
        &self,
        meta_owner: PeerId,
        meta_key: &str,
        data: Vec<u8>,
        mimetype: &str,
        encoding: Encoding,
    ) -> Result<(), TupleError> {
        let target = {
            let meta = self
                .peek_tuple(meta_owner, meta_key)
                .ok_or(TupleError::NotFound)?;
            let text = meta.data_str().ok_or(TupleError::InvalidMeta)?;
            MetaReference::parse(text)?.target.ok_or(TupleError::InvalidMeta)?
        };
        let mut tuple = Tuple::new(target.owner, target.key, data, mimetype, encoding);
        tuple.creator = self.peer_id();
        self.insert_tuple(tuple).await
    }

    /// Subscribe through a meta tuple: follow its reference and keep the
    /// subscription retargeted as the reference changes.
    ///
    /// Unsubscribing the returned handle tears down the retargeting
    /// callback and the current inner subscription.
    pub async fn subscribe_indirectly(
        &self,
        meta_owner: PeerId,
        meta_key: &str,
    ) -> Result<SubscriberHandle, TupleError> {
        let pattern = TuplePattern::parse(Some(meta_owner), meta_key)?;
        let handle = self.subscribe_pattern(pattern.clone()).await?;

        // Weak capture: the callback lives inside the kernel state, so a
        // strong handle here would keep the kernel alive forever.
        let weak = Arc::downgrade(&self.shared);
        let callback = self.register_callback(pattern, CallbackKind::Changed, move |meta| {
            if let Some(shared) = weak.upgrade() {
                Kernel { shared }.retarget_meta(handle, meta);
            }
        });
        {
            let mut st = self.shared.state.lock();
            if let Some(sub) = st.subscriptions.get_mut(handle) {
                sub.meta = Some(MetaLinks {
                    callback,
                    target: None,
                });
            }
        }

        // The meta tuple may already be known; resolve it right away.
        if let Some(meta) = self.peek_tuple(meta_owner, meta_key) {
            self.retarget_meta(handle, &meta);
        }
        self.finish(CallbackBatch::new()).await;
        Ok(handle)
    }

    // ---- peer lifecycle --------------------------------------------------

    /// A peer became reachable; the next manage tick sends it our
    /// subscriptions.
    pub fn peer_joined(&self, peer: PeerId) {
        if peer != self.peer_id() {
            self.shared.state.lock().known_peers.insert(peer);
        }
    }

    /// A peer disappeared: its tuples expire immediately, its
    /// subscriptions are dropped without notification, and queued traffic
    /// to it is discarded.
    pub fn peer_lost(&self, peer: PeerId) {
        let mut st = self.shared.state.lock();
        st.known_peers.remove(&peer);
        let dropped = st.subscriptions.remove_peer(peer);
        if !dropped.is_empty() {
            debug!(%peer, count = dropped.len(), "dropped subscriptions of lost peer");
        }
        st.subscriptions.clear_given(peer);
        st.retries.remove_dest(peer);

        let ids: Vec<_> = st
            .store
            .iter()
            .filter(|(_, t)| t.owner == peer)
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            let old = match st.store.get(id) {
                Some(t) => t.expire_time,
                None => continue,
            };
            if let Some(tuple) = st.store.get_mut(id) {
                tuple.expire_time = TimeVal::EXPIRE_NOW;
            }
            st.expiry.rethread(old, TimeVal::EXPIRE_NOW, id);
        }
    }

    // ---- worker steps ----------------------------------------------------

    /// Dispatch one inbound message. Malformed or inconsistent frames are
    /// logged and dropped.
    pub async fn handle_inbound(&self, msg: InboundMessage) {
        let mut batch = CallbackBatch::new();
        {
            let mut st = self.shared.state.lock();
            if msg.sender != self.peer_id() {
                st.known_peers.insert(msg.sender);
            }
            match msg.port {
                Port::Subscribe => self.hook_subscribe(&mut st, msg.sender, &msg.payload),
                Port::Unsubscribe => self.hook_unsubscribe(&mut st, msg.sender, &msg.payload),
                Port::PushTuple => self.hook_push(&mut st, msg.sender, &msg.payload, &mut batch),
                Port::SetRemoteTuple => {
                    self.hook_set_remote(&mut st, msg.sender, &msg.payload, &mut batch)
                }
                Port::PushAppend => {
                    self.hook_push_append(&mut st, msg.sender, &msg.payload, &mut batch)
                }
                Port::SetAppend => {
                    self.hook_set_append(&mut st, msg.sender, &msg.payload, &mut batch)
                }
            }
        }
        self.finish(batch).await;
    }

    /// One manage tick: resubscribe peers that lost our subscriptions,
    /// republish the subscriber listing when it changed, and every n-th
    /// tick run a retry pass over failed pushes.
    pub async fn run_manage_tick(&self) {
        let mut batch = CallbackBatch::new();
        {
            let mut st = self.shared.state.lock();
            st.manage_ticks += 1;

            let peers: Vec<PeerId> = st
                .known_peers
                .iter()
                .copied()
                .filter(|p| !st.subscriptions.is_given(*p))
                .collect();
            for peer in peers {
                st.subscriptions.mark_given(peer);
                let patterns: Vec<TuplePattern> = st
                    .subscriptions
                    .iter()
                    .filter(|s| {
                        s.peer == self.peer_id()
                            && (s.pattern.owner.is_none() || s.pattern.owner == Some(peer))
                    })
                    .map(|s| s.pattern.clone())
                    .collect();
                for pattern in patterns {
                    st.outbox.push(OutboundFrame {
                        dest: peer,
                        port: Port::Subscribe,
                        payload: wire::encode_subscribe(false, &pattern),
                        on_fail: FailAction::MarkNotGiven,
                    });
                }
            }

            self.republish_subscriber_listing(&mut st, &mut batch);

            if st.manage_ticks % self.shared.config.retry_every_nth_tick.max(1) == 0 {
                for entry in st.retries.begin_pass() {
                    let current = st
                        .store
                        .lookup(&entry.address)
                        .and_then(|id| st.store.get(id));
                    match current {
                        Some(tuple) if tuple.seqno == entry.seqno => {
                            let payload = wire::encode_push(tuple);
                            let dest = entry.dest;
                            st.outbox.push(OutboundFrame {
                                dest,
                                port: Port::PushTuple,
                                payload,
                                on_fail: FailAction::Requeue(entry),
                            });
                        }
                        _ => {
                            debug!(address = %entry.address, dest = %entry.dest,
                                "dropping queued push, tuple gone or superseded");
                        }
                    }
                }
            }
        }
        self.finish(batch).await;
    }

    /// One expiry sweep: remove every tuple past its deadline, fire
    /// deletion callbacks, and prune lapsed remote subscriptions.
    pub async fn run_expiry_sweep(&self) {
        let mut batch = CallbackBatch::new();
        {
            let mut st = self.shared.state.lock();
            let now = TimeVal::now();
            let mut owned_removed = false;
            for id in st.expiry.drain_due(now) {
                if !st.store.get(id).is_some_and(|t| t.is_expired_at(now)) {
                    continue;
                }
                if let Some(tuple) = st.store.remove(id) {
                    debug!(tuple = %tuple, "expired");
                    owned_removed |= tuple.owner == self.peer_id();
                    for func in st.callbacks.matching(&tuple, CallbackKind::Deleted) {
                        batch.push((func, tuple.clone()));
                    }
                }
            }
            if owned_removed {
                self.regenerate_all_keys(&mut st, &mut batch);
            }
            st.subscriptions.prune_expired(now);
        }
        self.finish(batch).await;
    }

    // ---- internals -------------------------------------------------------

    fn record_error<T>(&self, result: &Result<T, TupleError>) {
        if let Err(err) = result {
            self.shared.state.lock().last_error = Some(err.clone());
        }
    }

    /// Key validation for the write wrappers; failures land in
    /// `last_error` like every other write failure.
    fn checked_key(&self, key: &str) -> Result<TupleKey, TupleError> {
        let parsed = TupleKey::parse(key);
        self.record_error(&parsed);
        parsed
    }

    fn checked_pattern(
        &self,
        owner: Option<PeerId>,
        key: &str,
    ) -> Result<TuplePattern, TupleError> {
        let parsed = TuplePattern::parse(owner, key);
        self.record_error(&parsed);
        parsed
    }

    /// Reject payloads too large for a wire frame before they enter the
    /// space.
    fn check_capacity(&self, tuple: &Tuple) -> Result<(), TupleError> {
        let result = if tuple.data.len() > wire::MAX_DATA_LENGTH
            || tuple.mimetype.len() > wire::MAX_MIMETYPE_LENGTH
        {
            Err(TupleError::OutOfMemory)
        } else {
            Ok(())
        };
        self.record_error(&result);
        result
    }

    /// Read a tuple without consuming its unread flag.
    fn peek_tuple(&self, owner: PeerId, key: &str) -> Option<Tuple> {
        let key = TupleKey::parse(key).ok()?;
        let st = self.shared.state.lock();
        let address = TupleAddress { owner, key };
        let now = TimeVal::now();
        st.store
            .lookup(&address)
            .and_then(|id| st.store.get(id))
            .filter(|t| !t.is_expired_at(now))
            .cloned()
    }

    /// Commit a tuple into the local store, collecting side effects:
    /// pushes to subscribers (owned tuples only), matching change
    /// callbacks, expiry re-threading and all-keys regeneration.
    fn insert_local(
        &self,
        st: &mut KernelState,
        tuple: Tuple,
        batch: &mut CallbackBatch,
    ) -> Result<(), TupleError> {
        let up = st.store.upsert(tuple)?;
        let stored = st.store.get(up.id).cloned().ok_or(TupleError::NotFound)?;
        st.expiry.rethread(up.old_expire, stored.expire_time, up.id);

        if stored.owner == self.peer_id() {
            let peers = st.subscriptions.peers_wanting(&stored, self.peer_id());
            if !peers.is_empty() {
                let payload = wire::encode_push(&stored);
                for peer in peers {
                    st.outbox.push(OutboundFrame {
                        dest: peer,
                        port: Port::PushTuple,
                        payload: payload.clone(),
                        on_fail: FailAction::RetryPush {
                            address: stored.address(),
                            seqno: stored.seqno,
                        },
                    });
                }
            }
        }

        for func in st.callbacks.matching(&stored, CallbackKind::Changed) {
            batch.push((func, stored.clone()));
        }

        if stored.owner == self.peer_id() && up.created && stored.key.as_str() != ALL_KEYS_KEY {
            self.regenerate_all_keys(st, batch);
        }
        Ok(())
    }

    fn regenerate_all_keys(&self, st: &mut KernelState, batch: &mut CallbackBatch) {
        let now = TimeVal::now();
        let mut keys: Vec<TupleKey> = st
            .store
            .iter()
            .filter(|(_, t)| t.owner == self.peer_id() && !t.is_expired_at(now))
            .map(|(_, t)| t.key.clone())
            .collect();
        keys.sort();
        let text = listing::encode_key_listing(keys.iter());
        let key = match TupleKey::parse(ALL_KEYS_KEY) {
            Ok(key) => key,
            Err(_) => return,
        };
        let mut tuple = Tuple::text(self.peer_id(), key, &text);
        tuple.write_time = now;
        if let Err(err) = self.insert_local(st, tuple, batch) {
            warn!(%err, "failed to republish key listing");
        }
    }

    fn republish_subscriber_listing(&self, st: &mut KernelState, batch: &mut CallbackBatch) {
        let mut entries: Vec<SubscriberEntry> = st
            .subscriptions
            .iter()
            .map(|s| SubscriberEntry {
                peer: s.peer,
                pattern: format!(
                    "{}.{}",
                    s.pattern.owner.map_or("*".to_string(), |p| p.to_string()),
                    if s.pattern.key.is_any() {
                        "*".to_string()
                    } else {
                        s.pattern.key.to_wire_string()
                    }
                ),
            })
            .collect();
        entries.sort_by(|a, b| (a.peer, &a.pattern).cmp(&(b.peer, &b.pattern)));
        let text = listing::encode_subscriber_listing(&entries);
        if text == st.last_subscriber_listing {
            return;
        }
        st.last_subscriber_listing = text.clone();
        let key = match TupleKey::parse(SUBSCRIBERS_KEY) {
            Ok(key) => key,
            Err(_) => return,
        };
        let mut tuple = Tuple::text(self.peer_id(), key, &text);
        tuple.write_time = TimeVal::now();
        if let Err(err) = self.insert_local(st, tuple, batch) {
            warn!(%err, "failed to republish subscriber listing");
        }
    }

    fn queue_subscribe_frames(&self, st: &mut KernelState, pattern: &TuplePattern, force: bool) {
        let payload = wire::encode_subscribe(force, pattern);
        let dests: Vec<PeerId> = match pattern.owner {
            Some(owner) if owner != self.peer_id() => vec![owner],
            Some(_) => Vec::new(),
            None => st.known_peers.iter().copied().collect(),
        };
        for dest in dests {
            st.outbox.push(OutboundFrame {
                dest,
                port: Port::Subscribe,
                payload: payload.clone(),
                on_fail: FailAction::MarkNotGiven,
            });
        }
    }

    fn queue_unsubscribe_frames(&self, st: &mut KernelState, pattern: &TuplePattern) {
        let payload = wire::encode_unsubscribe(pattern);
        let dests: Vec<PeerId> = match pattern.owner {
            Some(owner) if owner != self.peer_id() => vec![owner],
            Some(_) => Vec::new(),
            None => st.known_peers.iter().copied().collect(),
        };
        for dest in dests {
            st.outbox.push(OutboundFrame {
                dest,
                port: Port::Unsubscribe,
                payload: payload.clone(),
                on_fail: FailAction::Ignore,
            });
        }
    }

    fn remove_subscription(
        &self,
        st: &mut KernelState,
        handle: SubscriberHandle,
        propagate: bool,
    ) -> Result<(), TupleError> {
        let sub = st
            .subscriptions
            .remove(handle)
            .ok_or(TupleError::HandleNotFound)?;
        if let Some(meta) = sub.meta {
            let _ = st.callbacks.unregister(meta.callback);
            if let Some(inner) = meta.target {
                let _ = self.remove_subscription(st, inner, propagate);
            }
        }
        if propagate && sub.peer == self.peer_id() {
            self.queue_unsubscribe_frames(st, &sub.pattern);
        }
        Ok(())
    }

    /// Retarget an indirect subscription after its meta tuple changed:
    /// drop the old inner subscription and subscribe to the new target.
    /// Runs from callback context, so no kernel lock is held on entry.
    fn retarget_meta(&self, handle: SubscriberHandle, meta_tuple: &Tuple) {
        let reference = meta_tuple
            .data_str()
            .ok_or(TupleError::InvalidMeta)
            .and_then(MetaReference::parse);
        let reference = match reference {
            Ok(reference) => reference,
            Err(err) => {
                warn!(tuple = %meta_tuple, %err, "meta tuple data does not parse");
                return;
            }
        };

        let mut st = self.shared.state.lock();
        let old_target = match st.subscriptions.get(handle).and_then(|s| s.meta) {
            Some(links) => links.target,
            None => return,
        };
        if let Some(old) = old_target {
            let _ = self.remove_subscription(&mut st, old, true);
        }
        let new_target = reference.target.map(|address| {
            let pattern =
                TuplePattern::for_key(Some(address.owner), KeyPattern::exact(&address.key));
            let (inner, _created) = st.subscriptions.insert(self.peer_id(), pattern.clone(), None);
            self.queue_subscribe_frames(&mut st, &pattern, true);
            inner
        });
        if let Some(sub) = st.subscriptions.get_mut(handle) {
            if let Some(links) = &mut sub.meta {
                links.target = new_target;
            }
        }
    }

    fn apply_local_append(
        &self,
        st: &mut KernelState,
        id: TupleId,
        diff: &[u8],
        batch: &mut CallbackBatch,
    ) {
        let stored = match st.store.get_mut(id) {
            Some(tuple) => {
                tuple.data.extend_from_slice(diff);
                tuple.append_seqno += 1;
                tuple.is_new = true;
                tuple.clone()
            }
            None => return,
        };
        if stored.owner == self.peer_id() {
            let mut header =
                TuplePattern::for_key(Some(stored.owner), KeyPattern::exact(&stored.key));
            header.seqno = Some(stored.seqno);
            header.append_seqno = Some(stored.append_seqno);
            let payload = wire::encode_append(&header, diff);
            for peer in st.subscriptions.peers_wanting(&stored, self.peer_id()) {
                st.outbox.push(OutboundFrame {
                    dest: peer,
                    port: Port::PushAppend,
                    payload: payload.clone(),
                    on_fail: FailAction::Ignore,
                });
            }
        }
        for func in st.callbacks.matching(&stored, CallbackKind::Changed) {
            batch.push((func, stored.clone()));
        }
    }

    // ---- inbound hooks ---------------------------------------------------

    fn hook_subscribe(&self, st: &mut KernelState, sender: PeerId, payload: &[u8]) {
        if sender == self.peer_id() {
            return;
        }
        let (force, pattern) = match wire::decode_subscribe(payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%sender, %err, "dropping subscribe frame");
                return;
            }
        };
        let expires = TimeVal::now().after(self.shared.config.subscription_ttl);
        let (_handle, created) = st
            .subscriptions
            .insert(sender, pattern.clone(), Some(expires));
        if !(created || force) {
            return;
        }
        // Catch-up: push every currently matching owned tuple.
        let now = TimeVal::now();
        for id in st.store.matching(&pattern, now) {
            let Some(tuple) = st.store.get(id) else { continue };
            if tuple.owner != self.peer_id() {
                continue;
            }
            let frame = OutboundFrame {
                dest: sender,
                port: Port::PushTuple,
                payload: wire::encode_push(tuple),
                on_fail: FailAction::RetryPush {
                    address: tuple.address(),
                    seqno: tuple.seqno,
                },
            };
            st.outbox.push(frame);
        }
    }

    fn hook_unsubscribe(&self, st: &mut KernelState, sender: PeerId, payload: &[u8]) {
        let pattern = match wire::decode_unsubscribe(payload) {
            Ok(pattern) => pattern,
            Err(err) => {
                warn!(%sender, %err, "dropping unsubscribe frame");
                return;
            }
        };
        if let Some(handle) = st.subscriptions.find(sender, &pattern) {
            st.subscriptions.remove(handle);
        }
    }

    fn hook_push(
        &self,
        st: &mut KernelState,
        sender: PeerId,
        payload: &[u8],
        batch: &mut CallbackBatch,
    ) {
        let tuple = match wire::decode_push(payload) {
            Ok(tuple) => tuple,
            Err(err) => {
                warn!(%sender, %err, "dropping push frame");
                return;
            }
        };
        if tuple.owner != sender {
            warn!(%sender, owner = %tuple.owner, "dropping push not sent by its owner");
            return;
        }
        match self.insert_local(st, tuple, batch) {
            Ok(()) => {}
            Err(TupleError::Stale { stored, offered }) => {
                debug!(%sender, stored, offered, "ignoring stale push");
            }
            Err(err) => warn!(%sender, %err, "failed to apply push"),
        }
    }

    fn hook_set_remote(
        &self,
        st: &mut KernelState,
        sender: PeerId,
        payload: &[u8],
        batch: &mut CallbackBatch,
    ) {
        let mut tuple = match wire::decode_push(payload) {
            Ok(tuple) => tuple,
            Err(err) => {
                warn!(%sender, %err, "dropping set-remote frame");
                return;
            }
        };
        if tuple.owner != self.peer_id() {
            warn!(%sender, owner = %tuple.owner, "dropping set-remote for a tuple we do not own");
            return;
        }
        tuple.write_time = TimeVal::now();
        match self.insert_local(st, tuple, batch) {
            Ok(()) => {}
            Err(TupleError::Stale { stored, offered }) => {
                debug!(%sender, stored, offered, "ignoring stale set-remote");
            }
            Err(err) => warn!(%sender, %err, "failed to apply set-remote"),
        }
    }

    fn hook_push_append(
        &self,
        st: &mut KernelState,
        sender: PeerId,
        payload: &[u8],
        batch: &mut CallbackBatch,
    ) {
        let (header, diff) = match wire::decode_append(payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%sender, %err, "dropping append frame");
                return;
            }
        };
        if header.owner != Some(sender) {
            warn!(%sender, "dropping append not sent by its owner");
            return;
        }
        let (Some(owner), Some(key)) = (header.owner, header.key.as_concrete()) else {
            warn!(%sender, "dropping append with abstract target");
            return;
        };
        let address = TupleAddress { owner, key };
        let Some(id) = st.store.lookup(&address) else {
            debug!(%address, "append for unknown tuple");
            return;
        };
        let (stored_seqno, stored_append) = match st.store.get(id) {
            Some(tuple) => (tuple.seqno, tuple.append_seqno),
            None => return,
        };
        if header.seqno != Some(stored_seqno) {
            debug!(%address, offered = ?header.seqno, stored_seqno, "append against other tuple version");
            return;
        }
        let Some(append_seqno) = header.append_seqno else {
            warn!(%address, "append without append counter");
            return;
        };
        if append_seqno != stored_append + 1 {
            warn!(%address, append_seqno, stored_append, "dropping out-of-order append");
            return;
        }
        if let Some(tuple) = st.store.get_mut(id) {
            tuple.data.extend_from_slice(&diff);
            tuple.append_seqno = append_seqno;
            tuple.is_new = true;
            let stored = tuple.clone();
            for func in st.callbacks.matching(&stored, CallbackKind::Changed) {
                batch.push((func, stored.clone()));
            }
        }
    }

    fn hook_set_append(
        &self,
        st: &mut KernelState,
        sender: PeerId,
        payload: &[u8],
        batch: &mut CallbackBatch,
    ) {
        let (header, diff) = match wire::decode_append(payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%sender, %err, "dropping append request");
                return;
            }
        };
        let now = TimeVal::now();
        for id in st.store.matching(&header, now) {
            let owned = st
                .store
                .get(id)
                .is_some_and(|t| t.owner == self.peer_id());
            if owned {
                self.apply_local_append(st, id, &diff, batch);
            }
        }
    }

    // ---- effect processing -----------------------------------------------

    /// Run collected callbacks, flush the outbox and wake blocked
    /// readers. Must be called with the state lock released.
    async fn finish(&self, batch: CallbackBatch) {
        for (func, tuple) in batch {
            func(&tuple);
        }
        self.flush_outbox().await;
        self.shared.changed.notify_waiters();
    }

    async fn flush_outbox(&self) {
        loop {
            let frames = {
                let mut st = self.shared.state.lock();
                std::mem::take(&mut st.outbox)
            };
            if frames.is_empty() {
                return;
            }
            for frame in frames {
                match self
                    .shared
                    .transport
                    .send(frame.dest, frame.port, frame.payload)
                    .await
                {
                    Ok(()) => {}
                    Err(err) => {
                        debug!(dest = %frame.dest, port = ?frame.port, %err, "send failed");
                        let mut st = self.shared.state.lock();
                        match frame.on_fail {
                            FailAction::Ignore => {}
                            FailAction::RetryPush { address, seqno } => {
                                st.retries.insert(
                                    address,
                                    frame.dest,
                                    seqno,
                                    self.shared.config.retry_budget,
                                );
                                st.subscriptions.clear_given(frame.dest);
                            }
                            FailAction::Requeue(entry) => st.retries.requeue(entry),
                            FailAction::MarkNotGiven => st.subscriptions.clear_given(frame.dest),
                        }
                    }
                }
            }
        }
    }
}
