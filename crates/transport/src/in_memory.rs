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

//! In-process message fabric.
//!
//! Routes frames between peers attached to the same [`InMemoryMesh`] via
//! unbounded channels. Links can be taken down per peer so tests can drive
//! the kernel's failure handling without a real network.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{InboundMessage, PeerId, Port, Transport, TransportError};

struct MeshState {
    peers: HashMap<PeerId, mpsc::UnboundedSender<InboundMessage>>,
    down: HashSet<PeerId>,
}

/// Hub connecting any number of in-process peers.
pub struct InMemoryMesh {
    state: Mutex<MeshState>,
}

impl InMemoryMesh {
    /// Create an empty mesh.
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryMesh {
            state: Mutex::new(MeshState {
                peers: HashMap::new(),
                down: HashSet::new(),
            }),
        })
    }

    /// Attach a peer and return its sending endpoint plus the stream of
    /// messages addressed to it.
    ///
    /// Attaching the same peer id twice replaces the previous receiver.
    pub fn attach(
        self: &Arc<Self>,
        peer: PeerId,
    ) -> (MeshEndpoint, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().peers.insert(peer, tx);
        (
            MeshEndpoint {
                peer,
                mesh: Arc::clone(self),
            },
            rx,
        )
    }

    /// Take a peer's link down (or bring it back up).
    ///
    /// While down, every send to or from the peer fails with
    /// [`TransportError::Unreachable`]; queued messages are unaffected.
    pub fn set_link_down(&self, peer: PeerId, down: bool) {
        let mut state = self.state.lock();
        if down {
            state.down.insert(peer);
        } else {
            state.down.remove(&peer);
        }
    }

    /// Detach a peer entirely, dropping its receiver.
    pub fn detach(&self, peer: PeerId) {
        let mut state = self.state.lock();
        state.peers.remove(&peer);
        state.down.remove(&peer);
    }

    fn route(
        &self,
        from: PeerId,
        dest: PeerId,
        port: Port,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let state = self.state.lock();
        if state.down.contains(&from) || state.down.contains(&dest) {
            return Err(TransportError::Unreachable(dest));
        }
        let tx = state
            .peers
            .get(&dest)
            .ok_or(TransportError::UnknownPeer(dest))?;
        tx.send(InboundMessage {
            port,
            sender: from,
            payload,
        })
        .map_err(|_| TransportError::Disconnected(dest))
    }
}

/// A single peer's handle onto an [`InMemoryMesh`].
#[derive(Clone)]
pub struct MeshEndpoint {
    peer: PeerId,
    mesh: Arc<InMemoryMesh>,
}

#[async_trait]
impl Transport for MeshEndpoint {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    async fn send(&self, dest: PeerId, port: Port, payload: Vec<u8>) -> Result<(), TransportError> {
        let result = self.mesh.route(self.peer, dest, port, payload);
        if let Err(ref err) = result {
            debug!(from = %self.peer, to = %dest, ?port, %err, "send failed");
        }
        result
    }
}
