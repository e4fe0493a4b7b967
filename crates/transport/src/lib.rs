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

//! # Peerspace Transport
//!
//! ## Purpose
//! Message fabric abstraction between tuplespace kernels. The kernel only
//! ever asks the transport for one thing: deliver this payload to that peer
//! on that port, and tell me whether it worked. Everything above (retry
//! budgets, resubscription) lives in the kernel; everything below (sockets,
//! routing, discovery) lives behind [`Transport`].
//!
//! ## Design
//! - **At-least-once, unordered**: a successful `send` means the fabric
//!   accepted the message for delivery; duplicates and reordering are the
//!   receiver's problem and the tuplespace protocol tolerates both.
//! - **Port-based dispatch**: each message class travels on its own
//!   [`Port`], so receivers dispatch without sniffing payload bytes.
//! - **In-process mesh**: [`InMemoryMesh`] wires any number of kernels
//!   together inside one process, with per-peer link toggles so tests can
//!   exercise delivery failure.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod in_memory;

pub use in_memory::{InMemoryMesh, MeshEndpoint};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identity of a peer on the fabric.
///
/// Peer ids are assigned by whatever discovery layer sits below the
/// transport; the tuplespace treats them as opaque. Negative values are
/// reserved (`-1` is the wildcard owner on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub i32);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical channel a tuplespace message travels on.
///
/// Receivers dispatch on the port alone; the payload layout per port is
/// defined by the tuplespace wire codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    /// Register or refresh a subscription at the tuple owner.
    Subscribe,
    /// Withdraw a previously registered subscription.
    Unsubscribe,
    /// Owner pushes a full tuple value to a subscriber.
    PushTuple,
    /// Non-owner asks the owner to adopt a tuple value.
    SetRemoteTuple,
    /// Owner pushes an append diff to a subscriber.
    PushAppend,
    /// Non-owner asks the owner to append to a tuple.
    SetAppend,
}

impl Port {
    /// Wire number of this port.
    pub fn number(self) -> u8 {
        match self {
            Port::Subscribe => 1,
            Port::Unsubscribe => 2,
            Port::PushTuple => 3,
            Port::SetRemoteTuple => 4,
            Port::PushAppend => 5,
            Port::SetAppend => 6,
        }
    }

    /// Inverse of [`Port::number`].
    pub fn from_number(n: u8) -> Option<Port> {
        match n {
            1 => Some(Port::Subscribe),
            2 => Some(Port::Unsubscribe),
            3 => Some(Port::PushTuple),
            4 => Some(Port::SetRemoteTuple),
            5 => Some(Port::PushAppend),
            6 => Some(Port::SetAppend),
            _ => None,
        }
    }
}

/// A message delivered to a peer by the fabric.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Port the sender addressed.
    pub port: Port,
    /// Peer that sent the message.
    pub sender: PeerId,
    /// Opaque payload bytes; decoded by the tuplespace wire codec.
    pub payload: Vec<u8>,
}

/// Errors surfaced by [`Transport::send`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The destination peer is known but currently unreachable.
    #[error("peer {0} unreachable")]
    Unreachable(PeerId),

    /// The destination peer has never been seen on this fabric.
    #[error("peer {0} unknown")]
    UnknownPeer(PeerId),

    /// The peer disappeared while the message was in flight.
    #[error("peer {0} disconnected")]
    Disconnected(PeerId),
}

/// Point-to-point message fabric.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to call
/// from many tasks at once.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The peer id this endpoint sends as.
    fn local_peer(&self) -> PeerId;

    /// Deliver `payload` to `dest` on `port`.
    ///
    /// `Ok(())` means the fabric accepted the message and expects to
    /// deliver it at least once. An error means the caller should treat
    /// the message as lost and schedule its own recovery.
    async fn send(&self, dest: PeerId, port: Port, payload: Vec<u8>) -> Result<(), TransportError>;
}
