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

//! Error types for tuplespace operations.

use peerspace_transport::TransportError;

/// Errors returned by tuplespace operations.
///
/// Protocol-level problems on inbound traffic (malformed frames, stale
/// pushes) are logged and dropped by the kernel rather than surfaced here;
/// this enum covers the caller-facing API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TupleError {
    /// Key failed validation: too long, too deep, empty segment, or a
    /// wildcard where a concrete key is required.
    #[error("bad tuple key: {0}")]
    BadKey(String),

    /// A concrete tuple was required but the value still has wildcard
    /// fields.
    #[error("tuple is abstract where a concrete tuple is required")]
    TupleIsAbstract,

    /// No tuple matched the lookup.
    #[error("tuple not found")]
    NotFound,

    /// Tuple payload or mimetype is larger than a wire frame can carry.
    #[error("out of memory")]
    OutOfMemory,

    /// No subscription or callback is registered under the given handle.
    #[error("handle not found")]
    HandleNotFound,

    /// Result-set cursor used before the first `next()` or after the end.
    #[error("invalid result-set index")]
    InvalidIndex,

    /// An argument was rejected.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// Tuple data did not parse as a meta-tuple reference, or the
    /// reference is unresolved.
    #[error("invalid meta tuple")]
    InvalidMeta,

    /// Incoming tuple carries a sequence number at or below the stored
    /// one and was not applied.
    #[error("stale tuple: stored seqno {stored}, offered {offered}")]
    Stale {
        /// Sequence number of the tuple already in the store.
        stored: u32,
        /// Sequence number the write carried.
        offered: u32,
    },

    /// A wire frame could not be decoded.
    #[error("malformed wire frame: {0}")]
    MalformedFrame(&'static str),

    /// The transport refused the outbound message.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}
