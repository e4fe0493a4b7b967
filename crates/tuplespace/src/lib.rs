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

//! Distributed tuplespace kernel
//!
//! Peers publish tuples into their own namespace, subscribe to tuples by
//! pattern, and the kernel keeps everyone's local copies converged by
//! pushing every matching write to its subscribers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callbacks;
pub mod config;
pub mod error;
pub mod expiry;
pub mod kernel;
pub mod key;
pub mod listing;
pub mod meta;
pub mod results;
pub mod retry;
pub mod store;
pub mod subscribers;
pub mod tuple;
pub mod wire;

pub use callbacks::{CallbackHandle, CallbackKind};
pub use config::KernelConfig;
pub use error::TupleError;
pub use kernel::{Freshness, Kernel};
pub use key::{KeyPattern, TupleKey};
pub use meta::{MetaReference, META_MIMETYPE};
pub use results::TupleResults;
pub use subscribers::SubscriberHandle;
pub use tuple::{Encoding, TimeVal, Tuple, TupleAddress, TuplePattern};

pub use peerspace_transport::PeerId;
