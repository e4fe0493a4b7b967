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

//! Meta-tuple references.
//!
//! A meta tuple is an ordinary tuple whose data is a textual pointer at
//! another tuple: `(META <owner> <key>)`, or `(META -1 NULL)` while
//! unresolved. This module is the single codec for that text; indirection
//! logic (resolve, subscribe-through, retarget) lives on the kernel.

use peerspace_transport::PeerId;

use crate::error::TupleError;
use crate::key::TupleKey;
use crate::tuple::TupleAddress;

/// Mimetype marking a tuple as a meta tuple.
pub const META_MIMETYPE: &str = "x-peis/metatuple";

/// A parsed meta-tuple reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaReference {
    /// The referenced tuple, or `None` while unresolved.
    pub target: Option<TupleAddress>,
}

impl MetaReference {
    /// The unresolved reference, `(META -1 NULL)`.
    pub fn unresolved() -> MetaReference {
        MetaReference { target: None }
    }

    /// A reference to the given tuple.
    pub fn to(owner: PeerId, key: TupleKey) -> MetaReference {
        MetaReference {
            target: Some(TupleAddress { owner, key }),
        }
    }

    /// Render as meta-tuple data text.
    pub fn to_text(&self) -> String {
        match &self.target {
            Some(address) => format!("(META {} {})", address.owner, address.key),
            None => "(META -1 NULL)".to_string(),
        }
    }

    /// Parse meta-tuple data text. Whitespace between the elements is
    /// flexible; anything else is [`TupleError::InvalidMeta`].
    pub fn parse(text: &str) -> Result<MetaReference, TupleError> {
        let inner = text
            .trim()
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .ok_or(TupleError::InvalidMeta)?;
        let mut parts = inner.split_whitespace();
        if parts.next() != Some("META") {
            return Err(TupleError::InvalidMeta);
        }
        let owner: i32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or(TupleError::InvalidMeta)?;
        let key = parts.next().ok_or(TupleError::InvalidMeta)?;
        if parts.next().is_some() {
            return Err(TupleError::InvalidMeta);
        }
        if owner == -1 || key == "NULL" {
            return Ok(MetaReference::unresolved());
        }
        Ok(MetaReference {
            target: Some(TupleAddress {
                owner: PeerId(owner),
                key: TupleKey::parse(key).map_err(|_| TupleError::InvalidMeta)?,
            }),
        })
    }
}
