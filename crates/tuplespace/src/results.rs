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

//! Result-set cursor for multi-tuple queries.
//!
//! Queries append into the set (concatenating semantics), so several
//! queries can be collected and walked in one pass. The cursor starts
//! before the first element; `value()` before the first `next()` is an
//! error, not a panic.

use crate::error::TupleError;
use crate::tuple::Tuple;

/// A collected set of query results with a walk cursor.
#[derive(Debug, Default)]
pub struct TupleResults {
    tuples: Vec<Tuple>,
    cursor: Option<usize>,
}

impl TupleResults {
    /// An empty result set.
    pub fn new() -> TupleResults {
        TupleResults::default()
    }

    /// Number of collected tuples.
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// True when no query has produced a result yet.
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Drop all results and reset the cursor.
    pub fn reset(&mut self) {
        self.tuples.clear();
        self.cursor = None;
    }

    /// Move the cursor back before the first element, keeping results.
    pub fn rewind(&mut self) {
        self.cursor = None;
    }

    /// Advance to the next element. Returns false past the end.
    pub fn next(&mut self) -> bool {
        let next = match self.cursor {
            None => 0,
            Some(i) => i + 1,
        };
        if next < self.tuples.len() {
            self.cursor = Some(next);
            true
        } else {
            false
        }
    }

    /// The element under the cursor.
    ///
    /// Fails with [`TupleError::InvalidIndex`] before the first `next()`
    /// or after `next()` returned false at the end.
    pub fn value(&self) -> Result<&Tuple, TupleError> {
        self.cursor
            .and_then(|i| self.tuples.get(i))
            .ok_or(TupleError::InvalidIndex)
    }

    pub(crate) fn push(&mut self, tuple: Tuple) {
        self.tuples.push(tuple);
    }
}
