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

//! Local change and deletion callbacks.
//!
//! Applications register closures against tuple patterns; the kernel fires
//! them after every matching mutation. The dispatcher only selects the
//! closures to run; the kernel invokes them with the state lock released,
//! so a callback may freely call back into the kernel.

use std::sync::Arc;

use crate::error::TupleError;
use crate::tuple::{Tuple, TuplePattern};

/// Handle returned by callback registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(pub(crate) u64);

/// Which mutation a callback listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// Tuple written or appended to.
    Changed,
    /// Tuple removed by expiry.
    Deleted,
}

/// A registered callback closure.
pub type TupleCallback = Arc<dyn Fn(&Tuple) + Send + Sync>;

struct Entry {
    handle: CallbackHandle,
    kind: CallbackKind,
    pattern: TuplePattern,
    func: TupleCallback,
}

/// Registry of pattern-matched callbacks, fired in registration order.
#[derive(Default)]
pub struct CallbackDispatcher {
    next_handle: u64,
    entries: Vec<Entry>,
}

impl CallbackDispatcher {
    /// An empty dispatcher.
    pub fn new() -> CallbackDispatcher {
        CallbackDispatcher::default()
    }

    /// Register `func` to run when a tuple matching `pattern` sees the
    /// given mutation kind.
    pub fn register(
        &mut self,
        pattern: TuplePattern,
        kind: CallbackKind,
        func: TupleCallback,
    ) -> CallbackHandle {
        self.next_handle += 1;
        let handle = CallbackHandle(self.next_handle);
        self.entries.push(Entry {
            handle,
            kind,
            pattern,
            func,
        });
        handle
    }

    /// Remove a registration.
    pub fn unregister(&mut self, handle: CallbackHandle) -> Result<(), TupleError> {
        let before = self.entries.len();
        self.entries.retain(|e| e.handle != handle);
        if self.entries.len() == before {
            return Err(TupleError::HandleNotFound);
        }
        Ok(())
    }

    /// Closures to run for a mutation of `tuple`, in registration order.
    /// The caller invokes them with no locks held.
    pub fn matching(&self, tuple: &Tuple, kind: CallbackKind) -> Vec<TupleCallback> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind && e.pattern.matches(tuple))
            .map(|e| Arc::clone(&e.func))
            .collect()
    }
}
