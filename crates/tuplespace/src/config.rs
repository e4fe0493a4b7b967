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

//! Kernel configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one kernel instance.
///
/// The defaults are the protocol's long-standing values; deployments
/// normally only set `peer_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// This kernel's peer id on the fabric.
    pub peer_id: i32,
    /// Cadence of the manage tick (resubscription, listing regeneration).
    #[serde(default = "default_manage_interval")]
    pub manage_interval: Duration,
    /// Cadence of the expiry sweep.
    #[serde(default = "default_expiry_interval")]
    pub expiry_interval: Duration,
    /// Manage ticks between retry passes; with the 1 s manage cadence the
    /// default 2 retries failed pushes every other tick.
    #[serde(default = "default_retry_every_nth_tick")]
    pub retry_every_nth_tick: u64,
    /// Attempts before a failed push is abandoned.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// How long a remote subscription lives without a refresh.
    #[serde(default = "default_subscription_ttl")]
    pub subscription_ttl: Duration,
}

fn default_manage_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_expiry_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_retry_every_nth_tick() -> u64 {
    2
}

fn default_retry_budget() -> u32 {
    15
}

fn default_subscription_ttl() -> Duration {
    Duration::from_secs(60)
}

impl KernelConfig {
    /// Defaults for the given peer id.
    pub fn new(peer_id: i32) -> KernelConfig {
        KernelConfig {
            peer_id,
            manage_interval: default_manage_interval(),
            expiry_interval: default_expiry_interval(),
            retry_every_nth_tick: default_retry_every_nth_tick(),
            retry_budget: default_retry_budget(),
            subscription_ttl: default_subscription_ttl(),
        }
    }
}
