// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexSpaces.
//
// PlexSpaces is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexSpaces is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexSpaces. If not, see <https://www.gnu.org/licenses/>.

//! Caller-supplied lease options and their normalisation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lease duration used when `lease_seconds <= 0`.
pub const DEFAULT_LEASE_SECONDS: i64 = 60;

/// Heartbeat cadence used when `heartbeat_interval_seconds <= 0`.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: i64 = 20;

/// Longest lease (and heartbeat) honoured; larger values are capped.
///
/// One thousand years keeps every expiry representable as a timestamp.
pub const MAX_LEASE_SECONDS: i64 = 1_000 * 365 * 24 * 60 * 60;

/// Options for a single `acquire_lock` call.
///
/// Values are taken as given and normalised by [`LockOptions::normalize`]:
/// non-positive values fall back to the defaults, values above
/// [`MAX_LEASE_SECONDS`] are capped, and a heartbeat interval
/// that would not fit inside the lease is clamped to a third of it so at
/// least two renewals happen before the lease can run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    /// Lease duration in seconds
    pub lease_seconds: i64,
    /// Renewal cadence in seconds
    pub heartbeat_interval_seconds: i64,
    /// Allocate a loss-notification channel for this lock
    pub notify_on_loss: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease_seconds: DEFAULT_LEASE_SECONDS,
            heartbeat_interval_seconds: DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
            notify_on_loss: false,
        }
    }
}

impl LockOptions {
    /// Options with the given lease and heartbeat, without loss notification.
    pub fn new(lease_seconds: i64, heartbeat_interval_seconds: i64) -> Self {
        Self {
            lease_seconds,
            heartbeat_interval_seconds,
            notify_on_loss: false,
        }
    }

    /// Request a loss-notification channel.
    pub fn with_notify_on_loss(mut self, notify: bool) -> Self {
        self.notify_on_loss = notify;
        self
    }

    /// Apply defaults and clamp the heartbeat below the lease.
    pub fn normalize(&self) -> NormalizedLockOptions {
        let lease_seconds = if self.lease_seconds <= 0 {
            DEFAULT_LEASE_SECONDS
        } else {
            self.lease_seconds.min(MAX_LEASE_SECONDS)
        } as u64;
        let heartbeat_seconds = if self.heartbeat_interval_seconds <= 0 {
            DEFAULT_HEARTBEAT_INTERVAL_SECONDS
        } else {
            self.heartbeat_interval_seconds.min(MAX_LEASE_SECONDS)
        } as u64;

        // Computed in millis so short leases still get a non-zero interval.
        let heartbeat_interval = if heartbeat_seconds >= lease_seconds {
            Duration::from_millis(lease_seconds * 1000 / 3)
        } else {
            Duration::from_secs(heartbeat_seconds)
        };

        NormalizedLockOptions {
            lease_seconds,
            heartbeat_interval,
            notify_on_loss: self.notify_on_loss,
        }
    }
}

/// [`LockOptions`] after defaults and clamping have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedLockOptions {
    /// Lease duration in seconds, always positive
    pub lease_seconds: u64,
    /// Renewal cadence, always strictly below the lease
    pub heartbeat_interval: Duration,
    /// Allocate a loss-notification channel for this lock
    pub notify_on_loss: bool,
}
