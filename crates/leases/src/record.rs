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

//! Persisted lock record.

use crate::{LockError, LockResult};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// One row of the lock table, as seen by a [`LockStore`](crate::LockStore).
///
/// A record whose `expires_at` lies in the past is logically absent: any
/// holder may take it over, which replaces the holder and timestamps and
/// bumps `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Name of the protected resource (primary key)
    pub name: String,
    /// Instance currently believed to hold the lock
    pub holder_id: String,
    /// When the current holder acquired the lease
    pub acquired_at: DateTime<Utc>,
    /// When the lease runs out unless refreshed
    pub expires_at: DateTime<Utc>,
    /// Bumped on every acquire and refresh
    pub version: i64,
}

impl LockRecord {
    /// Whether the lease has run out at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the lease has run out.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Expiry of a lease of `lease_secs` starting at `now`.
///
/// Fails with `InvalidArgument` when the expiry is not a representable
/// timestamp.
pub(crate) fn lease_expiry(now: DateTime<Utc>, lease_secs: u64) -> LockResult<DateTime<Utc>> {
    i64::try_from(lease_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|lease| now.checked_add_signed(lease))
        .ok_or_else(|| LockError::InvalidArgument(format!("lease of {lease_secs}s is out of range")))
}
