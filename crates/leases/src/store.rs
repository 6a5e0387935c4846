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

//! Lock store trait: the durable side of lease coordination.

use async_trait::async_trait;

use crate::{LockRecord, LockResult};

/// Durable table of lease locks keyed by name.
///
/// ## Purpose
/// The store is the single source of truth for who holds a lock. Every
/// mutation must be atomic and guarded (a single conditional statement or
/// equivalent); the coordinator never infers ownership without a round-trip.
///
/// ## Design
/// - **Acquire**: insert if absent, overwrite if expired, bump version
/// - **Refresh**: extend the lease, guarded by holder and expected version
/// - **Release**: remove the record, guarded by holder and expected version
/// - **Version-based optimistic locking**: a stale version is always rejected;
///   versions only grow across the whole store, so a record re-created after
///   a release can never be mistaken for an earlier one
///
/// Cancellation is expressed by dropping the returned future, so none of
/// the methods take a context argument.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomically acquire `name` for `holder_id` with a lease of `lease_secs`.
    ///
    /// ## Behavior
    /// - If the record doesn't exist: create it with a version never used
    ///   before in this store, even for a name that was released earlier
    /// - If the record exists and is expired: take it over, bump version
    /// - If the record is live and held by `holder_id`: re-grant the lease, bump version
    /// - If the record is live and held by someone else: leave it alone
    ///
    /// ## Returns
    /// - `Ok(true)`: lock acquired
    /// - `Ok(false)`: lock held by a different holder (not an error)
    /// - `Err(LockError::BackendError)`: backend error
    async fn try_acquire_lock(&self, name: &str, holder_id: &str, lease_secs: u64)
        -> LockResult<bool>;

    /// Fetch the current record.
    ///
    /// ## Returns
    /// - `Ok(LockRecord)`: record exists (it may be expired)
    /// - `Err(LockError::LockNotFound)`: no record for `name`
    async fn get_lock_info(&self, name: &str) -> LockResult<LockRecord>;

    /// Extend the lease to `now + lease_secs`.
    ///
    /// ## Returns
    /// - `Ok(version)`: the new version of the record
    /// - `Err(LockError::LockNotFound)`: record doesn't exist
    /// - `Err(LockError::LockAlreadyAcquired)`: held by a different holder
    /// - `Err(LockError::VersionMismatch)`: record changed since it was read
    /// - `Err(LockError::LockExpired)`: lease already ran out
    async fn refresh_lock(
        &self,
        name: &str,
        holder_id: &str,
        lease_secs: u64,
        expected_version: i64,
    ) -> LockResult<i64>;

    /// Delete the record.
    ///
    /// ## Returns
    /// - `Ok(())`: record removed
    /// - `Err(LockError::LockNotFound)`: record doesn't exist
    /// - `Err(LockError::LockAlreadyAcquired)`: held by a different holder
    /// - `Err(LockError::VersionMismatch)`: record changed since it was read
    async fn release_lock(&self, name: &str, holder_id: &str, expected_version: i64)
        -> LockResult<()>;
}
