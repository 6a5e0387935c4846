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

//! In-memory lock store implementation (for testing).

use crate::record::lease_expiry;
use crate::{LockError, LockRecord, LockResult, LockStore};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Inner {
    records: HashMap<String, LockRecord>,
    // Store-wide counter so a re-created record never reuses a version.
    last_version: i64,
}

impl Inner {
    fn next_version(&mut self) -> i64 {
        self.last_version += 1;
        self.last_version
    }
}

/// In-memory lock store (for testing).
///
/// ## Purpose
/// Provides a simple in-memory implementation of `LockStore` for tests and
/// single-process scenarios. Clones share the same table, so several
/// coordinators built on clones of one store behave like separate processes
/// sharing a database.
///
/// ## Limitations
/// - Not persistent (locks lost on restart)
/// - Not distributed (single process only)
/// - No TTL cleanup (expired locks remain until taken over or released)
///
/// ## Test hooks
/// `overwrite_holder`, `expire`, `remove` and `fail_next` let tests simulate
/// another process stealing a lock, a stalled holder, an operator deleting
/// the row, and a flaky connection.
#[derive(Clone, Default)]
pub struct MemoryLockStore {
    inner: Arc<RwLock<Inner>>,
    injected_failures: Arc<AtomicU32>,
}

impl MemoryLockStore {
    /// Create a new in-memory lock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` store calls fail with a transient backend error.
    pub fn fail_next(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Current record for `name`, if any.
    pub async fn snapshot(&self, name: &str) -> Option<LockRecord> {
        self.inner.read().await.records.get(name).cloned()
    }

    /// Hand the lock to `holder_id` behind the current holder's back.
    ///
    /// Bumps the version like a real takeover would. Returns `false` if there
    /// is no record for `name`.
    pub async fn overwrite_holder(&self, name: &str, holder_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let version = inner.next_version();
        match inner.records.get_mut(name) {
            Some(record) => {
                record.holder_id = holder_id.to_string();
                record.acquired_at = Utc::now();
                record.version = version;
                true
            }
            None => false,
        }
    }

    /// Move the lease expiry into the past without touching the holder.
    pub async fn expire(&self, name: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(name) {
            Some(record) => {
                record.expires_at = Utc::now() - Duration::seconds(1);
                true
            }
            None => false,
        }
    }

    /// Delete the record for `name` unconditionally.
    pub async fn remove(&self, name: &str) -> Option<LockRecord> {
        self.inner.write().await.records.remove(name)
    }

    fn check_injected_failure(&self, operation: &str) -> LockResult<()> {
        let consumed = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            debug!(operation, "injected store failure");
            return Err(LockError::BackendError(format!(
                "injected failure during {}",
                operation
            )));
        }
        Ok(())
    }

    fn check_owner(record: &LockRecord, holder_id: &str, expected_version: i64) -> LockResult<()> {
        if record.holder_id != holder_id {
            return Err(LockError::LockAlreadyAcquired(record.holder_id.clone()));
        }
        if record.version != expected_version {
            return Err(LockError::VersionMismatch {
                expected: expected_version,
                actual: record.version,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire_lock(
        &self,
        name: &str,
        holder_id: &str,
        lease_secs: u64,
    ) -> LockResult<bool> {
        self.check_injected_failure("try_acquire_lock")?;

        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let expires_at = lease_expiry(now, lease_secs)?;

        if let Some(existing) = inner.records.get(name) {
            if !existing.is_expired_at(now) && existing.holder_id != holder_id {
                return Ok(false);
            }
        }

        let version = inner.next_version();
        inner.records.insert(
            name.to_string(),
            LockRecord {
                name: name.to_string(),
                holder_id: holder_id.to_string(),
                acquired_at: now,
                expires_at,
                version,
            },
        );
        Ok(true)
    }

    async fn get_lock_info(&self, name: &str) -> LockResult<LockRecord> {
        self.check_injected_failure("get_lock_info")?;

        let inner = self.inner.read().await;
        inner
            .records
            .get(name)
            .cloned()
            .ok_or_else(|| LockError::LockNotFound(name.to_string()))
    }

    async fn refresh_lock(
        &self,
        name: &str,
        holder_id: &str,
        lease_secs: u64,
        expected_version: i64,
    ) -> LockResult<i64> {
        self.check_injected_failure("refresh_lock")?;

        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let expires_at = lease_expiry(now, lease_secs)?;

        let existing = inner
            .records
            .get(name)
            .ok_or_else(|| LockError::LockNotFound(name.to_string()))?;
        Self::check_owner(existing, holder_id, expected_version)?;
        if existing.is_expired_at(now) {
            return Err(LockError::LockExpired(name.to_string()));
        }

        let version = inner.next_version();
        if let Some(record) = inner.records.get_mut(name) {
            record.expires_at = expires_at;
            record.version = version;
        }
        Ok(version)
    }

    async fn release_lock(
        &self,
        name: &str,
        holder_id: &str,
        expected_version: i64,
    ) -> LockResult<()> {
        self.check_injected_failure("release_lock")?;

        let mut inner = self.inner.write().await;
        let existing = inner
            .records
            .get(name)
            .ok_or_else(|| LockError::LockNotFound(name.to_string()))?;
        Self::check_owner(existing, holder_id, expected_version)?;

        inner.records.remove(name);
        Ok(())
    }
}
