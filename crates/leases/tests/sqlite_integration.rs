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

//! SQLite lock store integration tests.
//!
//! These tests verify:
//! - Lock acquisition, refresh, and release
//! - Version-based optimistic locking
//! - Expiration handling and takeover
//! - Holder ID consistency
//! - A coordinator running on top of the SQL store

#[cfg(feature = "sqlite-backend")]
mod tests {
    use chrono::Utc;
    use plexspaces_leases::{
        sql::SqliteLockStore, HeartbeatExit, LockCoordinator, LockError, LockOptions, LockStore,
        LossReason,
    };
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};
    use tokio_util::sync::CancellationToken;

    /// Create a new SQLite lock store with in-memory database
    async fn create_store() -> SqliteLockStore {
        SqliteLockStore::connect("sqlite::memory:").await.unwrap()
    }

    /// Push the lease of `name` into the past, bypassing the store API
    async fn expire(store: &SqliteLockStore, name: &str) {
        sqlx::query("UPDATE lease_locks SET expires_at = ?1 WHERE name = ?2")
            .bind(Utc::now().timestamp_millis() - 1_000)
            .bind(name)
            .execute(store.pool())
            .await
            .unwrap();
    }

    /// Hand the lock to another holder, bypassing the store API
    async fn steal(store: &SqliteLockStore, name: &str, holder_id: &str) {
        sqlx::query("UPDATE lease_locks SET holder_id = ?1, version = version + 1 WHERE name = ?2")
            .bind(holder_id)
            .bind(name)
            .execute(store.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_acquire_lock() {
        let store = create_store().await;

        assert!(store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap());

        // Verify lock exists in database
        let record = store.get_lock_info("test-lock").await.unwrap();
        assert_eq!(record.name, "test-lock");
        assert_eq!(record.holder_id, "node-1");
        assert_eq!(record.version, 1);
        assert!(!record.is_expired());
        assert_eq!((record.expires_at - record.acquired_at).num_seconds(), 30);
    }

    #[tokio::test]
    async fn test_sqlite_acquire_lock_already_held() {
        let store = create_store().await;

        assert!(store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap());
        assert!(!store.try_acquire_lock("test-lock", "node-2", 30).await.unwrap());

        let record = store.get_lock_info("test-lock").await.unwrap();
        assert_eq!(record.holder_id, "node-1");
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn test_sqlite_acquire_lock_same_holder() {
        let store = create_store().await;

        store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap();
        // Same holder acquiring again re-grants the lease
        assert!(store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap());

        let record = store.get_lock_info("test-lock").await.unwrap();
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn test_sqlite_acquire_expired_lock() {
        let store = create_store().await;

        store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap();
        expire(&store, "test-lock").await;

        // Different holder should be able to acquire expired lock
        assert!(store.try_acquire_lock("test-lock", "node-2", 30).await.unwrap());
        let record = store.get_lock_info("test-lock").await.unwrap();
        assert_eq!(record.holder_id, "node-2");
        assert_eq!(record.version, 2);
        assert!(!record.is_expired());
    }

    #[tokio::test]
    async fn test_sqlite_get_lock_not_found() {
        let store = create_store().await;
        let result = store.get_lock_info("non-existent").await;
        assert!(matches!(result, Err(LockError::LockNotFound(_))));
    }

    #[tokio::test]
    async fn test_sqlite_refresh_lock() {
        let store = create_store().await;

        store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap();
        let record = store.get_lock_info("test-lock").await.unwrap();

        let version = store
            .refresh_lock("test-lock", "node-1", 60, record.version)
            .await
            .unwrap();
        assert_eq!(version, record.version + 1);

        // Verify in database
        let refreshed = store.get_lock_info("test-lock").await.unwrap();
        assert_eq!(refreshed.version, version);
        assert!(refreshed.expires_at > record.expires_at);
        assert_eq!(refreshed.acquired_at, record.acquired_at);
    }

    #[tokio::test]
    async fn test_sqlite_refresh_lock_version_mismatch() {
        let store = create_store().await;

        store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap();

        let result = store.refresh_lock("test-lock", "node-1", 60, 42).await;
        assert!(matches!(
            result,
            Err(LockError::VersionMismatch { expected: 42, actual: 1 })
        ));
    }

    #[tokio::test]
    async fn test_sqlite_refresh_lock_wrong_holder() {
        let store = create_store().await;

        store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap();

        let result = store.refresh_lock("test-lock", "node-2", 60, 1).await;
        assert!(matches!(result, Err(LockError::LockAlreadyAcquired(holder)) if holder == "node-1"));
    }

    #[tokio::test]
    async fn test_sqlite_refresh_lock_not_found() {
        let store = create_store().await;
        let result = store.refresh_lock("non-existent", "node-1", 60, 1).await;
        assert!(matches!(result, Err(LockError::LockNotFound(_))));
    }

    #[tokio::test]
    async fn test_sqlite_refresh_expired_lock() {
        let store = create_store().await;

        store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap();
        expire(&store, "test-lock").await;

        let result = store.refresh_lock("test-lock", "node-1", 60, 1).await;
        assert!(matches!(result, Err(LockError::LockExpired(_))));

        // A failed refresh leaves the row untouched
        let record = store.get_lock_info("test-lock").await.unwrap();
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn test_sqlite_release_lock() {
        let store = create_store().await;

        store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap();
        store.release_lock("test-lock", "node-1", 1).await.unwrap();

        let result = store.get_lock_info("test-lock").await;
        assert!(matches!(result, Err(LockError::LockNotFound(_))));
    }

    #[tokio::test]
    async fn test_sqlite_release_lock_wrong_holder() {
        let store = create_store().await;

        store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap();

        let result = store.release_lock("test-lock", "node-2", 1).await;
        assert!(matches!(result, Err(LockError::LockAlreadyAcquired(_))));
        assert!(store.get_lock_info("test-lock").await.is_ok());
    }

    #[tokio::test]
    async fn test_sqlite_release_lock_version_mismatch() {
        let store = create_store().await;

        store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap();
        store.refresh_lock("test-lock", "node-1", 30, 1).await.unwrap();

        // Stale version from before the refresh
        let result = store.release_lock("test-lock", "node-1", 1).await;
        assert!(matches!(result, Err(LockError::VersionMismatch { expected: 1, actual: 2 })));
    }

    #[tokio::test]
    async fn test_sqlite_release_lock_not_found() {
        let store = create_store().await;
        let result = store.release_lock("non-existent", "node-1", 1).await;
        assert!(matches!(result, Err(LockError::LockNotFound(_))));
    }

    #[tokio::test]
    async fn test_sqlite_recreated_lock_never_reuses_version() {
        let store = create_store().await;

        store.try_acquire_lock("test-lock", "node-1", 30).await.unwrap();
        let version = store.refresh_lock("test-lock", "node-1", 30, 1).await.unwrap();
        store.release_lock("test-lock", "node-1", version).await.unwrap();

        assert!(store.try_acquire_lock("test-lock", "node-2", 30).await.unwrap());
        let record = store.get_lock_info("test-lock").await.unwrap();
        assert_eq!(record.holder_id, "node-2");
        assert!(record.version > version);

        // the counter is shared by every name
        store.try_acquire_lock("other-lock", "node-1", 30).await.unwrap();
        assert!(store.get_lock_info("other-lock").await.unwrap().version > record.version);
    }

    #[tokio::test]
    async fn test_sqlite_out_of_range_lease_is_rejected() {
        let store = create_store().await;

        let result = store.try_acquire_lock("test-lock", "node-1", u64::MAX).await;
        assert!(matches!(result, Err(LockError::InvalidArgument(_))));
        assert!(matches!(
            store.get_lock_info("test-lock").await,
            Err(LockError::LockNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sqlite_multiple_locks() {
        let store = create_store().await;

        assert!(store.try_acquire_lock("lock-1", "node-1", 30).await.unwrap());
        assert!(store.try_acquire_lock("lock-2", "node-2", 30).await.unwrap());

        assert_eq!(store.get_lock_info("lock-1").await.unwrap().holder_id, "node-1");
        assert_eq!(store.get_lock_info("lock-2").await.unwrap().holder_id, "node-2");
    }

    #[tokio::test]
    async fn test_sqlite_coordinators_exclude_each_other() {
        let store: Arc<dyn LockStore> = Arc::new(create_store().await);
        let a = LockCoordinator::new(store.clone(), "instance-a");
        let b = LockCoordinator::new(store.clone(), "instance-b");
        let ctx = CancellationToken::new();

        let (ra, rb) = tokio::join!(
            a.acquire_lock(&ctx, "cleanup", LockOptions::default()),
            b.acquire_lock(&ctx, "cleanup", LockOptions::default()),
        );
        assert!(ra.unwrap().is_some() ^ rb.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sqlite_coordinator_detects_takeover() {
        let store = create_store().await;
        let coord = LockCoordinator::new(Arc::new(store.clone()), "instance-a");
        let ctx = CancellationToken::new();

        let mut lease = coord
            .acquire_lock(&ctx, "cleanup", LockOptions::new(5, 1).with_notify_on_loss(true))
            .await
            .unwrap()
            .unwrap();

        steal(&store, "cleanup", "instance-b").await;

        let event = timeout(Duration::from_secs(3), lease.loss_receiver().unwrap().recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.reason, LossReason::AcquiredByAnotherInstance);
        assert_eq!(
            lease.stopped().await,
            Some(HeartbeatExit::Lost(LossReason::AcquiredByAnotherInstance))
        );
    }

    #[tokio::test]
    async fn test_sqlite_coordinator_release() {
        let store = create_store().await;
        let coord = LockCoordinator::new(Arc::new(store.clone()), "instance-a");
        let ctx = CancellationToken::new();

        coord
            .acquire_lock(&ctx, "cleanup", LockOptions::new(5, 1))
            .await
            .unwrap()
            .unwrap();
        // let the heartbeat bump the version at least once
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert!(store.get_lock_info("cleanup").await.unwrap().version > 1);

        coord.release_lock(&ctx, "cleanup").await.unwrap();
        assert!(matches!(
            store.get_lock_info("cleanup").await,
            Err(LockError::LockNotFound(_))
        ));
    }
}
