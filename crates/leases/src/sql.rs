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

//! SQL-based lock store implementation (SQLite).
//!
//! Every mutation is a single conditional statement, so the database alone
//! arbitrates between processes:
//!
//! - acquire: `INSERT ... ON CONFLICT DO UPDATE ... WHERE expired OR same holder`
//! - refresh: `UPDATE ... WHERE holder AND version AND not expired RETURNING version`
//! - release: `DELETE ... WHERE holder AND version`
//!
//! When a guarded statement touches no row, a read-only `SELECT` works out
//! which guard failed so callers get the precise error kind.

use crate::record::lease_expiry;
use crate::{LockError, LockRecord, LockResult, LockStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

const SCHEMA: [&str; 5] = [
    r#"CREATE TABLE IF NOT EXISTS lease_locks (
         name TEXT PRIMARY KEY,
         holder_id TEXT NOT NULL,
         acquired_at INTEGER NOT NULL,
         expires_at INTEGER NOT NULL,
         version INTEGER NOT NULL
       )"#,
    r#"CREATE TABLE IF NOT EXISTS lease_lock_versions (
         id INTEGER PRIMARY KEY CHECK (id = 0),
         last_version INTEGER NOT NULL
       )"#,
    r#"INSERT OR IGNORE INTO lease_lock_versions (id, last_version)
       SELECT 0, COALESCE(MAX(version), 0) FROM lease_locks"#,
    r#"CREATE TRIGGER IF NOT EXISTS lease_locks_version_insert
       AFTER INSERT ON lease_locks
       BEGIN
         UPDATE lease_lock_versions SET last_version = NEW.version
          WHERE id = 0 AND last_version < NEW.version;
       END"#,
    r#"CREATE TRIGGER IF NOT EXISTS lease_locks_version_update
       AFTER UPDATE OF version ON lease_locks
       BEGIN
         UPDATE lease_lock_versions SET last_version = NEW.version
          WHERE id = 0 AND last_version < NEW.version;
       END"#,
];

/// SQLite-based lock store.
///
/// This backend uses a `lease_locks` table plus a one-row version counter:
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS lease_locks (
///   name TEXT PRIMARY KEY,
///   holder_id TEXT NOT NULL,
///   acquired_at INTEGER NOT NULL,
///   expires_at INTEGER NOT NULL,
///   version INTEGER NOT NULL
/// );
/// CREATE TABLE IF NOT EXISTS lease_lock_versions (
///   id INTEGER PRIMARY KEY CHECK (id = 0),
///   last_version INTEGER NOT NULL
/// );
/// ```
///
/// - `acquired_at` / `expires_at` are stored as UNIX epoch milliseconds
/// - every new `version` is drawn from `lease_lock_versions` inside the same
///   statement, and triggers write it back, so a row re-created after a
///   release never reuses an earlier version
#[derive(Clone)]
pub struct SqliteLockStore {
    pool: SqlitePool,
}

impl SqliteLockStore {
    /// Connect and create the schema.
    ///
    /// `database_url` is any valid `sqlx` SQLite URL, e.g.:
    /// - `sqlite::memory:` (in-memory, pinned to one connection)
    /// - `sqlite://locks.db?mode=rwc`
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> LockResult<Self> {
        // Each in-memory connection is its own database, so never recycle it.
        let in_memory = database_url.contains(":memory:");
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            options = options.idle_timeout(None).max_lifetime(None);
        }
        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| LockError::BackendError(format!("failed to connect SQLite: {e}")))?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and create the schema.
    pub async fn from_pool(pool: SqlitePool) -> LockResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| LockError::BackendError(format!("failed to create lease lock schema: {e}")))?;
        }

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current time and lease expiry as epoch millis.
    fn lease_window(lease_secs: u64) -> LockResult<(i64, i64)> {
        let now = Utc::now();
        let expires_at = lease_expiry(now, lease_secs)?;
        Ok((now.timestamp_millis(), expires_at.timestamp_millis()))
    }

    fn datetime_from_millis(millis: i64) -> LockResult<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| LockError::BackendError(format!("invalid timestamp: {millis}")))
    }

    async fn fetch_record(&self, name: &str) -> LockResult<Option<LockRecord>> {
        let row = sqlx::query(
            r#"SELECT name, holder_id, acquired_at, expires_at, version
               FROM lease_locks WHERE name = ?1"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(LockRecord {
                name: row.try_get("name")?,
                holder_id: row.try_get("holder_id")?,
                acquired_at: Self::datetime_from_millis(row.try_get("acquired_at")?)?,
                expires_at: Self::datetime_from_millis(row.try_get("expires_at")?)?,
                version: row.try_get("version")?,
            })),
            None => Ok(None),
        }
    }

    /// Work out why a guarded mutation on `name` touched no row.
    async fn diagnose(
        &self,
        name: &str,
        holder_id: &str,
        expected_version: i64,
        check_expiry: bool,
    ) -> LockError {
        let record = match self.fetch_record(name).await {
            Ok(Some(record)) => record,
            Ok(None) => return LockError::LockNotFound(name.to_string()),
            Err(e) => return e,
        };

        if record.holder_id != holder_id {
            LockError::LockAlreadyAcquired(record.holder_id)
        } else if record.version != expected_version {
            LockError::VersionMismatch {
                expected: expected_version,
                actual: record.version,
            }
        } else if check_expiry && record.is_expired() {
            LockError::LockExpired(name.to_string())
        } else {
            // The row changed back between the statement and the read.
            LockError::VersionMismatch {
                expected: expected_version,
                actual: record.version,
            }
        }
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    #[instrument(skip(self, name, holder_id), fields(lock_name = %name, holder_id = %holder_id))]
    async fn try_acquire_lock(
        &self,
        name: &str,
        holder_id: &str,
        lease_secs: u64,
    ) -> LockResult<bool> {
        let (now, expires_at) = Self::lease_window(lease_secs)?;

        let result = sqlx::query(
            r#"INSERT INTO lease_locks (name, holder_id, acquired_at, expires_at, version)
               VALUES (?1, ?2, ?3, ?4, (SELECT last_version + 1 FROM lease_lock_versions WHERE id = 0))
               ON CONFLICT(name) DO UPDATE
                  SET holder_id = excluded.holder_id,
                      acquired_at = excluded.acquired_at,
                      expires_at = excluded.expires_at,
                      version = (SELECT last_version + 1 FROM lease_lock_versions WHERE id = 0)
                WHERE lease_locks.expires_at <= excluded.acquired_at
                   OR lease_locks.holder_id = excluded.holder_id"#,
        )
        .bind(name)
        .bind(holder_id)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() == 1;
        debug!(acquired, "try_acquire_lock");
        Ok(acquired)
    }

    #[instrument(skip(self, name), fields(lock_name = %name))]
    async fn get_lock_info(&self, name: &str) -> LockResult<LockRecord> {
        self.fetch_record(name)
            .await?
            .ok_or_else(|| LockError::LockNotFound(name.to_string()))
    }

    #[instrument(skip(self, name, holder_id), fields(lock_name = %name, holder_id = %holder_id, version = expected_version))]
    async fn refresh_lock(
        &self,
        name: &str,
        holder_id: &str,
        lease_secs: u64,
        expected_version: i64,
    ) -> LockResult<i64> {
        let (now, expires_at) = Self::lease_window(lease_secs)?;

        let row = sqlx::query(
            r#"UPDATE lease_locks
                  SET expires_at = ?4,
                      version = (SELECT last_version + 1 FROM lease_lock_versions WHERE id = 0)
                WHERE name = ?1 AND holder_id = ?2 AND version = ?3 AND expires_at > ?5
            RETURNING version"#,
        )
        .bind(name)
        .bind(holder_id)
        .bind(expected_version)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get("version")?),
            None => Err(self.diagnose(name, holder_id, expected_version, true).await),
        }
    }

    #[instrument(skip(self, name, holder_id), fields(lock_name = %name, holder_id = %holder_id, version = expected_version))]
    async fn release_lock(
        &self,
        name: &str,
        holder_id: &str,
        expected_version: i64,
    ) -> LockResult<()> {
        let result = sqlx::query(
            r#"DELETE FROM lease_locks WHERE name = ?1 AND holder_id = ?2 AND version = ?3"#,
        )
        .bind(name)
        .bind(holder_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        Err(self.diagnose(name, holder_id, expected_version, false).await)
    }
}
