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

//! Error types for lease lock operations.

use thiserror::Error;

/// Result type for lease lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur during lease lock operations.
///
/// The variants fall into three groups:
/// - caller misuse (`InvalidArgument`), rejected up front
/// - logical conflicts (`LockNotFound`, `LockExpired`, `VersionMismatch`,
///   `LockAlreadyAcquired`), meaning the lock state already changed
/// - store failures (`BackendError`, `Timeout`, `IOError`, `SerializationError`),
///   which are retried
#[derive(Error, Debug)]
pub enum LockError {
    /// Lock record does not exist
    #[error("Lock not found: {0}")]
    LockNotFound(String),

    /// Lock is held by another holder
    #[error("Lock already acquired by: {0}")]
    LockAlreadyAcquired(String),

    /// Lock lease has run out
    #[error("Lock expired: {0}")]
    LockExpired(String),

    /// Version mismatch (optimistic locking failure)
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: i64, actual: i64 },

    /// Caller passed an unusable argument (e.g. an empty lock name)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller's cancellation token fired before the operation finished
    #[error("Operation cancelled")]
    Cancelled,

    /// Backend error (database, network, etc.)
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Backend call did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl LockError {
    /// Whether retrying the same operation could succeed.
    ///
    /// Logical conflicts mean the lock moved on without us, so repeating the
    /// mutation cannot help. Misuse, cancellation and configuration errors
    /// are never retried either. Every other store failure, including a row
    /// that failed to decode, gets another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockError::BackendError(_)
                | LockError::Timeout(_)
                | LockError::IOError(_)
                | LockError::SerializationError(_)
        )
    }

    /// Whether the error reports that the lock's logical state has changed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            LockError::LockNotFound(_)
                | LockError::LockExpired(_)
                | LockError::VersionMismatch { .. }
                | LockError::LockAlreadyAcquired(_)
        )
    }
}

impl From<serde_json::Error> for LockError {
    fn from(err: serde_json::Error) -> Self {
        LockError::SerializationError(err.to_string())
    }
}

#[cfg(feature = "sqlite-backend")]
impl From<sqlx::Error> for LockError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => LockError::Timeout("SQL pool timed out".to_string()),
            sqlx::Error::Io(e) => LockError::IOError(e),
            err @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) => {
                LockError::SerializationError(err.to_string())
            }
            other => LockError::BackendError(format!("SQL error: {}", other)),
        }
    }
}
