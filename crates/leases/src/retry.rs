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

//! Bounded retry with linear backoff for store mutations.

use crate::{LockError, LockResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How transient store failures are retried.
///
/// Attempt `n` (1-based) that fails with a retryable error is followed by a
/// sleep of `base_delay_ms * n` before attempt `n + 1`. Errors for which
/// [`LockError::is_retryable`] is false end the operation immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Backoff unit in milliseconds
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Both the operation and the backoff sleep are raced against `ctx`;
    /// cancellation wins and yields [`LockError::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        ctx: &CancellationToken,
        operation_name: &str,
        mut operation: F,
    ) -> LockResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LockResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(LockError::Cancelled),
                result = operation() => result,
            };

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(operation = operation_name, error = %err, "Operation failed with non-retryable error");
                return Err(err);
            }
            if attempt >= max_attempts {
                error!(operation = operation_name, attempts = attempt, error = %err, "Operation failed after maximum retries");
                return Err(err);
            }

            let delay = self.backoff(attempt);
            warn!(
                operation = operation_name,
                attempt,
                max_attempts,
                delay = ?delay,
                error = %err,
                "Operation failed, retrying"
            );

            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(LockError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
