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

//! Heartbeat task: keeps one held lease alive and detects its loss.
//!
//! ## Design
//! One task per held lock. Every tick it re-reads the record, checks that
//! this instance still holds it, and extends the lease guarded by the
//! version it just read. Cancellation of the task's token always wins over
//! a tick and exits silently; only conditions detected through the store
//! produce a [`LockLostEvent`].

use crate::options::NormalizedLockOptions;
use crate::retry::RetryPolicy;
use crate::{LockError, LockStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a held lock was lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossReason {
    /// The record was deleted out from under the holder
    NoLongerExists,
    /// Another instance holds the record now
    AcquiredByAnotherInstance,
    /// Renewal failed for good; carries the store error
    RefreshFailed(String),
}

impl fmt::Display for LossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossReason::NoLongerExists => write!(f, "lock no longer exists"),
            LossReason::AcquiredByAnotherInstance => write!(f, "lock acquired by another instance"),
            LossReason::RefreshFailed(detail) => write!(f, "failed to refresh lock: {}", detail),
        }
    }
}

/// Delivered on the loss channel of a lock acquired with `notify_on_loss`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLostEvent {
    pub lock_name: String,
    pub instance_id: String,
    pub reason: LossReason,
}

/// Terminal state of a heartbeat task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// Stopped by `release_lock`, a re-acquire, or coordinator shutdown
    Released,
    /// The caller's token was cancelled
    CtxCancelled,
    /// The lease was lost; a notification was sent if requested
    Lost(LossReason),
}

impl HeartbeatExit {
    /// Whether the heartbeat ended because the lock was lost.
    pub fn is_lost(&self) -> bool {
        matches!(self, HeartbeatExit::Lost(_))
    }
}

enum Tick {
    Renewed(i64),
    Cancelled,
    Lost(LossReason),
}

/// Renewal loop for one held lock.
pub(crate) struct HeartbeatTask {
    store: Arc<dyn LockStore>,
    lock_name: String,
    instance_id: String,
    options: NormalizedLockOptions,
    retry: RetryPolicy,
    /// Token supplied by the caller of `acquire_lock`
    ctx: CancellationToken,
    /// Child of `ctx`, cancelled on release
    lease_token: CancellationToken,
    lost_tx: Option<mpsc::Sender<LockLostEvent>>,
}

impl HeartbeatTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn LockStore>,
        lock_name: String,
        instance_id: String,
        options: NormalizedLockOptions,
        retry: RetryPolicy,
        ctx: CancellationToken,
        lease_token: CancellationToken,
        lost_tx: Option<mpsc::Sender<LockLostEvent>>,
    ) -> Self {
        Self {
            store,
            lock_name,
            instance_id,
            options,
            retry,
            ctx,
            lease_token,
            lost_tx,
        }
    }

    /// Tick until the lease is released, cancelled or lost.
    pub(crate) async fn run(self) -> HeartbeatExit {
        let period = self.options.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(lock_name = %self.lock_name, interval = ?period, "Heartbeat started");

        loop {
            tokio::select! {
                biased;
                _ = self.lease_token.cancelled() => return self.stopped(),
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Tick::Renewed(version) => {
                    debug!(lock_name = %self.lock_name, version, "Lease renewed");
                }
                Tick::Cancelled => return self.stopped(),
                Tick::Lost(_) if self.lease_token.is_cancelled() => return self.stopped(),
                Tick::Lost(reason) => {
                    info!(lock_name = %self.lock_name, reason = %reason, "Lock lost, stopping heartbeat");
                    self.notify(&reason);
                    return HeartbeatExit::Lost(reason);
                }
            }
        }
    }

    async fn tick(&self) -> Tick {
        let name = self.lock_name.as_str();

        let record = match self
            .retry
            .run(&self.lease_token, "get_lock_info", || self.store.get_lock_info(name))
            .await
        {
            Ok(record) => record,
            Err(LockError::Cancelled) => return Tick::Cancelled,
            Err(LockError::LockNotFound(_)) => return Tick::Lost(LossReason::NoLongerExists),
            Err(e) => return Tick::Lost(LossReason::RefreshFailed(e.to_string())),
        };

        if record.holder_id != self.instance_id {
            debug!(lock_name = name, holder_id = %record.holder_id, "Record held by another instance");
            return Tick::Lost(LossReason::AcquiredByAnotherInstance);
        }

        let lease_secs = self.options.lease_seconds;
        let result = self
            .retry
            .run(&self.lease_token, "refresh_lock", || {
                self.store
                    .refresh_lock(name, &self.instance_id, lease_secs, record.version)
            })
            .await;

        match result {
            Ok(version) => Tick::Renewed(version),
            Err(LockError::Cancelled) => Tick::Cancelled,
            Err(LockError::LockAlreadyAcquired(_)) => Tick::Lost(LossReason::AcquiredByAnotherInstance),
            Err(LockError::LockNotFound(_)) => Tick::Lost(LossReason::NoLongerExists),
            Err(e) => Tick::Lost(LossReason::RefreshFailed(e.to_string())),
        }
    }

    fn stopped(&self) -> HeartbeatExit {
        if self.ctx.is_cancelled() {
            debug!(lock_name = %self.lock_name, "Heartbeat stopped: context cancelled");
            HeartbeatExit::CtxCancelled
        } else {
            debug!(lock_name = %self.lock_name, "Heartbeat stopped: released");
            HeartbeatExit::Released
        }
    }

    fn notify(&self, reason: &LossReason) {
        let Some(tx) = &self.lost_tx else {
            return;
        };

        let event = LockLostEvent {
            lock_name: self.lock_name.clone(),
            instance_id: self.instance_id.clone(),
            reason: reason.clone(),
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(lock_name = %self.lock_name, reason = %reason, "Loss channel full, dropping loss notification");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(lock_name = %self.lock_name, "Loss receiver gone, notification discarded");
            }
        }
    }
}
