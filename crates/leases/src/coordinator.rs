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

//! Lock coordinator: per-process front end for acquiring and releasing leases.
//!
//! ## Purpose
//! Lets many stateless instances sharing one [`LockStore`] agree on which
//! instance runs a singleton task. One coordinator is built per process and
//! passed around explicitly.
//!
//! ## Design
//! - **Acquire**: one guarded store call; on success a heartbeat task is spawned
//! - **Heartbeat**: renews the lease each interval, reports loss on a channel
//! - **Release**: stops the local heartbeat, then deletes the record if still ours
//! - **Local table**: `lock name -> (cancel token, loss sender)`, only used to
//!   route cancellation and to keep one heartbeat per name. It is never
//!   consulted to decide ownership; the store is.

use crate::config::CoordinatorConfig;
use crate::heartbeat::{HeartbeatExit, HeartbeatTask, LockLostEvent};
use crate::options::LockOptions;
use crate::retry::RetryPolicy;
use crate::{LockError, LockResult, LockStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use ulid::Ulid;

/// Longest lock name accepted by the coordinator.
pub const MAX_LOCK_NAME_LEN: usize = 255;

/// Local bookkeeping for one running heartbeat.
struct ActiveLease {
    generation: u64,
    lease_token: CancellationToken,
    // Dropping the last sender closes the caller's loss channel.
    _lost_tx: Option<mpsc::Sender<LockLostEvent>>,
    exit_rx: watch::Receiver<Option<HeartbeatExit>>,
}

impl ActiveLease {
    async fn stop(mut self) {
        self.lease_token.cancel();
        let _ = self.exit_rx.wait_for(Option::is_some).await;
    }
}

type LeaseTable = Arc<Mutex<HashMap<String, ActiveLease>>>;

/// Returned by a successful `acquire_lock`.
///
/// Dropping the handle does not release the lock; call
/// [`LockCoordinator::release_lock`] or cancel the token passed to
/// `acquire_lock`.
#[derive(Debug)]
pub struct LeaseHandle {
    lock_name: String,
    lost_rx: Option<mpsc::Receiver<LockLostEvent>>,
    exit_rx: watch::Receiver<Option<HeartbeatExit>>,
}

impl LeaseHandle {
    /// Name of the held lock.
    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    /// Loss channel, present when the lock was acquired with `notify_on_loss`.
    ///
    /// Receives at most one event; it closes once the heartbeat has stopped.
    pub fn loss_receiver(&mut self) -> Option<&mut mpsc::Receiver<LockLostEvent>> {
        self.lost_rx.as_mut()
    }

    /// Take ownership of the loss channel.
    pub fn take_loss_receiver(&mut self) -> Option<mpsc::Receiver<LockLostEvent>> {
        self.lost_rx.take()
    }

    /// How the heartbeat ended, or `None` while it is still running.
    pub fn exit(&self) -> Option<HeartbeatExit> {
        self.exit_rx.borrow().clone()
    }

    /// Whether the heartbeat is still running.
    pub fn is_active(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Wait until the heartbeat stops and report why.
    ///
    /// Returns `None` only if the heartbeat task died without reporting,
    /// e.g. because the runtime shut down.
    pub async fn stopped(&mut self) -> Option<HeartbeatExit> {
        let _ = self.exit_rx.wait_for(Option::is_some).await;
        self.exit_rx.borrow().clone()
    }
}

/// Acquires, renews and releases lease locks for one process instance.
pub struct LockCoordinator {
    instance_id: String,
    store: Arc<dyn LockStore>,
    retry: RetryPolicy,
    default_options: LockOptions,
    leases: LeaseTable,
    next_generation: AtomicU64,
    // Cancelled on drop; stops every heartbeat this coordinator spawned.
    owner_token: CancellationToken,
}

impl LockCoordinator {
    /// Create a coordinator that writes `instance_id` as the holder of its locks.
    pub fn new(store: Arc<dyn LockStore>, instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            store,
            retry: RetryPolicy::default(),
            default_options: LockOptions::default(),
            leases: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            owner_token: CancellationToken::new(),
        }
    }

    /// Create a coordinator with a freshly generated ULID instance id.
    pub fn with_generated_id(store: Arc<dyn LockStore>) -> Self {
        Self::new(store, Ulid::new().to_string())
    }

    /// Create a coordinator from validated configuration.
    pub fn from_config(store: Arc<dyn LockStore>, config: CoordinatorConfig) -> LockResult<Self> {
        config.validate()?;
        let instance_id = config
            .instance_id
            .unwrap_or_else(|| Ulid::new().to_string());
        Ok(Self::new(store, instance_id)
            .with_retry_policy(config.retry)
            .with_default_options(config.default_options))
    }

    /// Replace the retry policy used for store round-trips.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the options used by [`acquire_lock_with_defaults`](Self::acquire_lock_with_defaults).
    pub fn with_default_options(mut self, options: LockOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Holder identity of this process.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Try to acquire `lock_name`.
    ///
    /// ## Behavior
    /// - Any heartbeat this process already runs for `lock_name` is stopped first
    /// - One guarded store call (retried on transient errors)
    /// - On success a heartbeat task is spawned under a child of `ctx`;
    ///   cancelling `ctx` stops it without a loss notification
    ///
    /// ## Returns
    /// - `Ok(Some(handle))`: lock acquired
    /// - `Ok(None)`: another instance holds the lock (normal outcome)
    /// - `Err(LockError::InvalidArgument)`: empty or oversized name
    /// - `Err(LockError::Cancelled)`: `ctx` was cancelled during the attempt
    /// - `Err(_)`: store failure after retries; lock state is unknown
    #[instrument(skip(self, ctx, options), fields(instance_id = %self.instance_id))]
    pub async fn acquire_lock(
        &self,
        ctx: &CancellationToken,
        lock_name: &str,
        options: LockOptions,
    ) -> LockResult<Option<LeaseHandle>> {
        validate_lock_name(lock_name)?;
        let options = options.normalize();

        let prior = self.leases.lock().await.remove(lock_name);
        if let Some(prior) = prior {
            debug!(lock_name, "Stopping existing heartbeat before re-acquiring");
            prior.stop().await;
        }

        let acquired = self
            .retry
            .run(ctx, "try_acquire_lock", || {
                self.store
                    .try_acquire_lock(lock_name, &self.instance_id, options.lease_seconds)
            })
            .await?;

        if !acquired {
            debug!(lock_name, "Lock held by another instance");
            return Ok(None);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let lease_token = ctx.child_token();
        let (lost_tx, lost_rx) = if options.notify_on_loss {
            let (tx, rx) = mpsc::channel(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (exit_tx, exit_rx) = watch::channel(None);
        let stop_on_drop = lease_token.clone();

        let task = HeartbeatTask::new(
            Arc::clone(&self.store),
            lock_name.to_string(),
            self.instance_id.clone(),
            options,
            self.retry,
            ctx.clone(),
            lease_token.clone(),
            lost_tx.clone(),
        );

        {
            let mut leases = self.leases.lock().await;
            let replaced = leases.insert(
                lock_name.to_string(),
                ActiveLease {
                    generation,
                    lease_token,
                    _lost_tx: lost_tx,
                    exit_rx: exit_rx.clone(),
                },
            );
            // A concurrent acquire for the same name registered first.
            if let Some(replaced) = replaced {
                replaced.lease_token.cancel();
            }
        }

        let leases = Arc::clone(&self.leases);
        let owner_token = self.owner_token.clone();
        let name = lock_name.to_string();
        let span = info_span!("heartbeat", lock_name = %name, instance_id = %self.instance_id);
        tokio::spawn(
            async move {
                let run = task.run();
                tokio::pin!(run);
                let exit = tokio::select! {
                    exit = &mut run => exit,
                    _ = owner_token.cancelled() => {
                        stop_on_drop.cancel();
                        run.await
                    }
                };
                deregister(&leases, &name, generation).await;
                let _ = exit_tx.send(Some(exit));
            }
            .instrument(span),
        );

        info!(
            lock_name,
            lease_secs = options.lease_seconds,
            heartbeat_interval = ?options.heartbeat_interval,
            "Lock acquired"
        );

        Ok(Some(LeaseHandle {
            lock_name: lock_name.to_string(),
            lost_rx,
            exit_rx,
        }))
    }

    /// [`acquire_lock`](Self::acquire_lock) with the configured default options.
    pub async fn acquire_lock_with_defaults(
        &self,
        ctx: &CancellationToken,
        lock_name: &str,
    ) -> LockResult<Option<LeaseHandle>> {
        self.acquire_lock(ctx, lock_name, self.default_options).await
    }

    /// Release `lock_name`.
    ///
    /// ## Behavior
    /// - Stops the local heartbeat and closes its loss channel (no-op if none)
    /// - Record missing: nothing to do
    /// - Record held by another instance: left untouched
    /// - Record held by this instance: deleted, guarded by its version; a
    ///   conflict means someone already resolved the lock and counts as success
    ///
    /// Never sends a loss notification.
    ///
    /// ## Returns
    /// - `Ok(())`: lock is no longer held by this instance
    /// - `Err(LockError::InvalidArgument)`: empty or oversized name
    /// - `Err(_)`: store failure after retries; lock state is unknown
    #[instrument(skip(self, ctx), fields(instance_id = %self.instance_id))]
    pub async fn release_lock(&self, ctx: &CancellationToken, lock_name: &str) -> LockResult<()> {
        validate_lock_name(lock_name)?;

        let active = self.leases.lock().await.remove(lock_name);
        if let Some(active) = active {
            active.stop().await;
        }

        let record = match self
            .retry
            .run(ctx, "get_lock_info", || self.store.get_lock_info(lock_name))
            .await
        {
            Ok(record) => record,
            Err(LockError::LockNotFound(_)) => {
                debug!(lock_name, "Lock record already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if record.holder_id != self.instance_id {
            info!(lock_name, holder_id = %record.holder_id, "Lock held by another instance, nothing to release");
            return Ok(());
        }

        let result = self
            .retry
            .run(ctx, "release_lock", || {
                self.store
                    .release_lock(lock_name, &self.instance_id, record.version)
            })
            .await;

        match result {
            Ok(()) => {
                info!(lock_name, version = record.version, "Lock released");
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                info!(lock_name, error = %e, "Lock state already changed, treating release as done");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Names of locks with a running local heartbeat, sorted.
    pub async fn held_locks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.leases.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether this process runs a heartbeat for `lock_name`.
    ///
    /// Local view only; the store decides actual ownership.
    pub async fn is_held_locally(&self, lock_name: &str) -> bool {
        self.leases.lock().await.contains_key(lock_name)
    }

    /// Release every lock this process holds.
    ///
    /// All releases are attempted; the first error is returned.
    pub async fn shutdown(&self, ctx: &CancellationToken) -> LockResult<()> {
        let names = self.held_locks().await;
        info!(instance_id = %self.instance_id, count = names.len(), "Releasing held locks");

        let mut first_error = None;
        for name in names {
            if let Err(e) = self.release_lock(ctx, &name).await {
                warn!(lock_name = %name, error = %e, "Failed to release lock during shutdown");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Dropping the coordinator stops its heartbeats without releasing the
/// locks; the leases then run out on their own.
impl Drop for LockCoordinator {
    fn drop(&mut self) {
        self.owner_token.cancel();
    }
}

async fn deregister(leases: &Mutex<HashMap<String, ActiveLease>>, name: &str, generation: u64) {
    let mut leases = leases.lock().await;
    if leases.get(name).is_some_and(|l| l.generation == generation) {
        leases.remove(name);
    }
}

fn validate_lock_name(lock_name: &str) -> LockResult<()> {
    if lock_name.trim().is_empty() {
        return Err(LockError::InvalidArgument(
            "lock name must not be empty".to_string(),
        ));
    }
    if lock_name.len() > MAX_LOCK_NAME_LEN {
        return Err(LockError::InvalidArgument(format!(
            "lock name longer than {} bytes",
            MAX_LOCK_NAME_LEN
        )));
    }
    Ok(())
}
