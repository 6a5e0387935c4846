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

//! # PlexSpaces Lease Locks
//!
//! ## Purpose
//! Lets several stateless instances of one service, sharing one durable
//! store, agree on which instance runs a singleton task (a scheduled cleanup
//! job, a publishing sweep) at any moment.
//!
//! ## Architecture Context
//! - **[`LockStore`]**: durable table of lock records with guarded mutations
//! - **[`LockCoordinator`]**: per-process API (`acquire_lock` / `release_lock`),
//!   owns the table of running heartbeats
//! - **Heartbeat task**: one per held lock, renews the lease and reports loss
//!   on an optional single-slot channel
//!
//! ## Design Decisions
//! - **Version-based optimistic locking**: the store's version counter is the
//!   only arbiter between processes; no process-local mutex stands in for it
//! - **Timestamp-based expiration**: a crashed holder stops blocking the lock
//!   once its lease runs out
//! - **Cooperative cancellation**: cancelling the caller's token stops the
//!   heartbeat silently; only store-detected loss is reported
//!
//! ## Limitations
//! There is no fencing at the protected resource. A holder delayed past its
//! lease (long pause, clock skew) may still act briefly after another
//! instance took over. Callers that opt out of loss notifications must
//! re-check ownership themselves.
//!
//! ## Backend Support
//!
//! - **InMemory**: HashMap-based (feature: `memory-backend`, default)
//! - **SQLite**: Persistent (feature: `sqlite-backend`)
//!
//! ## Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use plexspaces_leases::{LockCoordinator, LockOptions, memory::MemoryLockStore};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = LockCoordinator::new(Arc::new(MemoryLockStore::new()), "portal-api-1");
//! let ctx = CancellationToken::new();
//!
//! let options = LockOptions::new(60, 20).with_notify_on_loss(true);
//! if let Some(mut lease) = coordinator.acquire_lock(&ctx, "cleanup:versions", options).await? {
//!     let mut lost = lease.take_loss_receiver().expect("requested");
//!     tokio::select! {
//!         _ = run_cleanup() => {}
//!         Some(event) = lost.recv() => eprintln!("lost {}: {}", event.lock_name, event.reason),
//!     }
//!     coordinator.release_lock(&ctx, "cleanup:versions").await?;
//! }
//! # Ok(())
//! # }
//! # async fn run_cleanup() {}
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod heartbeat;
pub mod options;
pub mod record;
pub mod retry;
pub mod store;

#[cfg(feature = "memory-backend")]
pub mod memory;

#[cfg(feature = "sqlite-backend")]
pub mod sql;

pub use config::CoordinatorConfig;
pub use coordinator::{LeaseHandle, LockCoordinator};
pub use error::{LockError, LockResult};
pub use heartbeat::{HeartbeatExit, LockLostEvent, LossReason};
pub use options::{LockOptions, NormalizedLockOptions};
pub use record::LockRecord;
pub use retry::RetryPolicy;
pub use store::LockStore;
