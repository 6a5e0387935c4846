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

//! Coordinator configuration.
//!
//! ## Purpose
//! Serde types a host embeds in its own config file to build a
//! [`LockCoordinator`](crate::LockCoordinator). Loading the file is the
//! host's job; this module only parses, applies environment overrides and
//! validates.
//!
//! ## Environment Overrides
//! Environment variables take precedence over file values:
//! - `LEASES_INSTANCE_ID`
//! - `LEASES_RETRY_MAX_ATTEMPTS`
//! - `LEASES_RETRY_BASE_DELAY_MS`
//! - `LEASES_LEASE_SECONDS`
//! - `LEASES_HEARTBEAT_INTERVAL_SECONDS`

use crate::options::LockOptions;
use crate::retry::RetryPolicy;
use crate::{LockError, LockResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Settings for one coordinator (one per process).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Holder identity written to lock records; a ULID is generated when unset
    pub instance_id: Option<String>,
    /// Retry policy for store round-trips
    pub retry: RetryPolicy,
    /// Options used by `acquire_lock_with_defaults`
    pub default_options: LockOptions,
}

impl CoordinatorConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> LockResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LEASES_*` environment variables on top of the current values.
    pub fn with_env_overrides(self) -> LockResult<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> LockResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("LEASES_INSTANCE_ID") {
            self.instance_id = Some(id);
        }
        if let Some(v) = parse_override(&lookup, "LEASES_RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = v;
        }
        if let Some(v) = parse_override(&lookup, "LEASES_RETRY_BASE_DELAY_MS")? {
            self.retry.base_delay_ms = v;
        }
        if let Some(v) = parse_override(&lookup, "LEASES_LEASE_SECONDS")? {
            self.default_options.lease_seconds = v;
        }
        if let Some(v) = parse_override(&lookup, "LEASES_HEARTBEAT_INTERVAL_SECONDS")? {
            self.default_options.heartbeat_interval_seconds = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings the coordinator cannot work with.
    pub fn validate(&self) -> LockResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(LockError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(id) = &self.instance_id {
            if id.trim().is_empty() {
                return Err(LockError::ConfigError(
                    "instance_id must not be blank".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn parse_override<F, T>(lookup: &F, key: &str) -> LockResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| LockError::ConfigError(format!("{}={:?}: {}", key, raw, e))),
    }
}
