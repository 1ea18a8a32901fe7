// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving client settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::bluetooth::ble_constants::{timing, CHAR_UUID, DEFAULT_ADAPTER};

/// Client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session settings, fixed for the lifetime of a session.
    pub session: SessionConfig,

    /// Target device and per-call timeouts.
    pub device: DeviceConfig,
}

/// Settings fixed when a session manager is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Radio interface, e.g. "hci0".
    pub adapter: String,

    /// Characteristic carrying the command stream.
    pub characteristic_uuid: Uuid,

    /// Interval between checks in every bounded wait.
    pub poll_interval_ms: u64,

    /// Backoffs applied before retrying after a transport error.
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            adapter: DEFAULT_ADAPTER.to_string(),
            characteristic_uuid: CHAR_UUID,
            poll_interval_ms: timing::POLL_INTERVAL.as_millis() as u64,
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// After "resource busy", once the adapter has been restarted.
    pub resource_busy_backoff_ms: u64,

    /// After "operation aborted".
    pub operation_aborted_backoff_ms: u64,

    /// After any error without a dedicated policy.
    pub unknown_error_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            resource_busy_backoff_ms: timing::RESOURCE_BUSY_BACKOFF.as_millis() as u64,
            operation_aborted_backoff_ms: timing::OPERATION_ABORTED_BACKOFF.as_millis() as u64,
            unknown_error_backoff_ms: timing::UNKNOWN_ERROR_BACKOFF.as_millis() as u64,
        }
    }
}

impl RetryPolicy {
    /// Same backoff for every retryable error.
    pub fn uniform(backoff: Duration) -> Self {
        let ms = backoff.as_millis() as u64;
        Self {
            resource_busy_backoff_ms: ms,
            operation_aborted_backoff_ms: ms,
            unknown_error_backoff_ms: ms,
        }
    }

    pub fn resource_busy_backoff(&self) -> Duration {
        Duration::from_millis(self.resource_busy_backoff_ms)
    }

    pub fn operation_aborted_backoff(&self) -> Duration {
        Duration::from_millis(self.operation_aborted_backoff_ms)
    }

    pub fn unknown_error_backoff(&self) -> Duration {
        Duration::from_millis(self.unknown_error_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Address used when none is given on the command line.
    pub address: Option<String>,

    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: None,
            connect_timeout_ms: 20_000,
            send_timeout_ms: timing::SEND_TIMEOUT.as_millis() as u64,
            read_timeout_ms: 4_000,
        }
    }
}

impl DeviceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("btle-remote")
            .join("config.toml")
    }

    /// Load configuration from the default location, creating it if missing.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
