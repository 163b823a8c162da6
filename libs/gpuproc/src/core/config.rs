// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Connection configuration via `gpuproc.yaml`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::heap::DEFAULT_MAX_RELEASED_BEFORE_CREATION;
use crate::core::{ProxyError, Result};

/// Overrides the payload fetch timeout, in milliseconds. `0` disables it.
pub const ENV_FETCH_TIMEOUT_MS: &str = "GPUPROC_FETCH_TIMEOUT_MS";
pub const ENV_MAX_RELEASED_BEFORE_CREATION: &str = "GPUPROC_MAX_RELEASED_BEFORE_CREATION";
/// Log filter directive, e.g. `gpuproc=debug`.
pub const ENV_LOG: &str = "GPUPROC_LOG";

/// Largest wire frame accepted by [`crate::core::wire`], 64 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when neither `GPUPROC_LOG` nor `RUST_LOG` is set.
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

/// Configuration shared by both ends of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// How long a blocking payload fetch waits for its reply. `None`, the
    /// default, waits until the reply arrives or the connection closes.
    ///
    /// A blocking caller that times out gives up on its own, but the fetch
    /// stays in flight for everyone else sharing it.
    pub fetch_timeout_ms: Option<u64>,

    /// Tombstones kept for identifiers destroyed before their creation was
    /// processed.
    pub max_released_before_creation: usize,

    /// Prefix for dispatch and transport thread names.
    pub thread_name_prefix: String,

    pub max_frame_size: usize,

    pub logging: LoggingConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: None,
            max_released_before_creation: DEFAULT_MAX_RELEASED_BEFORE_CREATION,
            thread_name_prefix: "gpuproc".to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            logging: LoggingConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "gpuproc.yaml";

    /// Load configuration from a directory. Returns error if the file is
    /// missing or cannot be parsed.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            ProxyError::Configuration(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let config = Self::from_yaml_str(&content).map_err(|e| {
            ProxyError::Configuration(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;

        tracing::info!("[Config] Loaded {}", config_path.display());
        Ok(config)
    }

    /// Load configuration from a directory, returning defaults if the file is
    /// missing or unparseable.
    pub fn load_or_default(dir: &Path) -> Self {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            tracing::debug!(
                "[Config] No {} found in {}, using defaults",
                Self::FILE_NAME,
                dir.display()
            );
            return Self::default();
        }

        match Self::load(dir) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("[Config] {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| ProxyError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ProxyError::Configuration(e.to_string()))
    }

    /// Apply `GPUPROC_*` environment overrides on top of the loaded values.
    /// Malformed values are ignored with a warning.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var(ENV_FETCH_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(0) => self.fetch_timeout_ms = None,
                Ok(ms) => self.fetch_timeout_ms = Some(ms),
                Err(e) => tracing::warn!("[Config] Ignoring {}={:?}: {}", ENV_FETCH_TIMEOUT_MS, raw, e),
            }
        }
        if let Ok(raw) = std::env::var(ENV_MAX_RELEASED_BEFORE_CREATION) {
            match raw.trim().parse::<usize>() {
                Ok(cap) if cap > 0 => self.max_released_before_creation = cap,
                Ok(_) => tracing::warn!(
                    "[Config] Ignoring {}=0: the cap must be positive",
                    ENV_MAX_RELEASED_BEFORE_CREATION
                ),
                Err(e) => tracing::warn!(
                    "[Config] Ignoring {}={:?}: {}",
                    ENV_MAX_RELEASED_BEFORE_CREATION,
                    raw,
                    e
                ),
            }
        }
        if let Ok(level) = std::env::var(ENV_LOG) {
            if !level.trim().is_empty() {
                self.logging.level = level;
            }
        }
        self
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<()> {
        if self.max_released_before_creation == 0 {
            return Err(ProxyError::Configuration(
                "max_released_before_creation must be positive".to_string(),
            ));
        }
        if self.max_frame_size < 1024 {
            return Err(ProxyError::Configuration(format!(
                "max_frame_size {} is below the 1024 byte minimum",
                self.max_frame_size
            )));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ProxyError::Configuration(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
