// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Process-wide `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::core::config::{ENV_LOG, LoggingConfig};

/// Pick the filter: `GPUPROC_LOG`, then `RUST_LOG`, then the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(ENV_LOG) {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a stderr fmt subscriber. Returns `false` if a global subscriber
/// was already installed, which is not an error.
pub fn init(config: &LoggingConfig) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .with_thread_names(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("[Logging] Subscriber installed");
    }
    installed
}
