// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Effective configuration, after file and environment overrides.

use anyhow::{Context, Result};
use gpuproc::ProxyConfig;

use crate::OutputFormat;

pub fn show(config: &ProxyConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(config).context("Failed to encode configuration")?
            );
        }
        OutputFormat::Yaml => {
            print!("{}", config.to_yaml_string()?);
        }
        OutputFormat::Pretty => {
            let timeout = config
                .fetch_timeout_ms
                .map(|ms| format!("{} ms", ms))
                .unwrap_or_else(|| "none".to_string());
            println!("Configuration ({}):\n", ProxyConfig::FILE_NAME);
            println!("  fetch timeout:                {}", timeout);
            println!(
                "  max released before creation: {}",
                config.max_released_before_creation
            );
            println!("  thread name prefix:           {}", config.thread_name_prefix);
            println!("  max frame size:               {} bytes", config.max_frame_size);
            println!("  log level:                    {}", config.logging.level);
        }
    }
    Ok(())
}
