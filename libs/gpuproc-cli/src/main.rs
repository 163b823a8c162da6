// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! gpuproc CLI
//!
//! Runs a privileged/client session against the software backend and
//! reports what each side holds.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use gpuproc::ProxyConfig;

mod commands;

#[derive(Parser)]
#[command(name = "gpuproc")]
#[command(author, version, about = "gpuproc resource-proxy harness", long_about = None)]
struct Cli {
    /// Directory containing gpuproc.yaml
    #[arg(long, global = true, env = "GPUPROC_CONFIG_DIR", default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a scripted session through a loopback connection
    Loopback {
        /// Channel between the two sides
        #[arg(long, value_enum, default_value_t = LoopbackTransport::InProcess)]
        transport: LoopbackTransport,

        /// Number of video frames to send and fetch
        #[arg(long, default_value = "3")]
        frames: u32,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LoopbackTransport {
    /// In-memory channels
    InProcess,
    /// MessagePack frames over a localhost TCP socket
    Tcp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
    Yaml,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ProxyConfig::load_or_default(&cli.config_dir).apply_env_overrides();
    gpuproc::core::logging::init(&config.logging);

    match cli.command {
        Commands::Loopback {
            transport,
            frames,
            format,
        } => commands::loopback::run(&config, transport, frames, format),
        Commands::Config { format } => commands::config::show(&config, format),
    }
}
