// Copyright 2025 coScene
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

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use trace_store::config::{apply_env_overrides, load_config_with_env, ConfigLoader, ServerConfig};
use trace_store::StoreService;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Trace Store - Record trace streams and serve them over a control protocol
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trace directory (overrides config file)
    #[arg(long)]
    store_dir: Option<String>,

    /// Recorder listen port (overrides config file)
    #[arg(long)]
    recorder_port: Option<u16>,

    /// Control listen port (overrides config file)
    #[arg(long)]
    control_port: Option<u16>,
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file, or start from defaults
    let mut config = match &args.config {
        Some(path) => load_config_with_env(path)?,
        None => {
            let mut config = ServerConfig::default();
            apply_env_overrides(&mut config)?;
            config
        }
    };

    // Apply CLI overrides
    if let Some(dir) = args.store_dir {
        config.store.dir = dir;
    }
    if let Some(port) = args.recorder_port {
        config.recorder.port = port;
    }
    if let Some(port) = args.control_port {
        config.control.port = port;
    }
    ConfigLoader::validate(&config)?;

    init_tracing(&config)?;

    info!("Starting Trace Store");
    match &args.config {
        Some(path) => info!("Loaded configuration from: {:?}", path),
        None => info!("Using default configuration"),
    }
    info!("Store directory: {}", config.store.dir);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let service = StoreService::start(&config).await?;

        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");

        service.shutdown().await;
        info!("Trace Store shut down successfully");
        Ok(())
    })
}

fn init_tracing(config: &ServerConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.logging.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
