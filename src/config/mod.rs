// Configuration module for trace-store
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<ServerConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Allow environment variables to override config values
pub fn apply_env_overrides(config: &mut ServerConfig) -> Result<()> {
    if let Ok(dir) = std::env::var("TRACE_STORE_DIR") {
        config.store.dir = dir;
    }

    if let Ok(port) = std::env::var("TRACE_RECORDER_PORT") {
        config.recorder.port = port
            .parse()
            .with_context(|| format!("Invalid TRACE_RECORDER_PORT '{}'", port))?;
    }

    if let Ok(port) = std::env::var("TRACE_CONTROL_PORT") {
        config.control.port = port
            .parse()
            .with_context(|| format!("Invalid TRACE_CONTROL_PORT '{}'", port))?;
    }

    ConfigLoader::validate(config)
}
