// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ServerConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::parse(&content)
    }

    /// Parse and validate YAML configuration text
    pub fn parse(content: &str) -> Result<ServerConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: ServerConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${TRACE_DIR:-/var/traces} -> /var/traces (if TRACE_DIR not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid substitution pattern")?;

        let substituted = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    // Keep original if no default and var not found
                    None => format!("${{{}}}", var_name),
                },
            }
        });

        Ok(substituted.into_owned())
    }

    /// Validate configuration
    pub fn validate(config: &ServerConfig) -> Result<()> {
        if config.store.dir.trim().is_empty() {
            bail!("store.dir cannot be empty");
        }

        if config.recorder.tick_interval_ms == 0 {
            bail!("recorder.tick_interval_ms must be > 0");
        }

        if config.recorder.buffer_size == 0 {
            bail!("recorder.buffer_size must be > 0");
        }

        if config.relay.buffer_size == 0 {
            bail!("relay.buffer_size must be > 0");
        }

        if config.relay.poll_interval_ms == 0 {
            bail!("relay.poll_interval_ms must be > 0");
        }

        if config.control.max_frame_bytes == 0 {
            bail!("control.max_frame_bytes must be > 0");
        }

        if config.recorder.port != 0 && config.recorder.port == config.control.port {
            bail!(
                "recorder.port and control.port must differ (both are {})",
                config.recorder.port
            );
        }

        if config.runtime.worker_threads == 0 {
            bail!("runtime.worker_threads must be > 0");
        }

        match config.logging.format.as_str() {
            "text" | "json" => {}
            unknown => bail!("Unknown logging.format: '{}'. Supported: text, json", unknown),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("TRACE_STORE_TEST_VAR", "test_value");

        let input = "dir: ${TRACE_STORE_TEST_VAR}";
        let output = ConfigLoader::substitute_env_vars(input).unwrap();
        assert_eq!(output, "dir: test_value");

        std::env::remove_var("TRACE_STORE_TEST_VAR");
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("TRACE_STORE_TEST_VAR2");

        let input = "dir: ${TRACE_STORE_TEST_VAR2:-/srv/traces}";
        let output = ConfigLoader::substitute_env_vars(input).unwrap();
        assert_eq!(output, "dir: /srv/traces");
    }

    #[test]
    fn test_unset_var_without_default_is_kept() {
        std::env::remove_var("TRACE_STORE_TEST_VAR3");

        let input = "dir: ${TRACE_STORE_TEST_VAR3}";
        let output = ConfigLoader::substitute_env_vars(input).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ConfigLoader::parse("{}").unwrap();
        assert_eq!(config.recorder.port, 1981);
        assert_eq!(config.control.port, 1989);
        assert_eq!(config.runtime.worker_threads, 1);
        assert!(config.store.watch);
    }

    #[test]
    fn test_validation_rejects_shared_port() {
        let mut config = ServerConfig::default();
        config.control.port = config.recorder.port;

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("must differ"));
    }

    #[test]
    fn test_validation_allows_two_ephemeral_ports() {
        let mut config = ServerConfig::default();
        config.recorder.port = 0;
        config.control.port = 0;

        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validation_invalid_tick_interval() {
        let mut config = ServerConfig::default();
        config.recorder.tick_interval_ms = 0;

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("tick_interval_ms"));
    }

    #[test]
    fn test_validation_unknown_log_format() {
        let mut config = ServerConfig::default();
        config.logging.format = "xml".to_string();

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("logging.format"));
    }
}
