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

// Configuration types for trace-store

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub recorder: RecorderSettings,
    #[serde(default)]
    pub control: ControlSettings,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Trace store directory settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_dir")]
    pub dir: String,

    /// Re-scan the directory when files change underneath the store
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Delay between a change notification and the re-scan
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            watch: true,
            settle_delay_ms: default_settle_delay(),
        }
    }
}

impl StoreSettings {
    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Producer-facing listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderSettings {
    #[serde(default = "default_any_host")]
    pub host: String,

    /// 0 lets the OS pick a port
    #[serde(default = "default_recorder_port")]
    pub port: u16,

    /// Session reaping cadence
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            host: default_any_host(),
            port: default_recorder_port(),
            tick_interval_ms: default_tick_interval(),
            keepalive_secs: default_keepalive(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl RecorderSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Control-plane listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlSettings {
    #[serde(default = "default_any_host")]
    pub host: String,

    #[serde(default = "default_control_port")]
    pub port: u16,

    #[serde(default = "default_max_frame")]
    pub max_frame_bytes: usize,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            host: default_any_host(),
            port: default_control_port(),
            max_frame_bytes: default_max_frame(),
        }
    }
}

/// Trace download relay settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelaySettings {
    /// How long a relay waits for its single client
    #[serde(default = "default_accept_timeout")]
    pub accept_timeout_secs: u64,

    /// Back-off between reads while tailing a trace that is still recording
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            accept_timeout_secs: default_accept_timeout(),
            poll_interval_ms: default_poll_interval(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl RelaySettings {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Async runtime settings
///
/// Sessions, the store index and relays are synchronized, but the service has only
/// been exercised with a single worker, which is the default.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_store_dir() -> String { "./traces".to_string() }
fn default_settle_delay() -> u64 { 500 }
fn default_any_host() -> String { "0.0.0.0".to_string() }
fn default_recorder_port() -> u16 { 1981 }
fn default_control_port() -> u16 { 1989 }
fn default_tick_interval() -> u64 { 500 }
fn default_keepalive() -> u64 { 15 }
fn default_buffer_size() -> usize { 64 * 1024 }
fn default_max_frame() -> usize { 1024 * 1024 }
fn default_accept_timeout() -> u64 { 30 }
fn default_poll_interval() -> u64 { 250 }
fn default_worker_threads() -> usize { 1 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
