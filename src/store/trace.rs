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

// Stored trace records and trace file naming

use crate::hash;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// File extension of stored traces
pub const TRACE_EXTENSION: &str = "utrace";

/// 100ns ticks between 0001-01-01 and the Unix epoch
const UNIX_EPOCH_TICKS: u64 = 621_355_968_000_000_000;

/// One trace file known to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceInfo {
    id: u32,
    name: String,
    path: PathBuf,
    timestamp: u64,
}

impl TraceInfo {
    pub fn new(name: String, path: PathBuf, timestamp: u64) -> Self {
        Self {
            id: hash::trace_id(&name),
            name,
            path,
            timestamp,
        }
    }

    /// Build a record for an existing file, taking the name from the file stem.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_stem()?.to_str()?.to_string();
        let timestamp = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map(system_time_to_ticks)
            .unwrap_or(0);
        Some(Self::new(name, path.to_path_buf(), timestamp))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size on disk. Traces still being recorded keep growing.
    pub fn size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|meta| meta.len()).unwrap_or(0)
    }

    /// Last write time in 100ns ticks since 0001-01-01
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

pub fn system_time_to_ticks(time: SystemTime) -> u64 {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    UNIX_EPOCH_TICKS + (since_epoch.as_nanos() / 100) as u64
}

pub fn is_trace_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(TRACE_EXTENSION)
}

/// Base name for a trace created at `now`: `YYYYMMDD_HHMMSS`
pub fn base_trace_name(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Candidate name for the `attempt`-th try; attempts after the first get `_NN`.
pub fn candidate_trace_name(base: &str, attempt: u32) -> String {
    match attempt {
        0 => base.to_string(),
        n => format!("{}_{:02}", base, n),
    }
}
