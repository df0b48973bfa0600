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

// Trace store
//
// A flat directory of `<name>.utrace` files plus an in-memory index of them.
// Ids, sizes and timestamps are derived from the files themselves; nothing else
// is persisted. The index is rebuilt wholesale by `refresh`.

pub mod trace;
pub mod watcher;

pub use trace::{TraceInfo, TRACE_EXTENSION};
pub use watcher::StoreWatcher;

use crate::error::StoreError;
use crate::hash;
use crate::io::{FileReader, FileWriter};
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::OpenOptions;
use tracing::{debug, info, warn};

use trace::{base_trace_name, candidate_trace_name, is_trace_file, system_time_to_ticks};

/// Disambiguation suffixes tried per wall-clock second
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Default)]
struct TraceIndex {
    traces: Vec<TraceInfo>,
    by_id: HashMap<u32, usize>,
    change_serial: u32,
    /// Traces registered by `create_trace`, tagged with a creation sequence
    /// number, that a scan in progress may not have seen yet
    recent: Vec<(u64, TraceInfo)>,
    created: u64,
}

impl TraceIndex {
    /// Returns false if the id is already taken; the existing entry is kept.
    fn add(&mut self, trace: TraceInfo) -> bool {
        if self.by_id.contains_key(&trace.id()) {
            return false;
        }
        self.change_serial = self.change_serial.wrapping_add(trace.id());
        self.by_id.insert(trace.id(), self.traces.len());
        self.traces.push(trace);
        true
    }

    fn get(&self, id: u32) -> Option<&TraceInfo> {
        self.by_id.get(&id).map(|&index| &self.traces[index])
    }
}

/// On-disk registry of recorded traces
pub struct Store {
    dir: PathBuf,
    index: RwLock<TraceIndex>,
    /// Serializes `refresh` calls; `create_trace` never takes it
    scan: Mutex<()>,
}

impl Store {
    /// Open (creating if needed) the store directory and scan it.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let store = Self {
            dir,
            index: RwLock::new(TraceIndex::default()),
            scan: Mutex::new(()),
        };
        store.refresh()?;

        info!(
            "Opened trace store at {} ({} traces)",
            store.dir.display(),
            store.trace_count()
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a new, uniquely named trace file and register it.
    pub async fn create_trace(&self) -> Result<(u32, FileWriter), StoreError> {
        self.create_trace_at(Local::now()).await
    }

    /// Like `create_trace`, naming the trace after `now` instead of the current time.
    pub async fn create_trace_at(
        &self,
        now: DateTime<Local>,
    ) -> Result<(u32, FileWriter), StoreError> {
        let base = base_trace_name(now);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = candidate_trace_name(&base, attempt);
            if self.has_trace(hash::trace_id(&name)) {
                continue;
            }

            let path = self.trace_path(&name);
            let file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            };

            let trace = TraceInfo::new(name, path, system_time_to_ticks(SystemTime::now()));
            let id = trace.id();
            info!("Created trace '{}' ({:#010x})", trace.name(), id);
            {
                let mut index = self.index.write();
                index.created += 1;
                let sequence = index.created;
                index.recent.push((sequence, trace.clone()));
                // A watcher-triggered refresh may already have picked the file up.
                index.add(trace);
            }

            return Ok((id, FileWriter::from_file(file)));
        }

        Err(StoreError::NamesExhausted(base))
    }

    /// Open a trace for reading. The path is re-derived from the trace name.
    pub async fn open_trace(&self, id: u32) -> Result<FileReader, StoreError> {
        let name = self
            .index
            .read()
            .get(id)
            .map(|trace| trace.name().to_string())
            .ok_or(StoreError::UnknownTrace(id))?;

        let reader = FileReader::open(self.trace_path(&name)).await?;
        Ok(reader)
    }

    pub fn trace_count(&self) -> usize {
        self.index.read().traces.len()
    }

    /// Trace at `index` in scan order (name order at the last refresh, then creation order)
    pub fn trace_info(&self, index: usize) -> Option<TraceInfo> {
        self.index.read().traces.get(index).cloned()
    }

    pub fn trace_by_id(&self, id: u32) -> Option<TraceInfo> {
        self.index.read().get(id).cloned()
    }

    pub fn has_trace(&self, id: u32) -> bool {
        self.index.read().by_id.contains_key(&id)
    }

    /// Wrapping sum of the ids of all indexed traces
    pub fn change_serial(&self) -> u32 {
        self.index.read().change_serial
    }

    pub fn traces(&self) -> Vec<TraceInfo> {
        self.index.read().traces.clone()
    }

    /// Rebuild the index from the directory contents.
    ///
    /// Traces created while the scan runs are carried over into the new index.
    pub fn refresh(&self) -> Result<(), StoreError> {
        let _scan = self.scan.lock();
        // Every trace created up to here already has its file on disk.
        let seen_up_to = self.index.read().created;

        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("Skipping unreadable store entry: {}", err);
                    continue;
                }
            };

            let path = entry.path();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file || !is_trace_file(&path) {
                continue;
            }

            if let Some(trace) = TraceInfo::from_path(&path) {
                found.push(trace);
            }
        }

        found.sort_by(|a, b| a.name().cmp(b.name()));

        let mut index = TraceIndex::default();
        for trace in found {
            let (id, path) = (trace.id(), trace.path().to_path_buf());
            if !index.add(trace) {
                warn!(
                    "Trace {} aliases id {:#010x} of an existing trace, ignoring it",
                    path.display(),
                    id
                );
            }
        }

        let mut current = self.index.write();
        current.recent.retain(|(sequence, _)| *sequence > seen_up_to);
        for (_, trace) in &current.recent {
            if !index.by_id.contains_key(&trace.id()) && trace.path().exists() {
                index.add(trace.clone());
            }
        }
        index.recent = std::mem::take(&mut current.recent);
        index.created = current.created;

        let (count, serial) = (index.traces.len(), index.change_serial);
        *current = index;
        drop(current);

        debug!("Store refreshed: {} traces, change serial {:#010x}", count, serial);
        Ok(())
    }

    fn trace_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, TRACE_EXTENSION))
    }
}
