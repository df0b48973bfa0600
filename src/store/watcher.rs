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

// Directory watcher that keeps the store index in step with the file system

use super::trace::is_trace_file;
use super::Store;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Re-scans the store whenever trace files appear, vanish or are renamed.
///
/// Notifications are coalesced: after the first one the watcher waits for the
/// settle delay (file metadata can lag the notification), drops whatever else
/// arrived meanwhile, then refreshes once.
pub struct StoreWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl StoreWatcher {
    pub fn spawn(store: Arc<Store>, settle_delay: Duration) -> notify::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) if is_relevant(&event) => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(err) => warn!("Store watcher error: {}", err),
            }
        })?;
        watcher.watch(store.dir(), RecursiveMode::NonRecursive)?;

        info!("Watching {} for trace changes", store.dir().display());

        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                tokio::time::sleep(settle_delay).await;
                while rx.try_recv().is_ok() {}

                let before = store.change_serial();
                let scan = store.clone();
                match tokio::task::spawn_blocking(move || scan.refresh()).await {
                    Ok(Ok(())) => {
                        let after = store.change_serial();
                        if before != after {
                            info!(
                                "Trace set changed on disk: {} traces, change serial {:#010x}",
                                store.trace_count(),
                                after
                            );
                        } else {
                            debug!("Store re-scanned, no change");
                        }
                    }
                    Ok(Err(err)) => warn!("Store refresh after change notification failed: {}", err),
                    Err(err) => warn!("Store refresh task failed: {}", err),
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    /// Stop watching. Pending notifications are discarded.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for StoreWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn is_relevant(event: &Event) -> bool {
    let kind_matters = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    );
    kind_matters && event.paths.iter().any(|path| is_trace_file(path))
}
