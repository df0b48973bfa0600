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

// Store service composition root
//
// Owns the store, the recorder, the control server and the optional directory
// watcher, wiring them together from one `ServerConfig`.

use crate::config::ServerConfig;
use crate::control::{ControlContext, ControlServer};
use crate::recorder::{Recorder, SessionTable};
use crate::store::{Store, StoreWatcher};
use anyhow::{Context, Result};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct StoreService {
    store: Arc<Store>,
    sessions: Arc<SessionTable>,
    recorder_port: u16,
    control_port: u16,
    watcher: Option<StoreWatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl StoreService {
    /// Open the store and start both listeners on the current runtime.
    pub async fn start(config: &ServerConfig) -> Result<Self> {
        let store = Arc::new(
            Store::open(config.store.dir_path())
                .with_context(|| format!("Failed to open store at '{}'", config.store.dir))?,
        );

        let watcher = if config.store.watch {
            match StoreWatcher::spawn(store.clone(), config.store.settle_delay()) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    // Watching is an optimisation; clients can still ask for a re-scan.
                    warn!("Directory watching disabled: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let recorder = Recorder::bind(&config.recorder, store.clone()).await?;
        let recorder_port = recorder.port();
        let sessions = recorder.sessions();

        let relay_host: IpAddr = config
            .control
            .host
            .parse()
            .with_context(|| format!("Invalid control.host '{}'", config.control.host))?;
        let context = Arc::new(ControlContext::new(
            store.clone(),
            sessions.clone(),
            recorder_port,
            relay_host,
            config.relay.clone(),
        ));
        let control = ControlServer::bind(&config.control, context).await?;
        let control_port = control.port();

        let tasks = vec![tokio::spawn(recorder.run()), tokio::spawn(control.run())];

        info!(
            "Trace store service started (store {}, recorder port {}, control port {})",
            store.dir().display(),
            recorder_port,
            control_port
        );

        Ok(Self {
            store,
            sessions,
            recorder_port,
            control_port,
            watcher,
            tasks,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    pub fn recorder_port(&self) -> u16 {
        self.recorder_port
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    /// Stop accepting connections and stop watching the store directory.
    ///
    /// Relays already running finish on their own.
    pub async fn shutdown(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("Trace store service stopped");
    }
}
