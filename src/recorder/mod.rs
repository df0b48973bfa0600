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

// Producer-facing recorder
//
// Accepts trace producer connections and records each one into a new store trace.
// Sessions are tracked in a shared table and reaped on a fixed tick once their
// relay has finished.

pub mod relay;
pub mod session;

pub use relay::{CloseReason, RelayMachine, RelayState, RelayStep};
pub use session::{RecorderSession, SessionInfo, SessionState, SessionTable};

use crate::config::RecorderSettings;
use crate::hash;
use crate::io::{Readable, SocketStream, Writable};
use crate::store::Store;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub struct Recorder {
    listener: TcpListener,
    store: Arc<Store>,
    sessions: Arc<SessionTable>,
    settings: RecorderSettings,
}

impl Recorder {
    pub async fn bind(settings: &RecorderSettings, store: Arc<Store>) -> Result<Self> {
        let listener = TcpListener::bind((settings.host.as_str(), settings.port))
            .await
            .with_context(|| {
                format!(
                    "Failed to bind recorder on {}:{}",
                    settings.host, settings.port
                )
            })?;

        info!("Recorder listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            store,
            sessions: Arc::new(SessionTable::new()),
            settings: settings.clone(),
        })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|addr| addr.port()).unwrap_or(0)
    }

    pub fn sessions(&self) -> Arc<SessionTable> {
        self.sessions.clone()
    }

    /// Accept producers and reap finished sessions until the task is dropped.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.settings.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.on_accept(stream, peer).await,
                    Err(err) => {
                        warn!("Recorder accept failed: {}", err);
                        // Avoid spinning when the process is out of descriptors.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = ticker.tick() => {
                    self.sessions.reap();
                }
            }
        }
    }

    async fn on_accept(&self, stream: TcpStream, peer: SocketAddr) {
        let local_port = stream.local_addr().map(|addr| addr.port()).unwrap_or(0);
        let mut input = SocketStream::new(stream, peer);
        if let Err(err) = input.set_keepalive(self.settings.keepalive()) {
            warn!("Could not enable keep-alive for producer {}: {}", peer, err);
        }

        let (trace_id, mut output) = match self.store.create_trace().await {
            Ok(created) => created,
            Err(err) => {
                error!("Dropping producer {}: could not create trace: {}", peer, err);
                let _ = Readable::close(&mut input).await;
                return;
            }
        };

        let session_id = hash::session_id(peer, local_port);
        let state = Arc::new(SessionState::new());
        self.sessions
            .insert(RecorderSession::new(session_id, trace_id, peer, state.clone()));

        info!(
            "Recording producer {} as session {:#010x} into trace {:#010x}",
            peer, session_id, trace_id
        );

        let buffer_size = self.settings.buffer_size;
        tokio::spawn(async move {
            let mut machine = RelayMachine::new();
            let reason = relay::drive_relay(
                &mut machine,
                &mut input,
                &mut output,
                buffer_size,
                &state,
            )
            .await;

            if let Err(err) = Writable::close(&mut output).await {
                warn!("Closing trace {:#010x} failed: {}", trace_id, err);
            }
            let _ = Readable::close(&mut input).await;
            // Only now is every byte on disk; relays tailing this trace rely on it.
            state.mark_closed();

            match reason {
                CloseReason::InputClosed => info!(
                    "Session {:#010x} finished: {} ({} bytes)",
                    session_id,
                    reason,
                    machine.relayed()
                ),
                _ => warn!(
                    "Session {:#010x} aborted: {} ({} bytes)",
                    session_id,
                    reason,
                    machine.relayed()
                ),
            }
            debug!("Session {:#010x} awaiting reap", session_id);
        });
    }
}
