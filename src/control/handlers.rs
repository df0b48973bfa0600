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

// Control-plane method handlers

use crate::config::RelaySettings;
use crate::error::StoreError;
use crate::protocol::{CborPayload, Status, STORE_PROTOCOL_VERSION};
use crate::recorder::SessionTable;
use crate::store::Store;
use crate::trace_relay::TraceRelay;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything the handlers need. Shared by all control connections.
pub struct ControlContext {
    store: Arc<Store>,
    sessions: Arc<SessionTable>,
    recorder_port: u16,
    relay_host: IpAddr,
    relay: RelaySettings,
}

impl ControlContext {
    pub fn new(
        store: Arc<Store>,
        sessions: Arc<SessionTable>,
        recorder_port: u16,
        relay_host: IpAddr,
        relay: RelaySettings,
    ) -> Self {
        Self {
            store,
            sessions,
            recorder_port,
            relay_host,
            relay,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Answer one request. Never fails; problems become a non-200 `$status`.
    pub async fn dispatch(&self, request: &CborPayload) -> CborPayload {
        let Some(method) = request.method() else {
            debug!("Control request without $method");
            return CborPayload::response(Status::BadRequest);
        };

        let response = match method {
            "connect" => self.on_connect(),
            "status" => self.on_status(),
            "trace_count" | "trace/count" => self.on_trace_count(),
            "trace_info" | "trace/info" => self.on_trace_info(request),
            "trace_read" | "trace/read" => self.on_trace_read(request).await,
            "session_count" | "session/count" => self.on_session_count(),
            "session_info" | "session/info" => self.on_session_info(request),
            "store_refresh" | "store/refresh" => self.on_store_refresh().await,
            _ => CborPayload::response(Status::MethodNotAllowed),
        };

        debug!(
            "Control '{}' -> {}",
            method,
            response.status_code().unwrap_or_default()
        );
        response
    }

    fn on_connect(&self) -> CborPayload {
        let mut response = CborPayload::response(Status::Success);
        response.set_integer("version", STORE_PROTOCOL_VERSION);
        response
    }

    fn on_status(&self) -> CborPayload {
        let mut response = CborPayload::response(Status::Success);
        response
            .set_integer("recorder_port", i64::from(self.recorder_port))
            .set_integer("change_serial", i64::from(self.store.change_serial()))
            .set_integer("session_count", self.sessions.len() as i64);
        response
    }

    fn on_trace_count(&self) -> CborPayload {
        let mut response = CborPayload::response(Status::Success);
        response.set_integer("count", self.store.trace_count() as i64);
        response
    }

    fn on_trace_info(&self, request: &CborPayload) -> CborPayload {
        let Some(trace) = index_field(request).and_then(|index| self.store.trace_info(index))
        else {
            return CborPayload::response(Status::BadRequest);
        };

        let mut response = CborPayload::response(Status::Success);
        response
            .set_integer("id", i64::from(trace.id()))
            .set_integer("size", trace.size() as i64)
            .set_string("name", trace.name())
            .set_integer("timestamp", trace.timestamp() as i64);
        response
    }

    async fn on_trace_read(&self, request: &CborPayload) -> CborPayload {
        let Some(id) = request.get_integer("id").and_then(|id| u32::try_from(id).ok()) else {
            return CborPayload::response(Status::BadRequest);
        };

        let source = match self.store.open_trace(id).await {
            Ok(source) => source,
            Err(StoreError::UnknownTrace(_)) => return CborPayload::response(Status::BadRequest),
            Err(err) => {
                warn!("Could not open trace {:#010x} for reading: {}", id, err);
                return CborPayload::response(Status::InternalError);
            }
        };

        // A trace that is still being recorded is tailed rather than cut at its current end.
        let tail = self
            .sessions
            .find_by_trace(id)
            .map(|session_id| (session_id, self.sessions.clone()));

        let relay = match TraceRelay::bind(self.relay_host, source, tail, &self.relay).await {
            Ok(relay) => relay,
            Err(err) => {
                warn!("Could not bind a relay for trace {:#010x}: {}", id, err);
                return CborPayload::response(Status::InternalError);
            }
        };

        let port = relay.port();
        relay.spawn();

        let mut response = CborPayload::response(Status::Success);
        response.set_integer("port", i64::from(port));
        response
    }

    fn on_session_count(&self) -> CborPayload {
        let mut response = CborPayload::response(Status::Success);
        response.set_integer("count", self.sessions.len() as i64);
        response
    }

    fn on_session_info(&self, request: &CborPayload) -> CborPayload {
        let sessions = self.sessions.snapshot();
        let Some(session) = index_field(request).and_then(|index| sessions.get(index)) else {
            return CborPayload::response(Status::BadRequest);
        };

        let mut response = CborPayload::response(Status::Success);
        response
            .set_integer("id", i64::from(session.id))
            .set_integer("trace_id", i64::from(session.trace_id))
            .set_string("ip_address", &session.ip_address.to_string())
            .set_integer("bytes", session.bytes as i64);
        if let Some(port) = session.control_port {
            response.set_integer("control_port", i64::from(port));
        }
        response
    }

    async fn on_store_refresh(&self) -> CborPayload {
        let store = self.store.clone();
        let refreshed = tokio::task::spawn_blocking(move || store.refresh()).await;

        match refreshed {
            Ok(Ok(())) => {
                let mut response = CborPayload::response(Status::Success);
                response
                    .set_integer("count", self.store.trace_count() as i64)
                    .set_integer("change_serial", i64::from(self.store.change_serial()));
                response
            }
            Ok(Err(err)) => {
                warn!("Store refresh requested by client failed: {}", err);
                CborPayload::response(Status::InternalError)
            }
            Err(err) => {
                warn!("Store refresh task failed: {}", err);
                CborPayload::response(Status::InternalError)
            }
        }
    }
}

fn index_field(request: &CborPayload) -> Option<usize> {
    request
        .get_integer("index")
        .and_then(|index| usize::try_from(index).ok())
}
