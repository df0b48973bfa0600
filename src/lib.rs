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

// Trace store: records raw trace streams pushed over TCP into timestamped files
// and serves them back through a CBOR request/response control plane.
//
// - `recorder` accepts producer connections and relays each one into a new trace
// - `store` owns the trace directory and its in-memory index
// - `control` answers control-plane requests and starts download relays
// - `client` is a blocking client for the control plane

pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod hash;
pub mod io;
pub mod protocol;
pub mod recorder;
pub mod service;
pub mod store;
pub mod trace_relay;

// Re-export main types
pub use client::{SessionDescriptor, StoreClient, StoreStatus, TraceDescriptor};
pub use config::{load_config, load_config_with_env, ServerConfig};
pub use control::{ControlContext, ControlServer};
pub use error::{ClientError, ProtocolError, StoreError};
pub use protocol::{CborPayload, Status};
pub use recorder::{Recorder, RecorderSession, SessionTable};
pub use service::StoreService;
pub use store::{Store, StoreWatcher, TraceInfo};
pub use trace_relay::TraceRelay;
