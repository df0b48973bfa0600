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

// Error types shared by the store, the control protocol and the client

use std::io;
use thiserror::Error;

/// Failures surfaced by [`crate::store::Store`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown trace id {0:#010x}")]
    UnknownTrace(u32),

    #[error("could not allocate a unique trace name for '{0}'")]
    NamesExhausted(String),
}

/// Failures while encoding, decoding or framing control-plane payloads
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("CBOR decode failed: {0}")]
    Decode(String),

    #[error("CBOR encode failed: {0}")]
    Encode(String),

    #[error("payload is not a CBOR map")]
    NotAMap,

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("missing or mistyped field '{0}'")]
    MissingField(&'static str),
}

/// Failures seen by [`crate::client::StoreClient`]
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("'{method}' failed with status {status}")]
    Status { method: String, status: i64 },
}
