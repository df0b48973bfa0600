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

// Identifier hashing for traces and recorder sessions

use std::net::{IpAddr, SocketAddr};

const HASH_SEED: u32 = 5381;

/// djb2-style 32-bit hash over raw bytes
///
/// Trace ids are derived from the trace name with this function, so it must stay
/// stable across releases: stored traces are re-identified from their file names.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    bytes.iter().fold(HASH_SEED, |value, &byte| {
        value.wrapping_shl(5).wrapping_add(value).wrapping_add(u32::from(byte))
    })
}

/// Trace id for a trace name (the file stem)
pub fn trace_id(name: &str) -> u32 {
    hash_bytes(name.as_bytes())
}

/// Session id for an accepted producer connection
pub fn session_id(peer: SocketAddr, local_port: u16) -> u32 {
    let mut key = Vec::with_capacity(20);
    match peer.ip() {
        IpAddr::V4(ip) => key.extend_from_slice(&ip.octets()),
        IpAddr::V6(ip) => key.extend_from_slice(&ip.octets()),
    }
    key.extend_from_slice(&peer.port().to_le_bytes());
    key.extend_from_slice(&local_port.to_le_bytes());
    hash_bytes(&key)
}
