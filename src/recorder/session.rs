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

// Recorder session bookkeeping

use dashmap::DashMap;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const NO_CONTROL_PORT: u32 = u32::MAX;

/// Live state shared between a relay task and the session table
#[derive(Debug)]
pub struct SessionState {
    open: AtomicBool,
    control_port: AtomicU32,
    bytes: AtomicU64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            control_port: AtomicU32::new(NO_CONTROL_PORT),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Called once both relay endpoints are closed.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn control_port(&self) -> Option<u16> {
        u16::try_from(self.control_port.load(Ordering::Relaxed)).ok()
    }

    pub fn set_control_port(&self, port: u16) {
        self.control_port.store(u32::from(port), Ordering::Relaxed);
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn add_bytes(&self, count: u64) {
        self.bytes.fetch_add(count, Ordering::Relaxed);
    }
}

/// One producer connection being recorded into a trace
#[derive(Debug, Clone)]
pub struct RecorderSession {
    id: u32,
    trace_id: u32,
    peer: SocketAddr,
    state: Arc<SessionState>,
}

impl RecorderSession {
    pub fn new(id: u32, trace_id: u32, peer: SocketAddr, state: Arc<SessionState>) -> Self {
        Self {
            id,
            trace_id,
            peer,
            state,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn trace_id(&self) -> u32 {
        self.trace_id
    }

    pub fn ip_address(&self) -> IpAddr {
        self.peer.ip()
    }

    pub fn control_port(&self) -> Option<u16> {
        self.state.control_port()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            trace_id: self.trace_id,
            ip_address: self.peer.ip(),
            control_port: self.state.control_port(),
            bytes: self.state.bytes(),
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: u32,
    pub trace_id: u32,
    pub ip_address: IpAddr,
    pub control_port: Option<u16>,
    pub bytes: u64,
}

/// Active sessions keyed by session id
///
/// Closed sessions linger until the next `reap`; the recorder reaps on its tick.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<u32, RecorderSession>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns true if it replaced one with the same id.
    pub fn insert(&self, session: RecorderSession) -> bool {
        let id = session.id();
        match self.sessions.insert(id, session) {
            Some(previous) => {
                warn!(
                    "Session id {:#010x} collides with session for {} (trace {:#010x}), replacing it",
                    id,
                    previous.ip_address(),
                    previous.trace_id()
                );
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// True while the session is listed, open or not yet reaped
    pub fn contains(&self, id: u32) -> bool {
        self.sessions.contains_key(&id)
    }

    /// True if the session is listed and its relay is still running
    pub fn is_active(&self, id: u32) -> bool {
        self.sessions.get(&id).is_some_and(|session| session.is_open())
    }

    /// Id of the open session writing `trace_id`, if any
    pub fn find_by_trace(&self, trace_id: u32) -> Option<u32> {
        self.sessions
            .iter()
            .find(|entry| entry.trace_id() == trace_id && entry.is_open())
            .map(|entry| entry.id())
    }

    pub fn get(&self, id: u32) -> Option<SessionInfo> {
        self.sessions.get(&id).map(|session| session.info())
    }

    /// Sessions ordered by id
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|entry| entry.info()).collect();
        sessions.sort_by_key(|session| session.id);
        sessions
    }

    /// Drop every closed session and return the removed ids.
    pub fn reap(&self) -> Vec<u32> {
        let mut removed = Vec::new();
        self.sessions.retain(|&id, session| {
            let keep = session.is_open();
            if !keep {
                removed.push(id);
            }
            keep
        });

        for id in &removed {
            info!("Reaped recorder session {:#010x}", id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: u32, trace_id: u32) -> (RecorderSession, Arc<SessionState>) {
        let state = Arc::new(SessionState::new());
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        (RecorderSession::new(id, trace_id, peer, state.clone()), state)
    }

    #[test]
    fn test_reap_removes_only_closed_sessions() {
        let table = SessionTable::new();
        let (a, _a_state) = session(1, 100);
        let (b, b_state) = session(2, 200);
        let (c, _c_state) = session(3, 300);
        table.insert(a);
        table.insert(b);
        table.insert(c);

        assert!(table.reap().is_empty());
        assert_eq!(table.len(), 3);

        b_state.mark_closed();
        assert!(table.contains(2));
        assert!(!table.is_active(2));

        assert_eq!(table.reap(), vec![2]);
        assert_eq!(table.len(), 2);
        assert!(table.contains(1));
        assert!(table.contains(3));
        assert!(!table.contains(2));
    }

    #[test]
    fn test_insert_reports_id_collision() {
        let table = SessionTable::new();
        let (first, _first_state) = session(5, 100);
        let (second, _second_state) = session(5, 200);

        assert!(!table.insert(first));
        assert!(table.insert(second));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(5).map(|s| s.trace_id), Some(200));
    }

    #[test]
    fn test_find_by_trace_skips_closed() {
        let table = SessionTable::new();
        let (a, a_state) = session(1, 100);
        table.insert(a);

        assert_eq!(table.find_by_trace(100), Some(1));
        assert_eq!(table.find_by_trace(999), None);

        a_state.mark_closed();
        assert_eq!(table.find_by_trace(100), None);
    }

    #[test]
    fn test_snapshot_is_sorted_and_reports_progress() {
        let table = SessionTable::new();
        let (b, b_state) = session(20, 2);
        let (a, _) = session(10, 1);
        table.insert(b);
        table.insert(a);

        b_state.set_control_port(1337);
        b_state.add_bytes(42);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, 10);
        assert_eq!(snapshot[1].id, 20);
        assert_eq!(snapshot[1].control_port, Some(1337));
        assert_eq!(snapshot[1].bytes, 42);
        assert_eq!(snapshot[0].control_port, None);
    }
}
