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

// One-shot trace download relay
//
// Listens on an ephemeral port, serves exactly one client by streaming a stored
// trace to it, then goes away. When the trace is still being recorded the relay
// keeps polling past the current end of file until the recording session closes.

use crate::config::RelaySettings;
use crate::io::{FileReader, Readable, SocketStream, Writable};
use crate::recorder::SessionTable;
use bytes::BytesMut;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct TraceRelay {
    listener: TcpListener,
    source: FileReader,
    tail: Option<(u32, Arc<SessionTable>)>,
    accept_timeout: Duration,
    poll_interval: Duration,
    buffer_size: usize,
}

impl TraceRelay {
    /// Bind an OS-assigned port on `host`. `tail` names the recorder session still
    /// writing the trace, if any.
    pub async fn bind(
        host: IpAddr,
        source: FileReader,
        tail: Option<(u32, Arc<SessionTable>)>,
        settings: &RelaySettings,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind((host, 0)).await?;
        Ok(Self {
            listener,
            source,
            tail,
            accept_timeout: settings.accept_timeout(),
            poll_interval: settings.poll_interval(),
            buffer_size: settings.buffer_size,
        })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|addr| addr.port()).unwrap_or(0)
    }

    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.serve())
    }

    /// Wait for the single client and stream the trace to it. Returns bytes sent.
    pub async fn serve(self) -> u64 {
        let TraceRelay {
            listener,
            mut source,
            tail,
            accept_timeout,
            poll_interval,
            buffer_size,
        } = self;
        let port = listener.local_addr().map(|addr| addr.port()).unwrap_or(0);

        let (stream, peer) = match tokio::time::timeout(accept_timeout, listener.accept()).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(err)) => {
                warn!("Trace relay on port {} failed to accept: {}", port, err);
                return 0;
            }
            Err(_) => {
                info!("Trace relay on port {} timed out waiting for a client", port);
                return 0;
            }
        };
        // One client only: stop listening before any data moves.
        drop(listener);

        info!("Trace relay on port {} serving {}", port, peer);

        let mut sink = SocketStream::new(stream, peer);
        let tail = tail.as_ref().map(|(id, sessions)| (*id, sessions.as_ref()));
        let sent = pump(&mut source, &mut sink, tail, poll_interval, buffer_size).await;

        let _ = Readable::close(&mut source).await;
        let _ = Writable::close(&mut sink).await;

        info!("Trace relay on port {} finished after {} bytes", port, sent);
        sent
    }
}

/// Copy `source` into `sink` in lock-step until the source is exhausted.
///
/// With `tail` set, end of input while that session is still recording means
/// "not yet": wait `poll_interval` and read again. Liveness is sampled before the
/// read, so data flushed just before the session closed is still delivered. A sink
/// that closes during the wait ends the pump.
pub async fn pump(
    source: &mut dyn Readable,
    sink: &mut dyn Writable,
    tail: Option<(u32, &SessionTable)>,
    poll_interval: Duration,
    buffer_size: usize,
) -> u64 {
    let mut buffer = BytesMut::zeroed(buffer_size.max(1));
    let mut sent = 0u64;

    loop {
        let recording = tail.is_some_and(|(id, sessions)| sessions.is_active(id));
        match source.read_some(&mut buffer[..]).await {
            Ok(0) if recording => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = sink.closed() => {
                        debug!("Trace relay client went away while tailing");
                        break;
                    }
                }
            }
            Ok(0) => break,
            Ok(read) => {
                if let Err(err) = sink.write(&buffer[..read]).await {
                    debug!("Trace relay client went away: {}", err);
                    break;
                }
                sent += read as u64;
            }
            Err(err) => {
                warn!("Trace relay read failed: {}", err);
                break;
            }
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ChunkedReader, SharedWriter};
    use crate::recorder::{RecorderSession, SessionState};
    use crate::store::Store;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_pump_copies_until_eof() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut source = ChunkedReader::segmented(&data, 777);
        let mut sink = SharedWriter::new();

        let sent = pump(&mut source, &mut sink, None, Duration::from_millis(1), 512).await;

        assert_eq!(sent, data.len() as u64);
        assert_eq!(sink.contents(), data);
    }

    #[tokio::test]
    async fn test_pump_stops_when_sink_fails() {
        let data = vec![1u8; 4096];
        let mut source = ChunkedReader::segmented(&data, 1024);
        let mut sink = SharedWriter::with_capacity_limit(2048);

        let sent = pump(&mut source, &mut sink, None, Duration::from_millis(1), 1024).await;
        assert_eq!(sent, 2048);
    }

    #[tokio::test]
    async fn test_pump_tails_active_session() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path()).unwrap();
        let (trace_id, mut writer) = store.create_trace().await.unwrap();
        writer.write(b"first ").await.unwrap();

        let sessions = Arc::new(SessionTable::new());
        let state = Arc::new(SessionState::new());
        let peer = "127.0.0.1:5000".parse().unwrap();
        sessions.insert(RecorderSession::new(7, trace_id, peer, state.clone()));

        let mut source = store.open_trace(trace_id).await.unwrap();
        let mut sink = SharedWriter::new();
        let collected = sink.clone();

        let tail_sessions = sessions.clone();
        let pumping = tokio::spawn(async move {
            pump(
                &mut source,
                &mut sink,
                Some((7, tail_sessions.as_ref())),
                Duration::from_millis(10),
                64,
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.write(b"second").await.unwrap();
        writer.close().await.unwrap();
        state.mark_closed();

        let sent = tokio::time::timeout(Duration::from_secs(5), pumping)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent, 12);
        assert_eq!(collected.contents(), b"first second".to_vec());
    }

    #[tokio::test]
    async fn test_tailing_relay_ends_when_client_disconnects() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path()).unwrap();
        let (trace_id, mut writer) = store.create_trace().await.unwrap();
        writer.write(b"still recording").await.unwrap();

        // The session stays open for the whole test
        let sessions = Arc::new(SessionTable::new());
        let state = Arc::new(SessionState::new());
        let peer = "127.0.0.1:5001".parse().unwrap();
        sessions.insert(RecorderSession::new(9, trace_id, peer, state.clone()));

        let source = store.open_trace(trace_id).await.unwrap();
        let settings = RelaySettings::default();
        let relay = TraceRelay::bind(
            IpAddr::from([127, 0, 0, 1]),
            source,
            Some((9, sessions.clone())),
            &settings,
        )
        .await
        .unwrap();
        let port = relay.port();
        let serving = relay.spawn();

        let client = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(client);

        let sent = tokio::time::timeout(Duration::from_secs(2), serving)
            .await
            .expect("relay kept running after its client left")
            .unwrap();
        assert_eq!(sent, 15);
        assert!(state.is_open());
    }
}
