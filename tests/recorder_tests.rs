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

// Recorder integration tests: producers push trace streams over TCP

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use trace_store::recorder::relay::{FIELD_CONTROL_PORT, MAGIC_TRC2, MAGIC_TRCE};
use trace_store::{ServerConfig, StoreClient, StoreService};

fn test_config(dir: &Path) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.store.dir = dir.to_string_lossy().into_owned();
    config.store.watch = false;
    config.recorder.host = "127.0.0.1".to_string();
    config.recorder.port = 0;
    config.recorder.tick_interval_ms = 50;
    config.control.host = "127.0.0.1".to_string();
    config.control.port = 0;
    config.relay.poll_interval_ms = 20;
    config
}

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

async fn send_stream(port: u16, data: &[u8]) {
    let mut producer = TcpStream::connect(localhost(port)).await.unwrap();
    producer.write_all(data).await.unwrap();
    producer.shutdown().await.unwrap();
}

fn legacy_stream(payload_len: usize) -> Vec<u8> {
    let mut stream = MAGIC_TRCE.to_le_bytes().to_vec();
    stream.extend((0..payload_len).map(|i| (i % 251) as u8));
    stream
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_legacy_stream_is_recorded_verbatim() {
    let temp_dir = TempDir::new().unwrap();
    let service = StoreService::start(&test_config(temp_dir.path())).await.unwrap();

    let stream = legacy_stream(100);
    send_stream(service.recorder_port(), &stream).await;

    let store = service.store().clone();
    assert!(wait_for(|| store.trace_count() == 1).await);
    let sessions = service.sessions().clone();
    assert!(wait_for(|| sessions.is_empty()).await, "session was not reaped");

    let trace = store.trace_info(0).unwrap();
    assert_eq!(std::fs::read(trace.path()).unwrap(), stream);
    assert_eq!(trace.size(), 104);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_connection_leaves_empty_trace() {
    let temp_dir = TempDir::new().unwrap();
    let service = StoreService::start(&test_config(temp_dir.path())).await.unwrap();

    send_stream(service.recorder_port(), &[]).await;

    let store = service.store().clone();
    assert!(wait_for(|| store.trace_count() == 1).await);
    let sessions = service.sessions().clone();
    assert!(wait_for(|| sessions.is_empty()).await);
    assert_eq!(store.trace_info(0).unwrap().size(), 0);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_large_stream_is_recorded_verbatim() {
    let temp_dir = TempDir::new().unwrap();
    let service = StoreService::start(&test_config(temp_dir.path())).await.unwrap();

    let stream = legacy_stream(4 * 1024 * 1024 + 17);
    send_stream(service.recorder_port(), &stream).await;

    let sessions = service.sessions().clone();
    let store = service.store().clone();
    assert!(wait_for(|| store.trace_count() == 1 && sessions.is_empty()).await);

    let trace = store.trace_info(0).unwrap();
    let recorded = std::fs::read(trace.path()).unwrap();
    assert_eq!(recorded.len(), stream.len());
    assert!(recorded == stream);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bad_magic_records_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let service = StoreService::start(&test_config(temp_dir.path())).await.unwrap();

    send_stream(service.recorder_port(), b"NOPE and some more bytes").await;

    let sessions = service.sessions().clone();
    let store = service.store().clone();
    assert!(wait_for(|| store.trace_count() == 1 && sessions.is_empty()).await);
    assert_eq!(store.trace_info(0).unwrap().size(), 0);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_control_port_is_reported_while_recording() {
    let temp_dir = TempDir::new().unwrap();
    let service = StoreService::start(&test_config(temp_dir.path())).await.unwrap();

    let fields = [4u8, FIELD_CONTROL_PORT, 0x39, 0x30]; // 12345
    let mut header = MAGIC_TRC2.to_le_bytes().to_vec();
    header.extend_from_slice(&(fields.len() as u16).to_le_bytes());
    header.extend_from_slice(&fields);
    header.extend_from_slice(b"payload");

    let mut producer = TcpStream::connect(localhost(service.recorder_port()))
        .await
        .unwrap();
    producer.write_all(&header).await.unwrap();
    producer.flush().await.unwrap();

    let sessions = service.sessions().clone();
    let expected = header.len() as u64;
    assert!(
        wait_for(|| {
            sessions
                .snapshot()
                .first()
                .is_some_and(|s| s.control_port == Some(12345) && s.bytes == expected)
        })
        .await
    );

    let control_port = service.control_port();
    let session = tokio::task::spawn_blocking(move || {
        let mut client = StoreClient::connect(localhost(control_port)).unwrap();
        assert_eq!(client.session_count().unwrap(), 1);
        assert!(client.session_info(1).unwrap().is_none());
        client.session_info(0).unwrap().unwrap()
    })
    .await
    .unwrap();

    assert_eq!(session.control_port, Some(12345));
    assert_eq!(session.ip_address, "127.0.0.1");
    assert_eq!(session.bytes, expected);
    assert_eq!(Some(session.trace_id), service.store().trace_info(0).map(|t| t.id()));

    producer.shutdown().await.unwrap();
    drop(producer);
    assert!(wait_for(|| sessions.is_empty()).await);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_producers_get_separate_traces() {
    let temp_dir = TempDir::new().unwrap();
    let service = StoreService::start(&test_config(temp_dir.path())).await.unwrap();
    let port = service.recorder_port();

    let first = legacy_stream(300);
    let second = legacy_stream(700);
    tokio::join!(send_stream(port, &first), send_stream(port, &second));

    let sessions = service.sessions().clone();
    let store = service.store().clone();
    assert!(wait_for(|| store.trace_count() == 2 && sessions.is_empty()).await);

    let mut sizes: Vec<u64> = store.traces().iter().map(|t| t.size()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![304, 704]);

    service.shutdown().await;
}
