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

// Control-plane server
//
// Each connection runs a simple loop: read a length prefix, read the CBOR body,
// dispatch, write the response frame, repeat. Undecodable and oversize requests
// are answered with 400 and the connection stays open; an oversize body is read
// and discarded first. Transport errors end the connection.

pub mod handlers;

pub use handlers::ControlContext;

use crate::config::ControlSettings;
use crate::io::{Readable, SocketStream, Writable};
use crate::error::ProtocolError;
use crate::protocol::{self, CborPayload, Status, FRAME_HEADER_SIZE};
use anyhow::{Context, Result};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub struct ControlServer {
    listener: TcpListener,
    context: Arc<ControlContext>,
    max_frame_bytes: usize,
}

impl ControlServer {
    pub async fn bind(settings: &ControlSettings, context: Arc<ControlContext>) -> Result<Self> {
        let listener = TcpListener::bind((settings.host.as_str(), settings.port))
            .await
            .with_context(|| {
                format!(
                    "Failed to bind control server on {}:{}",
                    settings.host, settings.port
                )
            })?;

        info!("Control server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            context,
            max_frame_bytes: settings.max_frame_bytes,
        })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|addr| addr.port()).unwrap_or(0)
    }

    /// Accept control clients until the task is dropped.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Control client connected from {}", peer);
                    let context = self.context.clone();
                    let max_frame_bytes = self.max_frame_bytes;
                    tokio::spawn(async move {
                        let mut connection = SocketStream::new(stream, peer);
                        match serve_connection(&mut connection, &context, max_frame_bytes).await {
                            Ok(()) => debug!("Control client {} disconnected", peer),
                            Err(err) => debug!("Control client {} dropped: {}", peer, err),
                        }
                        let _ = Readable::close(&mut connection).await;
                    });
                }
                Err(err) => {
                    warn!("Control accept failed: {}", err);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
}

/// Serve requests on one connection until the peer goes away.
///
/// A clean close between requests returns `Ok`.
pub async fn serve_connection<S>(
    connection: &mut S,
    context: &ControlContext,
    max_frame_bytes: usize,
) -> io::Result<()>
where
    S: Readable + Writable,
{
    let mut body = Vec::new();
    loop {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        match connection.read(&mut header).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }

        let response = match protocol::frame_size(header, max_frame_bytes) {
            Ok(size) => {
                body.resize(size, 0);
                connection.read(&mut body).await?;

                match CborPayload::decode(&body) {
                    Ok(request) => context.dispatch(&request).await,
                    Err(err) => {
                        debug!("Undecodable control request: {}", err);
                        CborPayload::response(Status::BadRequest)
                    }
                }
            }
            Err(ProtocolError::FrameTooLarge { size, max }) => {
                debug!("Discarding {} byte control request (limit {})", size, max);
                discard(connection, size, max).await?;
                CborPayload::response(Status::BadRequest)
            }
            Err(err) => return Err(io::Error::new(io::ErrorKind::InvalidData, err)),
        };

        let frame = response
            .encode_frame()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        connection.write(&frame).await?;
    }
}

/// Read and drop `size` bytes, at most `chunk` at a time.
async fn discard<S: Readable>(connection: &mut S, size: usize, chunk: usize) -> io::Result<()> {
    let mut scratch = vec![0u8; chunk.clamp(1, 64 * 1024)];
    let mut remaining = size;
    while remaining > 0 {
        let len = remaining.min(scratch.len());
        connection.read(&mut scratch[..len]).await?;
        remaining -= len;
    }
    Ok(())
}
