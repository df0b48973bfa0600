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

// TCP endpoint

use super::{closed_error, Readable, Writable};
use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A TCP connection usable as both a [`Readable`] and a [`Writable`]
pub struct SocketStream {
    stream: Option<TcpStream>,
    peer: SocketAddr,
}

impl SocketStream {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            peer,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Enable TCP keep-alive probing after `idle` without traffic.
    pub fn set_keepalive(&self, idle: Duration) -> io::Result<()> {
        let stream = self.stream.as_ref().ok_or_else(closed_error)?;
        let keepalive = TcpKeepalive::new().with_time(idle);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(closed_error)
    }
}

#[async_trait]
impl Readable for SocketStream {
    async fn read(&mut self, dest: &mut [u8]) -> io::Result<()> {
        self.stream()?.read_exact(dest).await?;
        Ok(())
    }

    async fn read_some(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(dest).await
    }

    async fn close(&mut self) -> io::Result<()> {
        match self.stream.take() {
            Some(mut stream) => stream.shutdown().await,
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait]
impl Writable for SocketStream {
    async fn write(&mut self, src: &[u8]) -> io::Result<()> {
        self.stream()?.write_all(src).await
    }

    /// Watches the read half: EOF or an error means the peer is gone. Anything the
    /// peer sends is discarded.
    async fn closed(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let mut scratch = [0u8; 256];
        loop {
            match stream.read(&mut scratch).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        Readable::close(self).await
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
