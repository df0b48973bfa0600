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

// Byte stream endpoints
//
// Every relay in the service pumps bytes between two endpoints: a producer socket
// into a store file, or a store file into a download socket. The relays only see
// these two capability traits, so they can be driven by files, sockets or the
// in-memory endpoints in `memory`.
//
// A `&mut self` receiver means at most one operation is outstanding per endpoint.
// An `Err` result is the failure signal; the caller treats the endpoint as closed.

pub mod file;
pub mod memory;
pub mod socket;

pub use file::{FileReader, FileWriter};
pub use memory::{ChunkedReader, SharedWriter};
pub use socket::SocketStream;

use async_trait::async_trait;
use std::io;

/// Readable byte endpoint
#[async_trait]
pub trait Readable: Send {
    /// Fill `dest` completely. Running out of input first is an error.
    async fn read(&mut self, dest: &mut [u8]) -> io::Result<()>;

    /// Read whatever is available, up to `dest.len()` bytes. `Ok(0)` means end of stream.
    async fn read_some(&mut self, dest: &mut [u8]) -> io::Result<usize>;

    async fn close(&mut self) -> io::Result<()>;

    fn is_open(&self) -> bool;
}

/// Writable byte endpoint
#[async_trait]
pub trait Writable: Send {
    /// Write all of `src`; completion means the bytes were handed to the endpoint.
    async fn write(&mut self, src: &[u8]) -> io::Result<()>;

    /// Resolves once the far end has gone away. Endpoints that cannot tell never resolve.
    async fn closed(&mut self) {
        std::future::pending::<()>().await
    }

    async fn close(&mut self) -> io::Result<()>;

    fn is_open(&self) -> bool;
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "endpoint is closed")
}
