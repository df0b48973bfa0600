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

// In-memory endpoints for driving relays without sockets or files

use super::{closed_error, Readable, Writable};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// Reader that hands out its input in fixed chunks, one chunk per `read_some`,
/// the way a transport fragments a stream into segments.
pub struct ChunkedReader {
    chunks: VecDeque<Vec<u8>>,
    open: bool,
    fail_at_end: bool,
}

impl ChunkedReader {
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().filter(|c| !c.is_empty()).collect(),
            open: true,
            fail_at_end: false,
        }
    }

    /// Split `data` into segments of at most `segment` bytes.
    pub fn segmented(data: &[u8], segment: usize) -> Self {
        Self::new(data.chunks(segment.max(1)).map(<[u8]>::to_vec))
    }

    /// Report a transport error instead of a clean end of stream.
    pub fn failing_at_end(mut self) -> Self {
        self.fail_at_end = true;
        self
    }

    fn end_of_input(&self) -> io::Result<usize> {
        if self.fail_at_end {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"))
        } else {
            Ok(0)
        }
    }
}

#[async_trait]
impl Readable for ChunkedReader {
    async fn read(&mut self, dest: &mut [u8]) -> io::Result<()> {
        if !self.open {
            return Err(closed_error());
        }
        let mut filled = 0;
        while filled < dest.len() {
            let Some(chunk) = self.chunks.front_mut() else {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input exhausted"));
            };
            let take = chunk.len().min(dest.len() - filled);
            dest[filled..filled + take].copy_from_slice(&chunk[..take]);
            chunk.drain(..take);
            if chunk.is_empty() {
                self.chunks.pop_front();
            }
            filled += take;
        }
        Ok(())
    }

    async fn read_some(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(closed_error());
        }
        let Some(chunk) = self.chunks.front_mut() else {
            return self.end_of_input();
        };
        let take = chunk.len().min(dest.len());
        dest[..take].copy_from_slice(&chunk[..take]);
        chunk.drain(..take);
        if chunk.is_empty() {
            self.chunks.pop_front();
        }
        Ok(take)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Writer collecting everything into a buffer that outlives the writer
#[derive(Clone)]
pub struct SharedWriter {
    data: Arc<Mutex<Vec<u8>>>,
    open: bool,
    capacity: Option<usize>,
}

impl SharedWriter {
    pub fn new() -> Self {
        Self {
            data: Arc::default(),
            open: true,
            capacity: None,
        }
    }

    /// Fail any write that would grow the buffer past `capacity` bytes.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl Default for SharedWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Writable for SharedWriter {
    async fn write(&mut self, src: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(closed_error());
        }
        let mut data = self.data.lock();
        if let Some(capacity) = self.capacity {
            if data.len() + src.len() > capacity {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "writer is full"));
            }
        }
        data.extend_from_slice(src);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
