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

// File endpoints with positional I/O
//
// Both variants keep their own 64-bit offset and seek to it before every operation,
// so a reader tailing a trace never depends on a shared cursor with the writer.

use super::{closed_error, Readable, Writable};
use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Read side of a stored trace
pub struct FileReader {
    file: Option<File>,
    offset: u64,
}

impl FileReader {
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path.as_ref()).await?;
        Ok(Self::from_file(file))
    }

    pub fn from_file(file: File) -> Self {
        Self {
            file: Some(file),
            offset: 0,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

#[async_trait]
impl Readable for FileReader {
    async fn read(&mut self, dest: &mut [u8]) -> io::Result<()> {
        let file = self.file.as_mut().ok_or_else(closed_error)?;
        file.seek(SeekFrom::Start(self.offset)).await?;
        file.read_exact(dest).await?;
        self.offset += dest.len() as u64;
        Ok(())
    }

    async fn read_some(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        let file = self.file.as_mut().ok_or_else(closed_error)?;
        file.seek(SeekFrom::Start(self.offset)).await?;
        let read = file.read(dest).await?;
        self.offset += read as u64;
        Ok(read)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.file.take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

/// Write side of a trace being recorded
pub struct FileWriter {
    file: Option<File>,
    offset: u64,
}

impl FileWriter {
    pub fn from_file(file: File) -> Self {
        Self {
            file: Some(file),
            offset: 0,
        }
    }

    /// Bytes written so far
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

#[async_trait]
impl Writable for FileWriter {
    async fn write(&mut self, src: &[u8]) -> io::Result<()> {
        let file = self.file.as_mut().ok_or_else(closed_error)?;
        file.seek(SeekFrom::Start(self.offset)).await?;
        file.write_all(src).await?;
        // Completion must mean the bytes are visible to readers tailing the file.
        file.flush().await?;
        self.offset += src.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => file.flush().await,
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}
