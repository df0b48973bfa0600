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

// Blocking control-plane client
//
// For tools and scripts: one request in flight at a time over a plain TCP stream.

use crate::error::{ClientError, ProtocolError};
use crate::protocol::{self, CborPayload, Status, FRAME_HEADER_SIZE};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Summary returned by `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub recorder_port: u16,
    pub change_serial: u32,
    pub session_count: u32,
}

/// One stored trace as reported by `trace_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceDescriptor {
    pub id: u32,
    pub size: u64,
    pub name: String,
    pub timestamp: u64,
}

/// One active recorder session as reported by `session_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDescriptor {
    pub id: u32,
    pub trace_id: u32,
    pub ip_address: String,
    pub control_port: Option<u16>,
    pub bytes: u64,
}

pub struct StoreClient {
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_bytes: usize,
}

impl StoreClient {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer,
            max_frame_bytes: DEFAULT_MAX_FRAME,
        })
    }

    /// Bound every read and write on the control connection.
    pub fn with_timeout(self, timeout: Duration) -> Result<Self, ClientError> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(self)
    }

    pub fn host(&self) -> IpAddr {
        self.peer.ip()
    }

    /// Send any request and return the raw response, whatever its status.
    pub fn call(&mut self, request: &CborPayload) -> Result<CborPayload, ClientError> {
        let frame = request.encode_frame()?;
        self.stream.write_all(&frame)?;

        let mut header = [0u8; FRAME_HEADER_SIZE];
        self.stream.read_exact(&mut header)?;
        let size = protocol::frame_size(header, self.max_frame_bytes)?;

        let mut body = vec![0u8; size];
        self.stream.read_exact(&mut body)?;
        Ok(CborPayload::decode(&body)?)
    }

    pub fn version(&mut self) -> Result<i64, ClientError> {
        let response = self.expect_success(CborPayload::request("connect"))?;
        required(&response, "version")
    }

    pub fn status(&mut self) -> Result<StoreStatus, ClientError> {
        let response = self.expect_success(CborPayload::request("status"))?;
        Ok(StoreStatus {
            recorder_port: required_as(&response, "recorder_port")?,
            change_serial: required_as(&response, "change_serial")?,
            session_count: required_as(&response, "session_count")?,
        })
    }

    pub fn trace_count(&mut self) -> Result<u32, ClientError> {
        let response = self.expect_success(CborPayload::request("trace_count"))?;
        required_as(&response, "count")
    }

    /// `None` if `index` is out of range
    pub fn trace_info(&mut self, index: u32) -> Result<Option<TraceDescriptor>, ClientError> {
        let mut request = CborPayload::request("trace_info");
        request.set_integer("index", i64::from(index));

        let Some(response) = self.success_or_bad_request(request)? else {
            return Ok(None);
        };
        Ok(Some(TraceDescriptor {
            id: required_as(&response, "id")?,
            size: required_as(&response, "size")?,
            name: response.get_string("name").unwrap_or_default().to_string(),
            timestamp: response
                .get_integer("timestamp")
                .and_then(|ts| u64::try_from(ts).ok())
                .unwrap_or(0),
        }))
    }

    /// All traces currently in the store
    pub fn traces(&mut self) -> Result<Vec<TraceDescriptor>, ClientError> {
        let count = self.trace_count()?;
        let mut traces = Vec::with_capacity(count as usize);
        for index in 0..count {
            // The store may shrink between calls; stop at the first gap.
            match self.trace_info(index)? {
                Some(trace) => traces.push(trace),
                None => break,
            }
        }
        Ok(traces)
    }

    /// Ask the server to relay a trace. Returns the one-shot download port,
    /// or `None` if the id is unknown.
    pub fn read_trace(&mut self, id: u32) -> Result<Option<u16>, ClientError> {
        let mut request = CborPayload::request("trace_read");
        request.set_integer("id", i64::from(id));

        match self.success_or_bad_request(request)? {
            Some(response) => Ok(Some(required_as(&response, "port")?)),
            None => Ok(None),
        }
    }

    /// Download a whole trace into `dest`. Returns the byte count, or `None` if
    /// the id is unknown.
    pub fn download_trace<W: Write>(
        &mut self,
        id: u32,
        dest: &mut W,
    ) -> Result<Option<u64>, ClientError> {
        let Some(port) = self.read_trace(id)? else {
            return Ok(None);
        };
        let mut relay = TcpStream::connect((self.host(), port))?;
        let copied = io::copy(&mut relay, dest)?;
        Ok(Some(copied))
    }

    pub fn session_count(&mut self) -> Result<u32, ClientError> {
        let response = self.expect_success(CborPayload::request("session_count"))?;
        required_as(&response, "count")
    }

    /// `None` if `index` is out of range
    pub fn session_info(&mut self, index: u32) -> Result<Option<SessionDescriptor>, ClientError> {
        let mut request = CborPayload::request("session_info");
        request.set_integer("index", i64::from(index));

        let Some(response) = self.success_or_bad_request(request)? else {
            return Ok(None);
        };
        Ok(Some(SessionDescriptor {
            id: required_as(&response, "id")?,
            trace_id: required_as(&response, "trace_id")?,
            ip_address: response.get_string("ip_address").unwrap_or_default().to_string(),
            control_port: response
                .get_integer("control_port")
                .and_then(|port| u16::try_from(port).ok()),
            bytes: required_as(&response, "bytes")?,
        }))
    }

    /// Have the server re-scan its store directory. Returns the new trace count.
    pub fn refresh(&mut self) -> Result<u32, ClientError> {
        let response = self.expect_success(CborPayload::request("store_refresh"))?;
        required_as(&response, "count")
    }

    fn expect_success(&mut self, request: CborPayload) -> Result<CborPayload, ClientError> {
        let response = self.call(&request)?;
        match response.status() {
            Some(Status::Success) => Ok(response),
            _ => Err(status_error(&request, &response)),
        }
    }

    fn success_or_bad_request(
        &mut self,
        request: CborPayload,
    ) -> Result<Option<CborPayload>, ClientError> {
        let response = self.call(&request)?;
        match response.status() {
            Some(Status::Success) => Ok(Some(response)),
            Some(Status::BadRequest) => Ok(None),
            _ => Err(status_error(&request, &response)),
        }
    }
}

fn status_error(request: &CborPayload, response: &CborPayload) -> ClientError {
    ClientError::Status {
        method: request.method().unwrap_or_default().to_string(),
        status: response.status_code().unwrap_or(0),
    }
}

fn required(response: &CborPayload, key: &'static str) -> Result<i64, ClientError> {
    response
        .get_integer(key)
        .ok_or(ClientError::Protocol(ProtocolError::MissingField(key)))
}

fn required_as<T: TryFrom<i64>>(response: &CborPayload, key: &'static str) -> Result<T, ClientError> {
    T::try_from(required(response, key)?)
        .map_err(|_| ClientError::Protocol(ProtocolError::MissingField(key)))
}
