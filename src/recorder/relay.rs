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

// Producer relay: an explicit state machine plus the async driver that feeds it
//
// The machine never touches I/O. It is told what completed and answers with the
// next operation to issue, which keeps the header handling testable with synthetic
// completions. Reads and writes strictly alternate: every read is followed by a
// write of the same bytes, and the next read is only issued once that write is
// done. Everything the producer sends, header included, is persisted verbatim.

use super::session::SessionState;
use crate::io::{Readable, Writable};
use bytes::BytesMut;
use std::fmt;
use tracing::debug;

/// Stream magic values as read little-endian from the first four bytes
pub const MAGIC_TRC2: u32 = u32::from_be_bytes(*b"TRC2");
pub const MAGIC_TRCE: u32 = u32::from_be_bytes(*b"TRCE");
pub const MAGIC_ECRT: u32 = u32::from_be_bytes(*b"ECRT");
pub const MAGIC_2CRT: u32 = u32::from_be_bytes(*b"2CRT");

/// Metadata field carrying the producer's control port
pub const FIELD_CONTROL_PORT: u8 = 0;

const MAGIC_SIZE: usize = 4;
const METADATA_SIZE_SIZE: usize = 2;
const FIELD_HEADER_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    AwaitMagic,
    AwaitMetadataSize,
    AwaitMetadata,
    Relaying,
    Closed,
}

/// Operation the driver must issue next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStep {
    /// Fill exactly this many bytes of the buffer
    ReadExact(usize),
    /// Read whatever is available into the buffer
    ReadSome,
    /// Write the first N bytes of the buffer
    Write(usize),
    Close(CloseReason),
}

/// Completion reported back to the machine
#[derive(Debug)]
pub enum RelayEvent<'a> {
    ReadComplete(&'a [u8]),
    WriteComplete,
    ReadFailed,
    WriteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Producer disconnected or its socket failed
    InputClosed,
    /// The trace file could not be written
    OutputFailed,
    BadMagic(u32),
    MalformedMetadata,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::InputClosed => write!(f, "producer closed"),
            CloseReason::OutputFailed => write!(f, "trace write failed"),
            CloseReason::BadMagic(magic) => write!(f, "bad stream magic {:#010x}", magic),
            CloseReason::MalformedMetadata => write!(f, "malformed metadata header"),
        }
    }
}

/// Parse the tagged metadata fields following a `TRC2` magic.
///
/// Each field is `{size: u8, id: u8, payload}` where `size` counts the two header
/// bytes. Unknown field ids are skipped. Returns the advertised control port.
pub fn parse_metadata(mut fields: &[u8]) -> Result<Option<u16>, CloseReason> {
    let mut control_port = None;
    while !fields.is_empty() {
        if fields.len() < FIELD_HEADER_SIZE {
            return Err(CloseReason::MalformedMetadata);
        }
        let size = usize::from(fields[0]);
        let id = fields[1];
        if size < FIELD_HEADER_SIZE || size > fields.len() {
            return Err(CloseReason::MalformedMetadata);
        }

        let payload = &fields[FIELD_HEADER_SIZE..size];
        if id == FIELD_CONTROL_PORT {
            if payload.len() < 2 {
                return Err(CloseReason::MalformedMetadata);
            }
            control_port = Some(u16::from_le_bytes([payload[0], payload[1]]));
        }

        fields = &fields[size..];
    }
    Ok(control_port)
}

pub struct RelayMachine {
    state: RelayState,
    metadata_size: usize,
    pending_write: usize,
    control_port: Option<u16>,
    relayed: u64,
    close_reason: Option<CloseReason>,
}

impl Default for RelayMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMachine {
    pub fn new() -> Self {
        Self {
            state: RelayState::AwaitMagic,
            metadata_size: 0,
            pending_write: 0,
            control_port: None,
            relayed: 0,
            close_reason: None,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn control_port(&self) -> Option<u16> {
        self.control_port
    }

    /// Bytes confirmed written to the output
    pub fn relayed(&self) -> u64 {
        self.relayed
    }

    pub fn start(&mut self) -> RelayStep {
        self.state = RelayState::AwaitMagic;
        RelayStep::ReadExact(MAGIC_SIZE)
    }

    pub fn on_event(&mut self, event: RelayEvent<'_>) -> RelayStep {
        if let Some(reason) = self.close_reason {
            return RelayStep::Close(reason);
        }

        match event {
            RelayEvent::ReadComplete(data) => self.on_read(data),
            RelayEvent::WriteComplete => self.on_write(),
            RelayEvent::ReadFailed => self.close(CloseReason::InputClosed),
            RelayEvent::WriteFailed => self.close(CloseReason::OutputFailed),
        }
    }

    fn on_read(&mut self, data: &[u8]) -> RelayStep {
        match self.state {
            RelayState::AwaitMagic => {
                if data.len() != MAGIC_SIZE {
                    return self.close(CloseReason::InputClosed);
                }
                let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                match magic {
                    MAGIC_TRC2 => self.state = RelayState::AwaitMetadataSize,
                    MAGIC_TRCE | MAGIC_ECRT | MAGIC_2CRT => self.state = RelayState::Relaying,
                    other => return self.close(CloseReason::BadMagic(other)),
                }
                self.write(data.len())
            }
            RelayState::AwaitMetadataSize => {
                if data.len() != METADATA_SIZE_SIZE {
                    return self.close(CloseReason::InputClosed);
                }
                self.metadata_size = usize::from(u16::from_le_bytes([data[0], data[1]]));
                self.state = if self.metadata_size == 0 {
                    RelayState::Relaying
                } else {
                    RelayState::AwaitMetadata
                };
                self.write(data.len())
            }
            RelayState::AwaitMetadata => match parse_metadata(data) {
                Ok(control_port) => {
                    self.control_port = control_port;
                    self.state = RelayState::Relaying;
                    self.write(data.len())
                }
                Err(reason) => self.close(reason),
            },
            RelayState::Relaying => {
                if data.is_empty() {
                    self.close(CloseReason::InputClosed)
                } else {
                    self.write(data.len())
                }
            }
            RelayState::Closed => self.close(CloseReason::InputClosed),
        }
    }

    fn on_write(&mut self) -> RelayStep {
        self.relayed += self.pending_write as u64;
        self.pending_write = 0;

        match self.state {
            RelayState::AwaitMagic => RelayStep::ReadExact(MAGIC_SIZE),
            RelayState::AwaitMetadataSize => RelayStep::ReadExact(METADATA_SIZE_SIZE),
            RelayState::AwaitMetadata => RelayStep::ReadExact(self.metadata_size),
            RelayState::Relaying => RelayStep::ReadSome,
            RelayState::Closed => self.close(CloseReason::InputClosed),
        }
    }

    fn write(&mut self, len: usize) -> RelayStep {
        self.pending_write = len;
        RelayStep::Write(len)
    }

    fn close(&mut self, reason: CloseReason) -> RelayStep {
        self.state = RelayState::Closed;
        self.close_reason = Some(reason);
        RelayStep::Close(reason)
    }
}

/// Run `machine` against real endpoints until it closes.
///
/// Progress (bytes written, discovered control port) is published to `session`
/// as it happens. The endpoints are left for the caller to close.
pub async fn drive_relay(
    machine: &mut RelayMachine,
    input: &mut dyn Readable,
    output: &mut dyn Writable,
    buffer_size: usize,
    session: &SessionState,
) -> CloseReason {
    let mut buffer = BytesMut::zeroed(buffer_size.max(MAGIC_SIZE));
    let mut step = machine.start();

    loop {
        step = match step {
            RelayStep::ReadExact(len) => {
                if buffer.len() < len {
                    buffer.resize(len, 0);
                }
                match input.read(&mut buffer[..len]).await {
                    Ok(()) => machine.on_event(RelayEvent::ReadComplete(&buffer[..len])),
                    Err(err) => {
                        debug!("Relay read failed: {}", err);
                        machine.on_event(RelayEvent::ReadFailed)
                    }
                }
            }
            RelayStep::ReadSome => match input.read_some(&mut buffer[..]).await {
                Ok(read) => machine.on_event(RelayEvent::ReadComplete(&buffer[..read])),
                Err(err) => {
                    debug!("Relay read failed: {}", err);
                    machine.on_event(RelayEvent::ReadFailed)
                }
            },
            RelayStep::Write(len) => match output.write(&buffer[..len]).await {
                Ok(()) => {
                    session.add_bytes(len as u64);
                    machine.on_event(RelayEvent::WriteComplete)
                }
                Err(err) => {
                    debug!("Relay write failed: {}", err);
                    machine.on_event(RelayEvent::WriteFailed)
                }
            },
            RelayStep::Close(reason) => return reason,
        };

        if let Some(port) = machine.control_port() {
            session.set_control_port(port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ChunkedReader, SharedWriter};

    fn trc2_header(fields: &[u8]) -> Vec<u8> {
        let mut header = MAGIC_TRC2.to_le_bytes().to_vec();
        header.extend_from_slice(&(fields.len() as u16).to_le_bytes());
        header.extend_from_slice(fields);
        header
    }

    #[test]
    fn test_legacy_magic_goes_straight_to_relaying() {
        let mut machine = RelayMachine::new();
        assert_eq!(machine.start(), RelayStep::ReadExact(4));

        let magic = MAGIC_TRCE.to_le_bytes();
        assert_eq!(machine.on_event(RelayEvent::ReadComplete(&magic)), RelayStep::Write(4));
        assert_eq!(machine.state(), RelayState::Relaying);
        assert_eq!(machine.on_event(RelayEvent::WriteComplete), RelayStep::ReadSome);
        assert_eq!(machine.relayed(), 4);
    }

    #[test]
    fn test_reversed_magics_are_accepted() {
        for magic in [MAGIC_ECRT, MAGIC_2CRT] {
            let mut machine = RelayMachine::new();
            machine.start();
            let bytes = magic.to_le_bytes();
            assert_eq!(machine.on_event(RelayEvent::ReadComplete(&bytes)), RelayStep::Write(4));
            assert_eq!(machine.state(), RelayState::Relaying);
        }
    }

    #[test]
    fn test_bad_magic_closes_without_writing() {
        let mut machine = RelayMachine::new();
        machine.start();

        let step = machine.on_event(RelayEvent::ReadComplete(b"HTTP"));
        let expected = u32::from_le_bytes(*b"HTTP");
        assert_eq!(step, RelayStep::Close(CloseReason::BadMagic(expected)));
        assert_eq!(machine.state(), RelayState::Closed);
        assert_eq!(machine.relayed(), 0);
    }

    #[test]
    fn test_trc2_header_sequence() {
        let mut machine = RelayMachine::new();
        machine.start();

        let magic = MAGIC_TRC2.to_le_bytes();
        assert_eq!(machine.on_event(RelayEvent::ReadComplete(&magic)), RelayStep::Write(4));
        assert_eq!(machine.on_event(RelayEvent::WriteComplete), RelayStep::ReadExact(2));

        let size = 4u16.to_le_bytes();
        assert_eq!(machine.on_event(RelayEvent::ReadComplete(&size)), RelayStep::Write(2));
        assert_eq!(machine.on_event(RelayEvent::WriteComplete), RelayStep::ReadExact(4));

        let field = [4, FIELD_CONTROL_PORT, 0x39, 0x05];
        assert_eq!(machine.on_event(RelayEvent::ReadComplete(&field)), RelayStep::Write(4));
        assert_eq!(machine.control_port(), Some(1337));
        assert_eq!(machine.on_event(RelayEvent::WriteComplete), RelayStep::ReadSome);
        assert_eq!(machine.relayed(), 10);
    }

    #[test]
    fn test_trc2_with_empty_metadata() {
        let mut machine = RelayMachine::new();
        machine.start();
        machine.on_event(RelayEvent::ReadComplete(&MAGIC_TRC2.to_le_bytes()));
        machine.on_event(RelayEvent::WriteComplete);

        assert_eq!(machine.on_event(RelayEvent::ReadComplete(&[0, 0])), RelayStep::Write(2));
        assert_eq!(machine.state(), RelayState::Relaying);
        assert_eq!(machine.on_event(RelayEvent::WriteComplete), RelayStep::ReadSome);
        assert_eq!(machine.control_port(), None);
    }

    #[test]
    fn test_eof_and_failures_close() {
        let mut machine = RelayMachine::new();
        machine.start();
        machine.on_event(RelayEvent::ReadComplete(&MAGIC_TRCE.to_le_bytes()));
        machine.on_event(RelayEvent::WriteComplete);

        assert_eq!(
            machine.on_event(RelayEvent::ReadComplete(&[])),
            RelayStep::Close(CloseReason::InputClosed)
        );
        // Once closed, the machine stays closed.
        assert_eq!(
            machine.on_event(RelayEvent::WriteComplete),
            RelayStep::Close(CloseReason::InputClosed)
        );

        let mut machine = RelayMachine::new();
        machine.start();
        machine.on_event(RelayEvent::ReadComplete(&MAGIC_TRCE.to_le_bytes()));
        assert_eq!(
            machine.on_event(RelayEvent::WriteFailed),
            RelayStep::Close(CloseReason::OutputFailed)
        );
    }

    #[test]
    fn test_parse_metadata_fields() {
        assert_eq!(parse_metadata(&[]), Ok(None));
        assert_eq!(parse_metadata(&[4, 0, 0xbd, 0x07]), Ok(Some(1981)));
        // Unknown field first, then the control port.
        assert_eq!(parse_metadata(&[3, 9, 0xff, 4, 0, 0x01, 0x00]), Ok(Some(1)));
        // A bare field header with no payload is valid for unknown ids.
        assert_eq!(parse_metadata(&[2, 7]), Ok(None));
    }

    #[test]
    fn test_parse_metadata_rejects_malformed() {
        assert_eq!(parse_metadata(&[4]), Err(CloseReason::MalformedMetadata));
        assert_eq!(parse_metadata(&[1, 0]), Err(CloseReason::MalformedMetadata));
        assert_eq!(parse_metadata(&[9, 0, 1, 2]), Err(CloseReason::MalformedMetadata));
        assert_eq!(parse_metadata(&[3, 0, 1]), Err(CloseReason::MalformedMetadata));
    }

    #[tokio::test]
    async fn test_drive_relay_preserves_order_across_fragments() {
        let mut stream = MAGIC_TRCE.to_le_bytes().to_vec();
        stream.extend_from_slice(&[b'A'; 700]);
        stream.extend_from_slice(&[b'B'; 300]);
        stream.extend_from_slice(&[b'C'; 511]);

        for segment in [1, 3, 64, 1000, 4096] {
            let mut input = ChunkedReader::segmented(&stream, segment);
            let mut output = SharedWriter::new();
            let session = SessionState::new();
            let mut machine = RelayMachine::new();

            let reason = drive_relay(&mut machine, &mut input, &mut output, 128, &session).await;

            assert_eq!(reason, CloseReason::InputClosed);
            assert_eq!(output.contents(), stream, "segment size {}", segment);
            assert_eq!(session.bytes(), stream.len() as u64);
        }
    }

    #[tokio::test]
    async fn test_drive_relay_publishes_control_port() {
        let mut stream = trc2_header(&[4, FIELD_CONTROL_PORT, 0xbd, 0x07]);
        stream.extend_from_slice(b"event data");

        let mut input = ChunkedReader::segmented(&stream, 5);
        let mut output = SharedWriter::new();
        let session = SessionState::new();
        let mut machine = RelayMachine::new();

        drive_relay(&mut machine, &mut input, &mut output, 64, &session).await;

        assert_eq!(session.control_port(), Some(1981));
        assert_eq!(output.contents(), stream);
    }

    #[tokio::test]
    async fn test_drive_relay_stops_on_output_failure() {
        let mut stream = MAGIC_TRCE.to_le_bytes().to_vec();
        stream.extend_from_slice(&[7u8; 256]);

        let mut input = ChunkedReader::segmented(&stream, 32);
        let mut output = SharedWriter::with_capacity_limit(40);
        let session = SessionState::new();
        let mut machine = RelayMachine::new();

        let reason = drive_relay(&mut machine, &mut input, &mut output, 64, &session).await;

        assert_eq!(reason, CloseReason::OutputFailed);
        assert_eq!(output.contents(), stream[..32].to_vec());
    }

    #[tokio::test]
    async fn test_drive_relay_transport_error_closes() {
        let stream = MAGIC_TRCE.to_le_bytes().to_vec();
        let mut input = ChunkedReader::segmented(&stream, 4).failing_at_end();
        let mut output = SharedWriter::new();
        let session = SessionState::new();
        let mut machine = RelayMachine::new();

        let reason = drive_relay(&mut machine, &mut input, &mut output, 64, &session).await;
        assert_eq!(reason, CloseReason::InputClosed);
        assert_eq!(output.contents(), stream);
    }
}
