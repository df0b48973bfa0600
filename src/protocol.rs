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

// Control-plane protocol
//
// Requests and responses are CBOR maps with text keys, each sent as
// `[u32 little-endian length][CBOR bytes]`. Requests carry `$method`,
// responses carry `$status`.

use crate::error::ProtocolError;
use serde_cbor::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Version reported by `connect`
pub const STORE_PROTOCOL_VERSION: i64 = 0x0100;

pub const METHOD_KEY: &str = "$method";
pub const STATUS_KEY: &str = "$status";

/// Size of the length prefix in front of every payload
pub const FRAME_HEADER_SIZE: usize = 4;

/// HTTP-like response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    BadRequest,
    MethodNotAllowed,
    InternalError,
}

impl Status {
    pub fn code(self) -> i64 {
        match self {
            Status::Success => 200,
            Status::BadRequest => 400,
            Status::MethodNotAllowed => 405,
            Status::InternalError => 500,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            200 => Some(Status::Success),
            400 => Some(Status::BadRequest),
            405 => Some(Status::MethodNotAllowed),
            500 => Some(Status::InternalError),
            _ => None,
        }
    }
}

/// A decoded request or response map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CborPayload {
    fields: BTreeMap<Value, Value>,
}

impl CborPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(method: &str) -> Self {
        let mut payload = Self::new();
        payload.set_string(METHOD_KEY, method);
        payload
    }

    pub fn response(status: Status) -> Self {
        let mut payload = Self::new();
        payload.set_integer(STATUS_KEY, status.code());
        payload
    }

    pub fn set_integer(&mut self, key: &str, value: i64) -> &mut Self {
        self.fields
            .insert(Value::Text(key.to_string()), Value::Integer(i128::from(value)));
        self
    }

    pub fn set_string(&mut self, key: &str, value: &str) -> &mut Self {
        self.fields
            .insert(Value::Text(key.to_string()), Value::Text(value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(&Value::Text(key.to_string()))
    }

    pub fn get_integer(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Integer(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Value::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        self.get_string(METHOD_KEY)
    }

    /// Raw `$status` value; `None` if absent or not an integer
    pub fn status_code(&self) -> Option<i64> {
        self.get_integer(STATUS_KEY)
    }

    pub fn status(&self) -> Option<Status> {
        self.status_code().and_then(Status::from_code)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_cbor::to_vec(&Value::Map(self.fields.clone()))
            .map_err(|err| ProtocolError::Encode(err.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        match serde_cbor::from_slice::<Value>(bytes) {
            Ok(Value::Map(fields)) => Ok(Self { fields }),
            Ok(_) => Err(ProtocolError::NotAMap),
            Err(err) => Err(ProtocolError::Decode(err.to_string())),
        }
    }

    /// Encode with the length prefix, ready to put on the wire
    pub fn encode_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = self.encode()?;
        let size = u32::try_from(body.len()).map_err(|_| ProtocolError::FrameTooLarge {
            size: body.len(),
            max: u32::MAX as usize,
        })?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        frame.extend_from_slice(&size.to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }
}

/// Validate a received length prefix against `max` payload bytes
pub fn frame_size(header: [u8; FRAME_HEADER_SIZE], max: usize) -> Result<usize, ProtocolError> {
    let size = u32::from_le_bytes(header) as usize;
    if size > max {
        return Err(ProtocolError::FrameTooLarge { size, max });
    }
    Ok(size)
}

impl fmt::Display for CborPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&Value::Map(self.fields.clone())) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self.fields),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_method() {
        let mut request = CborPayload::request("trace_info");
        request.set_integer("index", 3);

        let decoded = CborPayload::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded.method(), Some("trace_info"));
        assert_eq!(decoded.get_integer("index"), Some(3));
        assert_eq!(decoded.status(), None);
    }

    #[test]
    fn test_response_status_codes() {
        for status in [
            Status::Success,
            Status::BadRequest,
            Status::MethodNotAllowed,
            Status::InternalError,
        ] {
            let response = CborPayload::response(status);
            assert_eq!(response.status(), Some(status));
            assert_eq!(Status::from_code(status.code()), Some(status));
        }
        assert_eq!(Status::from_code(418), None);
    }

    #[test]
    fn test_mistyped_fields_read_as_missing() {
        let mut payload = CborPayload::new();
        payload.set_string("index", "seven");
        assert_eq!(payload.get_integer("index"), None);
        assert_eq!(payload.get_string("missing"), None);
    }

    #[test]
    fn test_decode_rejects_non_map() {
        let bytes = serde_cbor::to_vec(&Value::Array(vec![Value::Integer(1)])).unwrap();
        assert!(matches!(CborPayload::decode(&bytes), Err(ProtocolError::NotAMap)));
        assert!(matches!(
            CborPayload::decode(&[0xff, 0x00]),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_frame_layout() {
        let payload = CborPayload::response(Status::Success);
        let body = payload.encode().unwrap();
        let frame = payload.encode_frame().unwrap();

        assert_eq!(frame.len(), FRAME_HEADER_SIZE + body.len());
        let header = [frame[0], frame[1], frame[2], frame[3]];
        assert_eq!(frame_size(header, 1024).unwrap(), body.len());
        assert_eq!(&frame[FRAME_HEADER_SIZE..], body.as_slice());
    }

    #[test]
    fn test_frame_size_limit() {
        let header = 2048u32.to_le_bytes();
        assert!(matches!(
            frame_size(header, 1024),
            Err(ProtocolError::FrameTooLarge { size: 2048, max: 1024 })
        ));
    }

    #[test]
    fn test_display_renders_json() {
        let payload = CborPayload::response(Status::BadRequest);
        assert_eq!(payload.to_string(), r#"{"$status":400}"#);
    }
}
