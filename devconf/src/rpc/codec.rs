//! Wire framing.
//!
//! Each frame is a 4-byte big-endian length followed by one JSON object:
//!
//! ```text
//! request:  {"id": 7, "method": "TranslateVar", "params": {...}}
//! response: {"id": 7, "result": {...}}
//!           {"id": 7, "error": {"code": 2, "message": "..."}}
//! ```
//!
//! Ids are chosen by the caller and echoed by the server, so several
//! requests may be in flight on one connection.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::RpcFault;

/// Largest accepted frame. Command sequences and config files fit
/// comfortably.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Build the frame codec used on both ends of a connection.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// A call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// The answer to a call, matched by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcFault>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn fault(id: u64, fault: RpcFault) -> Self {
        Self {
            id,
            result: None,
            error: Some(fault),
        }
    }

    /// A fault wins over a result; a missing result is `null`.
    pub fn into_result(self) -> Result<Value, RpcFault> {
        match self.error {
            Some(fault) => Err(fault),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

pub fn encode<T: Serialize>(msg: &T) -> serde_json::Result<Bytes> {
    serde_json::to_vec(msg).map(Bytes::from)
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> serde_json::Result<T> {
    serde_json::from_slice(frame)
}
