//! Push channel wire messages.
//!
//! Frames are small json objects tagged by a `type` field. They never carry event content,
//! the poll cycle is the only source of it.

use bytes::Bytes;
use enum_as_inner::EnumAsInner;
use miniz_oxide::inflate::{self, TINFLStatus};
use snafu::prelude::*;
use tokio_tungstenite::tungstenite as websocket;

/// Error when parse frame data as hint
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ParseHintError {
    /// Decompress data failed
    #[snafu(display("decompress message failed: {status:?}"))]
    DecompressFailed {
        /// data for decode
        data: Bytes,
        /// decompress error status code
        status: TINFLStatus,
    },

    /// data is invalid json
    #[snafu(display("parse json failed: {source:?}"))]
    ParseJSONFailed {
        /// data for decode
        data: Bytes,
        /// source error
        source: serde_json::Error,
    },

    /// data json is not an object
    #[snafu(display("parsed message is not object: {json}"))]
    MessageNotObject {
        /// json string
        json: String,
    },

    /// data json has no string type field
    #[snafu(display("message has no string type field: {json}"))]
    NoHintType {
        /// json string
        json: String,
    },

    /// data json has an unknown type
    #[snafu(display("message has unknown hint type {t}"))]
    UnknownHintType {
        /// type name
        t: String,
    },
}

impl ParseHintError {
    /// Unknown types are expected from newer servers, everything else means a broken peer.
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, Self::UnknownHintType { .. })
    }
}

/// Server -> client notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumAsInner)]
pub enum Hint {
    /// something changed on the remote side, poll for it
    Change,
    /// acknowledgement of a keepalive ping
    KeepaliveAck,
}

impl Hint {
    /// Decode frame data to a hint
    pub fn decode(mut buff: Bytes, compressed: bool) -> Result<Self, ParseHintError> {
        if compressed {
            buff = inflate::decompress_to_vec_zlib(&buff)
                .map_err(|e| ParseHintError::DecompressFailed {
                    data: buff.clone(),
                    status: e,
                })?
                .into();
        }

        let value: serde_json::Value =
            serde_json::from_slice(&buff).context(error::ParseJSONFailed { data: buff.clone() })?;

        let obj = value
            .as_object()
            .with_context(|| error::MessageNotObject {
                json: String::from_utf8_lossy(&buff),
            })?;

        let t = obj
            .get("type")
            .and_then(|t| t.as_str())
            .with_context(|| error::NoHintType {
                json: String::from_utf8_lossy(&buff),
            })?;

        Self::from_type_name(t).with_context(|| error::UnknownHintType { t })
    }

    fn from_type_name(t: &str) -> Option<Self> {
        match t {
            "change" => Some(Self::Change),
            "keepalive-ack" | "pong" => Some(Self::KeepaliveAck),
            _ => None,
        }
    }

    /// get type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Change => "change",
            Self::KeepaliveAck => "keepalive-ack",
        }
    }
}

/// Client -> server keepalive frame
pub fn keepalive() -> websocket::Message {
    websocket::Message::Text(r#"{"type":"keepalive"}"#.to_string())
}
