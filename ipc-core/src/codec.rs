//! Pluggable payload codecs (spec §4.1). The codec never sees the length
//! prefix — that's `framing`'s job. Exactly two codecs are defined: a textual
//! JSON codec and a binary codec from the MessagePack family.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{IpcError, Result};
use crate::message::Message;

/// Which wire codec an endpoint is configured to use. Both ends of a
/// connection must agree; the Gateway and Client configs each carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Json,
    MsgPack,
}

impl Default for CodecKind {
    fn default() -> Self {
        CodecKind::Json
    }
}

impl CodecKind {
    pub fn encode(self, message: &Message) -> Result<Vec<u8>> {
        match self {
            CodecKind::Json => encode_json(message),
            CodecKind::MsgPack => encode_msgpack(message),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<Message> {
        match self {
            CodecKind::Json => decode_json(bytes),
            CodecKind::MsgPack => decode_msgpack(bytes),
        }
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| IpcError::SerializationFailed(e.to_string()))
}

fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| IpcError::DeserializationFailed(e.to_string()))
}

fn encode_msgpack<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| IpcError::SerializationFailed(e.to_string()))
}

fn decode_msgpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| IpcError::DeserializationFailed(e.to_string()))
}
