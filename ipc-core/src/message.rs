//! Wire message schemas (spec §3). `params` and `data` are opaque to the
//! router and framed verbatim; they are modeled as `serde_json::Value`
//! regardless of wire codec, so a `CALL` built against the JSON codec decodes
//! identically once re-serialised through the MessagePack codec.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::IpcContext;
use crate::error::RemoteError;

/// `client → gateway` on connect. `metadata.poolIndex`, if present and an
/// integer, marks the frame as one member of a pooled registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Register {
    #[serde(rename = "serviceName")]
    pub service_name: String,
    pub methods: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl Register {
    /// The `metadata.poolIndex` field, if present and representable as an
    /// integer. Per spec §4.2 this value is not trusted for ordering among
    /// pool members, only as a boolean "this is a pool registration" marker.
    pub fn pool_index(&self) -> Option<i64> {
        self.metadata
            .as_ref()?
            .get("poolIndex")?
            .as_i64()
    }
}

/// Reply status on a `RESPONSE` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// The full set of message variants exchanged on the wire, tagged by `type`.
/// Unknown fields are ignored by `serde` by default; an unknown `type` fails
/// to deserialize into this enum and is handled one layer up (spec §4.2: it
/// produces an `ERROR` reply on the same connection).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "REGISTER")]
    Register(Register),

    #[serde(rename = "REGISTER_ACK")]
    RegisterAck,

    #[serde(rename = "CALL")]
    Call {
        id: String,
        from: String,
        to: String,
        method: String,
        params: Value,
        context: IpcContext,
    },

    #[serde(rename = "RESPONSE")]
    Response {
        id: String,
        from: String,
        to: String,
        status: ResponseStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
        context: IpcContext,
    },

    #[serde(rename = "HEARTBEAT")]
    Heartbeat { from: String, timestamp: i64 },

    #[serde(rename = "ERROR")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        error: RemoteError,
    },
}

impl Message {
    pub fn success_response(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        data: Value,
        context: IpcContext,
    ) -> Message {
        Message::Response {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            status: ResponseStatus::Success,
            data: Some(data),
            error: None,
            context,
        }
    }

    pub fn error_response(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        error: RemoteError,
        context: IpcContext,
    ) -> Message {
        Message::Response {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            status: ResponseStatus::Error,
            data: None,
            error: Some(error),
            context,
        }
    }

    /// The connection-level kind name, used in logs and in `InvalidMessage`
    /// diagnostics without needing to re-derive `type` from serde.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Register(_) => "REGISTER",
            Message::RegisterAck => "REGISTER_ACK",
            Message::Call { .. } => "CALL",
            Message::Response { .. } => "RESPONSE",
            Message::Heartbeat { .. } => "HEARTBEAT",
            Message::Error { .. } => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_index_reads_integer_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("poolIndex".to_string(), Value::from(2));
        let reg = Register {
            service_name: "svc".into(),
            methods: vec![],
            version: None,
            metadata: Some(metadata),
        };
        assert_eq!(reg.pool_index(), Some(2));
    }

    #[test]
    fn pool_index_absent_without_metadata() {
        let reg = Register {
            service_name: "svc".into(),
            methods: vec![],
            version: None,
            metadata: None,
        };
        assert_eq!(reg.pool_index(), None);
    }

    #[test]
    fn pool_index_ignores_non_integer_values() {
        let mut metadata = HashMap::new();
        metadata.insert("poolIndex".to_string(), Value::from("not-a-number"));
        let reg = Register {
            service_name: "svc".into(),
            methods: vec![],
            version: None,
            metadata: Some(metadata),
        };
        assert_eq!(reg.pool_index(), None);
    }

    #[test]
    fn call_round_trips_through_json() {
        let ctx = IpcContext::create("a", 1_000);
        let msg = Message::Call {
            id: "req-1".into(),
            from: "a".into(),
            to: "b".into(),
            method: "echo".into(),
            params: serde_json::json!({"v": 42}),
            context: ctx,
        };
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("\"type\":\"CALL\""));
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        match decoded {
            Message::Call { method, params, .. } => {
                assert_eq!(method, "echo");
                assert_eq!(params, serde_json::json!({"v": 42}));
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }
}
