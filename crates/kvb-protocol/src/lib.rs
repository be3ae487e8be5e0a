// kvb-protocol: wire types for the key/value broker protocol.
//
// Envelopes are a flat JSON struct (`type`, `requestId`, `payload`,
// `timestamp`, and on responses `success`/`data`/`error`) rather than a
// per-opcode tagged union, because the same fields are shared across every
// opcode and the payload shape varies independently of the envelope shape.
// Dispatch on `type` still gets compile-time exhaustiveness via `RequestType`.

pub mod value;

pub use value::{Scalar, Value};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One JSON message on the wire, in either direction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl Envelope {
    pub fn request(kind: RequestType, request_id: u64, payload: Value) -> Self {
        Self {
            kind: kind.as_str().to_owned(),
            request_id: Some(request_id),
            payload: Some(payload),
            timestamp: now_millis(),
            success: None,
            data: None,
            error: None,
        }
    }

    pub fn response(kind: RequestType, request_id: Option<u64>, data: Value) -> Self {
        Self {
            kind: kind.response_str().to_owned(),
            request_id,
            payload: None,
            timestamp: now_millis(),
            success: Some(true),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(request_id: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            kind: "ERROR".to_owned(),
            request_id,
            payload: None,
            timestamp: now_millis(),
            success: Some(false),
            data: None,
            error: Some(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications (server-initiated, not correlated by requestId)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    #[serde(rename = "CONNECTION_ESTABLISHED")]
    ConnectionEstablished {
        #[serde(rename = "clientId")]
        client_id: String,
        platform: String,
        capabilities: Vec<String>,
        timestamp: i64,
    },
    #[serde(rename = "SUBSCRIPTION_UPDATE")]
    SubscriptionUpdate {
        collection: String,
        key: String,
        operation: String,
        value: Option<Value>,
        timestamp: i64,
    },
}

// ---------------------------------------------------------------------------
// Request types — closed tagged variant with compile-time exhaustiveness
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestType {
    Get,
    Set,
    Delete,
    Query,
    Batch,
    Ping,
    Subscribe,
    Unsubscribe,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Get => "GET",
            RequestType::Set => "SET",
            RequestType::Delete => "DELETE",
            RequestType::Query => "QUERY",
            RequestType::Batch => "BATCH",
            RequestType::Ping => "PING",
            RequestType::Subscribe => "SUBSCRIBE",
            RequestType::Unsubscribe => "UNSUBSCRIBE",
        }
    }

    pub fn response_str(self) -> &'static str {
        match self {
            RequestType::Get => "GET_RESPONSE",
            RequestType::Set => "SET_RESPONSE",
            RequestType::Delete => "DELETE_RESPONSE",
            RequestType::Query => "QUERY_RESPONSE",
            RequestType::Batch => "BATCH_RESPONSE",
            RequestType::Ping => "PING_RESPONSE",
            RequestType::Subscribe => "SUBSCRIBE_RESPONSE",
            RequestType::Unsubscribe => "UNSUBSCRIBE_RESPONSE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "GET" => RequestType::Get,
            "SET" => RequestType::Set,
            "DELETE" => RequestType::Delete,
            "QUERY" => RequestType::Query,
            "BATCH" => RequestType::Batch,
            "PING" => RequestType::Ping,
            "SUBSCRIBE" => RequestType::Subscribe,
            "UNSUBSCRIBE" => RequestType::Unsubscribe,
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// The detected client runtime. Drives the capability list advertised on
/// welcome and the choice of storage adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Platform {
    Browser,
    ReactNative,
    /// Wire value `"nodejs"` — any non-browser, non-mobile server process.
    Server,
    Other(String),
}

impl Platform {
    pub fn as_str(&self) -> &str {
        match self {
            Platform::Browser => "browser",
            Platform::ReactNative => "react-native",
            Platform::Server => "nodejs",
            Platform::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Platform {
        match s {
            "browser" => Platform::Browser,
            "react-native" => Platform::ReactNative,
            "nodejs" => Platform::Server,
            other => Platform::Other(other.to_owned()),
        }
    }

    /// Pure function of the platform, per the capability table.
    pub fn capabilities(&self) -> Vec<&'static str> {
        match self {
            Platform::Browser => vec!["localStorage", "indexedDB", "sessionStorage"],
            Platform::ReactNative => vec!["asyncStorage", "sqlite", "secureStorage"],
            Platform::Server => vec!["filesystem", "sqlite", "memory"],
            Platform::Other(_) => vec!["memory"],
        }
    }
}

impl Serialize for Platform {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Platform::parse(&s))
    }
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetPayload {
    pub collection: String,
    pub key: String,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetPayload {
    pub collection: String,
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletePayload {
    pub collection: String,
    pub key: String,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryPayload {
    pub collection: String,
    #[serde(default, rename = "query")]
    pub predicate: BTreeMap<String, Scalar>,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub collection: String,
    pub pattern: String,
}

pub type UnsubscribePayload = SubscribePayload;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchOperation {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: String,
    pub payload: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchPayload {
    pub operations: Vec<BatchOperation>,
    /// Default behavior continues past a failing sub-operation; set this to
    /// abort on the first error instead.
    #[serde(default)]
    pub stop_on_error: bool,
}

// ---------------------------------------------------------------------------
// Response data shapes
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetResult {
    pub success: bool,
    pub key: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteResult {
    pub deleted: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryResultRow {
    pub key: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PongResult {
    pub pong: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchResultEntry {
    pub operation: String,
    pub result: Value,
}
