//! Control actions
//!
//! Actions arrive as a name plus a raw JSON payload. They are decoded once
//! at the boundary into a typed [`Action`]; sources never look at the raw
//! payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConnectorError, ConnectorResult};

/// Action name for the offset handshake
pub const SOURCE_META: &str = "SourceMeta";

/// Action name for ad hoc query execution
pub const SOURCE_QUERY: &str = "SourceQuery";

/// Offsets delivered by the controller before a source may stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Meta {
    /// Connector-local offset
    pub offset: u64,
    /// Agent-wide offset
    pub offset_agent: u64,
}

impl Meta {
    /// Create a meta payload
    pub fn new(offset: u64, offset_agent: u64) -> Self {
        Self {
            offset,
            offset_agent,
        }
    }

    /// Decode `{"data": {"offset": "12", "offset_agent": "40"}}`.
    ///
    /// Both offsets are required. Each may be a decimal string or a JSON
    /// integer; anything negative or non-numeric is rejected.
    pub fn decode(payload: &[u8]) -> ConnectorResult<Self> {
        #[derive(Deserialize)]
        struct Envelope {
            data: Map<String, Value>,
        }

        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| ConnectorError::decode(format!("meta payload: {}", e)))?;

        Ok(Self {
            offset: offset_field(&envelope.data, "offset")?,
            offset_agent: offset_field(&envelope.data, "offset_agent")?,
        })
    }

    /// Encode in the same shape `decode` accepts
    pub fn to_payload(&self) -> Vec<u8> {
        serde_json::json!({
            "data": {
                "offset": self.offset.to_string(),
                "offset_agent": self.offset_agent.to_string(),
            }
        })
        .to_string()
        .into_bytes()
    }
}

fn offset_field(data: &Map<String, Value>, key: &str) -> ConnectorResult<u64> {
    match data.get(key) {
        Some(Value::String(s)) => s.trim().parse::<u64>().map_err(|_| {
            ConnectorError::decode(format!("meta {} is not a non-negative integer: {:?}", key, s))
        }),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            ConnectorError::decode(format!("meta {} is not a non-negative integer: {}", key, n))
        }),
        Some(other) => Err(ConnectorError::decode(format!(
            "meta {} has unexpected type: {}",
            key, other
        ))),
        None => Err(ConnectorError::decode(format!("meta is missing {}", key))),
    }
}

/// Statement delivered with a `SourceQuery` action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// SQL text
    pub query: String,
}

impl QueryRequest {
    /// Decode `{"query": "..."}`; an empty statement is rejected
    pub fn decode(payload: &[u8]) -> ConnectorResult<Self> {
        let request: Self = serde_json::from_slice(payload)
            .map_err(|e| ConnectorError::decode(format!("query payload: {}", e)))?;
        if request.query.trim().is_empty() {
            return Err(ConnectorError::decode("query payload has an empty statement"));
        }
        Ok(request)
    }
}

/// A decoded control action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Offset handshake
    SourceMeta(Meta),
    /// Ad hoc statement
    SourceQuery(QueryRequest),
}

impl Action {
    /// Decode a raw action name and payload
    pub fn decode(name: &str, payload: &[u8]) -> ConnectorResult<Self> {
        match name {
            SOURCE_META => Meta::decode(payload).map(Self::SourceMeta),
            SOURCE_QUERY => QueryRequest::decode(payload).map(Self::SourceQuery),
            other => Err(ConnectorError::UnsupportedAction(other.to_string())),
        }
    }

    /// Wire name of this action
    pub fn name(&self) -> &'static str {
        match self {
            Self::SourceMeta(_) => SOURCE_META,
            Self::SourceQuery(_) => SOURCE_QUERY,
        }
    }
}

/// Parameter accepted by an advertised action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParameter {
    /// Parameter name inside the payload
    pub name: String,
    /// What the parameter means
    pub description: String,
    /// JSON type of the parameter
    #[serde(rename = "type")]
    pub kind: String,
}

/// An action a source advertises to the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescription {
    /// Action name
    pub action: String,
    /// What the action does
    pub description: String,
    /// Payload parameters
    pub parameters: Vec<ActionParameter>,
}

impl ActionDescription {
    /// Description of the `SourceQuery` action
    pub fn source_query() -> Self {
        Self {
            action: SOURCE_QUERY.to_string(),
            description: "Execute a statement and emit one event per result row".to_string(),
            parameters: vec![ActionParameter {
                name: "query".to_string(),
                description: "SQL statement to execute".to_string(),
                kind: "string".to_string(),
            }],
        }
    }
}
