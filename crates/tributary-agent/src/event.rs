//! Event envelope
//!
//! Every source emits the same shape:
//!
//! ```json
//! {"header": {"eventType": "fileReadingFollower"},
//!  "payload": {"tenant": "acme", "agentId": "...", "timestamp": "1700000000",
//!              "environment": "prod", "value": "raw line"}}
//! ```
//!
//! Relational sources carry `row` (column -> value) instead of `value`, and
//! the database the statement ran against.

use serde::{Deserialize, Serialize};

/// Identity of the agent that owns a source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    /// Tenant id
    pub tenant: String,
    /// Deployment environment
    pub environment: String,
    /// Agent id
    pub agent_id: String,
}

impl AgentInfo {
    /// Create agent identity
    pub fn new(
        tenant: impl Into<String>,
        environment: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            environment: environment.into(),
            agent_id: agent_id.into(),
        }
    }
}

/// Event header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHeader {
    /// Connector type identifier of the producing source
    pub event_type: String,
}

/// Content carried by an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventBody {
    /// Raw text, one line of a followed file
    Value(String),
    /// One result row keyed by column name
    Row(serde_json::Map<String, serde_json::Value>),
}

/// Event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// Tenant id
    pub tenant: String,
    /// Agent id
    pub agent_id: String,
    /// Unix seconds, as a decimal string
    pub timestamp: String,
    /// Deployment environment
    pub environment: String,
    /// Database the row came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Line text or result row
    #[serde(flatten)]
    pub body: EventBody,
}

/// Source offsets reached once an event has been delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    /// Connector-local offset
    pub offset: u64,
    /// Agent-wide offset
    pub offset_agent: u64,
}

/// Envelope pushed onto a source's output channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Header
    pub header: EventHeader,
    /// Payload
    pub payload: EventPayload,
    /// Stamped by the source when the event is enqueued; never serialized
    #[serde(skip)]
    pub position: Option<Position>,
}

impl Event {
    fn new(event_type: &str, agent: &AgentInfo, database: Option<String>, body: EventBody) -> Self {
        Self {
            header: EventHeader {
                event_type: event_type.to_string(),
            },
            payload: EventPayload {
                tenant: agent.tenant.clone(),
                agent_id: agent.agent_id.clone(),
                timestamp: chrono::Utc::now().timestamp().to_string(),
                environment: agent.environment.clone(),
                database,
                body,
            },
            position: None,
        }
    }

    /// Event for one line of text
    pub fn line(event_type: &str, agent: &AgentInfo, text: impl Into<String>) -> Self {
        Self::new(event_type, agent, None, EventBody::Value(text.into()))
    }

    /// Event for one result row
    pub fn row(
        event_type: &str,
        agent: &AgentInfo,
        database: impl Into<String>,
        row: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self::new(event_type, agent, Some(database.into()), EventBody::Row(row))
    }

    /// Connector type that produced this event
    pub fn event_type(&self) -> &str {
        &self.header.event_type
    }

    /// Line text, if this is a line event
    pub fn value(&self) -> Option<&str> {
        match &self.payload.body {
            EventBody::Value(v) => Some(v),
            EventBody::Row(_) => None,
        }
    }

    /// Row object, if this is a row event
    pub fn row_data(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        match &self.payload.body {
            EventBody::Row(r) => Some(r),
            EventBody::Value(_) => None,
        }
    }

    /// Offsets to commit once this event is written out
    pub fn position(&self) -> Option<Position> {
        self.position
    }

    /// Serialize as a single JSON line
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
