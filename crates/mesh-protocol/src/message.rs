use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProtocolError;

/// Free-form key/value payload carried by an envelope.
pub type Payload = Map<String, Value>;

/// Kinds of agent-to-agent messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A task broadcast by its owner.
    Task,
    /// One agent's raw answer to a task.
    Result,
    /// The aggregated, final answer to a task.
    Consensus,
    /// Liveness check between neighbours.
    Heartbeat,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Task => "task",
            MessageKind::Result => "result",
            MessageKind::Consensus => "consensus",
            MessageKind::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(MessageKind::Task),
            "result" => Ok(MessageKind::Result),
            "consensus" => Ok(MessageKind::Consensus),
            "heartbeat" => Ok(MessageKind::Heartbeat),
            other => Err(ProtocolError::UnsupportedKind(other.to_string())),
        }
    }
}

/// Envelope exchanged between agents.
///
/// Fields are private so an envelope cannot change after construction;
/// use the accessors to read it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentMessage {
    kind: MessageKind,
    sender: String,
    task_id: String,
    payload: Payload,
    message_id: String,
    timestamp: f64,
}

impl AgentMessage {
    /// Build a new envelope with a fresh message id and the current time.
    pub fn new(
        kind: MessageKind,
        sender: impl Into<String>,
        task_id: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            kind,
            sender: sender.into(),
            task_id: task_id.into(),
            payload,
            message_id: new_message_id(),
            timestamp: crate::current_timestamp(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// String field of the payload, if present and a string.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Object field of the payload, cloned; empty when absent or not an object.
    pub fn payload_map(&self, key: &str) -> Payload {
        match self.payload.get(key) {
            Some(Value::Object(map)) => map.clone(),
            _ => Payload::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "kind": self.kind.as_str(),
            "sender": self.sender,
            "task_id": self.task_id,
            "payload": self.payload,
            "message_id": self.message_id,
            "timestamp": self.timestamp,
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode an envelope from a JSON value.
    ///
    /// `kind`, `sender` and `task_id` are required. A missing `payload`
    /// becomes an empty map, a missing `message_id` is generated and a
    /// missing or zero `timestamp` becomes the current time.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let obj = value.as_object().ok_or_else(|| {
            ProtocolError::InvalidEnvelope("envelope must be a JSON object".into())
        })?;

        let kind = match obj.get("kind") {
            Some(Value::String(s)) => s.parse::<MessageKind>()?,
            Some(other) => return Err(ProtocolError::UnsupportedKind(other.to_string())),
            None => return Err(ProtocolError::InvalidEnvelope("missing field 'kind'".into())),
        };
        let sender = required_text(obj, "sender")?;
        let task_id = required_text(obj, "task_id")?;

        let payload = match obj.get("payload") {
            None | Some(Value::Null) => Payload::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(ProtocolError::InvalidEnvelope(
                    "field 'payload' must be an object".into(),
                ))
            }
        };

        let message_id = match obj.get("message_id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => new_message_id(),
        };

        let timestamp = match obj.get("timestamp").and_then(Value::as_f64) {
            Some(ts) if ts != 0.0 => ts,
            _ => crate::current_timestamp(),
        };

        Ok(Self {
            kind,
            sender,
            task_id,
            payload,
            message_id,
            timestamp,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(&value)
    }
}

/// Generate a fresh opaque id (32 lowercase hex characters).
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn required_text(obj: &Map<String, Value>, field: &str) -> Result<String, ProtocolError> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(ProtocolError::InvalidEnvelope(format!("field '{field}' must be a string"))),
        None => Err(ProtocolError::InvalidEnvelope(format!("missing field '{field}'"))),
    }
}
