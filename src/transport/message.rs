//! JSON-RPC 2.0 message framing
//!
//! One JSON object per line. Inbound frames are classified as requests,
//! notifications or responses; frames that fail to parse keep their id when
//! it can be recovered so the peer still gets an error response.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::types::{AgentError, ErrorCode};

pub const JSONRPC_VERSION: &str = "2.0";

/// Request id; numbers and strings are both legal on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    Str(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Error object carried in a response
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(ErrorCode::ParseError, "Parse error")
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, reason)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(reason: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidParams, format!("Invalid params: {}", reason))
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, reason)
    }
}

impl From<&AgentError> for RpcError {
    fn from(err: &AgentError) -> Self {
        if let AgentError::Remote(remote) = err {
            return remote.clone();
        }
        let rpc = RpcError::new(err.error_code(), err.to_string());
        match err.retry_after() {
            Some(delay) => rpc.with_data(json!({
                "retryAfterMs": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
            })),
            None => rpc,
        }
    }
}

impl From<AgentError> for RpcError {
    fn from(err: AgentError) -> Self {
        RpcError::from(&err)
    }
}

/// A classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request {
        id: Id,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: Id,
        result: Result<Value, RpcError>,
    },
}

/// Why an inbound frame was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    /// Not valid JSON
    Parse { id: Option<Id> },
    /// Valid JSON but not a JSON-RPC message
    Invalid { id: Option<Id>, reason: String },
}

impl FrameError {
    pub fn id(&self) -> Option<&Id> {
        match self {
            FrameError::Parse { id } | FrameError::Invalid { id, .. } => id.as_ref(),
        }
    }

    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            FrameError::Parse { .. } => RpcError::parse_error(),
            FrameError::Invalid { reason, .. } => RpcError::invalid_request(reason.clone()),
        }
    }
}

static ID_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#""id"\s*:\s*(-?\d+|"(?:[^"\\]|\\.)*")"#).ok()
});

/// Best-effort id recovery from a frame that is not valid JSON
fn salvage_id(line: &str) -> Option<Id> {
    let pattern = ID_PATTERN.as_ref()?;
    let raw = pattern.captures(line)?.get(1)?.as_str();
    if raw.starts_with('"') {
        serde_json::from_str::<String>(raw).ok().map(Id::Str)
    } else {
        raw.parse::<i64>().ok().map(Id::Number)
    }
}

/// Parse one line into a classified message
pub fn parse_frame(line: &str) -> Result<Incoming, FrameError> {
    let value: Value = serde_json::from_str(line).map_err(|_| FrameError::Parse {
        id: salvage_id(line),
    })?;

    let Value::Object(mut map) = value else {
        return Err(FrameError::Invalid {
            id: None,
            reason: "message must be a JSON object".to_string(),
        });
    };

    let id = match map.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => match serde_json::from_value::<Id>(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                return Err(FrameError::Invalid {
                    id: None,
                    reason: "id must be a number or string".to_string(),
                });
            }
        },
    };

    if let Some(method) = map.remove("method") {
        let Value::String(method) = method else {
            return Err(FrameError::Invalid {
                id,
                reason: "method must be a string".to_string(),
            });
        };
        let params = map.remove("params").unwrap_or(Value::Null);
        return Ok(match id {
            Some(id) => Incoming::Request { id, method, params },
            None => Incoming::Notification { method, params },
        });
    }

    let Some(id) = id else {
        return Err(FrameError::Invalid {
            id: None,
            reason: "response without id".to_string(),
        });
    };

    if let Some(error) = map.remove("error") {
        let error = serde_json::from_value::<RpcError>(error).map_err(|e| FrameError::Invalid {
            id: None,
            reason: format!("malformed error object: {}", e),
        })?;
        return Ok(Incoming::Response {
            id,
            result: Err(error),
        });
    }

    match map.remove("result") {
        Some(result) => Ok(Incoming::Response {
            id,
            result: Ok(result),
        }),
        None => Err(FrameError::Invalid {
            id: Some(id),
            reason: "message has neither method nor result".to_string(),
        }),
    }
}

/// A message queued for writing
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Request {
        id: Id,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: Id,
        result: Result<Value, RpcError>,
    },
}

impl Outgoing {
    /// Notifications may wait for a batch; everything else flushes immediately
    pub fn is_notification(&self) -> bool {
        matches!(self, Outgoing::Notification { .. })
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        match self {
            Outgoing::Request { id, method, params } => {
                map.insert("id".into(), id_value(id));
                map.insert("method".into(), Value::from(method.as_str()));
                map.insert("params".into(), params.clone());
            }
            Outgoing::Notification { method, params } => {
                map.insert("method".into(), Value::from(method.as_str()));
                map.insert("params".into(), params.clone());
            }
            Outgoing::Response { id, result } => {
                map.insert("id".into(), id_value(id));
                match result {
                    Ok(value) => {
                        map.insert("result".into(), value.clone());
                    }
                    Err(error) => {
                        map.insert(
                            "error".into(),
                            serde_json::to_value(error).unwrap_or(Value::Null),
                        );
                    }
                }
            }
        }
        Value::Object(map)
    }

    /// Serialize as one newline-terminated frame
    pub fn encode(&self) -> String {
        let mut line = self.to_value().to_string();
        line.push('\n');
        line
    }
}

fn id_value(id: &Id) -> Value {
    match id {
        Id::Number(n) => Value::from(*n),
        Id::Str(s) => Value::from(s.as_str()),
    }
}
