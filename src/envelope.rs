//! JSON-RPC 2.0 envelope types and classification
//!
//! Grounded on `examples/xbcsmith-xzatoma/src/mcp/types.rs`
//! (`JsonRpcRequest`/`JsonRpcResponse`/`JsonRpcError`) and
//! `examples/original_source/ezipc/remote/__init__.py` (`JRPC.check`,
//! `make_request`/`make_notif`/`make_response`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 error object, as carried in a `Response` envelope or
/// returned by a request handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(-32700, format!("Parse error: {detail}"))
    }

    pub fn invalid_request(detail: impl std::fmt::Display) -> Self {
        Self::new(-32600, format!("Invalid Request: {detail}"))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, format!("Method not found: {method}"))
    }

    pub fn internal_error(detail: impl std::fmt::Display) -> Self {
        Self::new(-32603, format!("Internal error: {detail}"))
    }
}

/// A decoded JSON-RPC request: has both `method` and `id`.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub id: String,
    pub method: String,
    pub params: Option<Value>,
}

/// A decoded JSON-RPC notification: has `method` but no `id`.
#[derive(Debug, Clone)]
pub struct NotificationEnvelope {
    pub method: String,
    pub params: Option<Value>,
}

/// A decoded JSON-RPC response: has `id` and exactly one of `result`/`error`.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub id: String,
    pub outcome: std::result::Result<Value, RpcError>,
}

/// The classification of a decoded JSON document.
#[derive(Debug, Clone)]
pub enum Envelope {
    Request(RequestEnvelope),
    Notification(NotificationEnvelope),
    Response(ResponseEnvelope),
    /// Decodes as JSON but is not a valid JSON-RPC 2.0 envelope shape.
    Invalid,
}

/// Classify a decoded JSON value into a request, notification, response, or
/// invalid envelope.
///
/// - REQUEST if `method` and `id` are both present and well-typed.
/// - NOTIFICATION if `method` is present and `id` is absent.
/// - RESPONSE if `id` is present with exactly one of `result`/`error`.
/// - INVALID otherwise (including both `result` and `error` present, or a
///   non-string `method`).
pub fn classify(value: &Value) -> Envelope {
    let method = value.get("method");
    let id = value.get("id").filter(|v| !v.is_null());
    let has_result = value.get("result").is_some();
    let has_error = value.get("error").is_some();

    match (method, id) {
        (Some(m), Some(i)) => {
            let (Some(m), Some(i)) = (m.as_str(), id_to_string(i)) else {
                return Envelope::Invalid;
            };
            Envelope::Request(RequestEnvelope {
                id: i,
                method: m.to_string(),
                params: value.get("params").cloned(),
            })
        }
        (Some(m), None) => {
            let Some(m) = m.as_str() else {
                return Envelope::Invalid;
            };
            Envelope::Notification(NotificationEnvelope {
                method: m.to_string(),
                params: value.get("params").cloned(),
            })
        }
        (None, Some(i)) => {
            if has_result == has_error {
                // Neither present, or both present: invalid either way.
                return Envelope::Invalid;
            }
            let Some(i) = id_to_string(i) else {
                return Envelope::Invalid;
            };
            let outcome = if has_error {
                match serde_json::from_value::<RpcError>(value["error"].clone()) {
                    Ok(e) => Err(e),
                    Err(_) => Err(RpcError::internal_error("malformed error object")),
                }
            } else {
                Ok(value.get("result").cloned().unwrap_or(Value::Null))
            };
            Envelope::Response(ResponseEnvelope { id: i, outcome })
        }
        (None, None) => Envelope::Invalid,
    }
}

fn id_to_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build a request envelope as a `Value` ready for the codec to write.
pub fn make_request(method: &str, params: Option<Value>, id: &str) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
        "id": id,
    })
}

/// Build a notification envelope as a `Value`.
pub fn make_notification(method: &str, params: Option<Value>) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

/// Build a successful response envelope.
pub fn make_response_ok(id: &str, result: Value) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

/// Build an error response envelope.
pub fn make_response_err(id: &str, error: RpcError) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": error,
    })
}
