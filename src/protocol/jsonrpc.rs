//! JSON-RPC 2.0 message types and parsing.
//!
//! The hub speaks line-delimited JSON-RPC 2.0 on every transport: one
//! object per line, `"jsonrpc": "2.0"` required. A line is classified as a
//! request (has `method` and `id`), a notification (has `method`, no `id`),
//! or a response (no `method`, has `id` plus exactly one of
//! `result`/`error`).
//!
//! # ID handling
//!
//! JSON-RPC 2.0 allows string or integer IDs and the exact type must be
//! preserved in responses: if the peer sends `"id": 1`, it gets `"id": 1`
//! back, never `"id": "1"`. An explicit `"id": null` is valid (though
//! unusual) and distinct from a missing `id`, which marks a notification.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

use crate::error::jsonrpc::JsonRpcError;
use crate::error::HubError;

/// JSON-RPC protocol version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request ID.
///
/// Opaque to the hub except for equality; only its wire type matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    /// Integer ID (e.g., `"id": 1`)
    Number(i64),
    /// String ID (e.g., `"id": "abc-123"`)
    String(String),
    /// Explicit null ID - valid but unusual
    Null,
}

impl JsonRpcId {
    /// The integer value, when the ID is numeric.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            JsonRpcId::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonRpcId::Number(n) => write!(f, "{}", n),
            JsonRpcId::String(s) => write!(f, "{}", s),
            JsonRpcId::Null => write!(f, "null"),
        }
    }
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => serializer.serialize_i64(*n),
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Number(n) => n.as_i64().map(JsonRpcId::Number).ok_or_else(|| {
                serde::de::Error::custom("JSON-RPC ID must be integer, not float")
            }),
            Value::String(s) => Ok(JsonRpcId::String(s)),
            Value::Null => Ok(JsonRpcId::Null),
            _ => Err(serde::de::Error::custom(
                "JSON-RPC ID must be string, integer, or null",
            )),
        }
    }
}

/// Wrapper to distinguish between a missing field and an explicit null.
#[derive(Debug, Clone, Default)]
enum MaybeNull<T> {
    #[default]
    Absent,
    Null,
    Present(T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for MaybeNull<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            Ok(MaybeNull::Null)
        } else {
            T::deserialize(value)
                .map(MaybeNull::Present)
                .map_err(serde::de::Error::custom)
        }
    }
}

/// Explicit null becomes `Some(JsonRpcId::Null)`; absence stays `None`.
fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<JsonRpcId>, D::Error>
where
    D: Deserializer<'de>,
{
    match MaybeNull::deserialize(deserializer)? {
        MaybeNull::Absent => Ok(None),
        MaybeNull::Null => Ok(Some(JsonRpcId::Null)),
        MaybeNull::Present(id) => Ok(Some(id)),
    }
}

/// Raw wire message before classification. All fields optional so that
/// malformed messages produce useful errors instead of serde noise.
#[derive(Debug, Clone, Deserialize)]
struct RawMessage {
    jsonrpc: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    id: Option<JsonRpcId>,
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// Outbound JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Request ID (None for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request with an ID.
    pub fn new(id: JsonRpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Build a notification (no ID, no response expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// Outbound JSON-RPC 2.0 response.
///
/// Carries exactly one of `result` or `error`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Echoed request ID
    pub id: JsonRpcId,
    /// Result (mutually exclusive with error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (mutually exclusive with result)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: JsonRpcId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: JsonRpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Parsed inbound request or notification, with tracking metadata.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    /// Original JSON-RPC ID (None for notifications)
    pub id: Option<JsonRpcId>,
    /// Method name
    pub method: String,
    /// Method parameters
    pub params: Option<Value>,
    /// Timestamp when the message was received
    pub received_at: Instant,
    /// Unique correlation ID for tracing
    pub correlation_id: Uuid,
}

impl ParsedRequest {
    /// Returns true if this is a notification (no ID).
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Parsed inbound response.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    /// The ID of the request this responds to
    pub id: JsonRpcId,
    /// Result payload, when successful
    pub result: Option<Value>,
    /// Error payload, when failed
    pub error: Option<JsonRpcError>,
    /// Method of the originating request, filled in by the codec from its
    /// pending-request table. None when the response could not be matched.
    pub method: Option<String>,
}

/// One classified inbound message.
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    /// A request or notification from the peer
    Request(ParsedRequest),
    /// A response to a request the hub sent
    Response(ParsedResponse),
}

/// Why a line could not be turned into a message.
///
/// Carries the offending message's ID when one could be recovered, so the
/// codec can send the error back instead of dropping it silently.
#[derive(Debug)]
pub struct MessageParseError {
    /// Best-effort extracted ID of the offending message
    pub id: Option<JsonRpcId>,
    /// The underlying error
    pub error: HubError,
}

/// Parse one line into a classified JSON-RPC 2.0 message.
///
/// # Errors
///
/// * Malformed JSON yields a parse error (-32700) with no ID.
/// * Structurally invalid JSON-RPC yields an invalid-request error with
///   the message's ID when it had one.
pub fn parse_message(line: &str) -> Result<ParsedMessage, MessageParseError> {
    let raw: RawMessage = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            // A second pass as a bare Value recovers the id from messages
            // that are valid JSON but have, say, a boolean `method`.
            let id = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|v| extract_id(&v));
            let error = if serde_json::from_str::<Value>(line).is_ok() {
                HubError::InvalidRequest {
                    details: format!("Invalid JSON-RPC structure: {}", e),
                }
            } else {
                HubError::Parse {
                    details: format!("Invalid JSON: {}", e),
                }
            };
            return Err(MessageParseError { id, error });
        }
    };

    // Validate the version marker before anything else.
    match raw.jsonrpc.as_deref() {
        Some(JSONRPC_VERSION) => {}
        Some(v) => {
            return Err(MessageParseError {
                id: raw.id,
                error: HubError::InvalidRequest {
                    details: format!("Invalid jsonrpc version: expected \"2.0\", got \"{}\"", v),
                },
            });
        }
        None => {
            return Err(MessageParseError {
                id: raw.id,
                error: HubError::InvalidRequest {
                    details: "Missing required field: jsonrpc".to_string(),
                },
            });
        }
    }

    if let Some(method) = raw.method {
        // Request or notification. `result`/`error` must be absent.
        if raw.result.is_some() || raw.error.is_some() {
            return Err(MessageParseError {
                id: raw.id,
                error: HubError::InvalidRequest {
                    details: "Request must not carry result or error".to_string(),
                },
            });
        }
        return Ok(ParsedMessage::Request(ParsedRequest {
            id: raw.id,
            method,
            params: raw.params,
            received_at: Instant::now(),
            correlation_id: Uuid::new_v4(),
        }));
    }

    // Response. Must have an ID and exactly one of result/error.
    let id = match raw.id {
        Some(id) => id,
        None => {
            return Err(MessageParseError {
                id: None,
                error: HubError::InvalidRequest {
                    details: "Message has neither method nor id".to_string(),
                },
            });
        }
    };
    match (raw.result.is_some(), raw.error.is_some()) {
        (true, true) => Err(MessageParseError {
            id: Some(id),
            error: HubError::InvalidRequest {
                details: "Response carries both result and error".to_string(),
            },
        }),
        (false, false) => Err(MessageParseError {
            id: Some(id),
            error: HubError::InvalidRequest {
                details: "Response carries neither result nor error".to_string(),
            },
        }),
        _ => Ok(ParsedMessage::Response(ParsedResponse {
            id,
            result: raw.result,
            error: raw.error,
            method: None,
        })),
    }
}

/// Best-effort ID extraction from an arbitrary JSON value.
fn extract_id(value: &Value) -> Option<JsonRpcId> {
    match value.get("id")? {
        Value::Number(n) => n.as_i64().map(JsonRpcId::Number),
        Value::String(s) => Some(JsonRpcId::String(s.clone())),
        Value::Null => Some(JsonRpcId::Null),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_request(line: &str) -> ParsedRequest {
        match parse_message(line).expect("should parse") {
            ParsedMessage::Request(req) => req,
            other => panic!("expected request, got {:?}", other),
        }
    }

    fn parse_response(line: &str) -> ParsedResponse {
        match parse_message(line).expect("should parse") {
            ParsedMessage::Response(resp) => resp,
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_valid_request() {
        let req =
            parse_request(r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"t"}}"#);
        assert_eq!(req.id, Some(JsonRpcId::Number(1)));
        assert_eq!(req.method, "tools/call");
        assert!(!req.is_notification());
        assert!(req.params.is_some());
    }

    #[test]
    fn test_parse_notification() {
        let req = parse_request(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert!(req.is_notification());
        assert_eq!(req.id, None);
    }

    #[test]
    fn test_parse_response_result() {
        let resp = parse_response(r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#);
        assert_eq!(resp.id, JsonRpcId::Number(7));
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
        assert!(resp.method.is_none());
    }

    #[test]
    fn test_parse_response_error() {
        let resp =
            parse_response(r#"{"jsonrpc":"2.0","id":"r","error":{"code":-32601,"message":"nope"}}"#);
        assert_eq!(resp.id, JsonRpcId::String("r".to_string()));
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[test]
    fn test_response_with_both_members_rejected() {
        let err = parse_message(r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":1,"message":"m"}}"#)
            .unwrap_err();
        assert_eq!(err.id, Some(JsonRpcId::Number(1)));
        assert!(matches!(err.error, HubError::InvalidRequest { .. }));
    }

    #[test]
    fn test_response_with_neither_member_rejected() {
        let err = parse_message(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert!(matches!(err.error, HubError::InvalidRequest { .. }));
    }

    #[test]
    fn test_malformed_json_has_no_id() {
        let err = parse_message(r#"{"invalid json"#).unwrap_err();
        assert!(err.id.is_none());
        assert!(matches!(err.error, HubError::Parse { .. }));
    }

    #[test]
    fn test_missing_jsonrpc_field() {
        let err = parse_message(r#"{"id":1,"method":"test"}"#).unwrap_err();
        assert_eq!(err.id, Some(JsonRpcId::Number(1)));
        match err.error {
            HubError::InvalidRequest { details } => assert!(details.contains("jsonrpc")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_version_rejected() {
        let err = parse_message(r#"{"jsonrpc":"1.0","id":1,"method":"test"}"#).unwrap_err();
        match err.error {
            HubError::InvalidRequest { details } => assert!(details.contains("2.0")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_integer_id_preserved() {
        let req = parse_request(r#"{"jsonrpc":"2.0","id":42,"method":"test"}"#);
        let response = JsonRpcResponse::success(req.id.unwrap(), serde_json::json!({}));
        let serialized = serde_json::to_string(&response).unwrap();
        assert!(serialized.contains("\"id\":42"));
        assert!(!serialized.contains("\"id\":\"42\""));
    }

    #[test]
    fn test_string_id_preserved() {
        let req = parse_request(r#"{"jsonrpc":"2.0","id":"abc-123","method":"test"}"#);
        let response = JsonRpcResponse::success(req.id.unwrap(), serde_json::json!({}));
        let serialized = serde_json::to_string(&response).unwrap();
        assert!(serialized.contains("\"id\":\"abc-123\""));
    }

    #[test]
    fn test_null_id_is_not_a_notification() {
        let req = parse_request(r#"{"jsonrpc":"2.0","id":null,"method":"test"}"#);
        assert_eq!(req.id, Some(JsonRpcId::Null));
        assert!(!req.is_notification());
    }

    #[test]
    fn test_float_id_rejected() {
        let err = parse_message(r#"{"jsonrpc":"2.0","id":1.5,"method":"test"}"#).unwrap_err();
        assert!(matches!(err.error, HubError::InvalidRequest { .. }));
    }

    #[test]
    fn test_notification_serialization_has_no_id() {
        let notif = JsonRpcRequest::notification("notifications/tools/list_changed", None);
        let serialized = serde_json::to_string(&notif).unwrap();
        assert!(!serialized.contains("\"id\""));
        assert!(!serialized.contains("\"params\""));
        assert!(serialized.contains("\"jsonrpc\":\"2.0\""));
    }

    #[test]
    fn test_request_round_trip() {
        let request = JsonRpcRequest::new(
            JsonRpcId::Number(3),
            "tools/call",
            Some(serde_json::json!({"name": "echo", "args": {"text": "hi"}})),
        );
        let line = serde_json::to_string(&request).unwrap();
        let req = parse_request(&line);
        assert_eq!(req.id, Some(JsonRpcId::Number(3)));
        assert_eq!(req.method, "tools/call");
        assert_eq!(req.params.unwrap()["args"]["text"], "hi");
    }

    #[test]
    fn test_response_single_member_invariant() {
        let ok = JsonRpcResponse::success(JsonRpcId::Number(1), serde_json::json!({"a": 1}));
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));

        let err = JsonRpcResponse::error(
            JsonRpcId::Number(1),
            JsonRpcError::new(-32600, "Invalid Request"),
        );
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"error\""));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_correlation_id_generated() {
        let req = parse_request(r#"{"jsonrpc":"2.0","id":1,"method":"test"}"#);
        assert!(!req.correlation_id.is_nil());
    }

    #[test]
    fn test_request_with_result_rejected() {
        let err =
            parse_message(r#"{"jsonrpc":"2.0","id":1,"method":"m","result":{}}"#).unwrap_err();
        assert!(matches!(err.error, HubError::InvalidRequest { .. }));
    }
}
