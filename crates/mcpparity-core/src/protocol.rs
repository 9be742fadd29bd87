//! JSON-RPC 2.0 envelope types spoken over a server's standard streams.
//!
//! Every message exchanged with a candidate server is one of:
//!
//! - **Request**: a method call carrying a correlation id, answered by exactly
//!   one response
//! - **Response**: a reply carrying the same id and exactly one of `result`
//!   or `error`
//! - **Notification**: a one-way message without an id
//!
//! Outgoing messages are always built through these types. Incoming lines are
//! not deserialized into them directly: the [`validator`](crate::validator)
//! inspects the raw JSON first so that malformed payloads surface as
//! protocol violations instead of silent parse failures.
//!
//! # Example
//!
//! ```rust
//! use mcpparity_core::protocol::{Request, RequestId};
//!
//! let request = Request::new("tools/list", RequestId::Number(1));
//! let line = serde_json::to_string(&request).unwrap();
//! assert!(line.contains("\"method\":\"tools/list\""));
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// The JSON-RPC version string. Always "2.0".
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request ID.
///
/// The harness only ever issues numeric ids, but servers are free to echo
/// them back as strings, so both shapes are accepted on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(u64),
    /// String request ID.
    String(String),
}

impl RequestId {
    /// Read a request id out of a raw JSON value.
    ///
    /// Returns `None` for `null`, negative or fractional numbers, and any
    /// non-scalar value.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_u64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    /// Whether two ids refer to the same request.
    ///
    /// A numeric id echoed back as its decimal string is treated as a match.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::String(b)) | (Self::String(b), Self::Number(a)) => {
                b.parse::<u64>().is_ok_and(|b| b == *a)
            }
            _ => self == other,
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The JSON-RPC version. Always "2.0".
    pub jsonrpc: Cow<'static, str>,
    /// The request ID for correlation.
    pub id: RequestId,
    /// The method to invoke.
    pub method: Cow<'static, str>,
    /// The method parameters, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    /// Create a new request with no parameters.
    #[must_use]
    pub fn new(method: impl Into<Cow<'static, str>>, id: impl Into<RequestId>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    /// Set the parameters for this request.
    #[must_use]
    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Get the method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// A JSON-RPC error object carried by an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// A validated JSON-RPC 2.0 response.
///
/// Instances coming off the wire are produced by
/// [`ResponseValidator`](crate::validator::ResponseValidator), which
/// guarantees that exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The JSON-RPC version. Always "2.0".
    pub jsonrpc: Cow<'static, str>,
    /// The request ID this response corresponds to.
    pub id: RequestId,
    /// The result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// The error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl Response {
    /// Create a successful response.
    #[must_use]
    pub fn success(id: impl Into<RequestId>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(id: impl Into<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Check if this response carries an error payload.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Get the result, consuming self.
    pub fn into_result(self) -> Result<serde_json::Value, JsonRpcError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Err(JsonRpcError {
                code: -32603,
                message: "Response contained neither result nor error".to_string(),
                data: None,
            }),
        }
    }
}

/// A JSON-RPC 2.0 notification message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// The JSON-RPC version. Always "2.0".
    pub jsonrpc: Cow<'static, str>,
    /// The notification method.
    pub method: Cow<'static, str>,
    /// The notification parameters, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    /// Create a new notification with no parameters.
    #[must_use]
    pub fn new(method: impl Into<Cow<'static, str>>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method: method.into(),
            params: None,
        }
    }

    /// Get the method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// How an incoming JSON line relates to the protocol.
///
/// Produced by [`classify`]; used by the session reader to decide whether a
/// line is worth correlating at all.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// An object with an id and no method: a candidate response.
    Response(RequestId),
    /// An object with a method and no id.
    Notification(String),
    /// An object with both a method and an id, sent by the server.
    ServerRequest {
        /// The server's own request id.
        id: RequestId,
        /// The requested method.
        method: String,
    },
    /// Anything else (banners, log lines, arrays, scalars).
    Noise,
}

/// Classify a parsed JSON value by envelope shape.
#[must_use]
pub fn classify(value: &serde_json::Value) -> Incoming {
    let Some(obj) = value.as_object() else {
        return Incoming::Noise;
    };
    let id = obj.get("id").and_then(RequestId::from_value);
    let method = obj
        .get("method")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    match (id, method) {
        (Some(id), None) => Incoming::Response(id),
        (None, Some(method)) => Incoming::Notification(method),
        (Some(id), Some(method)) => Incoming::ServerRequest { id, method },
        (None, None) => Incoming::Noise,
    }
}
