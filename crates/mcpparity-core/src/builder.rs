//! Construction of outgoing protocol messages.
//!
//! A [`MessageBuilder`] belongs to exactly one session. It hands out
//! monotonically increasing numeric ids, so every request it builds is
//! unique among the requests outstanding on that session. Building a message
//! performs no I/O.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

use crate::protocol::{Notification, Request, RequestId};
use crate::types::{ClientInfo, InitializeParams};

/// The protocol version the harness offers in the handshake.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

/// Method names used by the harness.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Post-handshake notification.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Tool listing request.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation request.
    pub const TOOLS_CALL: &str = "tools/call";
}

/// The shape a response is expected to have, derived from its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// `initialize`: the result must carry server capabilities.
    Initialize,
    /// `tools/list`: the result must carry a tool list.
    ListTools,
    /// `tools/call`: the result must carry typed content.
    CallTool,
    /// Anything else: only the envelope is checked.
    Other,
}

impl RequestKind {
    /// Derive the kind from a method name.
    #[must_use]
    pub fn from_method(method: &str) -> Self {
        match method {
            methods::INITIALIZE => Self::Initialize,
            methods::TOOLS_LIST => Self::ListTools,
            methods::TOOLS_CALL => Self::CallTool,
            _ => Self::Other,
        }
    }
}

/// Builds requests and notifications for one session.
#[derive(Debug)]
pub struct MessageBuilder {
    next_id: AtomicU64,
    client_info: ClientInfo,
    capabilities: Value,
    protocol_version: String,
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new(ClientInfo::default())
    }
}

impl MessageBuilder {
    /// Create a builder that identifies as `client_info`.
    ///
    /// Ids start at 1.
    #[must_use]
    pub fn new(client_info: ClientInfo) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            client_info,
            capabilities: Value::Object(Map::new()),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
        }
    }

    /// Set the capabilities advertised in the handshake.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the protocol version offered in the handshake.
    #[must_use]
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// The client identity sent in the handshake.
    #[must_use]
    pub const fn client_info(&self) -> &ClientInfo {
        &self.client_info
    }

    /// Reserve the next correlation id.
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Build the handshake request.
    pub fn initialize(&self) -> Request {
        let params = InitializeParams {
            protocol_version: self.protocol_version.clone(),
            capabilities: self.capabilities.clone(),
            client_info: self.client_info.clone(),
        };
        // InitializeParams only holds strings and JSON values.
        let params = serde_json::to_value(params).unwrap_or(Value::Null);
        Request::new(methods::INITIALIZE, self.next_id()).params(params)
    }

    /// Build the post-handshake notification.
    #[must_use]
    pub fn initialized(&self) -> Notification {
        Notification::new(methods::INITIALIZED)
    }

    /// Build a tool listing request.
    pub fn list_tools(&self) -> Request {
        Request::new(methods::TOOLS_LIST, self.next_id())
    }

    /// Build a tool invocation request.
    ///
    /// A `null` argument value is sent as an empty object.
    pub fn call_tool(&self, name: &str, arguments: Value) -> Request {
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Request::new(methods::TOOLS_CALL, self.next_id()).params(serde_json::json!({
            "name": name,
            "arguments": arguments,
        }))
    }

    /// Build an arbitrary request.
    pub fn request(&self, method: impl Into<String>, params: Option<Value>) -> Request {
        let request = Request::new(method.into(), self.next_id());
        match params {
            Some(params) => request.params(params),
            None => request,
        }
    }
}
