//! # mcpparity-core
//!
//! Protocol-level building blocks for the MCP parity harness.
//!
//! - **Protocol types**: JSON-RPC 2.0 request/response/notification envelopes
//! - **Message builder**: handshake, list-tools and call-tool requests with
//!   monotonically increasing correlation ids
//! - **Response validator**: minimal shape checks per request kind
//! - **Error handling**: the [`HarnessError`] taxonomy with rich diagnostics
//!
//! Nothing in this crate performs I/O or depends on an async runtime.
//!
//! # Example
//!
//! ```rust
//! use mcpparity_core::{MessageBuilder, RequestKind, ResponseValidator};
//! use serde_json::json;
//!
//! let builder = MessageBuilder::default();
//! let request = builder.call_tool("echo", json!({"text": "Hello"}));
//!
//! let reply = json!({
//!     "jsonrpc": "2.0",
//!     "id": 1,
//!     "result": {"content": [{"type": "text", "text": "Hello"}]}
//! });
//! let response = ResponseValidator::validate(&reply, &request.id, RequestKind::CallTool)
//!     .expect("well-formed reply");
//! assert!(!response.is_error());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod error;
pub mod protocol;
pub mod types;
pub mod validator;

pub use builder::{DEFAULT_PROTOCOL_VERSION, MessageBuilder, RequestKind, methods};
pub use error::{BoxError, ErrorKind, HarnessError, Result, Violation};
pub use protocol::{
    Incoming, JSONRPC_VERSION, JsonRpcError, Notification, Request, RequestId, Response, classify,
};
pub use types::{
    CallToolResult, ClientInfo, ContentItem, InitializeParams, ListToolsResult, ServerHandshake,
    ToolDescriptor,
};
pub use validator::ResponseValidator;
