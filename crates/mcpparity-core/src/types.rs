//! MCP payload types used by the handshake and tool operations.
//!
//! Only the fields the harness reads or writes are modelled. Unknown fields
//! are preserved where a payload is kept for diagnostics.

use serde::{Deserialize, Serialize};

/// Client identity sent in the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

impl ClientInfo {
    /// Create new client info.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self::new("mcpparity", env!("CARGO_PKG_VERSION"))
    }
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol version the client speaks.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Client capabilities, sent verbatim.
    pub capabilities: serde_json::Value,
    /// Client information.
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

/// The part of the `initialize` result the harness keeps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerHandshake {
    /// Protocol version the server answered with.
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: Option<String>,
    /// Server capabilities, kept verbatim.
    #[serde(default)]
    pub capabilities: serde_json::Value,
    /// Server identity, kept verbatim.
    #[serde(rename = "serverInfo", default)]
    pub server_info: Option<serde_json::Value>,
}

/// A tool descriptor from a `tools/list` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the tool's arguments.
    #[serde(rename = "inputSchema", default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

/// The `tools/list` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Tools the server exposes.
    pub tools: Vec<ToolDescriptor>,
    /// Cursor for the next page, if the server paginates.
    #[serde(rename = "nextCursor", default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// One entry of a tool call's content list.
///
/// Content is kept loosely typed: the `type` tag is mandatory, everything
/// else depends on the tag (`text` for text, `data` + `mimeType` for images
/// and audio, `resource` for embedded resources).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// The content type tag (`text`, `image`, `audio`, `resource`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Text payload for `text` content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 payload for binary content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// MIME type of binary content.
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Embedded resource payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<serde_json::Value>,
}

impl ContentItem {
    /// Create a text content entry.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            data: None,
            mime_type: None,
            resource: None,
        }
    }

    /// The textual body used for length and pattern checks.
    ///
    /// Text entries yield their text, binary entries their encoded data,
    /// resources the `text` field of the embedded resource when present.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().or(self.data.as_deref()).or_else(|| {
            self.resource
                .as_ref()
                .and_then(|r| r.get("text"))
                .and_then(serde_json::Value::as_str)
        })
    }
}

/// The `tools/call` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Content entries produced by the tool.
    pub content: Vec<ContentItem>,
    /// Set by the server when the tool itself failed.
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// Whether the result is flagged as an error payload.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// All text content joined with newlines.
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_tool_result_parsing() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "image", "data": "aGk=", "mimeType": "image/png"}
            ]
        }))
        .unwrap();

        assert!(!result.is_error());
        assert_eq!(result.content.len(), 2);
        assert_eq!(result.content[1].mime_type.as_deref(), Some("image/png"));
        assert_eq!(result.content[1].body(), Some("aGk="));
        assert_eq!(result.joined_text(), "hello");
    }

    #[test]
    fn test_error_flag() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "boom"}],
            "isError": true
        }))
        .unwrap();
        assert!(result.is_error());
    }

    #[test]
    fn test_resource_body() {
        let item: ContentItem = serde_json::from_value(json!({
            "type": "resource",
            "resource": {"uri": "file:///a.txt", "text": "contents"}
        }))
        .unwrap();
        assert_eq!(item.body(), Some("contents"));
    }
}
