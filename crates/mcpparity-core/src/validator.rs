//! Shape validation of correlated responses.
//!
//! The validator works on raw JSON rather than on deserialized types so that
//! each defect can be named precisely. It is stateless: the caller supplies
//! the id it is waiting for and the [`RequestKind`] of the original request.
//!
//! Checks, in order:
//!
//! 1. the payload is an object tagged `"jsonrpc": "2.0"`
//! 2. its id matches the pending request
//! 3. exactly one of `result` and `error` is present, and `error` is a
//!    well-formed error object
//! 4. a successful result has the shape its request kind requires
//!
//! Error responses are valid responses. Whether an error is acceptable is a
//! decision for the caller, not for the validator.

use serde_json::Value;

use crate::builder::RequestKind;
use crate::error::Violation;
use crate::protocol::{JSONRPC_VERSION, JsonRpcError, RequestId, Response};

/// Validates responses against the minimal shape for their request kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseValidator;

impl ResponseValidator {
    /// Validate `payload` as the response to request `expected` of `kind`.
    pub fn validate(
        payload: &Value,
        expected: &RequestId,
        kind: RequestKind,
    ) -> Result<Response, Violation> {
        let obj = payload.as_object().ok_or(Violation::NotAnObject)?;

        match obj.get("jsonrpc") {
            None => return Err(Violation::MissingVersion),
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(other) => {
                return Err(Violation::WrongVersion {
                    found: other.as_str().map_or_else(|| other.to_string(), str::to_string),
                });
            }
        }

        let raw_id = obj.get("id").unwrap_or(&Value::Null);
        let id = RequestId::from_value(raw_id)
            .filter(|id| expected.matches(id))
            .ok_or_else(|| Violation::IdMismatch {
                expected: expected.clone(),
                found: raw_id.to_string(),
            })?;

        match (obj.get("result"), obj.get("error")) {
            (None, None) => Err(Violation::MissingOutcome),
            (Some(_), Some(_)) => Err(Violation::AmbiguousOutcome),
            (None, Some(error)) => {
                let error = Self::parse_error(error)?;
                Ok(Response::error(id, error))
            }
            (Some(result), None) => {
                Self::check_result(result, kind)?;
                Ok(Response::success(id, result.clone()))
            }
        }
    }

    fn parse_error(error: &Value) -> Result<JsonRpcError, Violation> {
        let obj = error.as_object().ok_or_else(|| Violation::MalformedError {
            reason: "not an object".to_string(),
        })?;
        let code = obj
            .get("code")
            .and_then(Value::as_i64)
            .ok_or_else(|| Violation::MalformedError {
                reason: "missing integer \"code\"".to_string(),
            })?;
        let message = obj
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| Violation::MalformedError {
                reason: "missing string \"message\"".to_string(),
            })?;
        Ok(JsonRpcError {
            code,
            message: message.to_string(),
            data: obj.get("data").cloned(),
        })
    }

    fn check_result(result: &Value, kind: RequestKind) -> Result<(), Violation> {
        match kind {
            RequestKind::Initialize => {
                if result.get("capabilities").is_some_and(Value::is_object) {
                    Ok(())
                } else {
                    Err(Violation::MissingCapabilities)
                }
            }
            RequestKind::ListTools => {
                let tools = result
                    .get("tools")
                    .and_then(Value::as_array)
                    .ok_or(Violation::MissingToolList)?;
                for (index, tool) in tools.iter().enumerate() {
                    if !tool.is_object() {
                        return Err(Violation::MalformedTool {
                            index,
                            reason: "not an object".to_string(),
                        });
                    }
                    if !tool.get("name").is_some_and(Value::is_string) {
                        return Err(Violation::MalformedTool {
                            index,
                            reason: "missing string \"name\"".to_string(),
                        });
                    }
                }
                Ok(())
            }
            RequestKind::CallTool => {
                let content = result
                    .get("content")
                    .and_then(Value::as_array)
                    .ok_or(Violation::MissingContent)?;
                match content
                    .iter()
                    .position(|entry| !entry.get("type").is_some_and(Value::is_string))
                {
                    Some(index) => Err(Violation::UntypedContent { index }),
                    None => Ok(()),
                }
            }
            RequestKind::Other => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn id(n: u64) -> RequestId {
        RequestId::Number(n)
    }

    #[test]
    fn test_valid_call_tool_response() {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 5,
            "result": {"content": [{"type": "text", "text": "ok"}]}
        });
        let response =
            ResponseValidator::validate(&payload, &id(5), RequestKind::CallTool).unwrap();
        assert_eq!(response.id, id(5));
        assert!(!response.is_error());
    }

    #[test]
    fn test_error_response_is_valid() {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32602, "message": "Unknown tool: nope"}
        });
        let response =
            ResponseValidator::validate(&payload, &id(2), RequestKind::CallTool).unwrap();
        assert_eq!(response.error.unwrap().message, "Unknown tool: nope");
    }

    #[test]
    fn test_envelope_violations() {
        let cases = [
            (json!("text"), Violation::NotAnObject),
            (json!({"id": 1, "result": {}}), Violation::MissingVersion),
            (
                json!({"jsonrpc": "1.0", "id": 1, "result": {}}),
                Violation::WrongVersion { found: "1.0".into() },
            ),
            (json!({"jsonrpc": "2.0", "id": 1}), Violation::MissingOutcome),
            (
                json!({"jsonrpc": "2.0", "id": 1, "result": {}, "error": {"code": 1, "message": "x"}}),
                Violation::AmbiguousOutcome,
            ),
        ];
        for (payload, expected) in cases {
            assert_eq!(
                ResponseValidator::validate(&payload, &id(1), RequestKind::Other).unwrap_err(),
                expected
            );
        }
    }

    #[test]
    fn test_id_mismatch() {
        let payload = json!({"jsonrpc": "2.0", "id": 9, "result": {}});
        let err = ResponseValidator::validate(&payload, &id(1), RequestKind::Other).unwrap_err();
        assert!(matches!(err, Violation::IdMismatch { .. }));

        let echoed = json!({"jsonrpc": "2.0", "id": "1", "result": {}});
        assert!(ResponseValidator::validate(&echoed, &id(1), RequestKind::Other).is_ok());
    }

    #[test]
    fn test_malformed_error_object() {
        let payload = json!({"jsonrpc": "2.0", "id": 1, "error": {"message": "no code"}});
        let err = ResponseValidator::validate(&payload, &id(1), RequestKind::Other).unwrap_err();
        assert!(matches!(err, Violation::MalformedError { .. }));
    }

    #[test]
    fn test_kind_specific_checks() {
        let no_caps = json!({"jsonrpc": "2.0", "id": 1, "result": {"serverInfo": {}}});
        assert_eq!(
            ResponseValidator::validate(&no_caps, &id(1), RequestKind::Initialize).unwrap_err(),
            Violation::MissingCapabilities
        );

        let no_tools = json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": {}}});
        assert_eq!(
            ResponseValidator::validate(&no_tools, &id(1), RequestKind::ListTools).unwrap_err(),
            Violation::MissingToolList
        );

        let bad_tool = json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": [{"name": "a"}, {}]}});
        assert!(matches!(
            ResponseValidator::validate(&bad_tool, &id(1), RequestKind::ListTools).unwrap_err(),
            Violation::MalformedTool { index: 1, .. }
        ));

        let untyped = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"content": [{"type": "text", "text": "a"}, {"text": "b"}]}
        });
        assert_eq!(
            ResponseValidator::validate(&untyped, &id(1), RequestKind::CallTool).unwrap_err(),
            Violation::UntypedContent { index: 1 }
        );

        let no_content = json!({"jsonrpc": "2.0", "id": 1, "result": {}});
        assert_eq!(
            ResponseValidator::validate(&no_content, &id(1), RequestKind::CallTool).unwrap_err(),
            Violation::MissingContent
        );
    }
}
