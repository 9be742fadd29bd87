//! Evaluation of a case's expectation against a tool response.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. the success flag against whether the response signals an error
//! 2. the error pattern against the captured error text
//! 3. each content assertion against its content entry
//! 4. the custom predicate
//!
//! An unexpected error is reported as [`HarnessError::Tool`] carrying the
//! server's error text verbatim; every other mismatch is a
//! [`HarnessError::Assertion`].

use std::panic::{AssertUnwindSafe, catch_unwind};

use mcpparity_core::{CallToolResult, ContentItem, HarnessError, Response};
use regex::Regex;
use serde_json::Value;

use crate::catalog::{ContentAssertion, Expectation};

/// A tool response as seen by expectations and predicates.
#[derive(Debug, Clone)]
pub struct ToolResponse {
    /// The validated protocol response.
    pub response: Response,
    /// The parsed result, for non-error responses.
    pub result: Option<CallToolResult>,
    /// The error text, when the response signals an error.
    pub error_text: Option<String>,
}

impl ToolResponse {
    /// Interpret a validated `tools/call` response.
    ///
    /// A JSON-RPC error and a result flagged `isError` both count as errors;
    /// for the latter the error text is the joined text content.
    pub fn from_response(response: Response) -> Result<Self, HarnessError> {
        if let Some(error) = &response.error {
            let error_text = Some(error.message.clone());
            return Ok(Self {
                response,
                result: None,
                error_text,
            });
        }

        let raw = response.result.clone().unwrap_or(Value::Null);
        let result: CallToolResult = serde_json::from_value(raw)?;
        let error_text = result.is_error().then(|| result.joined_text());
        Ok(Self {
            response,
            result: Some(result),
            error_text,
        })
    }

    /// Whether the response signals an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_text.is_some()
    }

    /// The content entries, empty for error responses.
    #[must_use]
    pub fn content(&self) -> &[ContentItem] {
        self.result.as_ref().map_or(&[], |r| r.content.as_slice())
    }

    /// The raw response, for diagnostics.
    #[must_use]
    pub fn raw(&self) -> Value {
        serde_json::to_value(&self.response).unwrap_or(Value::Null)
    }
}

impl Expectation {
    /// Evaluate against a response to a call of `tool`.
    pub fn evaluate(&self, tool: &str, response: &ToolResponse) -> Result<(), HarnessError> {
        match (&response.error_text, self.success) {
            (Some(text), true) => {
                return Err(HarnessError::Tool {
                    tool: tool.to_string(),
                    message: text.clone(),
                });
            }
            (None, false) => {
                return Err(HarnessError::assertion(
                    "expected the tool to fail but it succeeded",
                ));
            }
            _ => {}
        }

        if let Some(pattern) = &self.error_pattern {
            let regex = compile(pattern)?;
            match &response.error_text {
                Some(text) if regex.is_match(text) => {}
                Some(text) => {
                    return Err(HarnessError::assertion(format!(
                        "error text {text:?} does not match /{pattern}/"
                    )));
                }
                None => {
                    return Err(HarnessError::assertion(format!(
                        "expected an error matching /{pattern}/ but none was returned"
                    )));
                }
            }
        }

        for assertion in &self.content {
            check_content(assertion, response.content())?;
        }

        if let Some(predicate) = &self.predicate {
            match catch_unwind(AssertUnwindSafe(|| predicate(response))) {
                Ok(Ok(())) => {}
                Ok(Err(message)) => return Err(HarnessError::assertion(message)),
                Err(panic) => {
                    return Err(HarnessError::assertion(format!(
                        "predicate panicked: {}",
                        panic_message(panic.as_ref())
                    )));
                }
            }
        }

        Ok(())
    }
}

fn check_content(assertion: &ContentAssertion, content: &[ContentItem]) -> Result<(), HarnessError> {
    let index = assertion.index;
    let Some(item) = content.get(index) else {
        return Err(HarnessError::assertion(format!(
            "content[{index}] is missing: response has {} entries",
            content.len()
        )));
    };

    if let Some(expected) = &assertion.content_type {
        if &item.kind != expected {
            return Err(HarnessError::assertion(format!(
                "content[{index}] has type {:?}, expected {expected:?}",
                item.kind
            )));
        }
    }

    let body = item.body().unwrap_or_default();
    let len = body.chars().count();
    if let Some(min) = assertion.min_length {
        if len < min {
            return Err(HarnessError::assertion(format!(
                "content[{index}] length {len} is below minimum {min}"
            )));
        }
    }
    if let Some(max) = assertion.max_length {
        if len > max {
            return Err(HarnessError::assertion(format!(
                "content[{index}] length {len} exceeds maximum {max}"
            )));
        }
    }

    if let Some(pattern) = &assertion.text_pattern {
        if !compile(pattern)?.is_match(body) {
            return Err(HarnessError::assertion(format!(
                "content[{index}] text {body:?} does not match /{pattern}/"
            )));
        }
    }

    if let Some(expected) = &assertion.mime_type {
        if item.mime_type.as_deref() != Some(expected.as_str()) {
            return Err(HarnessError::assertion(format!(
                "content[{index}] has MIME type {:?}, expected {expected:?}",
                item.mime_type
            )));
        }
    }

    Ok(())
}

fn compile(pattern: &str) -> Result<Regex, HarnessError> {
    Regex::new(pattern)
        .map_err(|e| HarnessError::assertion(format!("invalid pattern /{pattern}/: {e}")))
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpparity_core::{ErrorKind, JsonRpcError};
    use serde_json::json;

    fn ok(result: Value) -> ToolResponse {
        ToolResponse::from_response(Response::success(1u64, result)).unwrap()
    }

    fn text(text: &str) -> ToolResponse {
        ok(json!({"content": [{"type": "text", "text": text}]}))
    }

    #[test]
    fn test_echo_passes() {
        let expect = Expectation::success().content(
            ContentAssertion::at(0)
                .content_type("text")
                .text_pattern("Hello, World!"),
        );
        assert!(expect.evaluate("echo", &text("Hello, World!")).is_ok());
    }

    #[test]
    fn test_error_flag_fails_with_raw_text() {
        let response = ok(json!({
            "content": [{"type": "text", "text": "permission denied: /etc/shadow"}],
            "isError": true
        }));
        let err = Expectation::success().evaluate("read", &response).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Tool);
        assert_eq!(err.failure_message(), "permission denied: /etc/shadow");
    }

    #[test]
    fn test_jsonrpc_error_counts_as_error() {
        let response = ToolResponse::from_response(Response::error(
            1u64,
            JsonRpcError {
                code: -32602,
                message: "Unknown tool: nope".into(),
                data: None,
            },
        ))
        .unwrap();
        assert!(response.is_error());
        assert!(response.content().is_empty());

        let expect = Expectation::failure().error_pattern("^Unknown tool");
        assert!(expect.evaluate("nope", &response).is_ok());

        let expect = Expectation::failure().error_pattern("timeout");
        let err = expect.evaluate("nope", &response).unwrap_err();
        assert!(err.failure_message().contains("does not match /timeout/"));
    }

    #[test]
    fn test_expected_failure_but_succeeded() {
        let err = Expectation::failure().evaluate("echo", &text("fine")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Assertion);
    }

    #[test]
    fn test_content_checks_in_order() {
        let response = ok(json!({"content": [
            {"type": "text", "text": "abc"},
            {"type": "image", "data": "aGVsbG8=", "mimeType": "image/png"}
        ]}));

        let missing = Expectation::success().content(ContentAssertion::at(5));
        assert!(missing
            .evaluate("t", &response)
            .unwrap_err()
            .failure_message()
            .contains("content[5] is missing"));

        let wrong_type = Expectation::success().content(ContentAssertion::at(0).content_type("image"));
        assert!(wrong_type.evaluate("t", &response).is_err());

        let too_short = Expectation::success().content(ContentAssertion::at(0).min_length(4));
        assert!(too_short
            .evaluate("t", &response)
            .unwrap_err()
            .failure_message()
            .contains("below minimum 4"));

        let too_long = Expectation::success().content(ContentAssertion::at(0).max_length(2));
        assert!(too_long.evaluate("t", &response).is_err());

        let mime = Expectation::success().content(
            ContentAssertion::at(1)
                .content_type("image")
                .mime_type("image/png")
                .min_length(1),
        );
        assert!(mime.evaluate("t", &response).is_ok());

        let wrong_mime = Expectation::success().content(ContentAssertion::at(1).mime_type("image/jpeg"));
        assert!(wrong_mime.evaluate("t", &response).is_err());
    }

    #[test]
    fn test_predicate_failure_and_panic() {
        let expect = Expectation::success().with_predicate(|r| {
            if r.content().len() == 2 {
                Ok(())
            } else {
                Err(format!("expected 2 entries, got {}", r.content().len()))
            }
        });
        let err = expect.evaluate("t", &text("one")).unwrap_err();
        assert_eq!(err.failure_message(), "expected 2 entries, got 1");

        let panicking = Expectation::success().with_predicate(|_| panic!("boom"));
        let err = panicking.evaluate("t", &text("x")).unwrap_err();
        assert_eq!(err.failure_message(), "predicate panicked: boom");
    }
}
