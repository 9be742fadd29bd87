//! The harness error taxonomy.
//!
//! [`HarnessError`] is the single error type flowing out of every harness
//! layer. Its variants fall into two propagation classes, reported by
//! [`HarnessError::kind`]:
//!
//! - implementation-level ([`ErrorKind::Spawn`], [`ErrorKind::Handshake`]):
//!   the candidate server never became usable, so none of its cases run
//! - case-level (everything else): the failure is recorded against the one
//!   test case that hit it

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::RequestId;

/// Type alias for boxed errors that are Send + Sync.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The ways a received payload can fail validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    /// The payload is not a JSON object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// The `jsonrpc` member is missing.
    #[error("missing \"jsonrpc\" version tag")]
    MissingVersion,

    /// The `jsonrpc` member is present but not "2.0".
    #[error("unsupported \"jsonrpc\" version tag {found:?}")]
    WrongVersion {
        /// The tag the server sent.
        found: String,
    },

    /// The response id does not match the request it answers.
    #[error("response id {found} does not match request id {expected}")]
    IdMismatch {
        /// The id of the pending request.
        expected: RequestId,
        /// The id found in the payload.
        found: String,
    },

    /// Neither `result` nor `error` is present.
    #[error("response carries neither \"result\" nor \"error\"")]
    MissingOutcome,

    /// Both `result` and `error` are present.
    #[error("response carries both \"result\" and \"error\"")]
    AmbiguousOutcome,

    /// The `error` member is not a well-formed JSON-RPC error object.
    #[error("malformed error object: {reason}")]
    MalformedError {
        /// What is wrong with it.
        reason: String,
    },

    /// A handshake result is not an object carrying `capabilities`.
    #[error("handshake result does not carry a \"capabilities\" object")]
    MissingCapabilities,

    /// A tool listing result has no `tools` array.
    #[error("tool listing result does not carry a \"tools\" array")]
    MissingToolList,

    /// A tool descriptor is not an object with a string `name`.
    #[error("tool descriptor #{index} is malformed: {reason}")]
    MalformedTool {
        /// Position of the descriptor in the list.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// A tool call result has no `content` array.
    #[error("tool call result does not carry a \"content\" array")]
    MissingContent,

    /// A content entry does not declare a string `type` tag.
    #[error("content entry #{index} does not declare a \"type\" tag")]
    UntypedContent {
        /// Position of the entry in the list.
        index: usize,
    },
}

/// Classification of a [`HarnessError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The server process could not be launched.
    Spawn,
    /// The handshake sequence failed or timed out.
    Handshake,
    /// A received payload failed validation.
    ProtocolViolation,
    /// No correlated response arrived before the deadline.
    RequestTimeout,
    /// The tool answered with an error or the call could not be made.
    Tool,
    /// A declared expectation did not hold.
    Assertion,
    /// An operation was attempted in a session state that forbids it.
    InvalidState,
    /// The process closed its streams while work was outstanding.
    ConnectionClosed,
    /// A setup or cleanup hook failed.
    Hook,
    /// Configuration could not be loaded or is invalid.
    Config,
    /// Local I/O or serialization failure.
    Io,
}

impl ErrorKind {
    /// Whether this kind aborts the whole implementation rather than a case.
    #[must_use]
    pub const fn is_implementation_level(self) -> bool {
        matches!(self, Self::Spawn | Self::Handshake)
    }
}

/// The primary error type for the harness.
#[derive(Error, Diagnostic, Debug)]
pub enum HarnessError {
    /// The server process failed to launch.
    #[error("Failed to spawn '{command}': {message}")]
    #[diagnostic(
        code(mcpparity::spawn),
        help("Check the command, working directory and PATH of the implementation")
    )]
    Spawn {
        /// The command line that was attempted.
        command: String,
        /// Human-readable error message.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },

    /// The handshake request/response/notification sequence failed.
    #[error("Handshake failed: {message}")]
    #[diagnostic(code(mcpparity::handshake))]
    Handshake {
        /// Human-readable error message.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },

    /// A received payload failed validation.
    #[error("Protocol violation: {0}")]
    #[diagnostic(code(mcpparity::protocol_violation))]
    ProtocolViolation(#[from] Violation),

    /// No correlated response arrived within the deadline.
    #[error("Request {id} ({method}) timed out after {duration:?}")]
    #[diagnostic(
        code(mcpparity::request_timeout),
        help("Consider increasing the request timeout for this implementation")
    )]
    RequestTimeout {
        /// The request method.
        method: String,
        /// The correlation id of the expired request.
        id: RequestId,
        /// How long the caller waited.
        duration: Duration,
    },

    /// The tool answered with an error payload or the call could not be made.
    #[error("Tool '{tool}' failed: {message}")]
    #[diagnostic(code(mcpparity::tool))]
    Tool {
        /// The tool name.
        tool: String,
        /// The raw error text.
        message: String,
    },

    /// A declared expectation did not hold.
    #[error("{message}")]
    #[diagnostic(code(mcpparity::assertion))]
    Assertion {
        /// Description of the failed check.
        message: String,
    },

    /// An operation was attempted in a state that forbids it.
    #[error("Cannot {operation} while session is {state}")]
    #[diagnostic(code(mcpparity::invalid_state))]
    InvalidState {
        /// The attempted operation.
        operation: String,
        /// The session state at the time.
        state: String,
    },

    /// The server closed its output or exited with work outstanding.
    #[error("Connection closed: {message}")]
    #[diagnostic(code(mcpparity::connection_closed))]
    ConnectionClosed {
        /// Human-readable error message.
        message: String,
    },

    /// A setup or cleanup hook failed.
    #[error("{phase} failed: {message}")]
    #[diagnostic(code(mcpparity::hook))]
    Hook {
        /// Which hook ("setup" or "cleanup").
        phase: &'static str,
        /// The hook's error text.
        message: String,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(mcpparity::config))]
    Config {
        /// Human-readable error message.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(mcpparity::io))]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    #[diagnostic(code(mcpparity::json))]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Spawn { .. } => ErrorKind::Spawn,
            Self::Handshake { .. } => ErrorKind::Handshake,
            Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::RequestTimeout { .. } => ErrorKind::RequestTimeout,
            Self::Tool { .. } => ErrorKind::Tool,
            Self::Assertion { .. } => ErrorKind::Assertion,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::ConnectionClosed { .. } => ErrorKind::ConnectionClosed,
            Self::Hook { .. } => ErrorKind::Hook,
            Self::Config { .. } => ErrorKind::Config,
            Self::Io(_) | Self::Json(_) => ErrorKind::Io,
        }
    }

    /// The text recorded against a failed test case.
    ///
    /// Tool errors and assertion failures carry their message verbatim;
    /// everything else uses the display form.
    #[must_use]
    pub fn failure_message(&self) -> String {
        match self {
            Self::Tool { message, .. } | Self::Assertion { message } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Create a handshake error without a source.
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap any error as the cause of a failed handshake.
    ///
    /// Errors that already describe a handshake are returned unchanged.
    #[must_use]
    pub fn into_handshake(self) -> Self {
        match self {
            Self::Handshake { .. } | Self::Spawn { .. } => self,
            other => Self::Handshake {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Create an assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
        }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            message: message.into(),
        }
    }

    /// Create a configuration error without a source.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }
}

/// Result alias used throughout the harness.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
