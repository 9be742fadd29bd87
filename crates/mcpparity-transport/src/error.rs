//! Transport error types.

use mcpparity_core::HarnessError;
use thiserror::Error;

/// Errors that can occur while spawning or talking to a server process.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The process could not be launched.
    #[error("Failed to spawn process '{command}': {source}")]
    Spawn {
        /// The command line that was attempted.
        command: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A standard stream of the child was not captured.
    #[error("Failed to capture child {stream}")]
    StdioUnavailable {
        /// Which stream ("stdin", "stdout" or "stderr").
        stream: &'static str,
    },

    /// I/O error from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An outgoing message exceeds the line size limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The write side was already closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A termination signal could not be delivered.
    #[error("Failed to signal process {pid}: {message}")]
    Signal {
        /// Target process id.
        pid: u32,
        /// Error message.
        message: String,
    },
}

impl TransportError {
    /// Whether this error means the peer is gone.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

impl From<TransportError> for HarnessError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Spawn { command, source } => Self::Spawn {
                message: source.to_string(),
                command,
                source: Some(Box::new(source)),
            },
            TransportError::StdioUnavailable { stream } => Self::Spawn {
                command: String::new(),
                message: format!("child {stream} was not captured"),
                source: None,
            },
            TransportError::Json(e) => Self::Json(e),
            err if err.is_disconnect() => Self::connection_closed(err.to_string()),
            TransportError::Io(e) => Self::Io(e),
            other => Self::Io(std::io::Error::other(other.to_string())),
        }
    }
}
