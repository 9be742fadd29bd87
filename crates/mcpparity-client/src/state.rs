//! Session lifecycle states and events.
//!
//! ```text
//! Starting ──► AwaitingHandshake ──► Ready ◄──► Running
//!    │                 │               │           │
//!    │                 │               └─► Stopping ◄┘
//!    │                 │                     │
//!    └────────► Errored ◄────────────────────┤
//!                                            ▼
//!                                         Stopped
//! ```
//!
//! `Running` means at least one request is outstanding; the session falls
//! back to `Ready` when the last one settles. `Stopped` and `Errored` are
//! terminal.

use std::fmt;

/// The lifecycle state of a supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// The process is being launched.
    Starting,
    /// The process is up; the handshake has not completed.
    AwaitingHandshake,
    /// Handshake complete, no request outstanding.
    Ready,
    /// Handshake complete, at least one request outstanding.
    Running,
    /// An explicit stop is in progress.
    Stopping,
    /// The process was stopped on request.
    Stopped,
    /// The session failed and cannot be used.
    Errored,
}

impl SessionState {
    /// Whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{
            AwaitingHandshake, Errored, Ready, Running, Starting, Stopped, Stopping,
        };
        matches!(
            (self, next),
            (Starting, AwaitingHandshake | Errored | Stopping)
                | (AwaitingHandshake, Ready | Errored | Stopping)
                | (Ready, Running | Stopping | Errored)
                | (Running, Ready | Stopping | Errored)
                | (Stopping, Stopped | Errored)
        )
    }

    /// Whether requests may be issued in this state.
    #[must_use]
    pub const fn accepts_requests(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    /// Whether the session has finished for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Errored)
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::AwaitingHandshake => "awaiting-handshake",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something observable that happened to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The lifecycle state changed.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
    /// The handshake completed.
    Ready,
    /// The session failed.
    Errored {
        /// What went wrong.
        message: String,
    },
    /// The server sent a notification.
    Notification {
        /// The notification method.
        method: String,
    },
    /// The server wrote a line to stderr.
    Stderr {
        /// The line, without its terminator.
        line: String,
    },
    /// The process exit was observed.
    Exited {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
    },
}
