//! Supervisor configuration.

use std::time::Duration;

use mcpparity_core::ClientInfo;

/// Default deadline for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on spawn plus handshake.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a process is given to exit after the termination signal.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for one supervised session.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Deadline for each request after the handshake.
    pub request_timeout: Duration,
    /// Deadline for the handshake round trip.
    pub startup_timeout: Duration,
    /// Grace period between the termination signal and a forced kill.
    pub shutdown_grace: Duration,
    /// Identity sent in the handshake.
    pub client_info: ClientInfo,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            client_info: ClientInfo::default(),
            event_capacity: 64,
        }
    }
}

impl SupervisorConfig {
    /// Create a new supervisor configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-request deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the handshake deadline.
    #[must_use]
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the client identity sent in the handshake.
    #[must_use]
    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = ClientInfo::new(name, version);
        self
    }

    /// Set the event channel capacity (at least 1).
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
