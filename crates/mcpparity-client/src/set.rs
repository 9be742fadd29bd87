//! The set of active sessions, keyed by implementation id.

use std::collections::HashMap;
use std::sync::Arc;

use async_lock::RwLock;
use futures::future::join_all;
use mcpparity_core::HarnessError;
use mcpparity_transport::ProcessBuilder;
use tracing::{debug, warn};

use crate::config::SupervisorConfig;
use crate::supervisor::ServerSupervisor;

/// Tracks the sessions that reached `Ready` and have not been stopped.
///
/// A session that fails to start is never inserted, and stopping a session
/// removes it, so the set never holds stale entries.
#[derive(Debug, Default)]
pub struct SupervisorSet {
    sessions: RwLock<HashMap<String, Arc<ServerSupervisor>>>,
}

impl SupervisorSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for `id` and track it.
    ///
    /// Fails with [`HarnessError::InvalidState`] if `id` is already tracked.
    pub async fn start(
        &self,
        id: impl Into<String>,
        process: ProcessBuilder,
        config: SupervisorConfig,
    ) -> Result<Arc<ServerSupervisor>, HarnessError> {
        let id = id.into();
        if self.sessions.read().await.contains_key(&id) {
            return Err(HarnessError::InvalidState {
                operation: format!("start '{id}'"),
                state: "already tracked".to_string(),
            });
        }

        let session = Arc::new(ServerSupervisor::start(id.clone(), process, config).await?);

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            drop(sessions);
            // Lost a race with a concurrent start of the same id.
            let _ = session.stop().await;
            return Err(HarnessError::InvalidState {
                operation: format!("start '{id}'"),
                state: "already tracked".to_string(),
            });
        }
        sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    /// Get a tracked session.
    pub async fn get(&self, id: &str) -> Option<Arc<ServerSupervisor>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Whether `id` is tracked and its session is serving requests.
    ///
    /// Unknown ids report `false`.
    pub async fn is_running(&self, id: &str) -> bool {
        match self.get(id).await {
            Some(session) => session.is_running().await,
            None => false,
        }
    }

    /// Stop and forget one session. Unknown ids are ignored.
    pub async fn stop(&self, id: &str) -> Result<(), HarnessError> {
        let session = self.sessions.write().await.remove(id);
        match session {
            Some(session) => session.stop().await,
            None => {
                debug!(implementation = %id, "Stop requested for unknown session");
                Ok(())
            }
        }
    }

    /// Stop every tracked session concurrently.
    ///
    /// Waits for all of them to settle. Failures are logged and returned;
    /// one failing stop never prevents the others.
    pub async fn stop_all(&self) -> Vec<(String, HarnessError)> {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        debug!(count = sessions.len(), "Stopping all sessions");

        let results = join_all(sessions.into_iter().map(|(id, session)| async move {
            let result = session.stop().await;
            (id, result)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    warn!(implementation = %id, error = %e, "Failed to stop session");
                    Some((id, e))
                }
            })
            .collect()
    }

    /// Ids of the tracked sessions, sorted.
    pub async fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of tracked sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is tracked.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
