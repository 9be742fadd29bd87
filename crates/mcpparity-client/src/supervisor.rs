//! Supervision of one server process.
//!
//! A [`ServerSupervisor`] owns everything about a session: the process
//! handle, the write end of its stdin, the reader of its stdout, and the
//! table of requests waiting for an answer. Callers only ever see
//! request/response futures; the line-level traffic is handled by a
//! background reader task.
//!
//! # Correlation
//!
//! Each request registers a pending entry keyed by its id before it is
//! written. The reader task removes the entry when a matching response
//! arrives and completes the caller; if the deadline passes first, the
//! caller removes the entry itself. Whoever removes the entry owns the
//! outcome, so every request resolves exactly once. A response that shows up
//! after its entry is gone is dropped.
//!
//! # Example
//!
//! ```no_run
//! use mcpparity_client::{ServerSupervisor, SupervisorConfig};
//! use mcpparity_transport::ProcessBuilder;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), mcpparity_core::HarnessError> {
//! let process = ProcessBuilder::new("my-mcp-server").arg("--stdio");
//! let session = ServerSupervisor::start("rust", process, SupervisorConfig::default()).await?;
//!
//! let response = session.call_tool("echo", json!({"text": "hi"})).await?;
//! println!("{:?}", response.result);
//!
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_lock::Mutex;
use futures::channel::oneshot;
use mcpparity_core::{
    HarnessError, Incoming, ListToolsResult, MessageBuilder, Notification, Request, RequestId,
    RequestKind, Response, ResponseValidator, ServerHandshake, classify, methods,
};
use mcpparity_transport::{LineReader, LineWriter, ProcessBuilder, ProcessHandle};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::SupervisorConfig;
use crate::state::{SessionEvent, SessionState};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type ResponseSender = oneshot::Sender<Result<Response, HarnessError>>;

/// A request waiting for its response.
struct PendingRequest {
    method: String,
    kind: RequestKind,
    deadline: Instant,
    sender: ResponseSender,
}

/// State shared between the supervisor and its background tasks.
struct Shared {
    id: String,
    config: SupervisorConfig,
    builder: MessageBuilder,
    writer: LineWriter<BoxedWriter>,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    in_flight: AtomicUsize,
    last_error: Mutex<Option<String>>,
    handshake: Mutex<Option<ServerHandshake>>,
    process: Mutex<Option<ProcessHandle>>,
}

/// Supervises one server process end to end.
pub struct ServerSupervisor {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ServerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSupervisor")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ServerSupervisor {
    /// Spawn a server and drive it through the handshake.
    ///
    /// Resolves once the session is `Ready`. A launch failure yields
    /// [`HarnessError::Spawn`]; a failed or timed-out handshake yields
    /// [`HarnessError::Handshake`] after the process has been stopped.
    pub async fn start(
        id: impl Into<String>,
        process: ProcessBuilder,
        config: SupervisorConfig,
    ) -> Result<Self, HarnessError> {
        let id = id.into();
        let started = Instant::now();
        debug!(implementation = %id, command = %process.command_line(), "Starting server");

        let spawned = process.spawn().map_err(|e| {
            let err = HarnessError::from(e);
            warn!(implementation = %id, error = %err, "Server failed to spawn");
            err
        })?;
        let (handle, stdio) = spawned.into_parts();

        let supervisor = Self::assemble(
            id,
            config,
            stdio.stdout,
            Box::new(stdio.stdin),
            Some(stdio.stderr),
            Some(handle),
        );

        match supervisor.initialize().await {
            Ok(_) => {
                info!(
                    implementation = %supervisor.id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Server ready"
                );
                Ok(supervisor)
            }
            Err(e) => {
                warn!(implementation = %supervisor.id(), error = %e, "Server failed to become ready");
                if let Err(stop_err) = supervisor.stop().await {
                    debug!(implementation = %supervisor.id(), error = %stop_err, "Cleanup after failed start");
                }
                Err(e)
            }
        }
    }

    /// Supervise a server reachable through an arbitrary reader/writer pair.
    ///
    /// No process is attached, so stopping only closes the writer. The
    /// session is left in `AwaitingHandshake`; call
    /// [`initialize`](Self::initialize) next.
    pub fn from_io<R, W>(id: impl Into<String>, reader: R, writer: W, config: SupervisorConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::assemble::<R, tokio::process::ChildStderr>(
            id.into(),
            config,
            reader,
            Box::new(writer),
            None,
            None,
        )
    }

    fn assemble<R, E>(
        id: String,
        config: SupervisorConfig,
        reader: R,
        writer: BoxedWriter,
        stderr: Option<E>,
        process: Option<ProcessHandle>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        E: AsyncRead + Send + Unpin + 'static,
    {
        let (state, _) = watch::channel(SessionState::Starting);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let builder = MessageBuilder::new(config.client_info.clone());

        let shared = Arc::new(Shared {
            id,
            config,
            builder,
            writer: LineWriter::new(writer),
            pending: Mutex::new(HashMap::new()),
            state,
            events,
            in_flight: AtomicUsize::new(0),
            last_error: Mutex::new(None),
            handshake: Mutex::new(None),
            process: Mutex::new(process),
        });

        let mut tasks = vec![tokio::spawn(read_loop(
            Arc::clone(&shared),
            LineReader::new(reader),
        ))];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(stderr_loop(
                Arc::clone(&shared),
                LineReader::new(stderr),
            )));
        }

        shared.transition(SessionState::AwaitingHandshake);

        Self {
            shared,
            tasks: Mutex::new(tasks),
        }
    }

    /// Perform the handshake: `initialize`, validate, `notifications/initialized`.
    ///
    /// The round trip is bounded by the startup timeout. Any failure moves the
    /// session to `Errored`.
    pub async fn initialize(&self) -> Result<ServerHandshake, HarnessError> {
        let shared = &self.shared;
        let state = self.state();
        if state != SessionState::AwaitingHandshake {
            return Err(invalid_state("initialize", state));
        }

        let request = shared.builder.initialize();
        debug!(implementation = %shared.id, request_id = %request.id, "Sending initialize");

        let outcome = async {
            let response = shared
                .send_request(request, shared.config.startup_timeout)
                .await?;
            let result = response.into_result().map_err(|e| {
                HarnessError::handshake(format!("server rejected initialize: {e}"))
            })?;
            let handshake: ServerHandshake = serde_json::from_value(result)?;
            tokio::time::timeout(
                shared.config.startup_timeout,
                shared.writer.send(&shared.builder.initialized()),
            )
            .await
            .map_err(|_| HarnessError::handshake("timed out sending notifications/initialized"))??;
            Ok::<_, HarnessError>(handshake)
        }
        .await
        .map_err(HarnessError::into_handshake);

        match outcome {
            Ok(handshake) => {
                *shared.handshake.lock().await = Some(handshake.clone());
                if shared.transition(SessionState::Ready).is_none() {
                    return Err(invalid_state("complete the handshake", self.state()));
                }
                let _ = shared.events.send(SessionEvent::Ready);
                debug!(
                    implementation = %shared.id,
                    protocol_version = ?handshake.protocol_version,
                    "Handshake complete"
                );
                Ok(handshake)
            }
            Err(e) => {
                shared.fail(e.to_string()).await;
                Err(e)
            }
        }
    }

    /// The implementation id this session belongs to.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Watch lifecycle state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// The reason the session errored, if it did.
    pub async fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().await.clone()
    }

    /// What the server answered in the handshake.
    pub async fn server_handshake(&self) -> Option<ServerHandshake> {
        self.shared.handshake.lock().await.clone()
    }

    /// Number of requests waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Whether the session can serve requests and its process is alive.
    pub async fn is_running(&self) -> bool {
        if !self.state().accepts_requests() {
            return false;
        }
        match self.shared.process.lock().await.as_mut() {
            Some(process) => process.is_running(),
            None => true,
        }
    }

    /// Send a request and wait for its validated response.
    ///
    /// An error response from the server is returned as `Ok`; inspect
    /// [`Response::error`].
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<Response, HarnessError> {
        let method = method.into();
        self.ensure_ready(&method)?;
        let request = self.shared.builder.request(method, params);
        self.shared
            .send_request(request, self.shared.config.request_timeout)
            .await
    }

    /// Send a notification.
    pub async fn notify(&self, notification: &Notification) -> Result<(), HarnessError> {
        self.ensure_ready(notification.method())?;
        Ok(self.shared.writer.send(notification).await?)
    }

    /// List every tool the server exposes, following pagination cursors.
    pub async fn list_tools(&self) -> Result<ListToolsResult, HarnessError> {
        self.ensure_ready(methods::TOOLS_LIST)?;
        let mut all = ListToolsResult::default();
        let mut cursor: Option<String> = None;

        loop {
            let request = match &cursor {
                Some(c) => self
                    .shared
                    .builder
                    .request(methods::TOOLS_LIST, Some(json!({ "cursor": c }))),
                None => self.shared.builder.list_tools(),
            };
            let response = self
                .shared
                .send_request(request, self.shared.config.request_timeout)
                .await?;
            let result = response.into_result().map_err(|e| HarnessError::Tool {
                tool: methods::TOOLS_LIST.to_string(),
                message: e.message,
            })?;
            let page: ListToolsResult = serde_json::from_value(result)?;
            all.tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(all)
    }

    /// Invoke a tool with the default request deadline.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Response, HarnessError> {
        self.call_tool_with_timeout(name, arguments, self.shared.config.request_timeout)
            .await
    }

    /// Invoke a tool with an explicit deadline.
    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Response, HarnessError> {
        self.ensure_ready(methods::TOOLS_CALL)?;
        let request = self.shared.builder.call_tool(name, arguments);
        self.shared.send_request(request, timeout).await
    }

    /// Stop the session.
    ///
    /// Closes stdin, signals the process to terminate, waits for the grace
    /// period and then kills it. Requests still pending fail with
    /// [`HarnessError::ConnectionClosed`]. Stopping an already stopped
    /// session is a no-op, and a stop issued while another is in progress
    /// waits for that one to finish. Stopping an errored session releases its
    /// process but leaves it `Errored`.
    pub async fn stop(&self) -> Result<(), HarnessError> {
        let shared = &self.shared;
        if shared.transition(SessionState::Stopping).is_none() {
            let state = self.state();
            if state == SessionState::Stopping {
                trace!(implementation = %shared.id, "Waiting for stop in progress");
                let mut states = self.watch_state();
                let _ = states
                    .wait_for(|s| matches!(s, SessionState::Stopped | SessionState::Errored))
                    .await;
                return Ok(());
            }
            if state != SessionState::Errored {
                trace!(implementation = %shared.id, %state, "Stop ignored");
                return Ok(());
            }
        }
        debug!(implementation = %shared.id, "Stopping server");

        let grace = shared.config.shutdown_grace;
        let closed = tokio::time::timeout(grace, shared.writer.close()).await.is_ok();
        if !closed {
            warn!(
                implementation = %shared.id,
                grace_ms = grace.as_millis() as u64,
                "Server input still blocked, terminating without closing it"
            );
        }

        let process = shared.process.lock().await.take();
        let outcome = match process {
            Some(mut process) => Some(process.terminate(grace).await),
            None => None,
        };

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        shared.drain_pending("session stopped").await;

        // Drained callers give up their writes, releasing the writer.
        if !closed && tokio::time::timeout(grace, shared.writer.close()).await.is_err() {
            debug!(implementation = %shared.id, "Server input left open");
        }

        match outcome {
            Some(Err(e)) => {
                let err = HarnessError::from(e);
                shared.fail(err.to_string()).await;
                Err(err)
            }
            Some(Ok(outcome)) => {
                let code = outcome.status().and_then(|s| s.code());
                let _ = shared.events.send(SessionEvent::Exited { code });
                if shared.transition(SessionState::Stopped).is_some() {
                    info!(implementation = %shared.id, ?code, "Server stopped");
                }
                Ok(())
            }
            None => {
                if shared.transition(SessionState::Stopped).is_some() {
                    info!(implementation = %shared.id, "Server stopped");
                }
                Ok(())
            }
        }
    }

    fn ensure_ready(&self, operation: &str) -> Result<(), HarnessError> {
        let state = self.state();
        if state.accepts_requests() {
            Ok(())
        } else {
            Err(invalid_state(operation, state))
        }
    }
}

impl Drop for ServerSupervisor {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Apply a state change if `f` proposes a legal one.
    ///
    /// Returns the previous state when the change happened.
    fn update_state(
        &self,
        f: impl FnOnce(SessionState) -> Option<SessionState>,
    ) -> Option<SessionState> {
        let mut changed = None;
        self.state.send_if_modified(|state| match f(*state) {
            Some(next) if state.can_transition_to(next) => {
                changed = Some((*state, next));
                *state = next;
                true
            }
            _ => false,
        });

        let (from, to) = changed?;
        debug!(implementation = %self.id, %from, %to, "Session state changed");
        let _ = self.events.send(SessionEvent::StateChanged { from, to });
        Some(from)
    }

    fn transition(&self, to: SessionState) -> Option<SessionState> {
        self.update_state(|_| Some(to))
    }

    async fn fail(&self, message: String) {
        if self.transition(SessionState::Errored).is_some() {
            *self.last_error.lock().await = Some(message.clone());
            let _ = self.events.send(SessionEvent::Errored { message });
        }
    }

    async fn send_request(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, HarnessError> {
        let (sender, mut receiver) = oneshot::channel();
        let id = request.id.clone();
        let method = request.method().to_string();
        let deadline = Instant::now() + timeout;

        self.pending.lock().await.insert(
            id.clone(),
            PendingRequest {
                method: method.clone(),
                kind: RequestKind::from_method(&method),
                deadline,
                sender,
            },
        );
        let _in_flight = InFlight::enter(self);

        trace!(implementation = %self.id, request_id = %id, %method, "Sending request");
        // The write counts against the deadline too. A drained entry wakes a
        // caller still stuck writing to a server that stopped reading.
        let exchange = async {
            tokio::select! {
                biased;
                answer = &mut receiver => return Ok(answer),
                written = self.writer.send(&request) => written?,
            }
            Ok::<_, HarnessError>((&mut receiver).await)
        };

        let outcome = tokio::time::timeout_at(deadline, exchange).await;
        match outcome {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(oneshot::Canceled))) => Err(abandoned(&id, &method)),
            Ok(Err(e)) => {
                self.pending.lock().await.remove(&id);
                Err(e)
            }
            Err(_) => {
                if self.pending.lock().await.remove(&id).is_some() {
                    warn!(
                        implementation = %self.id,
                        request_id = %id,
                        %method,
                        timeout_ms = timeout.as_millis() as u64,
                        "Request timed out"
                    );
                    return Err(HarnessError::RequestTimeout {
                        method,
                        id,
                        duration: timeout,
                    });
                }
                // The reader claimed the entry first; its result is on the way.
                receiver
                    .await
                    .unwrap_or_else(|_| Err(abandoned(&id, &method)))
            }
        }
    }

    async fn dispatch_line(&self, line: &str) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            debug!(implementation = %self.id, line = %preview(line), "Discarding non-protocol line");
            return;
        };

        match classify(&value) {
            Incoming::Response(id) => {
                let id = normalize_id(id);
                let entry = self.pending.lock().await.remove(&id);
                let Some(entry) = entry else {
                    debug!(implementation = %self.id, request_id = %id, "Discarding response with unmatched id");
                    return;
                };

                trace!(
                    implementation = %self.id,
                    request_id = %id,
                    method = %entry.method,
                    remaining_ms = entry.deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "Routing response to pending request"
                );
                let result = ResponseValidator::validate(&value, &id, entry.kind)
                    .map_err(HarnessError::from);
                if let Err(e) = &result {
                    warn!(implementation = %self.id, request_id = %id, error = %e, "Response failed validation");
                }
                if entry.sender.send(result).is_err() {
                    trace!(implementation = %self.id, request_id = %id, "Pending request receiver dropped");
                }
            }
            Incoming::Notification(method) => {
                debug!(implementation = %self.id, %method, "Received server notification");
                let _ = self.events.send(SessionEvent::Notification { method });
            }
            Incoming::ServerRequest { id, method } => {
                debug!(implementation = %self.id, request_id = %id, %method, "Ignoring server-initiated request");
            }
            Incoming::Noise => {
                debug!(implementation = %self.id, line = %preview(line), "Discarding non-protocol line");
            }
        }
    }

    async fn on_disconnect(&self, reason: &str) {
        if !matches!(self.state(), SessionState::Stopping | SessionState::Stopped) {
            let code = match self.process.lock().await.as_mut() {
                Some(process) => process.try_status().ok().flatten().map(|s| s.code()),
                None => None,
            };
            if let Some(code) = code {
                let _ = self.events.send(SessionEvent::Exited { code });
            }
            error!(implementation = %self.id, reason, ?code, "Server disconnected unexpectedly");
            self.fail(format!("server disconnected: {reason}")).await;
        }
        self.drain_pending(reason).await;
    }

    async fn drain_pending(&self, reason: &str) {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        for (id, entry) in drained {
            let _ = entry.sender.send(Err(HarnessError::connection_closed(format!(
                "{reason} before request {id} ({}) was answered",
                entry.method
            ))));
        }
    }
}

/// Keeps the session `Running` while at least one request is outstanding.
struct InFlight<'a>(&'a Shared);

impl<'a> InFlight<'a> {
    fn enter(shared: &'a Shared) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        shared.update_state(|state| {
            (state == SessionState::Ready && shared.in_flight.load(Ordering::SeqCst) > 0)
                .then_some(SessionState::Running)
        });
        Self(shared)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let shared = self.0;
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        shared.update_state(|state| {
            (state == SessionState::Running && shared.in_flight.load(Ordering::SeqCst) == 0)
                .then_some(SessionState::Ready)
        });
    }
}

async fn read_loop<R: AsyncRead + Unpin>(shared: Arc<Shared>, mut reader: LineReader<R>) {
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                trace!(implementation = %shared.id, bytes = line.len(), "Framed line");
                shared.dispatch_line(&line).await;
            }
            Ok(None) => {
                shared.on_disconnect("server closed its output").await;
                break;
            }
            Err(e) => {
                shared.on_disconnect(&format!("read failed: {e}")).await;
                break;
            }
        }
    }
    trace!(implementation = %shared.id, "Reader stopped");
}

async fn stderr_loop<R: AsyncRead + Unpin>(shared: Arc<Shared>, mut reader: LineReader<R>) {
    while let Ok(Some(line)) = reader.next_line().await {
        debug!(implementation = %shared.id, stderr = %line, "Server stderr");
        let _ = shared.events.send(SessionEvent::Stderr { line });
    }
}

/// Map a numeric id echoed as a string back to its numeric form.
fn normalize_id(id: RequestId) -> RequestId {
    match id {
        RequestId::String(s) => match s.parse::<u64>() {
            Ok(n) => RequestId::Number(n),
            Err(_) => RequestId::String(s),
        },
        id @ RequestId::Number(_) => id,
    }
}

fn abandoned(id: &RequestId, method: &str) -> HarnessError {
    HarnessError::connection_closed(format!("request {id} ({method}) was abandoned"))
}

fn preview(line: &str) -> String {
    line.chars().take(100).collect()
}

fn invalid_state(operation: &str, state: SessionState) -> HarnessError {
    HarnessError::InvalidState {
        operation: operation.to_string(),
        state: state.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpparity_core::ErrorKind;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    /// The server end of a pair of in-memory pipes.
    struct FakeServer {
        reader: LineReader<DuplexStream>,
        writer: DuplexStream,
    }

    impl FakeServer {
        async fn recv(&mut self) -> Value {
            let line = self.reader.next_line().await.unwrap().expect("client closed");
            serde_json::from_str(&line).unwrap()
        }

        async fn send_raw(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn send(&mut self, value: Value) {
            self.send_raw(&value.to_string()).await;
        }

        async fn reply(&mut self, request: &Value, result: Value) {
            self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
                .await;
        }

        async fn handshake(&mut self) {
            let init = self.recv().await;
            assert_eq!(init["method"], "initialize");
            self.reply(
                &init,
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake", "version": "0.0.0"}
                }),
            )
            .await;
            let initialized = self.recv().await;
            assert_eq!(initialized["method"], "notifications/initialized");
            assert!(initialized.get("id").is_none());
        }
    }

    fn connect(config: SupervisorConfig) -> (ServerSupervisor, FakeServer) {
        let (client_out, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_in) = tokio::io::duplex(64 * 1024);
        let supervisor = ServerSupervisor::from_io("fake", client_in, client_out, config);
        let server = FakeServer {
            reader: LineReader::new(server_in),
            writer: server_out,
        };
        (supervisor, server)
    }

    async fn ready(config: SupervisorConfig) -> (ServerSupervisor, FakeServer) {
        let (supervisor, mut server) = connect(config);
        let (handshake, ()) = tokio::join!(supervisor.initialize(), server.handshake());
        handshake.unwrap();
        (supervisor, server)
    }

    fn text_result(text: &str) -> Value {
        json!({"content": [{"type": "text", "text": text}]})
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    #[tokio::test]
    async fn test_handshake_reaches_ready() {
        let (supervisor, _server) = ready(SupervisorConfig::default()).await;
        assert_eq!(supervisor.state(), SessionState::Ready);
        assert!(supervisor.is_running().await);

        let handshake = supervisor.server_handshake().await.unwrap();
        assert_eq!(handshake.protocol_version.as_deref(), Some("2025-06-18"));
        assert_eq!(handshake.capabilities, json!({"tools": {}}));
    }

    #[tokio::test]
    async fn test_calls_before_handshake_are_rejected() {
        let (supervisor, _server) = connect(SupervisorConfig::default());
        assert_eq!(supervisor.state(), SessionState::AwaitingHandshake);

        let err = supervisor.call_tool("echo", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_handshake_error_response_errors_session() {
        let (supervisor, mut server) = connect(SupervisorConfig::default());
        let serve = async {
            let init = server.recv().await;
            server
                .send(json!({
                    "jsonrpc": "2.0",
                    "id": init["id"],
                    "error": {"code": -32600, "message": "unsupported client"}
                }))
                .await;
        };
        let (result, ()) = tokio::join!(supervisor.initialize(), serve);

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Handshake);
        assert!(err.to_string().contains("unsupported client"));
        assert_eq!(supervisor.state(), SessionState::Errored);
        assert!(supervisor.last_error().await.is_some());
    }

    #[tokio::test]
    async fn test_handshake_without_capabilities_is_a_violation() {
        let (supervisor, mut server) = connect(SupervisorConfig::default());
        let serve = async {
            let init = server.recv().await;
            server.reply(&init, json!({"serverInfo": {"name": "x"}})).await;
        };
        let (result, ()) = tokio::join!(supervisor.initialize(), serve);

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Handshake);
        assert!(err.to_string().contains("capabilities"));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let config = SupervisorConfig::default().startup_timeout(Duration::from_millis(100));
        let (supervisor, mut server) = connect(config);
        let (result, _) = tokio::join!(supervisor.initialize(), server.recv());

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Handshake);
        assert!(err.to_string().contains("timed out"));
        assert_eq!(supervisor.state(), SessionState::Errored);
    }

    // =========================================================================
    // Framing and correlation
    // =========================================================================

    #[tokio::test]
    async fn test_out_of_order_responses_reach_their_callers() {
        let (supervisor, mut server) = ready(SupervisorConfig::default()).await;

        let serve = async {
            let first = server.recv().await;
            let second = server.recv().await;
            server.send_raw("some banner text the server printed").await;
            server
                .send(json!({"jsonrpc": "2.0", "id": 999, "result": {}}))
                .await;
            let reply_for = |req: &Value| text_result(req["params"]["arguments"]["text"].as_str().unwrap());
            let (r1, r2) = (reply_for(&first), reply_for(&second));
            server.reply(&second, r2).await;
            server.reply(&first, r1).await;
        };

        let (a, b, ()) = tokio::join!(
            supervisor.call_tool("echo", json!({"text": "first"})),
            supervisor.call_tool("echo", json!({"text": "second"})),
            serve
        );

        let a = a.unwrap().result.unwrap();
        let b = b.unwrap().result.unwrap();
        assert_eq!(a["content"][0]["text"], "first");
        assert_eq!(b["content"][0]["text"], "second");
        assert_eq!(supervisor.pending_count().await, 0);
        assert_eq!(supervisor.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_string_echoed_id_is_correlated() {
        let (supervisor, mut server) = ready(SupervisorConfig::default()).await;
        let serve = async {
            let req = server.recv().await;
            let id = req["id"].as_u64().unwrap().to_string();
            server
                .send(json!({"jsonrpc": "2.0", "id": id, "result": text_result("ok")}))
                .await;
        };
        let (result, ()) = tokio::join!(supervisor.call_tool("echo", json!({})), serve);
        assert!(!result.unwrap().is_error());
    }

    #[tokio::test]
    async fn test_malformed_response_is_a_protocol_violation() {
        let (supervisor, mut server) = ready(SupervisorConfig::default()).await;
        let serve = async {
            let req = server.recv().await;
            server.reply(&req, json!({"content": [{"text": "no type"}]})).await;
        };
        let (result, ()) = tokio::join!(supervisor.call_tool("echo", json!({})), serve);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ProtocolViolation);
        assert_eq!(supervisor.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_running_while_request_outstanding() {
        let (supervisor, mut server) = ready(SupervisorConfig::default()).await;
        let mut states = supervisor.watch_state();

        let serve = async {
            let req = server.recv().await;
            states
                .wait_for(|s| *s == SessionState::Running)
                .await
                .unwrap();
            server.reply(&req, text_result("done")).await;
        };
        let (result, ()) = tokio::join!(supervisor.call_tool("slow", json!({})), serve);
        result.unwrap();
        assert_eq!(supervisor.state(), SessionState::Ready);
    }

    // =========================================================================
    // Timeouts
    // =========================================================================

    #[tokio::test]
    async fn test_timeout_at_deadline_and_late_response_dropped() {
        let timeout = Duration::from_millis(150);
        let config = SupervisorConfig::default().request_timeout(timeout);
        let (supervisor, mut server) = ready(config).await;

        let started = std::time::Instant::now();
        let (result, stalled) = tokio::join!(supervisor.call_tool("hang", json!({})), server.recv());
        let elapsed = started.elapsed();

        match result.unwrap_err() {
            HarnessError::RequestTimeout { method, duration, .. } => {
                assert_eq!(method, "tools/call");
                assert_eq!(duration, timeout);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(elapsed >= timeout, "timed out early after {elapsed:?}");
        assert_eq!(supervisor.pending_count().await, 0);

        // The late answer has nobody to go to; the session keeps working.
        server.reply(&stalled, text_result("too late")).await;
        let serve = async {
            let req = server.recv().await;
            server.reply(&req, text_result("on time")).await;
        };
        let (result, ()) = tokio::join!(supervisor.call_tool("echo", json!({})), serve);
        let result = result.unwrap().result.unwrap();
        assert_eq!(result["content"][0]["text"], "on time");
        assert_eq!(supervisor.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_write_to_stalled_server_times_out_at_deadline() {
        let timeout = Duration::from_millis(200);
        let (supervisor, _server) = ready(SupervisorConfig::default().request_timeout(timeout)).await;

        // Far more than the pipe holds; the server never reads it.
        let text = "x".repeat(256 * 1024);
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            supervisor.call_tool("echo", json!({ "text": text })),
        )
        .await
        .expect("call outlived its deadline");

        assert_eq!(result.unwrap_err().kind(), ErrorKind::RequestTimeout);
        assert!(started.elapsed() >= timeout);
        assert_eq!(supervisor.pending_count().await, 0);
        assert_eq!(supervisor.state(), SessionState::Ready);

        tokio::time::timeout(Duration::from_secs(3), supervisor.stop())
            .await
            .expect("stop blocked on the writer")
            .unwrap();
        assert_eq!(supervisor.state(), SessionState::Stopped);
    }

    // =========================================================================
    // Events, disconnects and shutdown
    // =========================================================================

    #[tokio::test]
    async fn test_notifications_are_surfaced() {
        let (supervisor, mut server) = ready(SupervisorConfig::default()).await;
        let mut events = supervisor.subscribe();

        server
            .send(json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}))
            .await;

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            SessionEvent::Notification {
                method: "notifications/tools/list_changed".into()
            }
        );
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_and_errors_session() {
        let (supervisor, mut server) = ready(SupervisorConfig::default()).await;
        let serve = async move {
            let _ = server.recv().await;
            drop(server);
        };
        let (result, ()) = tokio::join!(supervisor.call_tool("echo", json!({})), serve);

        assert_eq!(result.unwrap_err().kind(), ErrorKind::ConnectionClosed);
        let mut states = supervisor.watch_state();
        states
            .wait_for(|s| *s == SessionState::Errored)
            .await
            .unwrap();
        assert!(!supervisor.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_releases_blocked_writer_and_second_stop_waits() {
        let config = SupervisorConfig::default()
            .request_timeout(Duration::from_secs(30))
            .shutdown_grace(Duration::from_millis(100));
        let (supervisor, _server) = ready(config).await;
        let mut running = supervisor.watch_state();
        let mut stopping = supervisor.watch_state();

        let text = "x".repeat(256 * 1024);
        let call = supervisor.call_tool("echo", json!({ "text": text }));
        let first = async {
            running
                .wait_for(|s| *s == SessionState::Running)
                .await
                .unwrap();
            supervisor.stop().await
        };
        let second = async {
            stopping
                .wait_for(|s| *s == SessionState::Stopping)
                .await
                .unwrap();
            let stopped = supervisor.stop().await;
            (stopped, supervisor.state())
        };

        let (call, first, (second, state_after_second)) = tokio::time::timeout(
            Duration::from_secs(3),
            async { tokio::join!(call, first, second) },
        )
        .await
        .expect("stop did not release the blocked request");

        assert_eq!(call.unwrap_err().kind(), ErrorKind::ConnectionClosed);
        first.unwrap();
        second.unwrap();
        assert_eq!(state_after_second, SessionState::Stopped);
        assert_eq!(supervisor.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_stop_closes_input_and_is_idempotent() {
        let (supervisor, mut server) = ready(SupervisorConfig::default()).await;

        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state(), SessionState::Stopped);
        assert!(!supervisor.is_running().await);
        assert_eq!(server.reader.next_line().await.unwrap(), None);

        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state(), SessionState::Stopped);

        let err = supervisor.call_tool("echo", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
