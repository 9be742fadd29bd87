//! Subprocess spawning for stdio servers.
//!
//! A server is launched with all three standard streams piped: stdin and
//! stdout carry the protocol, stderr is handed back separately so that the
//! caller can log it without it ever reaching the framer.
//!
//! # Example
//!
//! ```no_run
//! use mcpparity_transport::spawn::ProcessBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), mcpparity_transport::TransportError> {
//! let process = ProcessBuilder::new("python")
//!     .arg("-m")
//!     .arg("my_server")
//!     .env("LOG_LEVEL", "debug")
//!     .working_dir("/path/to/server")
//!     .spawn()?;
//!
//! let (mut handle, stdio) = process.into_parts();
//! drop(stdio);
//! handle.terminate(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::error::TransportError;

/// Builder for launching a server process.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    clear_env: bool,
}

impl ProcessBuilder {
    /// Create a new builder for the given program.
    #[must_use]
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: PathBuf::from(program.as_ref()),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            clear_env: false,
        }
    }

    /// Add a single argument.
    #[must_use]
    pub fn arg<S: AsRef<str>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// Set an environment variable.
    #[must_use]
    pub fn env<K: AsRef<str>, V: AsRef<str>>(mut self, key: K, value: V) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Set multiple environment variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.envs.extend(
            envs.into_iter()
                .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string())),
        );
        self
    }

    /// Set the working directory for the child process.
    #[must_use]
    pub fn working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Start from an empty environment instead of inheriting the parent's.
    #[must_use]
    pub const fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    /// The command line this builder would run, for diagnostics.
    #[must_use]
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.display().to_string()
        } else {
            format!("{} {}", self.program.display(), self.args.join(" "))
        }
    }

    /// Launch the process.
    ///
    /// The child is killed if its handle is dropped without being awaited.
    pub fn spawn(self) -> Result<SpawnedProcess, TransportError> {
        let command_line = self.command_line();
        let mut command = Command::new(&self.program);

        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.clear_env {
            command.env_clear();
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(TransportError::StdioUnavailable { stream: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TransportError::StdioUnavailable { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(TransportError::StdioUnavailable { stream: "stderr" })?;

        tracing::debug!(command = %command_line, pid = ?child.id(), "Spawned server process");

        Ok(SpawnedProcess {
            handle: ProcessHandle {
                child,
                command: command_line,
            },
            stdio: ProcessStdio {
                stdin,
                stdout,
                stderr,
            },
        })
    }
}

/// The piped standard streams of a spawned process.
#[derive(Debug)]
pub struct ProcessStdio {
    /// Protocol input.
    pub stdin: ChildStdin,
    /// Protocol output.
    pub stdout: ChildStdout,
    /// Diagnostic output.
    pub stderr: ChildStderr,
}

/// A freshly spawned process.
#[derive(Debug)]
pub struct SpawnedProcess {
    handle: ProcessHandle,
    stdio: ProcessStdio,
}

impl SpawnedProcess {
    /// Split into the lifecycle handle and the stdio streams.
    #[must_use]
    pub fn into_parts(self) -> (ProcessHandle, ProcessStdio) {
        (self.handle, self.stdio)
    }
}

/// How a process ended after [`ProcessHandle::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The process had already exited before termination began.
    AlreadyExited(ExitStatus),
    /// The process exited within the grace period.
    Graceful(ExitStatus),
    /// The process was killed after the grace period expired.
    Forced(Option<ExitStatus>),
}

impl ExitOutcome {
    /// The exit status, if one was observed.
    #[must_use]
    pub const fn status(&self) -> Option<ExitStatus> {
        match self {
            Self::AlreadyExited(s) | Self::Graceful(s) => Some(*s),
            Self::Forced(s) => *s,
        }
    }
}

/// Lifecycle control over a spawned process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    command: String,
}

impl ProcessHandle {
    /// Get the process ID, or `None` once it has been reaped.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Get the command line used to spawn this process.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Poll for an exit status without blocking.
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>, TransportError> {
        Ok(self.child.try_wait()?)
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus, TransportError> {
        Ok(self.child.wait().await?)
    }

    /// Stop the process: ask politely, then force.
    ///
    /// Sends a graceful termination signal (SIGTERM on Unix; Windows has no
    /// equivalent, so the kill is immediate there), waits up to `grace` for
    /// the process to exit, then kills it.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitOutcome, TransportError> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(ExitOutcome::AlreadyExited(status));
        }

        if let Err(e) = self.signal_terminate() {
            tracing::warn!(command = %self.command, error = %e, "Graceful termination signal failed");
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(ExitOutcome::Graceful(status?)),
            Err(_) => {
                tracing::warn!(
                    command = %self.command,
                    grace_ms = grace.as_millis() as u64,
                    "Process did not exit within grace period, killing"
                );
                self.child.kill().await?;
                Ok(ExitOutcome::Forced(self.child.try_wait()?))
            }
        }
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) -> Result<(), TransportError> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| TransportError::Signal {
            pid,
            message: e.to_string(),
        })
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) -> Result<(), TransportError> {
        Ok(self.child.start_kill()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_construction() {
        let builder = ProcessBuilder::new("node")
            .arg("server.js")
            .args(["--stdio", "--quiet"])
            .env("TEST_VAR", "value")
            .working_dir("/tmp");

        assert_eq!(builder.program.to_string_lossy(), "node");
        assert_eq!(builder.args, vec!["server.js", "--stdio", "--quiet"]);
        assert_eq!(
            builder.envs,
            vec![("TEST_VAR".to_string(), "value".to_string())]
        );
        assert_eq!(builder.current_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(builder.command_line(), "node server.js --stdio --quiet");
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_program() {
        let result = ProcessBuilder::new("nonexistent-program-12345").spawn();
        match result {
            Err(TransportError::Spawn { command, .. }) => {
                assert_eq!(command, "nonexistent-program-12345");
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_is_graceful_for_cat() {
        let Ok(process) = ProcessBuilder::new("cat").spawn() else {
            // cat might not be available everywhere
            return;
        };
        let (mut handle, stdio) = process.into_parts();
        assert!(handle.is_running());

        let outcome = handle.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(outcome, ExitOutcome::Graceful(_)));
        assert!(!handle.is_running());
        drop(stdio);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_forces_after_grace() {
        let Ok(process) = ProcessBuilder::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
        else {
            return;
        };
        let (mut handle, _stdio) = process.into_parts();
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let outcome = handle.terminate(Duration::from_millis(200)).await.unwrap();
        assert!(matches!(outcome, ExitOutcome::Forced(_)));
    }
}
