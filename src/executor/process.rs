//! Process launching on the local OS
//!
//! [`ProcessInvocation`] is the builder handed to a [`ProcessLauncher`]: the
//! argv, the environment to add on top of the inherited one, where stdout
//! and stderr should go, and the step/attempt tag used in diagnostics.
//! [`OsProcessLauncher`] runs it with `tokio::process`. Sinks backed by a
//! file or a standard stream are handed to the child as-is; plain writers
//! get a pipe whose output is copied into them as it arrives.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::sink::OutputSink;
use super::traits::{ProcessLauncher, RunningProcess};
use crate::pipeline::{ProcessError, ResolvedCommand};

/// How long `wait` lets output pumps drain after the child exits.
///
/// A daemonizing child can hand its pipes to a grandchild that never closes
/// them, so draining is bounded.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Description of a process to start
#[derive(Debug, Clone)]
pub struct ProcessInvocation {
    command: ResolvedCommand,
    env: BTreeMap<String, String>,
    stdout: Option<OutputSink>,
    stderr: Option<OutputSink>,
    step_id: String,
    attempt: u32,
}

impl ProcessInvocation {
    /// Creates an invocation for `command` with no output sinks
    #[must_use]
    pub fn new(command: ResolvedCommand) -> Self {
        Self {
            command,
            env: BTreeMap::new(),
            stdout: None,
            stderr: None,
            step_id: String::new(),
            attempt: 0,
        }
    }

    /// Binds standard output to `sink`
    #[must_use]
    pub fn with_stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = Some(sink);
        self
    }

    /// Binds standard error to `sink`
    #[must_use]
    pub fn with_stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    /// Adds environment variables
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    /// Tags the invocation with the step and attempt it belongs to
    #[must_use]
    pub fn tagged(mut self, step_id: impl Into<String>, attempt: u32) -> Self {
        self.step_id = step_id.into();
        self.attempt = attempt;
        self
    }

    /// The argv
    #[must_use]
    pub fn command(&self) -> &ResolvedCommand {
        &self.command
    }

    /// Environment added to the process
    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Sink bound to stdout
    #[must_use]
    pub fn stdout(&self) -> Option<&OutputSink> {
        self.stdout.as_ref()
    }

    /// Sink bound to stderr
    #[must_use]
    pub fn stderr(&self) -> Option<&OutputSink> {
        self.stderr.as_ref()
    }

    /// Step the invocation belongs to
    #[must_use]
    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Attempt the invocation belongs to
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Launcher backed by `tokio::process`
///
/// Children are not killed when their handle is dropped: a background step
/// keeps running after the controller has returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessLauncher;

impl OsProcessLauncher {
    /// Creates a launcher
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for OsProcessLauncher {
    fn start(
        &self,
        invocation: ProcessInvocation,
    ) -> Result<Box<dyn RunningProcess>, ProcessError> {
        let ProcessInvocation {
            command,
            env,
            stdout,
            stderr,
            step_id,
            attempt,
        } = invocation;

        let start_error = |source: std::io::Error| ProcessError::Start {
            program: command.program().to_string(),
            source,
        };

        let mut cmd = Command::new(command.program());
        cmd.args(command.args())
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(child_stdio(stdout.as_ref()).map_err(start_error)?)
            .stderr(child_stdio(stderr.as_ref()).map_err(start_error)?)
            .kill_on_drop(false);

        let mut child = cmd.spawn().map_err(start_error)?;

        debug!(
            step_id = %step_id,
            attempt,
            pid = child.id(),
            command = %command,
            "started process"
        );

        let mut pumps = Vec::with_capacity(2);
        if let (Some(pipe), Some(sink)) = (child.stdout.take(), stdout) {
            pumps.push(spawn_pump(pipe, sink, step_id.clone(), "stdout"));
        }
        if let (Some(pipe), Some(sink)) = (child.stderr.take(), stderr) {
            pumps.push(spawn_pump(pipe, sink, step_id.clone(), "stderr"));
        }

        let pid = child.id();
        Ok(Box::new(OsProcess { child, pid, pumps }))
    }
}

/// Picks the child's end of an output stream
///
/// Only plain writers are piped; the child would lose a piped stream once
/// this process exits.
fn child_stdio(sink: Option<&OutputSink>) -> std::io::Result<Stdio> {
    match sink {
        None => Ok(Stdio::null()),
        Some(sink) => Ok(sink.child_stdio()?.unwrap_or_else(Stdio::piped)),
    }
}

/// Copies a child pipe into a sink line by line until EOF
fn spawn_pump<R>(pipe: R, sink: OutputSink, step_id: String, stream: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    if let Err(e) = sink.write_chunk(&line) {
                        warn!(step_id = %step_id, stream, error = %e, "failed to write process output");
                        break;
                    }
                }
                Err(e) => {
                    debug!(step_id = %step_id, stream, error = %e, "process output pipe closed");
                    break;
                }
            }
        }
    })
}

struct OsProcess {
    child: Child,
    pid: Option<u32>,
    pumps: Vec<JoinHandle<()>>,
}

impl OsProcess {
    async fn drain_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await.is_err() {
                debug!(pid = self.pid, "output pipe still open after exit; detaching");
            }
        }
    }
}

#[async_trait]
impl RunningProcess for OsProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> Result<(), ProcessError> {
        let status = self.child.wait().await.map_err(ProcessError::Wait)?;
        self.drain_pumps().await;

        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::Exit {
                code: status.code(),
            })
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.child.kill().await.map_err(ProcessError::Wait)?;
        self.drain_pumps().await;
        Ok(())
    }
}
