//! One-shot command execution within containers

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{CodetainerError, Result};
use crate::metrics;
use crate::runtime::{open_exec, ContainerRuntime, ExecChunk, ExecSpec};

/// Captured output of a one-shot command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecCapture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecCapture {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs synchronous commands and captures stdout and stderr separately
pub struct ExecGateway {
    runtime: Arc<dyn ContainerRuntime>,
    timeout: Duration,
}

impl ExecGateway {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, timeout: Duration) -> Self {
        Self { runtime, timeout }
    }

    /// Execute with the configured timeout
    pub async fn execute(&self, container_id: &str, argv: &[String]) -> Result<ExecCapture> {
        self.execute_with_timeout(container_id, argv, self.timeout).await
    }

    /// Execute a command and wait for its output to end.
    ///
    /// Anything written to stderr turns the call into [`CodetainerError::ExecFailure`],
    /// whatever the exit status. The exec context is dropped on every return path.
    pub async fn execute_with_timeout(
        &self,
        container_id: &str,
        argv: &[String],
        limit: Duration,
    ) -> Result<ExecCapture> {
        if container_id.trim().is_empty() {
            return Err(CodetainerError::validation("container id is required"));
        }
        if argv.first().map_or(true, |cmd| cmd.is_empty()) {
            return Err(CodetainerError::validation("command is required"));
        }

        let start_time = Instant::now();
        debug!(container_id = %container_id, argv = ?argv, "Executing command");

        let result = match timeout(limit, self.run(container_id, argv)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(container_id = %container_id, argv = ?argv, "Command timed out");
                Err(CodetainerError::Timeout(limit))
            }
        };

        let elapsed = start_time.elapsed();
        let capture = finish(container_id, elapsed, result)?;
        debug!(
            container_id = %container_id,
            duration_ms = elapsed.as_millis() as u64,
            stdout_bytes = capture.stdout.len(),
            "Command completed"
        );

        Ok(capture)
    }

    async fn run(&self, container_id: &str, argv: &[String]) -> Result<ExecCapture> {
        let spec = ExecSpec::oneshot(argv.to_vec());
        let (exec_id, io) = open_exec(self.runtime.as_ref(), container_id, &spec).await?;
        debug!(exec_id = %exec_id, "Exec started");

        // No stdin is attached to one-shot execs
        drop(io.input);

        let mut output = io.output;
        let mut capture = ExecCapture::default();
        while let Some(chunk) = output.next().await {
            match chunk? {
                ExecChunk::Stdout(bytes) | ExecChunk::Console(bytes) => capture.stdout.extend(bytes),
                ExecChunk::Stderr(bytes) => capture.stderr.extend(bytes),
            }
        }

        Ok(capture)
    }
}

/// Classify a finished command and record it.
///
/// Any stderr output makes the command a failure, whatever its exit status.
fn finish(container_id: &str, elapsed: Duration, result: Result<ExecCapture>) -> Result<ExecCapture> {
    let outcome = result.and_then(|capture| {
        if capture.stderr.is_empty() {
            return Ok(capture);
        }
        let stderr = String::from_utf8_lossy(&capture.stderr).into_owned();
        debug!(container_id = %container_id, stderr = %stderr, "Command wrote to stderr");
        Err(CodetainerError::ExecFailure(stderr))
    });

    metrics::record_exec(elapsed.as_secs_f64(), outcome.is_ok());
    outcome
}
