//! Container runtime seam
//!
//! Everything the session bridge needs from the container engine goes through
//! [`ContainerRuntime`]. The production implementation talks to the Docker
//! Engine API via bollard; tests substitute a fake or a mock.

mod docker;
#[cfg(test)]
pub(crate) mod fake;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio::io::AsyncWrite;

use crate::error::Result;
use crate::models::Tty;

pub use docker::DockerRuntime;

/// Output chunk produced by an exec context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// Combined stream of a tty-enabled exec
    Console(Vec<u8>),
}

impl ExecChunk {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ExecChunk::Stdout(bytes) | ExecChunk::Stderr(bytes) | ExecChunk::Console(bytes) => bytes,
        }
    }
}

pub type ExecOutput = Pin<Box<dyn Stream<Item = Result<ExecChunk>> + Send>>;
pub type ExecInput = Pin<Box<dyn AsyncWrite + Send>>;

/// Attached exec context. Dropping both halves releases it.
pub struct ExecIo {
    pub output: ExecOutput,
    pub input: ExecInput,
}

/// How an exec context is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub tty: bool,
    pub attach_stdin: bool,
}

impl ExecSpec {
    /// Synchronous command: stdout and stderr captured separately, no stdin
    pub fn oneshot(cmd: Vec<String>) -> Self {
        Self {
            cmd,
            tty: false,
            attach_stdin: false,
        }
    }

    /// Interactive terminal: tty enabled, stdin attached
    pub fn interactive(cmd: Vec<String>) -> Self {
        Self {
            cmd,
            tty: true,
            attach_stdin: true,
        }
    }
}

/// Container creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    /// Bind mounts in `host:container[:mode]` form
    pub binds: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Engine version, used by health checks
    async fn version(&self) -> Result<String>;

    /// Resolve an image reference to its ID
    async fn image_id(&self, reference: &str) -> Result<String>;

    /// Create a container and return its ID
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Force-remove a container, running or not
    async fn remove_container(&self, container_id: &str) -> Result<()>;

    async fn stop_container(&self, container_id: &str, timeout: Duration) -> Result<()>;

    /// Create an exec context and return its ID
    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<String>;

    /// Start a created exec and attach to its streams
    async fn start_exec(&self, exec_id: &str) -> Result<ExecIo>;

    /// Resize the container's own terminal
    async fn resize_container_tty(&self, container_id: &str, tty: Tty) -> Result<()>;

    /// Extract a tar archive into `dst_path` inside the container
    async fn upload_archive(&self, container_id: &str, dst_path: &str, archive: Vec<u8>) -> Result<()>;
}

/// Create and start an exec in one step
pub async fn open_exec(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    spec: &ExecSpec,
) -> Result<(String, ExecIo)> {
    let exec_id = runtime.create_exec(container_id, spec).await?;
    let io = runtime.start_exec(&exec_id).await?;
    Ok((exec_id, io))
}
