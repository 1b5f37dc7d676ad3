//! In-memory runtime used by unit tests
//!
//! One-shot execs answer `tput cols`/`tput lines` from the stored geometry,
//! answer the listing command from a per-container listing and otherwise
//! replay scripted output. Interactive execs echo their input back until the
//! test kills them. Every exec holds a guard so tests can assert that nothing
//! was leaked.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncWrite, DuplexStream};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::error::{CodetainerError, Result};
use crate::models::Tty;

use super::{ContainerRuntime, ContainerSpec, ExecChunk, ExecIo, ExecSpec};

pub(crate) const FILES_COMMAND: &str = "/codetainer/utils/files";

#[derive(Debug, Clone)]
pub(crate) struct FakeContainer {
    pub name: String,
    pub image: String,
    pub running: bool,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    images: HashMap<String, String>,
    geometry: HashMap<String, Tty>,
    listings: HashMap<String, String>,
    scripts: HashMap<Vec<String>, (String, String)>,
    execs: HashMap<String, (String, ExecSpec)>,
    stdin: HashMap<String, Vec<u8>>,
    uploads: Vec<(String, String, Vec<u8>)>,
    kills: HashMap<String, CancellationToken>,
    next_id: usize,
}

/// Decrements the open exec count when the last half of an exec is dropped
struct ExecGuard(Arc<AtomicUsize>);

impl Drop for ExecGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Exec input that records everything written into it
struct RecordingInput {
    inner: DuplexStream,
    container_id: String,
    state: Arc<Mutex<FakeState>>,
    _guard: Arc<ExecGuard>,
}

impl AsyncWrite for RecordingInput {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            let mut state = self.state.lock().unwrap();
            state
                .stdin
                .entry(self.container_id.clone())
                .or_default()
                .extend_from_slice(&buf[..n]);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[derive(Default)]
pub(crate) struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
    open_execs: Arc<AtomicUsize>,
    runtime_calls: AtomicUsize,
    fail_start_exec: AtomicBool,
    exec_delay: Mutex<Option<Duration>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running container
    pub fn with_container(self, id: &str, name: &str) -> Self {
        self.state.lock().unwrap().containers.insert(
            id.to_string(),
            FakeContainer {
                name: name.to_string(),
                image: "ubuntu:latest".to_string(),
                running: true,
            },
        );
        self
    }

    pub fn with_image(self, reference: &str, id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .images
            .insert(reference.to_string(), id.to_string());
        self
    }

    pub fn set_listing(&self, container_id: &str, listing: &str) {
        self.state
            .lock()
            .unwrap()
            .listings
            .insert(container_id.to_string(), listing.to_string());
    }

    /// Scripted stdout/stderr for an exact argv
    pub fn script(&self, argv: &[&str], stdout: &str, stderr: &str) {
        self.state.lock().unwrap().scripts.insert(
            argv.iter().map(|s| s.to_string()).collect(),
            (stdout.to_string(), stderr.to_string()),
        );
    }

    pub fn fail_start_exec(&self) {
        self.fail_start_exec.store(true, Ordering::SeqCst);
    }

    /// Delay every one-shot exec's output
    pub fn delay_execs(&self, delay: Duration) {
        *self.exec_delay.lock().unwrap() = Some(delay);
    }

    /// End the output of every interactive exec in the container
    pub fn kill_execs(&self, container_id: &str) {
        let state = self.state.lock().unwrap();
        for (exec_id, (owner, _)) in &state.execs {
            if owner == container_id {
                if let Some(token) = state.kills.get(exec_id) {
                    token.cancel();
                }
            }
        }
    }

    pub fn open_execs(&self) -> usize {
        self.open_execs.load(Ordering::SeqCst)
    }

    pub fn runtime_calls(&self) -> usize {
        self.runtime_calls.load(Ordering::SeqCst)
    }

    pub fn exec_count(&self) -> usize {
        self.state.lock().unwrap().execs.len()
    }

    pub fn stdin_of(&self, container_id: &str) -> Vec<u8> {
        self.state
            .lock()
            .unwrap()
            .stdin
            .get(container_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(id).cloned()
    }

    pub fn uploads(&self) -> Vec<(String, String, Vec<u8>)> {
        self.state.lock().unwrap().uploads.clone()
    }

    fn called(&self) {
        self.runtime_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn require_running(&self, container_id: &str) -> Result<()> {
        match self.state.lock().unwrap().containers.get(container_id) {
            Some(container) if container.running => Ok(()),
            Some(_) => Err(CodetainerError::Runtime(format!(
                "container {} is not running",
                container_id
            ))),
            None => Err(CodetainerError::Runtime(format!("no such container {}", container_id))),
        }
    }

    fn oneshot_output(&self, container_id: &str, cmd: &[String]) -> (String, String) {
        let state = self.state.lock().unwrap();
        let argv: Vec<&str> = cmd.iter().map(String::as_str).collect();
        let tty = state
            .geometry
            .get(container_id)
            .copied()
            .unwrap_or(Tty { height: 24, width: 80 });

        if let Some((stdout, stderr)) = state.scripts.get(cmd) {
            return (stdout.clone(), stderr.clone());
        }

        match argv.as_slice() {
            ["tput", "cols"] => (format!("{}\n", tty.width), String::new()),
            ["tput", "lines"] => (format!("{}\n", tty.height), String::new()),
            [FILES_COMMAND, "--path", path] => match state.listings.get(container_id) {
                Some(listing) => (listing.clone(), String::new()),
                None => (String::new(), format!("files: cannot access {}\n", path)),
            },
            _ => (String::new(), format!("{}: command not found\n", argv[0])),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn version(&self) -> Result<String> {
        Ok("fake-1.0".to_string())
    }

    async fn image_id(&self, reference: &str) -> Result<String> {
        self.called();
        self.state
            .lock()
            .unwrap()
            .images
            .get(reference)
            .cloned()
            .ok_or_else(|| CodetainerError::NotFound(format!("image {}", reference)))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.called();
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("c{:04}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                name: spec.name.clone(),
                image: spec.image.clone(),
                running: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.called();
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| CodetainerError::Runtime(format!("no such container {}", container_id)))?;
        container.running = true;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        self.called();
        self.state
            .lock()
            .unwrap()
            .containers
            .remove(container_id)
            .map(|_| ())
            .ok_or_else(|| CodetainerError::Runtime(format!("no such container {}", container_id)))
    }

    async fn stop_container(&self, container_id: &str, _timeout: Duration) -> Result<()> {
        self.called();
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| CodetainerError::Runtime(format!("no such container {}", container_id)))?;
        container.running = false;
        Ok(())
    }

    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<String> {
        self.called();
        self.require_running(container_id)?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let exec_id = format!("e{:04}", state.next_id);
        state
            .execs
            .insert(exec_id.clone(), (container_id.to_string(), spec.clone()));
        Ok(exec_id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecIo> {
        self.called();
        if self.fail_start_exec.load(Ordering::SeqCst) {
            return Err(CodetainerError::Runtime(format!("exec {}: connection reset", exec_id)));
        }

        let (container_id, spec) = self
            .state
            .lock()
            .unwrap()
            .execs
            .get(exec_id)
            .cloned()
            .ok_or_else(|| CodetainerError::Runtime(format!("no such exec {}", exec_id)))?;

        self.open_execs.fetch_add(1, Ordering::SeqCst);
        let guard = Arc::new(ExecGuard(self.open_execs.clone()));
        let (write_half, read_half) = tokio::io::duplex(4096);

        let input = RecordingInput {
            inner: write_half,
            container_id: container_id.clone(),
            state: self.state.clone(),
            _guard: guard.clone(),
        };

        if spec.tty {
            let kill = CancellationToken::new();
            self.state
                .lock()
                .unwrap()
                .kills
                .insert(exec_id.to_string(), kill.clone());

            let output = ReaderStream::new(read_half)
                .take_until(kill.cancelled_owned())
                .map(move |chunk| {
                    let _held = &guard;
                    chunk
                        .map(|bytes| ExecChunk::Console(bytes.to_vec()))
                        .map_err(CodetainerError::transport)
                });

            return Ok(ExecIo {
                output: Box::pin(output),
                input: Box::pin(input),
            });
        }

        let (stdout, stderr) = self.oneshot_output(&container_id, &spec.cmd);
        let delay = *self.exec_delay.lock().unwrap();
        let mut chunks = Vec::new();
        if !stdout.is_empty() {
            chunks.push(Ok(ExecChunk::Stdout(stdout.into_bytes())));
        }
        if !stderr.is_empty() {
            chunks.push(Ok(ExecChunk::Stderr(stderr.into_bytes())));
        }

        let output = futures::stream::once(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        })
        .flat_map(move |_| futures::stream::iter(std::mem::take(&mut chunks)))
        .map(move |chunk| {
            let _held = &guard;
            chunk
        });

        drop(read_half);

        Ok(ExecIo {
            output: Box::pin(output),
            input: Box::pin(input),
        })
    }

    async fn resize_container_tty(&self, container_id: &str, tty: Tty) -> Result<()> {
        self.called();
        self.require_running(container_id)?;
        self.state
            .lock()
            .unwrap()
            .geometry
            .insert(container_id.to_string(), tty);
        Ok(())
    }

    async fn upload_archive(&self, container_id: &str, dst_path: &str, archive: Vec<u8>) -> Result<()> {
        self.called();
        self.require_running(container_id)?;
        self.state
            .lock()
            .unwrap()
            .uploads
            .push((container_id.to_string(), dst_path.to_string(), archive));
        Ok(())
    }
}
