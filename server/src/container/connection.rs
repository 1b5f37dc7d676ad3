//! Interactive terminal attachment between one client and one container
//!
//! A [`ContainerConnection`] moves through `Idle -> Attaching -> Attached -> Closed`.
//! Once attached it runs two pump tasks, client to container and container to
//! client, plus a supervisor that publishes `Closed` after both pumps have
//! released their halves of the exec and the client endpoint.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use once_cell::sync::OnceCell;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{CodetainerError, Result};
use crate::metrics;
use crate::models::{SessionInfo, SessionStatus};
use crate::runtime::{open_exec, ContainerRuntime, ExecInput, ExecIo, ExecOutput, ExecSpec};

/// How long the client sink may take to flush its close
const CLIENT_CLOSE_GRACE: Duration = Duration::from_secs(1);

pub type ClientStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;
pub type ClientSink = Pin<Box<dyn Sink<Vec<u8>, Error = CodetainerError> + Send>>;

/// Remote side of a session: frames in, frames out
pub struct ClientEndpoint {
    incoming: ClientStream,
    outgoing: ClientSink,
}

impl ClientEndpoint {
    pub fn new<S, K>(incoming: S, outgoing: K) -> Self
    where
        S: Stream<Item = Result<Vec<u8>>> + Send + 'static,
        K: Sink<Vec<u8>, Error = CodetainerError> + Send + 'static,
    {
        Self {
            incoming: Box::pin(incoming),
            outgoing: Box::pin(outgoing),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Attaching,
    Attached,
    Closed,
}

impl From<ConnectionState> for SessionStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Idle => SessionStatus::Idle,
            ConnectionState::Attaching => SessionStatus::Attaching,
            ConnectionState::Attached => SessionStatus::Attached,
            ConnectionState::Closed => SessionStatus::Closed,
        }
    }
}

/// Session parameters taken from configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub command: Vec<String>,
    pub inject_timeout: Duration,
    pub detach_grace: Duration,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            command: config.command.clone(),
            inject_timeout: Duration::from_secs(config.inject_timeout_seconds),
            detach_grace: Duration::from_secs(config.detach_grace_seconds),
        }
    }
}

/// Parts consumed by `start`
struct Pending {
    client: Option<ClientEndpoint>,
    queued: mpsc::UnboundedReceiver<Vec<u8>>,
}

pub struct ContainerConnection {
    id: Uuid,
    container_id: String,
    runtime: Arc<dyn ContainerRuntime>,
    settings: SessionSettings,
    attached_at: DateTime<Utc>,
    exec_id: OnceCell<String>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: CancellationToken,
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    pending: Mutex<Option<Pending>>,
}

impl std::fmt::Debug for ContainerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerConnection")
            .field("id", &self.id)
            .field("container_id", &self.container_id)
            .field("exec_id", &self.exec_id.get())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ContainerConnection {
    /// Connection that will bridge `client` to a new interactive exec on `start`
    pub fn new(
        container_id: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        settings: SessionSettings,
        client: ClientEndpoint,
    ) -> Self {
        Self::build(container_id.into(), runtime, settings, Some(client))
    }

    /// Connection without a client; only usable for transient injection
    pub fn detached(
        container_id: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        settings: SessionSettings,
    ) -> Self {
        Self::build(container_id.into(), runtime, settings, None)
    }

    fn build(
        container_id: String,
        runtime: Arc<dyn ContainerRuntime>,
        settings: SessionSettings,
        client: Option<ClientEndpoint>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (input_tx, queued) = mpsc::unbounded_channel();

        Self {
            id: Uuid::new_v4(),
            container_id,
            runtime,
            settings,
            attached_at: Utc::now(),
            exec_id: OnceCell::new(),
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
            input_tx,
            pending: Mutex::new(Some(Pending { client, queued })),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn exec_id(&self) -> Option<&str> {
        self.exec_id.get().map(String::as_str)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            connection_id: self.id,
            container_id: self.container_id.clone(),
            exec_id: self.exec_id.get().cloned(),
            state: self.state().into(),
            attached_at: self.attached_at,
        }
    }

    /// Open the interactive exec and start bridging.
    ///
    /// Returns once both pumps are running. A failure leaves the connection `Closed`.
    pub async fn start(&self) -> Result<()> {
        let pending = {
            let mut slot = self.pending.lock().await;
            match slot.take() {
                Some(Pending { client: Some(client), queued }) => (client, queued),
                Some(detached) => {
                    *slot = Some(detached);
                    return Err(CodetainerError::validation("no client endpoint to attach"));
                }
                None => {
                    return Err(CodetainerError::Conflict(format!(
                        "connection to {} already started",
                        self.container_id
                    )))
                }
            }
        };

        if !self.transition(ConnectionState::Idle, ConnectionState::Attaching) {
            if self.state() == ConnectionState::Closed {
                return Err(self.closed_while_attaching());
            }
            return Err(CodetainerError::Conflict(format!(
                "connection to {} is {:?}",
                self.container_id,
                self.state()
            )));
        }

        let spec = ExecSpec::interactive(self.settings.command.clone());
        let opened = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            result = open_exec(self.runtime.as_ref(), &self.container_id, &spec) => Some(result),
        };

        let (exec_id, io) = match opened {
            Some(Ok(opened)) => opened,
            Some(Err(e)) => {
                warn!(container_id = %self.container_id, error = %e, "Failed to open interactive exec");
                self.state.send_replace(ConnectionState::Closed);
                return Err(e);
            }
            None => {
                self.state.send_replace(ConnectionState::Closed);
                return Err(self.closed_while_attaching());
            }
        };

        let _ = self.exec_id.set(exec_id.clone());

        if !self.transition(ConnectionState::Attaching, ConnectionState::Attached) {
            drop(io);
            self.state.send_replace(ConnectionState::Closed);
            return Err(self.closed_while_attaching());
        }

        let (client, queued) = pending;
        self.spawn_bridge(client, queued, io);

        metrics::record_session_attached();
        info!(
            connection_id = %self.id,
            container_id = %self.container_id,
            exec_id = %exec_id,
            "Session attached"
        );

        Ok(())
    }

    fn closed_while_attaching(&self) -> CodetainerError {
        CodetainerError::Transport(format!(
            "connection to {} closed while attaching",
            self.container_id
        ))
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn spawn_bridge(
        &self,
        client: ClientEndpoint,
        queued: mpsc::UnboundedReceiver<Vec<u8>>,
        io: ExecIo,
    ) {
        let ClientEndpoint { incoming, mut outgoing } = client;
        let ExecIo { mut output, input } = io;

        let upstream = {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    _ = shutdown.cancelled() => Ok(()),
                    result = forward_input(incoming, queued, input) => result,
                };
                shutdown.cancel();
                result
            })
        };

        let downstream = {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    _ = shutdown.cancelled() => Ok(()),
                    result = forward_output(&mut output, &mut outgoing) => result,
                };
                shutdown.cancel();
                if timeout(CLIENT_CLOSE_GRACE, outgoing.close()).await.is_err() {
                    debug!("Client endpoint did not close in time");
                }
                result
            })
        };

        let state = self.state.clone();
        let connection_id = self.id;
        let container_id = self.container_id.clone();
        tokio::spawn(async move {
            let (up, down) = tokio::join!(upstream, downstream);

            for (direction, outcome) in [("client->container", up), ("container->client", down)] {
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(
                        connection_id = %connection_id,
                        direction = direction,
                        error = %e,
                        "Bridge direction ended with error"
                    ),
                    Err(e) => warn!(
                        connection_id = %connection_id,
                        direction = direction,
                        error = %e,
                        "Bridge task failed"
                    ),
                }
            }

            state.send_replace(ConnectionState::Closed);
            metrics::record_session_closed();
            info!(connection_id = %connection_id, container_id = %container_id, "Session closed");
        });
    }

    /// Deliver `text` to the container terminal.
    ///
    /// While attaching or attached the text is queued behind client input. An idle
    /// connection runs it through a transient exec instead.
    pub async fn send_single_message(&self, text: &str) -> Result<()> {
        match self.state() {
            ConnectionState::Attaching | ConnectionState::Attached => self
                .input_tx
                .send(text.as_bytes().to_vec())
                .map_err(|_| CodetainerError::NotAttached(self.container_id.clone())),
            ConnectionState::Idle => self.inject_transient(text).await,
            ConnectionState::Closed => Err(CodetainerError::NotAttached(self.container_id.clone())),
        }
    }

    async fn inject_transient(&self, text: &str) -> Result<()> {
        let spec = ExecSpec::interactive(self.settings.command.clone());
        let (exec_id, io) = open_exec(self.runtime.as_ref(), &self.container_id, &spec).await?;
        let ExecIo { mut output, mut input } = io;

        input
            .write_all(text.as_bytes())
            .await
            .map_err(CodetainerError::transport)?;
        input.shutdown().await.map_err(CodetainerError::transport)?;
        drop(input);

        let drained = timeout(self.settings.inject_timeout, async {
            while let Some(chunk) = output.next().await {
                chunk?;
            }
            Ok::<_, CodetainerError>(())
        })
        .await;

        match drained {
            Ok(result) => result?,
            Err(_) => debug!(exec_id = %exec_id, "Transient exec still running, releasing it"),
        }

        debug!(container_id = %self.container_id, exec_id = %exec_id, "Transient message delivered");
        Ok(())
    }

    /// Ask both directions to stop. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
        self.transition(ConnectionState::Idle, ConnectionState::Closed);
    }

    /// Wait until the connection reaches `Closed`
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }
}

async fn forward_input(
    mut incoming: ClientStream,
    mut queued: mpsc::UnboundedReceiver<Vec<u8>>,
    mut input: ExecInput,
) -> Result<()> {
    loop {
        let bytes = tokio::select! {
            frame = incoming.next() => match frame {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            },
            Some(bytes) = queued.recv() => bytes,
        };

        input.write_all(&bytes).await.map_err(CodetainerError::transport)?;
        input.flush().await.map_err(CodetainerError::transport)?;
    }
}

async fn forward_output(output: &mut ExecOutput, outgoing: &mut ClientSink) -> Result<()> {
    while let Some(chunk) = output.next().await {
        outgoing.send(chunk?.into_bytes()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRuntime;
    use futures::channel::mpsc as client_mpsc;
    use pretty_assertions::assert_eq;

    type ClientIn = client_mpsc::UnboundedSender<Result<Vec<u8>>>;
    type ClientOut = client_mpsc::UnboundedReceiver<Vec<u8>>;

    fn settings() -> SessionSettings {
        SessionSettings {
            command: vec!["/bin/sh".to_string()],
            inject_timeout: Duration::from_millis(500),
            detach_grace: Duration::from_secs(1),
        }
    }

    fn client_endpoint() -> (ClientEndpoint, ClientIn, ClientOut) {
        let (in_tx, in_rx) = client_mpsc::unbounded();
        let (out_tx, out_rx) = client_mpsc::unbounded();
        let endpoint = ClientEndpoint::new(in_rx, out_tx.sink_map_err(CodetainerError::transport));
        (endpoint, in_tx, out_rx)
    }

    async fn next_frame(out: &mut ClientOut) -> Option<Vec<u8>> {
        timeout(Duration::from_secs(2), out.next()).await.ok().flatten()
    }

    async fn wait_closed(connection: &ContainerConnection) {
        timeout(Duration::from_secs(2), connection.closed())
            .await
            .expect("connection did not close in time");
    }

    #[test]
    fn test_debug_shows_identity_and_state() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let connection = ContainerConnection::detached("c1", runtime, settings());

        let rendered = format!("{:?}", connection);
        assert!(rendered.contains("container_id: \"c1\""), "{}", rendered);
        assert!(rendered.contains("state: Idle"), "{}", rendered);
    }

    #[tokio::test]
    async fn test_echo_and_client_close() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let (endpoint, client_in, mut client_out) = client_endpoint();
        let connection = ContainerConnection::new("c1", runtime.clone(), settings(), endpoint);

        connection.start().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Attached);
        assert!(connection.exec_id().is_some());

        client_in.unbounded_send(Ok(b"ls\n".to_vec())).unwrap();
        assert_eq!(next_frame(&mut client_out).await, Some(b"ls\n".to_vec()));

        drop(client_in);
        wait_closed(&connection).await;

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(runtime.open_execs(), 0);
        assert_eq!(runtime.stdin_of("c1"), b"ls\n".to_vec());
    }

    #[tokio::test]
    async fn test_container_exit_closes_client() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let (endpoint, _client_in, mut client_out) = client_endpoint();
        let connection = ContainerConnection::new("c1", runtime.clone(), settings(), endpoint);

        connection.start().await.unwrap();
        runtime.kill_execs("c1");

        wait_closed(&connection).await;
        assert_eq!(next_frame(&mut client_out).await, None);
        assert_eq!(runtime.open_execs(), 0);
    }

    #[tokio::test]
    async fn test_queued_message_while_attached() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let (endpoint, _client_in, mut client_out) = client_endpoint();
        let connection = ContainerConnection::new("c1", runtime.clone(), settings(), endpoint);

        connection.start().await.unwrap();
        connection.send_single_message("pwd\n").await.unwrap();

        assert_eq!(next_frame(&mut client_out).await, Some(b"pwd\n".to_vec()));
        // Same exec, no transient one opened
        assert_eq!(runtime.exec_count(), 1);

        connection.close();
        wait_closed(&connection).await;
        assert_eq!(runtime.open_execs(), 0);
    }

    #[tokio::test]
    async fn test_transient_injection_when_idle() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let connection = ContainerConnection::detached("c1", runtime.clone(), settings());

        connection.send_single_message("echo hi\n").await.unwrap();

        assert_eq!(runtime.stdin_of("c1"), b"echo hi\n".to_vec());
        assert_eq!(runtime.exec_count(), 1);
        assert_eq!(runtime.open_execs(), 0);
        assert_eq!(connection.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_start_failure_closes() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        runtime.fail_start_exec();
        let (endpoint, _client_in, _client_out) = client_endpoint();
        let connection = ContainerConnection::new("c1", runtime.clone(), settings(), endpoint);

        let err = connection.start().await.unwrap_err();
        assert_eq!(err.kind(), "RUNTIME_ERROR");
        assert_eq!(connection.state(), ConnectionState::Closed);

        let err = connection.send_single_message("ls\n").await.unwrap_err();
        assert_eq!(err.kind(), "NOT_ATTACHED");
    }

    #[tokio::test]
    async fn test_start_twice_and_detached_start() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let (endpoint, _client_in, _client_out) = client_endpoint();
        let connection = ContainerConnection::new("c1", runtime.clone(), settings(), endpoint);
        connection.start().await.unwrap();
        assert_eq!(connection.start().await.unwrap_err().kind(), "CONFLICT");

        let detached = ContainerConnection::detached("c1", runtime, settings());
        assert_eq!(detached.start().await.unwrap_err().kind(), "VALIDATION_ERROR");
        assert_eq!(detached.state(), ConnectionState::Idle);

        connection.close();
        wait_closed(&connection).await;
    }

    #[tokio::test]
    async fn test_close_idle_connection() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let connection = ContainerConnection::detached("c1", runtime, settings());

        connection.close();
        wait_closed(&connection).await;
        assert_eq!(connection.info().state, SessionStatus::Closed);
    }
}
