//! Registry of interactive sessions, keyed by container id

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CodetainerError, Result};
use crate::models::{Codetainer, SessionInfo};
use crate::runtime::ContainerRuntime;
use crate::store::CodetainerStore;

use super::connection::{ClientEndpoint, ContainerConnection, SessionSettings};

type SessionMap = Arc<RwLock<HashMap<String, Arc<ContainerConnection>>>>;

/// Holds at most one attached session per container
pub struct SessionRegistry {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn CodetainerStore>,
    settings: SessionSettings,
    sessions: SessionMap,
}

impl SessionRegistry {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn CodetainerStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            runtime,
            store,
            settings,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn resolve(&self, container: &str) -> Result<Codetainer> {
        self.store
            .lookup_codetainer(container)
            .await?
            .ok_or_else(|| CodetainerError::NotFound(format!("codetainer {}", container)))
    }

    /// Registered connection for an id or name, without failing on unknown names
    async fn find(&self, container: &str) -> Result<Option<Arc<ContainerConnection>>> {
        if let Some(connection) = self.sessions.read().await.get(container) {
            return Ok(Some(connection.clone()));
        }

        let Some(record) = self.store.lookup_codetainer(container).await? else {
            return Ok(None);
        };
        Ok(self.sessions.read().await.get(&record.id).cloned())
    }

    fn already_attached(record: &Codetainer) -> CodetainerError {
        CodetainerError::Conflict(format!(
            "codetainer {} already has an attached session; detach it first",
            record.name
        ))
    }

    /// Pre-flight for attach, used before upgrading a client connection
    pub async fn check_attachable(&self, container: &str) -> Result<Codetainer> {
        let record = self.resolve(container).await?;
        if self.sessions.read().await.contains_key(&record.id) {
            return Err(Self::already_attached(&record));
        }
        Ok(record)
    }

    /// Attach `client` to a new interactive exec in the container
    pub async fn attach(&self, container: &str, client: ClientEndpoint) -> Result<Arc<ContainerConnection>> {
        let record = self.resolve(container).await?;
        let connection = Arc::new(ContainerConnection::new(
            record.id.clone(),
            self.runtime.clone(),
            self.settings.clone(),
            client,
        ));

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&record.id) {
                return Err(Self::already_attached(&record));
            }
            sessions.insert(record.id.clone(), connection.clone());
        }

        if let Err(e) = connection.start().await {
            remove_if_same(&self.sessions, &record.id, connection.id()).await;
            return Err(e);
        }

        self.spawn_reaper(connection.clone());

        info!(
            container_id = %record.id,
            name = %record.name,
            connection_id = %connection.id(),
            "Client attached"
        );

        Ok(connection)
    }

    /// Deregister the connection once it closes, unless it was already replaced
    fn spawn_reaper(&self, connection: Arc<ContainerConnection>) {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            connection.closed().await;
            if remove_if_same(&sessions, connection.container_id(), connection.id()).await {
                debug!(
                    container_id = %connection.container_id(),
                    connection_id = %connection.id(),
                    "Closed session deregistered"
                );
            }
        });
    }

    /// Send text through the attached session
    pub async fn send(&self, container: &str, text: &str) -> Result<()> {
        let connection = self
            .find(container)
            .await?
            .ok_or_else(|| CodetainerError::NotAttached(container.to_string()))?;

        connection.send_single_message(text).await
    }

    /// Send text through the attached session, or a transient exec when none is attached
    pub async fn inject(&self, container: &str, text: &str) -> Result<()> {
        let record = self.resolve(container).await?;
        let attached = self.sessions.read().await.get(&record.id).cloned();

        match attached {
            Some(connection) => connection.send_single_message(text).await,
            None => {
                ContainerConnection::detached(record.id, self.runtime.clone(), self.settings.clone())
                    .send_single_message(text)
                    .await
            }
        }
    }

    /// Close the attached session. Returns false when nothing was attached.
    pub async fn detach(&self, container: &str) -> Result<bool> {
        let registered = self.sessions.read().await.contains_key(container);
        let key = if registered {
            container.to_string()
        } else {
            match self.store.lookup_codetainer(container).await? {
                Some(record) => record.id,
                None => return Ok(false),
            }
        };

        let Some(connection) = self.sessions.write().await.remove(&key) else {
            return Ok(false);
        };

        self.shut_down(&connection).await;
        info!(container_id = %key, connection_id = %connection.id(), "Client detached");
        Ok(true)
    }

    async fn shut_down(&self, connection: &ContainerConnection) {
        connection.close();
        if timeout(self.settings.detach_grace, connection.closed()).await.is_err() {
            warn!(
                container_id = %connection.container_id(),
                connection_id = %connection.id(),
                "Session did not close within the detach grace period"
            );
        }
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .await
            .values()
            .map(|connection| connection.info())
            .collect()
    }

    pub async fn session(&self, container: &str) -> Result<Option<SessionInfo>> {
        Ok(self.find(container).await?.map(|connection| connection.info()))
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close every session; used on shutdown
    pub async fn detach_all(&self) {
        let drained: Vec<_> = self.sessions.write().await.drain().map(|(_, c)| c).collect();
        if drained.is_empty() {
            return;
        }

        info!(count = drained.len(), "Detaching all sessions");
        futures::future::join_all(drained.iter().map(|connection| self.shut_down(connection))).await;
    }
}

async fn remove_if_same(sessions: &SessionMap, container_id: &str, connection_id: Uuid) -> bool {
    let mut sessions = sessions.write().await;
    match sessions.get(container_id) {
        Some(current) if current.id() == connection_id => {
            sessions.remove(container_id);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::CodetainerStatus;
    use crate::runtime::fake::FakeRuntime;
    use crate::store::JsonStore;
    use chrono::Utc;
    use futures::channel::mpsc;
    use futures::{SinkExt, StreamExt};
    use pretty_assertions::assert_eq;

    type ClientIn = mpsc::UnboundedSender<Result<Vec<u8>>>;
    type ClientOut = mpsc::UnboundedReceiver<Vec<u8>>;

    fn endpoint() -> (ClientEndpoint, ClientIn, ClientOut) {
        let (in_tx, in_rx) = mpsc::unbounded();
        let (out_tx, out_rx) = mpsc::unbounded();
        let endpoint = ClientEndpoint::new(in_rx, out_tx.sink_map_err(CodetainerError::transport));
        (endpoint, in_tx, out_rx)
    }

    async fn registry(runtime: Arc<FakeRuntime>) -> SessionRegistry {
        let store = JsonStore::in_memory();
        store
            .insert_codetainer(Codetainer {
                id: "c1".to_string(),
                name: "alpha".to_string(),
                image_id: "sha256:abc".to_string(),
                status: CodetainerStatus::Running,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        SessionRegistry::new(
            runtime,
            Arc::new(store),
            SessionSettings {
                command: vec!["/bin/sh".to_string()],
                inject_timeout: Duration::from_millis(500),
                detach_grace: Duration::from_secs(1),
            },
        )
    }

    async fn wait_until_empty(registry: &SessionRegistry) {
        timeout(Duration::from_secs(2), async {
            while registry.active_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session was not deregistered in time");
    }

    #[tokio::test]
    async fn test_second_attach_conflicts() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let registry = registry(runtime.clone()).await;

        let (first, _in1, _out1) = endpoint();
        registry.attach("alpha", first).await.unwrap();

        for _ in 0..2 {
            let (second, _in2, _out2) = endpoint();
            let err = registry.attach("c1", second).await.unwrap_err();
            assert_eq!(err.kind(), "CONFLICT");
            assert_eq!(registry.check_attachable("alpha").await.unwrap_err().kind(), "CONFLICT");
        }

        assert_eq!(registry.active_count().await, 1);
        assert_eq!(runtime.exec_count(), 1);
    }

    #[tokio::test]
    async fn test_client_close_deregisters() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let registry = registry(runtime.clone()).await;

        let (client, client_in, _client_out) = endpoint();
        registry.attach("c1", client).await.unwrap();
        assert!(registry.session("alpha").await.unwrap().is_some());

        drop(client_in);
        wait_until_empty(&registry).await;

        assert_eq!(runtime.open_execs(), 0);
        assert!(registry.check_attachable("c1").await.is_ok());
    }

    #[tokio::test]
    async fn test_send_requires_attachment() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let registry = registry(runtime.clone()).await;

        let err = registry.send("alpha", "ls\n").await.unwrap_err();
        assert_eq!(err.kind(), "NOT_ATTACHED");
        assert_eq!(runtime.exec_count(), 0);

        let (client, _client_in, mut client_out) = endpoint();
        registry.attach("c1", client).await.unwrap();
        registry.send("alpha", "ls\n").await.unwrap();

        let echoed = timeout(Duration::from_secs(2), client_out.next()).await.unwrap();
        assert_eq!(echoed, Some(b"ls\n".to_vec()));
    }

    #[tokio::test]
    async fn test_inject_without_session_uses_transient_exec() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let registry = registry(runtime.clone()).await;

        registry.inject("alpha", "touch /tmp/x\n").await.unwrap();

        assert_eq!(runtime.stdin_of("c1"), b"touch /tmp/x\n".to_vec());
        assert_eq!(runtime.open_execs(), 0);
        assert_eq!(registry.active_count().await, 0);

        let err = registry.inject("missing", "ls\n").await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_detach_is_idempotent() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let registry = registry(runtime.clone()).await;

        let (client, _client_in, mut client_out) = endpoint();
        let connection = registry.attach("c1", client).await.unwrap();

        assert!(registry.detach("alpha").await.unwrap());
        assert!(!registry.detach("alpha").await.unwrap());
        assert!(!registry.detach("missing").await.unwrap());

        assert_eq!(connection.info().state, crate::models::SessionStatus::Closed);
        assert_eq!(timeout(Duration::from_secs(2), client_out.next()).await.unwrap(), None);
        assert_eq!(runtime.open_execs(), 0);
    }

    #[tokio::test]
    async fn test_attach_failures() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let registry = registry(runtime.clone()).await;

        let (client, _in, _out) = endpoint();
        let err = registry.attach("missing", client).await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");

        runtime.fail_start_exec();
        let (client, _in, _out) = endpoint();
        let err = registry.attach("c1", client).await.unwrap_err();
        assert_eq!(err.kind(), "RUNTIME_ERROR");
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_detach_all() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let registry = registry(runtime.clone()).await;

        let (client, _client_in, _client_out) = endpoint();
        registry.attach("c1", client).await.unwrap();
        assert_eq!(registry.sessions().await.len(), 1);

        registry.detach_all().await;
        assert_eq!(registry.active_count().await, 0);
        assert_eq!(runtime.open_execs(), 0);
    }
}
