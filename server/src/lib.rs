//! Codetainer server library
//!
//! Sandboxed, container-backed execution environments for remote clients:
//! lifecycle management, one-shot command execution and interactive terminal
//! sessions bridged over WebSockets.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod container;
pub mod error;
pub mod files;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod runtime;
pub mod store;
pub mod tty;

use crate::config::AppConfig;
use crate::container::{ExecGateway, LifecycleManager, SessionRegistry, SessionSettings};
use crate::files::FileService;
use crate::runtime::ContainerRuntime;
use crate::store::CodetainerStore;
use crate::tty::TtyService;

/// Application state shared across all handlers
pub struct AppState {
    pub config: AppConfig,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub lifecycle: LifecycleManager,
    pub gateway: Arc<ExecGateway>,
    pub tty: TtyService,
    pub files: FileService,
    pub sessions: SessionRegistry,
}

impl AppState {
    /// Wire every component to the given runtime and store
    pub fn new(
        config: AppConfig,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn CodetainerStore>,
    ) -> Self {
        let gateway = Arc::new(ExecGateway::new(runtime.clone(), config.exec_timeout()));

        Self {
            lifecycle: LifecycleManager::new(runtime.clone(), store.clone(), &config),
            tty: TtyService::new(runtime.clone(), gateway.clone()),
            files: FileService::new(runtime.clone(), gateway.clone(), config.exec.files_command.clone()),
            sessions: SessionRegistry::new(runtime.clone(), store, SessionSettings::from(&config.session)),
            gateway,
            runtime,
            config,
        }
    }
}
