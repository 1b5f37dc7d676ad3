//! Container session bridge
//!
//! Handles all interactions with running codetainers:
//! - One-shot command execution with captured output
//! - Interactive terminal sessions bridged to remote clients
//! - Codetainer lifecycle (create, start, stop) and image registration

mod connection;
mod executor;
mod manager;
mod registry;

pub use connection::{ClientEndpoint, ConnectionState, ContainerConnection, SessionSettings};
pub use executor::{ExecCapture, ExecGateway};
pub use manager::LifecycleManager;
pub use registry::SessionRegistry;
