//! Docker Engine implementation of the runtime seam

use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, ResizeContainerTtyOptions,
    StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::error::{CodetainerError, Result};
use crate::models::Tty;

use super::{ContainerRuntime, ContainerSpec, ExecChunk, ExecIo, ExecSpec};

/// Runtime backed by a Docker (or Podman-compatible) engine
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect using the configured socket, or the local defaults
    pub fn connect(config: &RuntimeConfig) -> anyhow::Result<Self> {
        let client = match config.socket {
            Some(ref socket) => {
                Docker::connect_with_socket(socket, config.timeout_seconds, API_DEFAULT_VERSION)?
            }
            None => Docker::connect_with_local_defaults()?,
        };

        info!(socket = ?config.socket, "Docker client configured");

        Ok(Self { client })
    }
}

fn runtime_error(what: &str, err: BollardError) -> CodetainerError {
    CodetainerError::Runtime(format!("{}: {}", what, err))
}

/// Image lookups report a missing image as NotFound
fn image_error(reference: &str, err: BollardError) -> CodetainerError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => CodetainerError::NotFound(format!("image {}: {}", reference, message)),
        other => runtime_error(&format!("image {}", reference), other),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn version(&self) -> Result<String> {
        let version = self
            .client
            .version()
            .await
            .map_err(|e| runtime_error("version", e))?;

        Ok(version.version.unwrap_or_else(|| "unknown".to_string()))
    }

    async fn image_id(&self, reference: &str) -> Result<String> {
        let image = self
            .client
            .inspect_image(reference)
            .await
            .map_err(|e| image_error(reference, e))?;

        image
            .id
            .ok_or_else(|| CodetainerError::Runtime(format!("image {} has no id", reference)))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let host_config = HostConfig {
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone(),
            tty: Some(true),
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| runtime_error(&format!("create container {}", spec.name), e))?;

        debug!(container_id = %response.id, warnings = ?response.warnings, "Container created");

        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| runtime_error(&format!("container {}", container_id), e))
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.client
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| runtime_error(&format!("container {}", container_id), e))
    }

    async fn stop_container(&self, container_id: &str, timeout: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };

        self.client
            .stop_container(container_id, Some(options))
            .await
            .map_err(|e| runtime_error(&format!("container {}", container_id), e))
    }

    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<String> {
        let options = CreateExecOptions {
            cmd: Some(spec.cmd.clone()),
            attach_stdin: Some(spec.attach_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(spec.tty),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container_id, options)
            .await
            .map_err(|e| runtime_error(&format!("container {}", container_id), e))?;

        Ok(exec.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecIo> {
        let results = self
            .client
            .start_exec(exec_id, None)
            .await
            .map_err(|e| runtime_error(&format!("exec {}", exec_id), e))?;

        match results {
            StartExecResults::Attached { output, input } => {
                let output = output.filter_map(|item| async move {
                    match item {
                        Ok(LogOutput::StdOut { message }) => Some(Ok(ExecChunk::Stdout(message.to_vec()))),
                        Ok(LogOutput::StdErr { message }) => Some(Ok(ExecChunk::Stderr(message.to_vec()))),
                        Ok(LogOutput::Console { message }) => Some(Ok(ExecChunk::Console(message.to_vec()))),
                        Ok(LogOutput::StdIn { .. }) => None,
                        Err(e) => Some(Err(CodetainerError::transport(e))),
                    }
                });

                Ok(ExecIo {
                    output: Box::pin(output),
                    input,
                })
            }
            StartExecResults::Detached => Err(CodetainerError::Runtime(format!(
                "exec {} was detached unexpectedly",
                exec_id
            ))),
        }
    }

    async fn resize_container_tty(&self, container_id: &str, tty: Tty) -> Result<()> {
        let options = ResizeContainerTtyOptions {
            width: tty.width,
            height: tty.height,
        };

        self.client
            .resize_container_tty(container_id, options)
            .await
            .map_err(|e| runtime_error(&format!("container {}", container_id), e))
    }

    async fn upload_archive(&self, container_id: &str, dst_path: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: dst_path.to_string(),
            ..Default::default()
        };

        self.client
            .upload_to_container(container_id, Some(options), archive.into())
            .await
            .map_err(|e| runtime_error(&format!("container {}", container_id), e))
    }
}
