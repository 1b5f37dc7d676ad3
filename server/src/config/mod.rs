//! Configuration module for the codetainer server
//!
//! Supports configuration via:
//! - YAML/TOML config files
//! - Environment variables (with CODETAINER_ prefix)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for the JSON log file
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Directory holding the metadata database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Container engine settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// One-shot exec settings
    #[serde(default)]
    pub exec: ExecConfig,

    /// Interactive session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Container engine connection and creation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Engine socket path; local defaults when unset
    #[serde(default)]
    pub socket: Option<String>,

    /// Engine request timeout in seconds
    #[serde(default = "default_runtime_timeout")]
    pub timeout_seconds: u64,

    /// Grace period given to containers on stop
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,

    /// Host directory mounted read-only at /codetainer/utils
    #[serde(default)]
    pub utils_dir: Option<PathBuf>,

    /// Command for new containers; image default when unset
    #[serde(default)]
    pub default_command: Option<Vec<String>>,
}

/// One-shot exec configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Upper bound for a single one-shot command
    #[serde(default = "default_exec_timeout")]
    pub timeout_seconds: u64,

    /// Listing helper invoked with `--path <dir>`
    #[serde(default = "default_files_command")]
    pub files_command: String,
}

/// Interactive session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Command run by the interactive exec
    #[serde(default = "default_shell")]
    pub command: Vec<String>,

    /// How long a transient injection may drain output
    #[serde(default = "default_inject_timeout")]
    pub inject_timeout_seconds: u64,

    /// How long detach waits for the bridge to wind down
    #[serde(default = "default_detach_grace")]
    pub detach_grace_seconds: u64,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/codetainer")
}

fn default_runtime_timeout() -> u64 {
    120
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_exec_timeout() -> u64 {
    10
}

fn default_files_command() -> String {
    "/codetainer/utils/files".to_string()
}

fn default_shell() -> Vec<String> {
    vec!["/bin/sh".to_string()]
}

fn default_inject_timeout() -> u64 {
    5
}

fn default_detach_grace() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            socket: None,
            timeout_seconds: default_runtime_timeout(),
            stop_timeout_seconds: default_stop_timeout(),
            utils_dir: None,
            default_command: None,
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_exec_timeout(),
            files_command: default_files_command(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: default_shell(),
            inject_timeout_seconds: default_inject_timeout(),
            detach_grace_seconds: default_detach_grace(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            data_dir: default_data_dir(),
            runtime: RuntimeConfig::default(),
            exec: ExecConfig::default(),
            session: SessionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config/codetainer").required(false))
            .add_source(config::File::with_name("/etc/codetainer/config").required(false))
            // Override with environment variables (CODETAINER_ prefix)
            .add_source(
                config::Environment::with_prefix("CODETAINER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.exec.timeout_seconds == 0 {
            anyhow::bail!("Exec timeout cannot be 0");
        }

        if self.exec.files_command.trim().is_empty() {
            anyhow::bail!("Files command cannot be empty");
        }

        if self.session.command.is_empty() || self.session.command[0].is_empty() {
            anyhow::bail!("Session command cannot be empty");
        }

        if self.session.inject_timeout_seconds == 0 {
            anyhow::bail!("Inject timeout cannot be 0");
        }

        Ok(())
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec.timeout_seconds)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.stop_timeout_seconds)
    }

    /// Bind mounts applied to every new container
    pub fn container_binds(&self) -> Vec<String> {
        self.runtime
            .utils_dir
            .iter()
            .map(|dir| format!("{}:/codetainer/utils:ro", dir.display()))
            .collect()
    }
}
