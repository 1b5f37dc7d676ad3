//! Data models for the codetainer server
//!
//! This module defines stored records, request forms and typed response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Codetainer Models
// ============================================================================

/// A managed container plus its metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codetainer {
    /// Runtime container ID
    pub id: String,

    /// Human-readable name (alternate lookup key)
    pub name: String,

    /// Registered image the container was created from
    pub image_id: String,

    /// Lifecycle status
    pub status: CodetainerStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Codetainer lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodetainerStatus {
    Created,
    Running,
    Stopped,
}

/// Registered image reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodetainerImage {
    /// Runtime image ID
    pub id: String,

    /// Repository name, e.g. `ubuntu`
    pub name: String,

    pub tag: String,

    pub registered_at: DateTime<Utc>,
}

impl CodetainerImage {
    /// `name:tag` reference understood by the runtime
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

/// Form for creating a codetainer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateCodetainerRequest {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, alias = "imageId")]
    pub image_id: Option<String>,
}

/// Form for registering an image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterImageRequest {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodetainerBody {
    pub codetainer: Codetainer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodetainerListBody {
    pub codetainers: Vec<Codetainer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBody {
    pub image: CodetainerImage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageListBody {
    pub images: Vec<CodetainerImage>,
}

// ============================================================================
// Terminal Models
// ============================================================================

/// Terminal geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tty {
    pub height: u16,
    pub width: u16,
}

/// Resize form. Values stay raw strings so bad input maps to a validation error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResizeTtyForm {
    #[serde(default)]
    pub height: Option<String>,

    #[serde(default)]
    pub width: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtyBody {
    pub tty: Tty,
}

// ============================================================================
// File Models
// ============================================================================

/// Directory listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortFile {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

/// File type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// Query parameters for file listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilesQuery {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListBody {
    pub files: Vec<ShortFile>,
}

/// File upload response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadBody {
    pub success: bool,
    pub path: String,
    pub size_bytes: u64,
    pub checksum: String,
}

// ============================================================================
// Session Models
// ============================================================================

/// Interactive session information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub connection_id: Uuid,
    pub container_id: String,
    #[serde(default)]
    pub exec_id: Option<String>,
    pub state: SessionStatus,
    pub attached_at: DateTime<Utc>,
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Attaching,
    Attached,
    Closed,
}

/// Form for sending a command to a container terminal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendCommandForm {
    #[serde(default)]
    pub command: Option<String>,

    /// Open a one-off exec when no session is attached
    #[serde(default)]
    pub transient: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListBody {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachBody {
    pub success: bool,
    pub detached: bool,
}

/// Plain success flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessBody {
    pub success: bool,
}

impl SuccessBody {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

// ============================================================================
// System Models
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_sessions: u64,
    #[serde(default)]
    pub runtime_version: Option<String>,
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

// ============================================================================
// Error Models
// ============================================================================

/// Uniform error envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
