//! File listing and upload for codetainers
//!
//! Listings come from a helper command mounted into the container, which prints
//! one entry per line with a trailing `/` on directories. Uploads are packed
//! into a single-entry tar archive and extracted by the runtime.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::container::ExecGateway;
use crate::error::{CodetainerError, Result};
use crate::models::{FileKind, FileUploadBody, ShortFile};
use crate::runtime::ContainerRuntime;

pub struct FileService {
    runtime: Arc<dyn ContainerRuntime>,
    gateway: Arc<ExecGateway>,
    files_command: String,
}

/// Join a directory and an entry name with exactly one separator
fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Parse listing output into entries, preserving order
pub fn parse_listing(output: &[u8], dir: &str) -> Result<Vec<ShortFile>> {
    let text = std::str::from_utf8(output)
        .map_err(|e| CodetainerError::Parse(format!("listing is not valid UTF-8: {}", e)))?;

    let mut files = Vec::new();
    for (index, line) in text.split('\n').enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            continue;
        }

        let (name, kind) = match line.strip_suffix('/') {
            Some(name) => (name, FileKind::Directory),
            None => (line, FileKind::File),
        };

        if name.is_empty() {
            return Err(CodetainerError::Parse(format!("line {}: empty entry name", index + 1)));
        }
        if name.contains('\0') {
            return Err(CodetainerError::Parse(format!("line {}: NUL byte in entry name", index + 1)));
        }
        if name.contains('/') {
            return Err(CodetainerError::Parse(format!(
                "line {}: unexpected '/' in entry {:?}",
                index + 1,
                name
            )));
        }

        files.push(ShortFile {
            name: name.to_string(),
            path: join_path(dir, name),
            kind,
        });
    }

    Ok(files)
}

/// Reduce an uploaded file name to a safe base name
fn base_name(filename: &str) -> Result<&str> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match name {
        "" | "." | ".." => Err(CodetainerError::validation(format!(
            "invalid file name {:?}",
            filename
        ))),
        name => Ok(name),
    }
}

/// Single-entry tar archive holding `contents` under `name`
fn build_archive(name: &str, contents: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, contents)?;
    builder.into_inner()
}

impl FileService {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, gateway: Arc<ExecGateway>, files_command: String) -> Self {
        Self {
            runtime,
            gateway,
            files_command,
        }
    }

    pub async fn list_files(&self, container_id: &str, path: Option<&str>) -> Result<Vec<ShortFile>> {
        let path = match path.map(str::trim) {
            Some(path) if !path.is_empty() => path,
            _ => return Err(CodetainerError::validation("path is required")),
        };

        let argv = vec![self.files_command.clone(), "--path".to_string(), path.to_string()];
        let capture = self.gateway.execute(container_id, &argv).await?;

        parse_listing(&capture.stdout, path)
    }

    /// Upload `contents` as `dst_path/<base name of filename>`
    pub async fn upload(
        &self,
        container_id: &str,
        filename: &str,
        contents: &[u8],
        dst_path: Option<&str>,
    ) -> Result<FileUploadBody> {
        let dst_path = match dst_path.map(str::trim) {
            Some(dst) if !dst.is_empty() => dst,
            _ => return Err(CodetainerError::validation("dst_path is required")),
        };
        let name = base_name(filename)?;

        let archive = build_archive(name, contents)
            .map_err(|e| CodetainerError::Transport(format!("build upload archive: {}", e)))?;

        let mut hasher = Sha256::new();
        hasher.update(contents);
        let checksum = format!("{:x}", hasher.finalize());

        self.runtime.upload_archive(container_id, dst_path, archive).await?;

        let path = join_path(dst_path, name);
        info!(
            container_id = %container_id,
            path = %path,
            size_bytes = contents.len(),
            "File uploaded"
        );

        Ok(FileUploadBody {
            success: true,
            path,
            size_bytes: contents.len() as u64,
            checksum,
        })
    }
}
