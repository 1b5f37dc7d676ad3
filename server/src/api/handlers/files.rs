//! File management handlers

use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::QueryRejection, Multipart, Path, Query, State,
    },
    Json,
};

use crate::api::ApiError;
use crate::error::CodetainerError;
use crate::models::{FileListBody, FileUploadBody, ListFilesQuery};
use crate::AppState;

/// List a directory inside the codetainer
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    query: Result<Query<ListFilesQuery>, QueryRejection>,
) -> Result<Json<FileListBody>, ApiError> {
    let Query(query) = query?;
    let record = state.lifecycle.resolve(&id).await?;
    let files = state.files.list_files(&record.id, query.path.as_deref()).await?;
    Ok(Json(FileListBody { files }))
}

/// Upload the `upload` part into `dst_path`
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<FileUploadBody>, ApiError> {
    let mut multipart = multipart?;
    let record = state.lifecycle.resolve(&id).await?;

    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut dst_path: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("upload") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                upload = Some((filename, data.to_vec()));
            }
            Some("dst_path") => {
                dst_path = Some(field.text().await?);
            }
            _ => {}
        }
    }

    let (filename, contents) =
        upload.ok_or_else(|| CodetainerError::validation("upload file part is required"))?;

    let body = state
        .files
        .upload(&record.id, &filename, &contents, dst_path.as_deref())
        .await?;

    Ok(Json(body))
}
