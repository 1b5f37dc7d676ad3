//! Terminal geometry handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, Path, State},
    Form, Json,
};

use crate::api::ApiError;
use crate::models::{ResizeTtyForm, TtyBody};
use crate::AppState;

pub async fn get_tty(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TtyBody>, ApiError> {
    let record = state.lifecycle.resolve(&id).await?;
    let tty = state.tty.geometry(&record.id).await?;
    Ok(Json(TtyBody { tty }))
}

pub async fn resize_tty(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    form: Result<Form<ResizeTtyForm>, FormRejection>,
) -> Result<Json<TtyBody>, ApiError> {
    let Form(form) = form?;
    let record = state.lifecycle.resolve(&id).await?;
    let tty = state
        .tty
        .resize(&record.id, form.height.as_deref(), form.width.as_deref())
        .await?;
    Ok(Json(TtyBody { tty }))
}
