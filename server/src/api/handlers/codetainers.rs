//! Codetainer lifecycle handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, Path, State},
    Form, Json,
};

use crate::api::ApiError;
use crate::models::{CodetainerBody, CodetainerListBody, CreateCodetainerRequest};
use crate::AppState;

pub async fn list_codetainers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CodetainerListBody>, ApiError> {
    let codetainers = state.lifecycle.list().await?;
    Ok(Json(CodetainerListBody { codetainers }))
}

pub async fn create_codetainer(
    State(state): State<Arc<AppState>>,
    form: Result<Form<CreateCodetainerRequest>, FormRejection>,
) -> Result<Json<CodetainerBody>, ApiError> {
    let Form(request) = form?;
    let codetainer = state.lifecycle.create(&request).await?;
    Ok(Json(CodetainerBody { codetainer }))
}

pub async fn start_codetainer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CodetainerBody>, ApiError> {
    let codetainer = state.lifecycle.start(&id).await?;
    Ok(Json(CodetainerBody { codetainer }))
}

pub async fn stop_codetainer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CodetainerBody>, ApiError> {
    let codetainer = state.lifecycle.stop(&id).await?;
    Ok(Json(CodetainerBody { codetainer }))
}
