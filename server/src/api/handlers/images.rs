//! Image registry handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, State},
    Form, Json,
};

use crate::api::ApiError;
use crate::models::{ImageBody, ImageListBody, RegisterImageRequest};
use crate::AppState;

pub async fn list_images(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ImageListBody>, ApiError> {
    let images = state.lifecycle.list_images().await?;
    Ok(Json(ImageListBody { images }))
}

pub async fn register_image(
    State(state): State<Arc<AppState>>,
    form: Result<Form<RegisterImageRequest>, FormRejection>,
) -> Result<Json<ImageBody>, ApiError> {
    let Form(request) = form?;
    let image = state.lifecycle.register_image(&request).await?;
    Ok(Json(ImageBody { image }))
}
