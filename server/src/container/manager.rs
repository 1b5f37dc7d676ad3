//! Codetainer lifecycle management

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::{CodetainerError, Result};
use crate::metrics;
use crate::models::{
    Codetainer, CodetainerImage, CodetainerStatus, CreateCodetainerRequest, RegisterImageRequest,
};
use crate::runtime::{ContainerRuntime, ContainerSpec};
use crate::store::CodetainerStore;

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("codetainer name pattern is valid")
});

/// Creates, starts and stops codetainers and registers images
pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn CodetainerStore>,

    /// Bind mounts applied to every new container
    binds: Vec<String>,

    /// Command for new containers; image default when unset
    default_command: Option<Vec<String>>,

    stop_timeout: Duration,
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(CodetainerError::validation(format!("{} is required", field))),
    }
}

impl LifecycleManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, store: Arc<dyn CodetainerStore>, config: &AppConfig) -> Self {
        Self {
            runtime,
            store,
            binds: config.container_binds(),
            default_command: config.runtime.default_command.clone(),
            stop_timeout: config.stop_timeout(),
        }
    }

    /// Resolve a codetainer by id, then by name
    pub async fn resolve(&self, id_or_name: &str) -> Result<Codetainer> {
        self.store
            .lookup_codetainer(id_or_name)
            .await?
            .ok_or_else(|| CodetainerError::NotFound(format!("codetainer {}", id_or_name)))
    }

    /// Create a container from a registered image and persist its record
    pub async fn create(&self, request: &CreateCodetainerRequest) -> Result<Codetainer> {
        let name = required(&request.name, "name")?;
        let image_id = required(&request.image_id, "image_id")?;

        if !NAME_PATTERN.is_match(name) {
            return Err(CodetainerError::validation(format!(
                "invalid codetainer name {:?}: use letters, digits, '_', '.' or '-', starting with a letter or digit",
                name
            )));
        }

        let image = self
            .store
            .find_image(image_id)
            .await?
            .ok_or_else(|| CodetainerError::NotFound(format!("image {}", image_id)))?;

        if self.store.lookup_codetainer(name).await?.is_some() {
            return Err(CodetainerError::Conflict(format!("codetainer name {} is already in use", name)));
        }

        let spec = ContainerSpec {
            name: name.to_string(),
            image: image.reference(),
            command: self.default_command.clone(),
            binds: self.binds.clone(),
        };

        let container_id = match self.runtime.create_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                error!(name = %name, image = %spec.image, error = %e, "Failed to create container");
                metrics::record_lifecycle("create", false);
                return Err(e);
            }
        };

        let now = Utc::now();
        let codetainer = Codetainer {
            id: container_id,
            name: name.to_string(),
            image_id: image.id,
            status: CodetainerStatus::Created,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.store.insert_codetainer(codetainer.clone()).await {
            error!(container_id = %codetainer.id, error = %e, "Failed to persist codetainer, removing container");
            metrics::record_lifecycle("create", false);
            if let Err(cleanup) = self.runtime.remove_container(&codetainer.id).await {
                error!(
                    container_id = %codetainer.id,
                    error = %cleanup,
                    "Failed to remove unrecorded container"
                );
            }
            return Err(e);
        }

        metrics::record_lifecycle("create", true);
        info!(
            container_id = %codetainer.id,
            name = %codetainer.name,
            image = %spec.image,
            "Codetainer created"
        );

        Ok(codetainer)
    }

    pub async fn start(&self, id_or_name: &str) -> Result<Codetainer> {
        let record = self.resolve(id_or_name).await?;

        if let Err(e) = self.runtime.start_container(&record.id).await {
            metrics::record_lifecycle("start", false);
            return Err(e);
        }

        let updated = self.store.update_status(&record.id, CodetainerStatus::Running).await?;
        metrics::record_lifecycle("start", true);
        info!(container_id = %updated.id, name = %updated.name, "Codetainer started");

        Ok(updated)
    }

    pub async fn stop(&self, id_or_name: &str) -> Result<Codetainer> {
        let record = self.resolve(id_or_name).await?;

        if let Err(e) = self.runtime.stop_container(&record.id, self.stop_timeout).await {
            metrics::record_lifecycle("stop", false);
            return Err(e);
        }

        let updated = self.store.update_status(&record.id, CodetainerStatus::Stopped).await?;
        metrics::record_lifecycle("stop", true);
        info!(container_id = %updated.id, name = %updated.name, "Codetainer stopped");

        Ok(updated)
    }

    pub async fn list(&self) -> Result<Vec<Codetainer>> {
        self.store.list_codetainers().await
    }

    pub async fn list_images(&self) -> Result<Vec<CodetainerImage>> {
        self.store.list_images().await
    }

    /// Register an image present in the runtime; the tag defaults to `latest`
    pub async fn register_image(&self, request: &RegisterImageRequest) -> Result<CodetainerImage> {
        let name = required(&request.name, "name")?;
        let tag = match request.tag.as_deref().map(str::trim) {
            Some(tag) if !tag.is_empty() => tag,
            _ => "latest",
        };

        let reference = format!("{}:{}", name, tag);
        let id = self.runtime.image_id(&reference).await?;

        let image = self
            .store
            .insert_image(CodetainerImage {
                id,
                name: name.to_string(),
                tag: tag.to_string(),
                registered_at: Utc::now(),
            })
            .await?;

        info!(image_id = %image.id, reference = %reference, "Image registered");
        Ok(image)
    }
}
