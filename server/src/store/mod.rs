//! Persistent metadata storage
//!
//! Image and codetainer registries behind [`CodetainerStore`]. The shipped
//! implementation keeps both registries in one JSON document on disk.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{CodetainerError, Result};
use crate::models::{Codetainer, CodetainerImage, CodetainerStatus};

#[async_trait]
pub trait CodetainerStore: Send + Sync {
    async fn list_images(&self) -> Result<Vec<CodetainerImage>>;

    /// Find an image by id or by `name:tag` reference
    async fn find_image(&self, id_or_reference: &str) -> Result<Option<CodetainerImage>>;

    /// Register an image; an already registered id returns the stored record
    async fn insert_image(&self, image: CodetainerImage) -> Result<CodetainerImage>;

    /// Resolve by id first, then by name
    async fn lookup_codetainer(&self, id_or_name: &str) -> Result<Option<Codetainer>>;

    async fn list_codetainers(&self) -> Result<Vec<Codetainer>>;

    /// Fails with Conflict when the id or name is already taken by any record
    async fn insert_codetainer(&self, codetainer: Codetainer) -> Result<()>;

    async fn update_status(&self, id: &str, status: CodetainerStatus) -> Result<Codetainer>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Database {
    #[serde(default)]
    images: Vec<CodetainerImage>,
    #[serde(default)]
    codetainers: Vec<Codetainer>,
}

/// JSON-file backed store
pub struct JsonStore {
    database: RwLock<Database>,
    file_path: Option<PathBuf>,
}

impl JsonStore {
    /// Open (or create) `codetainer.json` under `data_dir`
    pub async fn open(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let file_path = data_dir.join("codetainer.json");

        let database = if file_path.exists() {
            let content = tokio::fs::read_to_string(&file_path)
                .await
                .context("Failed to read codetainer database")?;
            serde_json::from_str(&content).context("Failed to parse codetainer database")?
        } else {
            Database::default()
        };

        info!(
            path = %file_path.display(),
            images = database.images.len(),
            codetainers = database.codetainers.len(),
            "Codetainer database loaded"
        );

        Ok(Self {
            database: RwLock::new(database),
            file_path: Some(file_path),
        })
    }

    /// Store that never touches the disk
    pub fn in_memory() -> Self {
        Self {
            database: RwLock::new(Database::default()),
            file_path: None,
        }
    }

    /// Write through a temp file so a crash never leaves a truncated document
    async fn save(&self, db: &Database) -> Result<()> {
        let Some(ref file_path) = self.file_path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(db)
            .map_err(|e| CodetainerError::Storage(format!("serialize database: {}", e)))?;

        let tmp_path = file_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| CodetainerError::Storage(format!("write {}: {}", tmp_path.display(), e)))?;
        tokio::fs::rename(&tmp_path, file_path)
            .await
            .map_err(|e| CodetainerError::Storage(format!("rename {}: {}", file_path.display(), e)))?;

        debug!(path = %file_path.display(), "Codetainer database saved");
        Ok(())
    }
}

#[async_trait]
impl CodetainerStore for JsonStore {
    async fn list_images(&self) -> Result<Vec<CodetainerImage>> {
        Ok(self.database.read().await.images.clone())
    }

    async fn find_image(&self, id_or_reference: &str) -> Result<Option<CodetainerImage>> {
        let db = self.database.read().await;
        let found = db
            .images
            .iter()
            .find(|image| image.id == id_or_reference)
            .or_else(|| db.images.iter().find(|image| image.reference() == id_or_reference));
        Ok(found.cloned())
    }

    async fn insert_image(&self, image: CodetainerImage) -> Result<CodetainerImage> {
        let mut db = self.database.write().await;
        if let Some(existing) = db.images.iter().find(|existing| existing.id == image.id) {
            return Ok(existing.clone());
        }

        db.images.push(image.clone());
        self.save(&db).await?;
        Ok(image)
    }

    async fn lookup_codetainer(&self, id_or_name: &str) -> Result<Option<Codetainer>> {
        let db = self.database.read().await;
        let found = db
            .codetainers
            .iter()
            .find(|c| c.id == id_or_name)
            .or_else(|| db.codetainers.iter().find(|c| c.name == id_or_name));
        Ok(found.cloned())
    }

    async fn list_codetainers(&self) -> Result<Vec<Codetainer>> {
        Ok(self.database.read().await.codetainers.clone())
    }

    async fn insert_codetainer(&self, codetainer: Codetainer) -> Result<()> {
        let mut db = self.database.write().await;
        let keys = [codetainer.id.as_str(), codetainer.name.as_str()];
        if db
            .codetainers
            .iter()
            .any(|c| keys.contains(&c.id.as_str()) || keys.contains(&c.name.as_str()))
        {
            return Err(CodetainerError::Conflict(format!(
                "codetainer {} already exists",
                codetainer.name
            )));
        }

        db.codetainers.push(codetainer);
        self.save(&db).await
    }

    async fn update_status(&self, id: &str, status: CodetainerStatus) -> Result<Codetainer> {
        let mut db = self.database.write().await;
        let record = db
            .codetainers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| CodetainerError::NotFound(format!("codetainer {}", id)))?;

        record.status = status;
        record.updated_at = Utc::now();
        let updated = record.clone();

        self.save(&db).await?;
        Ok(updated)
    }
}
