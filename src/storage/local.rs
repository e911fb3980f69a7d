//! Local filesystem storage implementation.
//!
//! Paths in dataset configuration are resolved against the storage root.
//! Every write goes to a temp file first and is renamed into place, so a
//! crash mid-write never leaves a half-written document behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::TimeDelta;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{DatasetConfig, GeometryDocument, ResultSet};
use crate::storage::{DatasetStorage, ResultCache, default_ttl};

const CACHE_KEY: &str = "cache.json";

/// Local filesystem storage backend.
#[derive(Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    cache_ttl: TimeDelta,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            cache_ttl: default_ttl(),
        }
    }

    /// TTL applied to caches loaded from disk.
    pub fn with_cache_ttl(mut self, ttl: TimeDelta) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: impl AsRef<Path>) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(
        &self,
        key: impl AsRef<Path>,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: impl AsRef<Path>) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: impl AsRef<Path>) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DatasetStorage for LocalStorage {
    async fn load_original(&self, dataset: &DatasetConfig) -> Result<GeometryDocument> {
        self.read_json(&dataset.source).await?.ok_or_else(|| {
            AppError::config(format!(
                "dataset '{}': geometry document not found at {}",
                dataset.key,
                self.path(&dataset.source).display()
            ))
        })
    }

    async fn load_merged(&self, dataset: &DatasetConfig) -> Result<Option<GeometryDocument>> {
        self.read_json(&dataset.output).await
    }

    async fn write_merged(
        &self,
        dataset: &DatasetConfig,
        document: &GeometryDocument,
    ) -> Result<()> {
        self.write_json(&dataset.output, document).await?;
        log::info!(
            "Merged document for '{}' written to {}",
            dataset.key,
            self.path(&dataset.output).display()
        );
        Ok(())
    }

    async fn load_cache(&self) -> Result<Option<ResultCache<ResultSet>>> {
        match self.read_bytes(CACHE_KEY).await? {
            Some(bytes) => Ok(Some(ResultCache::from_json(&bytes, self.cache_ttl)?)),
            None => Ok(None),
        }
    }

    async fn save_cache(&self, cache: &ResultCache<ResultSet>) -> Result<()> {
        self.write_bytes(CACHE_KEY, &cache.to_json()?).await
    }
}
