//! Storage abstractions for geometry documents and cached results.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── config.toml                    # Pipeline configuration
//! ├── cache.json                     # Persisted result cache
//! └── data/
//!     ├── counties.json              # Original geometry (read-only)
//!     └── counties.merged.json       # Merged geometry (rewritten per update)
//! ```

pub mod cache;
pub mod local;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{DatasetConfig, GeometryDocument, ResultSet};

// Re-export for convenience
pub use cache::{ResultCache, Stamped, default_ttl};
pub use local::LocalStorage;

/// Trait for dataset storage backends.
#[async_trait]
pub trait DatasetStorage: Send + Sync {
    /// Load the original, unmerged geometry document.
    async fn load_original(&self, dataset: &DatasetConfig) -> Result<GeometryDocument>;

    /// Load the last merged document, if one was written.
    async fn load_merged(&self, dataset: &DatasetConfig) -> Result<Option<GeometryDocument>>;

    /// Replace the merged document. A failed write leaves the previous one intact.
    async fn write_merged(&self, dataset: &DatasetConfig, document: &GeometryDocument)
    -> Result<()>;

    /// Load persisted result sets, if any.
    async fn load_cache(&self) -> Result<Option<ResultCache<ResultSet>>>;

    /// Persist result sets.
    async fn save_cache(&self, cache: &ResultCache<ResultSet>) -> Result<()>;
}
