// src/pipeline/orchestrator.rs

//! Update orchestrator.
//!
//! Decides between cached and fresh results, runs the batch scheduler per
//! dataset, merges into geometry documents, and persists the outcome.
//!
//! - `update_all`: refresh every dataset (no-op while another update runs)
//! - `force_refresh`: drop a dataset's cache entries, then update it
//! - `get_current_data`: merged document if fresh, else the original plus a
//!   background refresh
//! - `start_periodic`: re-check staleness on an interval

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{AppError, Result};
use crate::models::{
    Config, DatasetConfig, GeometryDocument, MergedDocument, RegionRegistry, ResultSet,
    ScheduleConfig,
};
use crate::pipeline::merge::DatasetMerger;
use crate::services::fetcher::UnresolvedRegion;
use crate::services::{BatchScheduler, BulkFetcher, FallbackEstimator, SeriesSource};
use crate::storage::{DatasetStorage, ResultCache};

/// A configured dataset with its registry built.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub config: DatasetConfig,
    pub registry: Arc<RegionRegistry>,
}

impl Dataset {
    pub fn from_config(config: &DatasetConfig) -> Result<Self> {
        Ok(Self {
            registry: Arc::new(config.registry()?),
            config: config.clone(),
        })
    }

    pub fn key(&self) -> &str {
        &self.config.key
    }
}

/// What to update.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Dataset keys; all datasets when `None`
    pub datasets: Option<Vec<String>>,
    /// Region subset; the full registry when `None`
    pub regions: Option<Vec<String>>,
    /// Ignore cached result sets
    pub force: bool,
}

impl UpdateRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn dataset(key: impl Into<String>) -> Self {
        Self {
            datasets: Some(vec![key.into()]),
            ..Self::default()
        }
    }

    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = Some(regions);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Per-dataset result of an update run.
#[derive(Debug, Clone, Default)]
pub struct DatasetReport {
    pub dataset: String,
    pub from_cache: bool,
    pub regions: usize,
    pub upstream: usize,
    pub estimated: usize,
    pub unmatched: usize,
    pub failed_batches: usize,
    pub unresolved: Vec<UnresolvedRegion>,
    pub error: Option<String>,
}

impl DatasetReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of an update call.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    Completed(Vec<DatasetReport>),
    /// Another update was already running
    Skipped,
}

impl UpdateOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, UpdateOutcome::Skipped)
    }

    pub fn reports(&self) -> &[DatasetReport] {
        match self {
            UpdateOutcome::Completed(reports) => reports,
            UpdateOutcome::Skipped => &[],
        }
    }
}

/// Status snapshot for health checks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub is_updating: bool,
    pub last_update_time: Option<DateTime<Utc>>,
    pub needs_update: bool,
    pub last_error: Option<String>,
}

/// Where a document returned by `get_current_data` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrigin {
    Cached,
    Original,
}

/// Document handed to a reader.
#[derive(Debug)]
pub struct CurrentData {
    pub document: GeometryDocument,
    pub origin: DataOrigin,
    /// Background refresh started for this read, if any
    pub refresh: Option<JoinHandle<()>>,
}

struct Inner {
    datasets: Vec<Dataset>,
    source: Arc<dyn SeriesSource>,
    storage: Arc<dyn DatasetStorage>,
    schedule: ScheduleConfig,
    estimator: FallbackEstimator,
    is_updating: AtomicBool,
    results: Mutex<ResultCache<ResultSet>>,
    merged: Mutex<ResultCache<MergedDocument>>,
    /// When each dataset's merged data was fetched, for full-registry updates
    fresh_as_of: Mutex<HashMap<String, DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

/// Clears the updating flag when dropped.
struct UpdatingGuard<'a>(&'a AtomicBool);

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Top-level driver; cheap to clone, clones share state.
#[derive(Clone)]
pub struct UpdateOrchestrator {
    inner: Arc<Inner>,
}

impl UpdateOrchestrator {
    /// Build an orchestrator around an injected result cache.
    pub fn new(
        config: &Config,
        source: Arc<dyn SeriesSource>,
        storage: Arc<dyn DatasetStorage>,
        cache: ResultCache<ResultSet>,
    ) -> Result<Self> {
        let datasets = config
            .datasets
            .iter()
            .map(Dataset::from_config)
            .collect::<Result<Vec<_>>>()?;
        let ttl = config.schedule.cache_ttl();

        Ok(Self {
            inner: Arc::new(Inner {
                datasets,
                source,
                storage,
                schedule: config.schedule.clone(),
                estimator: FallbackEstimator::new(),
                is_updating: AtomicBool::new(false),
                results: Mutex::new(cache.with_ttl(ttl)),
                merged: Mutex::new(ResultCache::new(ttl)),
                fresh_as_of: Mutex::new(HashMap::new()),
                last_error: Mutex::new(None),
            }),
        })
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.inner.datasets
    }

    fn dataset(&self, key: &str) -> Result<&Dataset> {
        self.inner
            .datasets
            .iter()
            .find(|d| d.key() == key)
            .ok_or_else(|| AppError::config(format!("unknown dataset '{key}'")))
    }

    fn try_begin(&self) -> Option<UpdatingGuard<'_>> {
        self.inner
            .is_updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| UpdatingGuard(&self.inner.is_updating))
    }

    /// Update every dataset.
    pub async fn update_all(&self) -> UpdateOutcome {
        self.run(self.inner.datasets.clone(), None, false).await
    }

    /// Drop every cache entry for a dataset, then update it synchronously.
    pub async fn force_refresh(&self, key: &str) -> Result<UpdateOutcome> {
        self.update(UpdateRequest::dataset(key).forced()).await
    }

    /// Run an update.
    ///
    /// Returns `Skipped` without touching any data when another update holds
    /// the flag. Per-dataset failures are logged, recorded as the last error
    /// and reported; the previous merged document stays in place.
    pub async fn update(&self, request: UpdateRequest) -> Result<UpdateOutcome> {
        let datasets: Vec<Dataset> = match &request.datasets {
            Some(keys) => keys
                .iter()
                .map(|key| self.dataset(key).cloned())
                .collect::<Result<_>>()?,
            None => self.inner.datasets.clone(),
        };
        Ok(self
            .run(datasets, request.regions.as_deref(), request.force)
            .await)
    }

    async fn run(
        &self,
        datasets: Vec<Dataset>,
        regions: Option<&[String]>,
        force: bool,
    ) -> UpdateOutcome {
        let Some(_guard) = self.try_begin() else {
            log::info!("Data update already in progress, skipping");
            return UpdateOutcome::Skipped;
        };

        log::info!("Starting data update for {} dataset(s)", datasets.len());

        let mut reports = Vec::with_capacity(datasets.len());
        for dataset in &datasets {
            // Subset updates leave the cached result set in place.
            if force && regions.is_none() {
                self.invalidate(dataset.key()).await;
            }

            let report = match self.update_dataset(dataset, regions, force).await {
                Ok(report) => report,
                Err(error) => {
                    log::error!("Update of '{}' failed: {}", dataset.key(), error);
                    log::info!("Continuing with existing data for '{}'", dataset.key());
                    *self.inner.last_error.lock().await =
                        Some(format!("{}: {}", dataset.key(), error));
                    DatasetReport {
                        dataset: dataset.key().to_string(),
                        error: Some(error.to_string()),
                        ..DatasetReport::default()
                    }
                }
            };
            reports.push(report);
        }

        if reports.iter().all(DatasetReport::succeeded) {
            *self.inner.last_error.lock().await = None;
            log::info!("Data update completed at {}", Utc::now().to_rfc3339());
        }

        UpdateOutcome::Completed(reports)
    }

    async fn invalidate(&self, key: &str) {
        self.inner.results.lock().await.invalidate(key);
        self.inner.merged.lock().await.invalidate(key);
        log::info!("Cleared cached data for '{}'", key);
    }

    async fn update_dataset(
        &self,
        dataset: &Dataset,
        regions: Option<&[String]>,
        force: bool,
    ) -> Result<DatasetReport> {
        let key = dataset.key();
        let mut report = DatasetReport {
            dataset: key.to_string(),
            ..DatasetReport::default()
        };

        let cached = if regions.is_none() && !force {
            self.inner.results.lock().await.get(key).cloned()
        } else {
            None
        };

        let result_set = match cached {
            Some(result_set) => {
                log::info!(
                    "Using cached results for '{}' from {}",
                    key,
                    result_set.fetched_at.to_rfc3339()
                );
                report.from_cache = true;
                result_set
            }
            None => {
                let names = regions
                    .map(<[String]>::to_vec)
                    .unwrap_or_else(|| dataset.registry.names());
                let scheduler = BatchScheduler::from_config(
                    BulkFetcher::new(
                        Arc::clone(&self.inner.source),
                        Arc::clone(&dataset.registry),
                    ),
                    &self.inner.schedule,
                );
                let outcome = scheduler.run(&names).await;
                report.failed_batches = outcome.failed_batches;
                report.unresolved = outcome.unresolved.clone();
                outcome.into_result_set()
            }
        };
        report.regions = result_set.observations.len();
        let fetched_at = result_set.fetched_at;

        if result_set.usable_count() == 0 {
            return Err(AppError::validation(format!(
                "no usable observations for '{key}', keeping existing data"
            )));
        }

        // A subset update patches the last merged document rather than the original.
        let base = match regions {
            Some(_) => match self.inner.storage.load_merged(&dataset.config).await? {
                Some(document) => document,
                None => self.inner.storage.load_original(&dataset.config).await?,
            },
            None => self.inner.storage.load_original(&dataset.config).await?,
        };

        let merger = DatasetMerger::new(&dataset.config.collection, self.inner.estimator.clone())
            .with_registry(Arc::clone(&dataset.registry));
        let merged = merger.merge(&base, &result_set.observations)?;
        self.inner
            .storage
            .write_merged(&dataset.config, &merged.document)
            .await?;

        report.upstream = merged.upstream;
        report.estimated = merged.estimated;
        report.unmatched = merged.unmatched.len();

        if regions.is_none() && !report.from_cache {
            let snapshot = {
                let mut results = self.inner.results.lock().await;
                results.put(key, result_set);
                results.clone()
            };
            if let Err(error) = self.inner.storage.save_cache(&snapshot).await {
                log::warn!("Failed to persist result cache: {}", error);
            }
        }
        self.inner
            .merged
            .lock()
            .await
            .put(key, MergedDocument::new(merged.document));
        if regions.is_none() {
            self.inner
                .fresh_as_of
                .lock()
                .await
                .insert(key.to_string(), fetched_at);
        }

        log::info!(
            "Updated '{}': {} upstream, {} estimated, {} unmatched geometries",
            key,
            report.upstream,
            report.estimated,
            report.unmatched
        );

        Ok(report)
    }

    /// Merged document if fresh; otherwise the original document, with a
    /// background refresh started for the dataset.
    ///
    /// The refresh outcome never reaches this caller; failures are logged and
    /// surface through [`status`](Self::status).
    pub async fn get_current_data(&self, key: &str) -> Result<CurrentData> {
        let dataset = self.dataset(key)?;

        if let Some(cached) = self.inner.merged.lock().await.get(key).cloned() {
            log::info!("Using merged data for '{}' from cache", key);
            return Ok(CurrentData {
                document: cached.document,
                origin: DataOrigin::Cached,
                refresh: None,
            });
        }

        log::info!("Using original data for '{}', triggering refresh", key);
        let document = self.inner.storage.load_original(&dataset.config).await?;

        let this = self.clone();
        let key = key.to_string();
        let refresh = tokio::spawn(async move {
            this.background_refresh(&key).await;
        });

        Ok(CurrentData {
            document,
            origin: DataOrigin::Original,
            refresh: Some(refresh),
        })
    }

    async fn background_refresh(&self, key: &str) {
        match self.update(UpdateRequest::dataset(key)).await {
            Ok(UpdateOutcome::Skipped) => {}
            Ok(UpdateOutcome::Completed(reports)) => {
                for report in reports.iter().filter(|r| !r.succeeded()) {
                    log::error!(
                        "Background refresh of '{}' failed: {}",
                        report.dataset,
                        report.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            Err(error) => {
                log::error!("Background refresh of '{}' failed: {}", key, error);
                *self.inner.last_error.lock().await = Some(format!("{key}: {error}"));
            }
        }
    }

    pub async fn status(&self) -> UpdateStatus {
        self.status_at(Utc::now()).await
    }

    /// `last_update_time` is the oldest full-registry fetch across all
    /// datasets, and stays `None` until every dataset has one.
    pub async fn status_at(&self, now: DateTime<Utc>) -> UpdateStatus {
        let last_update_time = self.last_update_time().await;
        let needs_update = match last_update_time {
            Some(last) => now.signed_duration_since(last) > self.inner.schedule.cache_ttl(),
            None => true,
        };
        UpdateStatus {
            is_updating: self.inner.is_updating.load(Ordering::Acquire),
            last_update_time,
            needs_update,
            last_error: self.inner.last_error.lock().await.clone(),
        }
    }

    async fn last_update_time(&self) -> Option<DateTime<Utc>> {
        let fresh_as_of = self.inner.fresh_as_of.lock().await;
        if self.inner.datasets.is_empty() {
            return None;
        }
        self.inner
            .datasets
            .iter()
            .map(|dataset| fresh_as_of.get(dataset.key()).copied())
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .min()
    }

    /// Check staleness every `refresh_interval` and update when needed.
    ///
    /// The first check runs immediately.
    pub fn start_periodic(&self) -> JoinHandle<()> {
        let this = self.clone();
        let period = self
            .inner
            .schedule
            .refresh_interval()
            .max(Duration::from_secs(1));

        log::info!("Periodic data updates enabled (every {:?})", period);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if this.status().await.needs_update {
                    log::info!("Scheduled data update starting");
                    this.update_all().await;
                }
            }
        })
    }
}
