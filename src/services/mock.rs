// src/services/mock.rs

//! In-process stand-in for the upstream API.
//!
//! Serves fixed employment figures keyed by area id, so the pipeline can run
//! while the real endpoint is rate limited. Failures can be scripted per call.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::RegionRegistry;
use crate::services::FallbackEstimator;
use crate::services::series;
use crate::services::source::{
    DataPoint, REQUEST_SUCCEEDED, SeriesData, SeriesRequest, SeriesResponse, SeriesResults,
    SeriesSource,
};

/// A scripted failure for one call.
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// Connection-level failure
    Transport(String),
    /// Non-success HTTP status
    Status(u16),
    /// Success HTTP status with a non-success envelope
    Rejected(String),
}

impl MockFailure {
    fn into_result(self) -> Result<SeriesResponse> {
        match self {
            MockFailure::Transport(message) => Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                message,
            ))),
            MockFailure::Status(status) => Err(AppError::UpstreamStatus { status }),
            MockFailure::Rejected(message) => Ok(SeriesResponse {
                status: "REQUEST_NOT_PROCESSED".into(),
                message: Value::Array(vec![Value::String(message)]),
                results: SeriesResults::default(),
            }),
        }
    }
}

/// Deterministic mock upstream.
pub struct MockSource {
    figures: HashMap<String, u64>,
    empty: HashSet<String>,
    period: (String, String, String),
    latency: Duration,
    failures: HashMap<usize, MockFailure>,
    always_fail: Option<MockFailure>,
    calls: AtomicUsize,
    requests: Mutex<Vec<SeriesRequest>>,
}

impl MockSource {
    /// Serve the given `(area id, value)` figures.
    pub fn new<K: Into<String>>(figures: impl IntoIterator<Item = (K, u64)>) -> Self {
        Self {
            figures: figures.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            empty: HashSet::new(),
            period: ("M10".into(), "2024".into(), "October".into()),
            latency: Duration::ZERO,
            failures: HashMap::new(),
            always_fail: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Serve estimator figures for every region of the given registries.
    pub fn from_registries<'a>(
        registries: impl IntoIterator<Item = &'a RegionRegistry>,
        estimator: &FallbackEstimator,
    ) -> Self {
        let figures: Vec<(String, u64)> = registries
            .into_iter()
            .flat_map(|registry| registry.regions().iter())
            .map(|region| {
                (
                    region.area_id.to_string(),
                    estimator.estimate(&region.name),
                )
            })
            .collect();
        Self::new(figures)
    }

    /// Return the series for this area with no data points.
    pub fn with_empty(mut self, area_id: impl Into<String>) -> Self {
        self.empty.insert(area_id.into());
        self
    }

    pub fn with_period(mut self, period: &str, year: &str, period_name: &str) -> Self {
        self.period = (period.into(), year.into(), period_name.into());
        self
    }

    /// Delay every response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the call with the given zero-based index.
    pub fn fail_on_call(mut self, call: usize, failure: MockFailure) -> Self {
        self.failures.insert(call, failure);
        self
    }

    pub fn fail_always(mut self, failure: MockFailure) -> Self {
        self.always_fail = Some(failure);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<SeriesRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn series_for(&self, series_id: &str) -> Option<SeriesData> {
        let area_id = series::extract_area_id(series_id)?;
        let key = area_id.as_str();

        if self.empty.contains(key) {
            return Some(SeriesData {
                series_id: series_id.to_string(),
                data: Vec::new(),
            });
        }

        let value = self.figures.get(key)?;
        let (period, year, period_name) = &self.period;
        Some(SeriesData {
            series_id: series_id.to_string(),
            data: vec![DataPoint {
                value: value.to_string(),
                period: period.clone(),
                year: year.clone(),
                period_name: Some(period_name.clone()),
            }],
        })
    }
}

#[async_trait]
impl SeriesSource for MockSource {
    async fn fetch_series(&self, request: &SeriesRequest) -> Result<SeriesResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(failure) = self
            .failures
            .get(&call)
            .or(self.always_fail.as_ref())
            .cloned()
        {
            log::debug!("Mock upstream: scripted failure on call {}", call);
            return failure.into_result();
        }

        let series = request
            .series_ids
            .iter()
            .filter_map(|id| self.series_for(id))
            .collect();

        Ok(SeriesResponse {
            status: REQUEST_SUCCEEDED.into(),
            message: Value::Array(Vec::new()),
            results: SeriesResults { series },
        })
    }
}
