// src/services/source.rs

//! Upstream time-series API: wire types, the transport seam, and the
//! reqwest-backed client.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::UpstreamConfig;
use crate::utils::http::create_async_client;

/// Envelope status reported on success.
pub const REQUEST_SUCCEEDED: &str = "REQUEST_SUCCEEDED";

/// Inclusive year window for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    /// Last year through the current year.
    pub fn current() -> Self {
        let end = Utc::now().year();
        Self {
            start: end - 1,
            end,
        }
    }
}

/// Bulk request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRequest {
    #[serde(rename = "seriesid")]
    pub series_ids: Vec<String>,

    #[serde(rename = "startyear")]
    pub start_year: String,

    #[serde(rename = "endyear")]
    pub end_year: String,

    #[serde(
        rename = "registrationkey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub registration_key: Option<String>,
}

impl SeriesRequest {
    pub fn new(series_ids: Vec<String>, years: YearRange) -> Self {
        Self {
            series_ids,
            start_year: years.start.to_string(),
            end_year: years.end.to_string(),
            registration_key: None,
        }
    }
}

/// Bulk response envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesResponse {
    pub status: String,

    /// A string or a list of strings, depending on the endpoint version
    #[serde(default)]
    pub message: Value,

    #[serde(rename = "Results", default)]
    pub results: SeriesResults,
}

impl SeriesResponse {
    pub fn succeeded(&self) -> bool {
        self.status == REQUEST_SUCCEEDED
    }

    /// Upstream message flattened to one line.
    pub fn message_text(&self) -> String {
        match &self.message {
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; "),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesResults {
    #[serde(default)]
    pub series: Vec<SeriesData>,
}

/// One returned series, data points newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesData {
    #[serde(rename = "seriesID")]
    pub series_id: String,

    #[serde(default)]
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub value: String,
    pub period: String,
    pub year: String,

    #[serde(rename = "periodName", default, skip_serializing_if = "Option::is_none")]
    pub period_name: Option<String>,
}

/// Transport seam for bulk series requests.
///
/// Implementations fail only on transport or HTTP status problems; the
/// envelope status is judged by the caller.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn fetch_series(&self, request: &SeriesRequest) -> Result<SeriesResponse>;
}

/// reqwest client for the public time-series API.
pub struct BlsClient {
    client: Client,
    endpoint: String,
    registration_key: Option<String>,
}

impl BlsClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            endpoint: config.endpoint.clone(),
            registration_key: config.registration_key.clone(),
        })
    }
}

#[async_trait]
impl SeriesSource for BlsClient {
    async fn fetch_series(&self, request: &SeriesRequest) -> Result<SeriesResponse> {
        let body = SeriesRequest {
            registration_key: self.registration_key.clone(),
            ..request.clone()
        };

        log::debug!(
            "POST {} with {} series ({}-{})",
            self.endpoint,
            body.series_ids.len(),
            body.start_year,
            body.end_year
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
