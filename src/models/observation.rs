//! Observation and result-set data structures.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an observation's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservationSource {
    Upstream,
    Estimated,
    Error,
}

impl ObservationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationSource::Upstream => "UPSTREAM",
            ObservationSource::Estimated => "ESTIMATED",
            ObservationSource::Error => "ERROR",
        }
    }
}

/// Latest employment figure for one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub region: String,

    /// Employment level; `None` when no usable upstream value exists
    pub value: Option<u64>,

    /// Upstream period code (e.g. "M08")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,

    /// Human-readable period (e.g. "August")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_name: Option<String>,

    pub observed_at: DateTime<Utc>,

    pub source: ObservationSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Series the value was read from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
}

impl Observation {
    /// An ERROR observation carrying the failure reason.
    pub fn error(region: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            value: None,
            period: None,
            year: None,
            period_name: None,
            observed_at: Utc::now(),
            source: ObservationSource::Error,
            error: Some(message.into()),
            series_id: None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.value.is_some()
    }
}

/// Observations keyed by region name.
pub type ObservationMap = BTreeMap<String, Observation>;

/// One completed fetch: an observation per requested region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSet {
    pub observations: ObservationMap,
    pub fetched_at: DateTime<Utc>,
}

impl ResultSet {
    pub fn new(observations: ObservationMap) -> Self {
        Self {
            observations,
            fetched_at: Utc::now(),
        }
    }

    /// Number of observations with a usable value.
    pub fn usable_count(&self) -> usize {
        self.observations.values().filter(|o| o.is_usable()).count()
    }
}
