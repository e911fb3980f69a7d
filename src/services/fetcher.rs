// src/services/fetcher.rs

//! Bulk fetcher: one upstream request for a batch of regions.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{Observation, ObservationMap, ObservationSource, RegionRegistry};
use crate::services::series::{self, SeriesId};
use crate::services::source::{DataPoint, SeriesRequest, SeriesSource, YearRange};

pub const NO_DATA_AVAILABLE: &str = "no data available";
pub const NO_DATA_RETURNED: &str = "no data returned";
pub const REGION_NOT_FOUND: &str = "region not found in registry";

/// A requested region with no registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRegion {
    pub region: String,
    pub registry: String,
}

/// Observations for one batch plus the regions that could not be resolved.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub observations: ObservationMap,
    pub unresolved: Vec<UnresolvedRegion>,
    /// Why the request failed, when it did
    pub error: Option<String>,
}

impl FetchOutcome {
    /// Outcome where every requested region carries the same failure.
    pub fn failed(regions: &[String], unresolved: Vec<UnresolvedRegion>, reason: &str) -> Self {
        let observations = regions
            .iter()
            .map(|name| (name.clone(), Observation::error(name.as_str(), reason)))
            .collect();
        Self {
            observations,
            unresolved,
            error: Some(reason.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Fetches the latest observation for a batch of regions in one request.
pub struct BulkFetcher {
    source: Arc<dyn SeriesSource>,
    registry: Arc<RegionRegistry>,
}

impl BulkFetcher {
    pub fn new(source: Arc<dyn SeriesSource>, registry: Arc<RegionRegistry>) -> Self {
        Self { source, registry }
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    /// Map region names to series ids, setting aside names the registry lacks.
    pub fn resolve(&self, regions: &[String]) -> (Vec<(String, SeriesId)>, Vec<UnresolvedRegion>) {
        let mut resolved = Vec::with_capacity(regions.len());
        let mut unresolved = Vec::new();

        for name in regions {
            match self.registry.name_to_id(name) {
                Some(area_id) => resolved.push((name.clone(), series::build(area_id))),
                None => {
                    log::warn!(
                        "Area id not found for region '{}' in registry '{}'",
                        name,
                        self.registry.name()
                    );
                    unresolved.push(UnresolvedRegion {
                        region: name.clone(),
                        registry: self.registry.name().to_string(),
                    });
                }
            }
        }

        (resolved, unresolved)
    }

    /// Fetch one batch, failing on transport errors or an upstream rejection.
    ///
    /// On success every input region has exactly one observation.
    pub async fn try_fetch(&self, regions: &[String], years: YearRange) -> Result<FetchOutcome> {
        let (resolved, unresolved) = self.resolve(regions);
        self.request(regions, resolved, unresolved, years).await
    }

    async fn request(
        &self,
        regions: &[String],
        resolved: Vec<(String, SeriesId)>,
        unresolved: Vec<UnresolvedRegion>,
        years: YearRange,
    ) -> Result<FetchOutcome> {
        if resolved.is_empty() {
            return Err(AppError::NoResolvableRegions {
                count: regions.len(),
            });
        }

        let request = SeriesRequest::new(
            resolved.iter().map(|(_, id)| id.to_string()).collect(),
            years,
        );
        log::info!("Requesting {} series from upstream", request.series_ids.len());

        let response = self.source.fetch_series(&request).await?;
        if !response.succeeded() {
            let message = response.message_text();
            return Err(AppError::UpstreamRejected {
                status: response.status,
                message: if message.is_empty() {
                    "Unknown error".to_string()
                } else {
                    message
                },
            });
        }

        let requested: HashSet<&str> = resolved.iter().map(|(name, _)| name.as_str()).collect();
        let mut observations = ObservationMap::new();

        for unresolved_region in &unresolved {
            observations.insert(
                unresolved_region.region.clone(),
                Observation::error(unresolved_region.region.as_str(), REGION_NOT_FOUND),
            );
        }

        for series in &response.results.series {
            let Some(name) = series::extract_area_id(&series.series_id)
                .and_then(|area_id| self.registry.id_to_name(area_id.as_str()))
                .filter(|name| requested.contains(name))
            else {
                log::debug!("Ignoring unrequested series {}", series.series_id);
                continue;
            };
            if observations.contains_key(name) {
                continue;
            }

            let observation = match series.data.first() {
                Some(point) => observation_from_point(name, &series.series_id, point),
                None => {
                    log::warn!("No data points for '{}' ({})", name, series.series_id);
                    Observation::error(name, NO_DATA_AVAILABLE)
                }
            };
            observations.insert(name.to_string(), observation);
        }

        for (name, series_id) in &resolved {
            if !observations.contains_key(name) {
                log::warn!("Series {} for '{}' missing from response", series_id, name);
                observations.insert(name.clone(), Observation::error(name.as_str(), NO_DATA_RETURNED));
            }
        }

        Ok(FetchOutcome {
            observations,
            unresolved,
            error: None,
        })
    }

    /// Fetch one batch, converting any failure into ERROR observations.
    ///
    /// Regions are resolved once; a failed outcome carries the same
    /// unresolved list a successful one would.
    pub async fn fetch(&self, regions: &[String], years: YearRange) -> FetchOutcome {
        let (resolved, unresolved) = self.resolve(regions);
        match self
            .request(regions, resolved, unresolved.clone(), years)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                log::error!("Bulk fetch of {} region(s) failed: {}", regions.len(), error);
                FetchOutcome::failed(regions, unresolved, &error.to_string())
            }
        }
    }
}

/// Build an observation from the newest data point of a series.
fn observation_from_point(region: &str, series_id: &str, point: &DataPoint) -> Observation {
    let raw = point.value.trim().replace(',', "");
    match raw.parse::<u64>() {
        Ok(value) => Observation {
            region: region.to_string(),
            value: Some(value),
            period: Some(point.period.clone()),
            year: Some(point.year.clone()),
            period_name: point.period_name.clone(),
            observed_at: Utc::now(),
            source: ObservationSource::Upstream,
            error: None,
            series_id: Some(series_id.to_string()),
        },
        Err(_) => Observation::error(region, format!("invalid value '{}'", point.value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AreaId, Region};
    use crate::services::mock::{MockFailure, MockSource};

    fn registry(entries: &[(&str, &str)]) -> Arc<RegionRegistry> {
        let regions = entries
            .iter()
            .map(|(name, id)| Region {
                name: name.to_string(),
                area_id: AreaId::parse(id).unwrap(),
            })
            .collect();
        Arc::new(RegionRegistry::new("test", regions).unwrap())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_denver_upstream_observation() {
        let source = Arc::new(MockSource::new([("08031", 453_195)]).with_period("M08", "2025", "August"));
        let fetcher = BulkFetcher::new(source.clone(), registry(&[("Denver", "08031")]));

        let outcome = fetcher
            .try_fetch(&names(&["Denver"]), YearRange::current())
            .await
            .unwrap();

        let denver = &outcome.observations["Denver"];
        assert_eq!(denver.value, Some(453_195));
        assert_eq!(denver.source, ObservationSource::Upstream);
        assert_eq!(denver.period.as_deref(), Some("M08"));
        assert_eq!(denver.year.as_deref(), Some("2025"));
        assert_eq!(denver.series_id.as_deref(), Some("LAUCN080310000000006"));
        assert_eq!(source.requests()[0].series_ids, vec!["LAUCN080310000000006"]);
    }

    #[tokio::test]
    async fn test_unresolved_region_is_skipped_not_fatal() {
        let source = Arc::new(MockSource::new([("08031", 1_000)]));
        let fetcher = BulkFetcher::new(source.clone(), registry(&[("Denver", "08031")]));

        let outcome = fetcher
            .try_fetch(&names(&["Denver", "Gotham"]), YearRange::current())
            .await
            .unwrap();

        assert_eq!(outcome.observations.len(), 2);
        assert_eq!(outcome.observations["Denver"].value, Some(1_000));
        assert_eq!(
            outcome.observations["Gotham"].error.as_deref(),
            Some(REGION_NOT_FOUND)
        );
        assert_eq!(outcome.unresolved.len(), 1);
        assert_eq!(outcome.unresolved[0].region, "Gotham");
        assert_eq!(source.requests()[0].series_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_all_unresolved_fails_without_request() {
        let source = Arc::new(MockSource::new([("08031", 1_000)]));
        let fetcher = BulkFetcher::new(source.clone(), registry(&[("Denver", "08031")]));

        let err = fetcher
            .try_fetch(&names(&["Gotham"]), YearRange::current())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NoResolvableRegions { count: 1 }));
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_series_and_missing_series() {
        let source = Arc::new(MockSource::new([("08031", 1_000)]).with_empty("08001"));
        let fetcher = BulkFetcher::new(
            source,
            registry(&[("Denver", "08031"), ("Adams", "08001"), ("Weld", "08123")]),
        );

        let outcome = fetcher
            .try_fetch(&names(&["Denver", "Adams", "Weld"]), YearRange::current())
            .await
            .unwrap();

        assert_eq!(outcome.observations["Adams"].error.as_deref(), Some(NO_DATA_AVAILABLE));
        assert_eq!(outcome.observations["Weld"].error.as_deref(), Some(NO_DATA_RETURNED));
        assert_eq!(outcome.observations["Adams"].source, ObservationSource::Error);
    }

    #[tokio::test]
    async fn test_rejection_covers_every_requested_region() {
        let source = Arc::new(
            MockSource::new([("08031", 1_000)])
                .fail_always(MockFailure::Rejected("threshold reached".into())),
        );
        let fetcher = BulkFetcher::new(source, registry(&[("Denver", "08031")]));
        let regions = names(&["Denver", "Gotham"]);

        let err = fetcher
            .try_fetch(&regions, YearRange::current())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UpstreamRejected { .. }));

        let outcome = fetcher.fetch(&regions, YearRange::current()).await;
        assert_eq!(outcome.observations.len(), 2);
        assert!(outcome
            .observations
            .values()
            .all(|o| o.source == ObservationSource::Error));
        assert_eq!(outcome.unresolved.len(), 1);
        assert!(outcome.is_failed());
        assert!(outcome.error.unwrap().contains("threshold reached"));
    }

    #[tokio::test]
    async fn test_successful_fetch_is_not_failed() {
        let source = Arc::new(MockSource::new([("08031", 1_000)]));
        let fetcher = BulkFetcher::new(source, registry(&[("Denver", "08031")]));

        let outcome = fetcher
            .fetch(&names(&["Denver", "Gotham"]), YearRange::current())
            .await;
        assert!(!outcome.is_failed());
        assert_eq!(outcome.unresolved.len(), 1);
    }

    #[test]
    fn test_invalid_value_yields_error_observation() {
        let point = DataPoint {
            value: "-".into(),
            period: "M08".into(),
            year: "2025".into(),
            period_name: None,
        };
        let obs = observation_from_point("Denver", "LAUCN080310000000006", &point);
        assert_eq!(obs.source, ObservationSource::Error);
        assert_eq!(obs.error.as_deref(), Some("invalid value '-'"));

        let point = DataPoint {
            value: "1,234".into(),
            ..point
        };
        let obs = observation_from_point("Denver", "LAUCN080310000000006", &point);
        assert_eq!(obs.value, Some(1_234));
    }
}
