// src/pipeline/merge.rs

//! Dataset merger.
//!
//! Patches observations into the `properties` bag of matching geometries.
//! The merger owns only the `total_jobs` / `jobs_*` keys; everything else on
//! a geometry passes through as-is. The owned keys are a pure function of the
//! observation, so merging the same result set again changes nothing.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::{
    GeometryDocument, Observation, ObservationMap, ObservationSource, RegionRegistry,
    geometry_identifiers,
};
use crate::services::FallbackEstimator;
use crate::services::fetcher::NO_DATA_AVAILABLE;

pub const TOTAL_JOBS: &str = "total_jobs";
pub const JOBS_DATA_SOURCE: &str = "jobs_data_source";
pub const JOBS_LAST_UPDATED: &str = "jobs_last_updated";
pub const JOBS_PERIOD: &str = "jobs_period";
pub const JOBS_PERIOD_NAME: &str = "jobs_period_name";
pub const JOBS_YEAR: &str = "jobs_year";
pub const JOBS_ERROR: &str = "jobs_error";

/// Merged document plus what happened to it.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub document: GeometryDocument,
    pub upstream: usize,
    pub estimated: usize,
    /// Geometry identifiers with no matching observation
    pub unmatched: Vec<String>,
}

impl MergeOutcome {
    pub fn matched(&self) -> usize {
        self.upstream + self.estimated
    }
}

/// Applies an observation map onto one geometry collection.
#[derive(Debug, Clone)]
pub struct DatasetMerger {
    collection: String,
    estimator: FallbackEstimator,
    registry: Option<Arc<RegionRegistry>>,
}

impl DatasetMerger {
    pub fn new(collection: impl Into<String>, estimator: FallbackEstimator) -> Self {
        Self {
            collection: collection.into(),
            estimator,
            registry: None,
        }
    }

    /// Reconcile geometry ids that are area ids through this registry.
    pub fn with_registry(mut self, registry: Arc<RegionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Merge observations into a copy of `document`.
    ///
    /// The input is left untouched. Geometries without a matching observation
    /// are carried over unchanged.
    pub fn merge(
        &self,
        document: &GeometryDocument,
        observations: &ObservationMap,
    ) -> Result<MergeOutcome> {
        let mut merged = document.clone();
        let mut upstream = 0;
        let mut estimated = 0;
        let mut unmatched = Vec::new();

        for geometry in merged.geometries_mut(&self.collection)?.iter_mut() {
            let identifiers = geometry_identifiers(geometry);
            let Some(observation) = self.find_observation(&identifiers, observations) else {
                unmatched.push(identifiers.into_iter().next().unwrap_or_default());
                continue;
            };

            let Some(object) = geometry.as_object_mut() else {
                continue;
            };
            let properties = object
                .entry("properties")
                .or_insert_with(|| Value::Object(Map::new()));
            if !properties.is_object() {
                *properties = Value::Object(Map::new());
            }
            let Some(properties) = properties.as_object_mut() else {
                continue;
            };

            match self.apply(properties, observation) {
                ObservationSource::Upstream => upstream += 1,
                _ => estimated += 1,
            }
        }

        if !unmatched.is_empty() {
            log::debug!(
                "{} geometries in '{}' had no observation",
                unmatched.len(),
                self.collection
            );
        }

        Ok(MergeOutcome {
            document: merged,
            upstream,
            estimated,
            unmatched,
        })
    }

    fn find_observation<'a>(
        &self,
        identifiers: &[String],
        observations: &'a ObservationMap,
    ) -> Option<&'a Observation> {
        identifiers.iter().find_map(|id| {
            observations.get(id).or_else(|| {
                self.registry
                    .as_ref()
                    .and_then(|registry| registry.id_to_name(id))
                    .and_then(|name| observations.get(name))
            })
        })
    }

    /// Write the owned keys for one observation; returns the source written.
    fn apply(&self, properties: &mut Map<String, Value>, observation: &Observation) -> ObservationSource {
        let source = match observation.value {
            Some(value) => {
                properties.insert(TOTAL_JOBS.into(), Value::from(value));
                properties.remove(JOBS_ERROR);
                match observation.source {
                    ObservationSource::Estimated => ObservationSource::Estimated,
                    _ => ObservationSource::Upstream,
                }
            }
            None => {
                let estimate = self.estimator.estimate(&observation.region);
                let reason = observation.error.as_deref().unwrap_or(NO_DATA_AVAILABLE);
                properties.insert(TOTAL_JOBS.into(), Value::from(estimate));
                properties.insert(JOBS_ERROR.into(), Value::from(reason));
                ObservationSource::Estimated
            }
        };

        properties.insert(JOBS_DATA_SOURCE.into(), Value::from(source.as_str()));
        properties.insert(
            JOBS_LAST_UPDATED.into(),
            Value::from(observation.observed_at.to_rfc3339()),
        );
        set_or_remove(properties, JOBS_PERIOD, observation.period.as_deref());
        set_or_remove(properties, JOBS_YEAR, observation.year.as_deref());
        set_or_remove(properties, JOBS_PERIOD_NAME, observation.period_name.as_deref());

        source
    }
}

fn set_or_remove(properties: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    match value {
        Some(value) => {
            properties.insert(key.into(), Value::from(value));
        }
        None => {
            properties.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn document() -> GeometryDocument {
        GeometryDocument::from_value(json!({
            "type": "Topology",
            "arcs": [[0, 1]],
            "objects": { "counties": { "geometries": [
                { "id": "X", "type": "Polygon", "properties": { "name": "X County", "fill": "#eee" } },
                { "id": "Y", "type": "Polygon", "properties": { "name": "Y County" } },
                { "id": "08031", "type": "Polygon", "properties": { "name": "Denver County" } }
            ] } }
        }))
    }

    fn upstream(region: &str, value: u64) -> Observation {
        Observation {
            region: region.into(),
            value: Some(value),
            period: Some("M08".into()),
            year: Some("2025".into()),
            period_name: Some("August".into()),
            observed_at: Utc::now(),
            source: ObservationSource::Upstream,
            error: None,
            series_id: None,
        }
    }

    fn properties<'a>(doc: &'a GeometryDocument, index: usize) -> &'a Map<String, Value> {
        doc.geometries("counties").unwrap()[index]["properties"]
            .as_object()
            .unwrap()
    }

    #[test]
    fn test_null_value_uses_estimate_and_leaves_others() {
        let estimator = FallbackEstimator::new();
        let merger = DatasetMerger::new("counties", estimator.clone());
        let mut observations = ObservationMap::new();
        observations.insert("X".into(), Observation::error("X", "no data"));

        let original = document();
        let outcome = merger.merge(&original, &observations).unwrap();
        let x = properties(&outcome.document, 0);

        assert_eq!(x[TOTAL_JOBS], json!(estimator.estimate("X")));
        assert_eq!(x[JOBS_DATA_SOURCE], json!("ESTIMATED"));
        assert_eq!(x[JOBS_ERROR], json!("no data"));
        assert_eq!(x["fill"], json!("#eee"));
        assert_eq!(
            outcome.document.geometries("counties").unwrap()[1],
            original.geometries("counties").unwrap()[1]
        );
        assert_eq!(outcome.estimated, 1);
        assert_eq!(outcome.unmatched, vec!["Y", "08031"]);
        assert_eq!(original, document());
    }

    #[test]
    fn test_upstream_value_written() {
        let merger = DatasetMerger::new("counties", FallbackEstimator::new());
        let mut observations = ObservationMap::new();
        observations.insert("Y".into(), upstream("Y", 1_234));

        let outcome = merger.merge(&document(), &observations).unwrap();
        let y = properties(&outcome.document, 1);

        assert_eq!(y[TOTAL_JOBS], json!(1_234));
        assert_eq!(y[JOBS_DATA_SOURCE], json!("UPSTREAM"));
        assert_eq!(y[JOBS_PERIOD], json!("M08"));
        assert_eq!(y[JOBS_YEAR], json!("2025"));
        assert_eq!(y[JOBS_PERIOD_NAME], json!("August"));
        assert!(y.get(JOBS_ERROR).is_none());
        assert_eq!(outcome.upstream, 1);
        assert_eq!(outcome.matched(), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let merger = DatasetMerger::new("counties", FallbackEstimator::new());
        let mut observations = ObservationMap::new();
        observations.insert("X".into(), Observation::error("X", "no data"));
        observations.insert("Y".into(), upstream("Y", 99));

        let once = merger.merge(&document(), &observations).unwrap().document;
        let twice = merger.merge(&once, &observations).unwrap().document;

        assert_eq!(
            serde_json::to_vec(&once).unwrap(),
            serde_json::to_vec(&twice).unwrap()
        );
    }

    #[test]
    fn test_upstream_clears_previous_error() {
        let merger = DatasetMerger::new("counties", FallbackEstimator::new());
        let mut failed = ObservationMap::new();
        failed.insert("X".into(), Observation::error("X", "HTTP 503"));
        let estimated = merger.merge(&document(), &failed).unwrap().document;

        let mut fresh = ObservationMap::new();
        fresh.insert("X".into(), upstream("X", 7));
        let recovered = merger.merge(&estimated, &fresh).unwrap().document;
        let x = properties(&recovered, 0);

        assert_eq!(x[TOTAL_JOBS], json!(7));
        assert!(x.get(JOBS_ERROR).is_none());
    }

    #[test]
    fn test_area_id_reconciled_through_registry() {
        let merger = DatasetMerger::new("counties", FallbackEstimator::new())
            .with_registry(Arc::new(RegionRegistry::colorado()));
        let mut observations = ObservationMap::new();
        observations.insert("Denver".into(), upstream("Denver", 453_195));

        let outcome = merger.merge(&document(), &observations).unwrap();
        assert_eq!(properties(&outcome.document, 2)[TOTAL_JOBS], json!(453_195));
    }

    #[test]
    fn test_name_with_county_suffix_matches() {
        let merger = DatasetMerger::new("counties", FallbackEstimator::new());
        let doc = GeometryDocument::from_value(json!({
            "objects": { "counties": { "geometries": [
                { "properties": { "name": "Salt Lake County" } }
            ] } }
        }));
        let mut observations = ObservationMap::new();
        observations.insert("Salt Lake".into(), upstream("Salt Lake", 700_000));

        let outcome = merger.merge(&doc, &observations).unwrap();
        assert_eq!(properties(&outcome.document, 0)[TOTAL_JOBS], json!(700_000));
    }

    #[test]
    fn test_missing_collection_is_error() {
        let merger = DatasetMerger::new("states", FallbackEstimator::new());
        assert!(merger.merge(&document(), &ObservationMap::new()).is_err());
    }
}
