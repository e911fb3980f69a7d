// src/services/scheduler.rs

//! Batch scheduler.
//!
//! Splits a region list into contiguous batches and fetches them strictly one
//! after another, pausing between batches to stay under the upstream rate
//! limit. A failed batch is recorded as ERROR observations and the run
//! carries on.

use std::time::Duration;

use crate::models::{MAX_BATCH_SIZE, ObservationMap, ResultSet, ScheduleConfig};
use crate::services::fetcher::{BulkFetcher, UnresolvedRegion};
use crate::services::source::YearRange;

/// Aggregate result of a scheduled run.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOutcome {
    /// Exactly one observation per requested region
    pub observations: ObservationMap,
    pub unresolved: Vec<UnresolvedRegion>,
    pub batches: usize,
    pub failed_batches: usize,
}

impl ScheduleOutcome {
    pub fn usable_count(&self) -> usize {
        self.observations.values().filter(|o| o.is_usable()).count()
    }

    pub fn into_result_set(self) -> ResultSet {
        ResultSet::new(self.observations)
    }
}

/// Drives a [`BulkFetcher`] batch by batch.
pub struct BatchScheduler {
    fetcher: BulkFetcher,
    batch_size: usize,
    delay: Duration,
}

impl BatchScheduler {
    /// Batch size is clamped to `1..=MAX_BATCH_SIZE`.
    pub fn new(fetcher: BulkFetcher, batch_size: usize, delay: Duration) -> Self {
        Self {
            fetcher,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            delay,
        }
    }

    pub fn from_config(fetcher: BulkFetcher, schedule: &ScheduleConfig) -> Self {
        Self::new(fetcher, schedule.batch_size, schedule.batch_delay())
    }

    pub fn fetcher(&self) -> &BulkFetcher {
        &self.fetcher
    }

    /// Fetch every region, returning one observation per input region.
    pub async fn run(&self, regions: &[String]) -> ScheduleOutcome {
        let years = YearRange::current();
        let batches: Vec<&[String]> = regions.chunks(self.batch_size).collect();
        let total = batches.len();

        log::info!(
            "Fetching {} regions from '{}' in {} batch(es) of up to {}",
            regions.len(),
            self.fetcher.registry().name(),
            total,
            self.batch_size
        );

        let mut outcome = ScheduleOutcome {
            batches: total,
            ..ScheduleOutcome::default()
        };

        for (index, batch) in batches.into_iter().enumerate() {
            log::info!("Batch {}/{}: {} regions", index + 1, total, batch.len());

            let batch_outcome = self.fetcher.fetch(batch, years).await;
            match &batch_outcome.error {
                Some(error) => {
                    log::error!("Batch {}/{} failed: {}", index + 1, total, error);
                    outcome.failed_batches += 1;
                }
                None => {
                    let usable = batch_outcome
                        .observations
                        .values()
                        .filter(|o| o.is_usable())
                        .count();
                    log::info!(
                        "Batch {}/{} completed: {}/{} usable",
                        index + 1,
                        total,
                        usable,
                        batch.len()
                    );
                }
            }

            outcome.observations.extend(batch_outcome.observations);
            outcome.unresolved.extend(batch_outcome.unresolved);

            if index + 1 < total && !self.delay.is_zero() {
                log::info!("Waiting {:?} before next batch", self.delay);
                tokio::time::sleep(self.delay).await;
            }
        }

        log::info!(
            "Fetch completed: {}/{} regions usable, {} failed batch(es)",
            outcome.usable_count(),
            regions.len(),
            outcome.failed_batches
        );

        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::models::{ObservationSource, RegionRegistry};
    use crate::services::mock::{MockFailure, MockSource};
    use crate::services::series;

    fn colorado_source() -> MockSource {
        let co = RegionRegistry::colorado();
        MockSource::new(
            co.regions()
                .iter()
                .map(|r| (r.area_id.to_string(), 1_000)),
        )
    }

    fn scheduler(source: Arc<MockSource>, batch_size: usize, delay: Duration) -> BatchScheduler {
        let fetcher = BulkFetcher::new(source, Arc::new(RegionRegistry::colorado()));
        BatchScheduler::new(fetcher, batch_size, delay)
    }

    #[tokio::test]
    async fn test_key_set_equals_input_with_partial_failure() {
        let source = Arc::new(
            colorado_source().fail_on_call(1, MockFailure::Transport("connection reset".into())),
        );
        let scheduler = scheduler(source.clone(), 50, Duration::ZERO);
        let mut regions = RegionRegistry::colorado().names();
        regions.push("Gotham".into());

        let outcome = scheduler.run(&regions).await;

        let expected: BTreeSet<_> = regions.iter().cloned().collect();
        let actual: BTreeSet<_> = outcome.observations.keys().cloned().collect();
        assert_eq!(actual, expected);
        assert_eq!(outcome.batches, 2);
        assert_eq!(outcome.failed_batches, 1);
        assert_eq!(source.call_count(), 2);
        assert_eq!(outcome.usable_count(), 50);
        assert_eq!(outcome.unresolved.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_marks_whole_batch() {
        let source = Arc::new(MockSource::new(Vec::<(String, u64)>::new()).fail_always(
            MockFailure::Transport("connection refused".into()),
        ));
        let registry = RegionRegistry::new(
            "abc",
            ["A", "B", "C"]
                .iter()
                .zip(["00001", "00002", "00003"])
                .map(|(name, id)| crate::models::Region {
                    name: name.to_string(),
                    area_id: crate::models::AreaId::parse(id).unwrap(),
                })
                .collect(),
        )
        .unwrap();
        let scheduler = BatchScheduler::new(
            BulkFetcher::new(source, Arc::new(registry)),
            50,
            Duration::ZERO,
        );

        let regions: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let outcome = scheduler.run(&regions).await;

        assert_eq!(outcome.observations.len(), 3);
        let messages: BTreeSet<_> = outcome
            .observations
            .values()
            .map(|o| {
                assert_eq!(o.source, ObservationSource::Error);
                o.error.clone().unwrap()
            })
            .collect();
        assert_eq!(messages.len(), 1);
        assert!(messages.iter().next().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_failed_batch_reports_unresolved_once() {
        let source = Arc::new(colorado_source());
        let scheduler = scheduler(source.clone(), 2, Duration::ZERO);
        let regions: Vec<String> = ["Denver", "Adams", "Gotham", "Metropolis"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let outcome = scheduler.run(&regions).await;

        assert_eq!(outcome.batches, 2);
        assert_eq!(outcome.failed_batches, 1);
        assert_eq!(source.call_count(), 1);
        let unresolved: Vec<_> = outcome.unresolved.iter().map(|u| u.region.as_str()).collect();
        assert_eq!(unresolved, vec!["Gotham", "Metropolis"]);
        assert_eq!(outcome.usable_count(), 2);
    }

    #[tokio::test]
    async fn test_batches_are_contiguous_and_bounded() {
        let source = Arc::new(colorado_source());
        let scheduler = scheduler(source.clone(), 20, Duration::ZERO);
        let regions = RegionRegistry::colorado().names();

        scheduler.run(&regions).await;

        let requests = source.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests.iter().all(|r| r.series_ids.len() <= 20));
        let registry = RegionRegistry::colorado();
        let sent: Vec<String> = requests
            .iter()
            .flat_map(|r| r.series_ids.iter())
            .map(|id| {
                let area = series::extract_area_id(id).unwrap();
                registry.id_to_name(area.as_str()).unwrap().to_string()
            })
            .collect();
        assert_eq!(sent, regions);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_batches_only() {
        let source = Arc::new(colorado_source());
        let scheduler = scheduler(source, 25, Duration::from_secs(5));
        let regions = RegionRegistry::colorado().names();

        let start = tokio::time::Instant::now();
        let outcome = scheduler.run(&regions).await;
        let elapsed = start.elapsed();

        assert_eq!(outcome.batches, 3);
        assert!(elapsed >= Duration::from_secs(10), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(15), "{elapsed:?}");
    }

    #[test]
    fn test_batch_size_clamped() {
        let source = Arc::new(colorado_source());
        assert_eq!(scheduler(source.clone(), 500, Duration::ZERO).batch_size, 50);
        assert_eq!(scheduler(source, 0, Duration::ZERO).batch_size, 1);
    }
}
