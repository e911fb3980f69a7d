//! Service layer.
//!
//! - Series id construction and parsing (`series`)
//! - Upstream client and wire types (`BlsClient`, `SeriesSource`)
//! - In-process upstream stand-in (`MockSource`)
//! - Single-request fetching (`BulkFetcher`)
//! - Batched, paced fetching (`BatchScheduler`)
//! - Placeholder figures (`FallbackEstimator`)

pub mod estimator;
pub mod fetcher;
pub mod mock;
pub mod scheduler;
pub mod series;
pub mod source;

pub use estimator::FallbackEstimator;
pub use fetcher::{BulkFetcher, FetchOutcome, UnresolvedRegion};
pub use mock::{MockFailure, MockSource};
pub use scheduler::{BatchScheduler, ScheduleOutcome};
pub use series::SeriesId;
pub use source::{BlsClient, SeriesRequest, SeriesResponse, SeriesSource, YearRange};
