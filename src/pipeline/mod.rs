//! Pipeline entry points.
//!
//! - `DatasetMerger`: patch observations into a geometry document
//! - `UpdateOrchestrator`: cache-aware updates across datasets

pub mod merge;
pub mod orchestrator;

pub use merge::{DatasetMerger, MergeOutcome};
pub use orchestrator::{
    CurrentData, DataOrigin, Dataset, DatasetReport, UpdateOrchestrator, UpdateOutcome,
    UpdateRequest, UpdateStatus,
};
