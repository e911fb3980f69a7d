// src/models/mod.rs

//! Domain models.
//!
//! Region registries, observations, geometry documents, and configuration.

mod config;
mod geometry;
mod observation;
pub(crate) mod region;

// Re-export all public types
pub use config::{
    API_KEY_ENV, Config, DatasetConfig, LoggingConfig, MAX_BATCH_SIZE, MAX_SCHEDULE_SECS,
    ScheduleConfig, UpstreamConfig,
};
pub use geometry::{GeometryDocument, MergedDocument, geometry_identifiers};
pub use observation::{Observation, ObservationMap, ObservationSource, ResultSet};
pub use region::{AREA_ID_WIDTH, AreaId, Region, RegionRegistry};
