// src/services/series.rs

//! Series id derivation.
//!
//! A county employment-level series id is `LAUCN` + area id + `0000000006`,
//! so the area id always sits at a fixed offset and can be read back from
//! any id this module produces.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{AREA_ID_WIDTH, AreaId};

/// Local-area county series prefix.
pub const SERIES_PREFIX: &str = "LAUCN";

/// Measure code for employment level.
pub const SERIES_SUFFIX: &str = "0000000006";

const AREA_ID_OFFSET: usize = SERIES_PREFIX.len();
const SERIES_LEN: usize = SERIES_PREFIX.len() + AREA_ID_WIDTH + SERIES_SUFFIX.len();

/// Opaque upstream series identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(String);

impl SeriesId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the series id for an area.
pub fn build(area_id: &AreaId) -> SeriesId {
    SeriesId(format!("{SERIES_PREFIX}{area_id}{SERIES_SUFFIX}"))
}

/// Read the area id back out of a series id.
///
/// Returns `None` for ids that are not shaped like [`build`] output.
pub fn extract_area_id(series_id: &str) -> Option<AreaId> {
    if series_id.len() != SERIES_LEN
        || !series_id.starts_with(SERIES_PREFIX)
        || !series_id.ends_with(SERIES_SUFFIX)
    {
        return None;
    }
    let raw = series_id.get(AREA_ID_OFFSET..AREA_ID_OFFSET + AREA_ID_WIDTH)?;
    AreaId::parse(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RegionRegistry;

    #[test]
    fn test_build_denver() {
        let id = AreaId::parse("08031").unwrap();
        assert_eq!(build(&id).as_str(), "LAUCN080310000000006");
    }

    #[test]
    fn test_extract_inverts_build_for_all_builtin_regions() {
        for registry in [RegionRegistry::colorado(), RegionRegistry::utah()] {
            for region in registry.regions() {
                let series = build(&region.area_id);
                assert_eq!(extract_area_id(series.as_str()), Some(region.area_id.clone()));
            }
        }
    }

    #[test]
    fn test_extract_rejects_foreign_ids() {
        assert_eq!(extract_area_id("LAUCN08031"), None);
        assert_eq!(extract_area_id("LAUST080000000000006"), None);
        assert_eq!(extract_area_id("LAUCN0803X0000000006"), None);
        assert_eq!(extract_area_id("LAUCN080310000000003"), None);
    }
}
