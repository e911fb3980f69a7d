// src/models/region.rs

//! Region definitions and the name/area-id registry.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Number of digits in an area identifier (state + county FIPS).
pub const AREA_ID_WIDTH: usize = 5;

/// Fixed-width numeric area identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AreaId(String);

impl AreaId {
    /// Parse an area id, rejecting anything that is not exactly
    /// [`AREA_ID_WIDTH`] ASCII digits.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() == AREA_ID_WIDTH && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(AppError::validation(format!(
                "area id '{raw}' must be {AREA_ID_WIDTH} digits"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AreaId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AreaId> for String {
    fn from(id: AreaId) -> Self {
        id.0
    }
}

/// A named region and its area identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub area_id: AreaId,
}

/// Immutable bidirectional mapping between region names and area ids.
///
/// Lookup misses are not errors here; callers decide whether to skip or fail.
#[derive(Debug, Clone)]
pub struct RegionRegistry {
    name: String,
    regions: Vec<Region>,
    by_name: HashMap<String, AreaId>,
    by_id: HashMap<AreaId, String>,
}

impl RegionRegistry {
    /// Build a registry, rejecting duplicate names or duplicate area ids.
    pub fn new(name: impl Into<String>, regions: Vec<Region>) -> Result<Self> {
        let name = name.into();
        let mut by_name = HashMap::with_capacity(regions.len());
        let mut by_id = HashMap::with_capacity(regions.len());

        for region in &regions {
            if by_name
                .insert(region.name.clone(), region.area_id.clone())
                .is_some()
            {
                return Err(AppError::validation(format!(
                    "registry '{name}': duplicate region name '{}'",
                    region.name
                )));
            }
            if by_id
                .insert(region.area_id.clone(), region.name.clone())
                .is_some()
            {
                return Err(AppError::validation(format!(
                    "registry '{name}': duplicate area id '{}'",
                    region.area_id
                )));
            }
        }

        Ok(Self {
            name,
            regions,
            by_name,
            by_id,
        })
    }

    /// Look up a builtin registry by name.
    pub fn builtin(name: &str) -> Option<Self> {
        let table: &[(&str, &str)] = match name {
            "colorado" => COLORADO_COUNTIES,
            "utah" => UTAH_COUNTIES,
            _ => return None,
        };
        let regions = table
            .iter()
            .map(|(name, id)| Region {
                name: (*name).to_string(),
                area_id: AreaId((*id).to_string()),
            })
            .collect();
        Self::new(name, regions).ok()
    }

    pub fn colorado() -> Self {
        Self::builtin("colorado").unwrap_or_else(|| Self::empty("colorado"))
    }

    pub fn utah() -> Self {
        Self::builtin("utah").unwrap_or_else(|| Self::empty("utah"))
    }

    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            regions: Vec::new(),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_to_id(&self, name: &str) -> Option<&AreaId> {
        self.by_name.get(name)
    }

    pub fn id_to_name(&self, area_id: &str) -> Option<&str> {
        // AreaId hashes like its inner String, so a temporary wrapper is enough.
        self.by_id
            .get(&AreaId(area_id.to_string()))
            .map(String::as_str)
    }

    /// Region names in definition order.
    pub fn names(&self) -> Vec<String> {
        self.regions.iter().map(|r| r.name.clone()).collect()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

const COLORADO_COUNTIES: &[(&str, &str)] = &[
    ("Adams", "08001"),
    ("Alamosa", "08003"),
    ("Arapahoe", "08005"),
    ("Archuleta", "08007"),
    ("Baca", "08009"),
    ("Bent", "08011"),
    ("Boulder", "08013"),
    ("Broomfield", "08014"),
    ("Chaffee", "08015"),
    ("Cheyenne", "08017"),
    ("Clear Creek", "08019"),
    ("Conejos", "08021"),
    ("Costilla", "08023"),
    ("Crowley", "08025"),
    ("Custer", "08027"),
    ("Delta", "08029"),
    ("Denver", "08031"),
    ("Dolores", "08033"),
    ("Douglas", "08035"),
    ("Eagle", "08037"),
    ("Elbert", "08039"),
    ("El Paso", "08041"),
    ("Fremont", "08043"),
    ("Garfield", "08045"),
    ("Gilpin", "08047"),
    ("Grand", "08049"),
    ("Gunnison", "08051"),
    ("Hinsdale", "08053"),
    ("Huerfano", "08055"),
    ("Jackson", "08057"),
    ("Jefferson", "08059"),
    ("Kiowa", "08061"),
    ("Kit Carson", "08063"),
    ("Lake", "08065"),
    ("La Plata", "08067"),
    ("Larimer", "08069"),
    ("Las Animas", "08071"),
    ("Lincoln", "08073"),
    ("Logan", "08075"),
    ("Mesa", "08077"),
    ("Mineral", "08079"),
    ("Moffat", "08081"),
    ("Montezuma", "08083"),
    ("Montrose", "08085"),
    ("Morgan", "08087"),
    ("Otero", "08089"),
    ("Ouray", "08091"),
    ("Park", "08093"),
    ("Phillips", "08095"),
    ("Pitkin", "08097"),
    ("Prowers", "08099"),
    ("Pueblo", "08101"),
    ("Rio Blanco", "08103"),
    ("Rio Grande", "08105"),
    ("Routt", "08107"),
    ("Saguache", "08109"),
    ("San Juan", "08111"),
    ("San Miguel", "08113"),
    ("Sedgwick", "08115"),
    ("Summit", "08117"),
    ("Teller", "08119"),
    ("Washington", "08121"),
    ("Weld", "08123"),
    ("Yuma", "08125"),
];

const UTAH_COUNTIES: &[(&str, &str)] = &[
    ("Beaver", "49001"),
    ("Box Elder", "49003"),
    ("Cache", "49005"),
    ("Carbon", "49007"),
    ("Daggett", "49009"),
    ("Davis", "49011"),
    ("Duchesne", "49013"),
    ("Emery", "49015"),
    ("Garfield", "49017"),
    ("Grand", "49019"),
    ("Iron", "49021"),
    ("Juab", "49023"),
    ("Kane", "49025"),
    ("Millard", "49027"),
    ("Morgan", "49029"),
    ("Piute", "49031"),
    ("Rich", "49033"),
    ("Salt Lake", "49035"),
    ("San Juan", "49037"),
    ("Sanpete", "49039"),
    ("Sevier", "49041"),
    ("Summit", "49043"),
    ("Tooele", "49045"),
    ("Uintah", "49047"),
    ("Utah", "49049"),
    ("Wasatch", "49051"),
    ("Washington", "49053"),
    ("Wayne", "49055"),
    ("Weber", "49057"),
];
