//! Substitute employment figures for regions without an upstream value.

use std::collections::HashMap;
use std::ops::Range;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

/// Band for placeholder estimates of regions with no curated figure.
pub const PLACEHOLDER_RANGE: Range<u64> = Range {
    start: 5_000,
    end: 55_000,
};

const KNOWN_REGIONS: &[(&str, u64)] = &[
    ("Denver", 485_000),
    ("El Paso", 315_000),
    ("Arapahoe", 295_000),
    ("Jefferson", 265_000),
    ("Adams", 185_000),
    ("Larimer", 185_000),
    ("Boulder", 175_000),
    ("Douglas", 165_000),
    ("Weld", 145_000),
    ("Mesa", 68_000),
    ("Pueblo", 68_500),
];

/// Produces estimates that callers must tag as ESTIMATED.
///
/// Curated constants cover the large regions. Everything else gets a
/// pseudo-random value in [`PLACEHOLDER_RANGE`], seeded from the region
/// name so repeated calls agree.
#[derive(Debug, Clone)]
pub struct FallbackEstimator {
    known: HashMap<String, u64>,
}

impl FallbackEstimator {
    pub fn new() -> Self {
        Self::with_known(
            KNOWN_REGIONS
                .iter()
                .map(|(name, jobs)| ((*name).to_string(), *jobs)),
        )
    }

    pub fn with_known(known: impl IntoIterator<Item = (String, u64)>) -> Self {
        Self {
            known: known.into_iter().collect(),
        }
    }

    pub fn estimate(&self, region: &str) -> u64 {
        if let Some(jobs) = self.known.get(region) {
            return *jobs;
        }
        let mut rng = StdRng::seed_from_u64(seed_for(region));
        rng.random_range(PLACEHOLDER_RANGE)
    }
}

impl Default for FallbackEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn seed_for(region: &str) -> u64 {
    let digest = Sha256::digest(region.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
