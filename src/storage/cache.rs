//! Time-to-live result cache.
//!
//! Entries expire lazily: `get` treats anything older than the TTL as absent,
//! with no background sweep. Only the entries are serialized; the TTL comes
//! from configuration when a cache is loaded.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{MergedDocument, ResultSet};

/// Values that know when they were produced.
pub trait Stamped {
    fn stamped_at(&self) -> DateTime<Utc>;
}

impl Stamped for ResultSet {
    fn stamped_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

impl Stamped for MergedDocument {
    fn stamped_at(&self) -> DateTime<Utc> {
        self.merged_at
    }
}

/// Default entry lifetime.
pub fn default_ttl() -> TimeDelta {
    TimeDelta::hours(24)
}

/// Keyed store of timestamped values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultCache<T = ResultSet> {
    #[serde(skip, default = "default_ttl")]
    ttl: TimeDelta,
    entries: BTreeMap<String, T>,
}

impl<T: Stamped> ResultCache<T> {
    pub fn new(ttl: TimeDelta) -> Self {
        Self {
            ttl,
            entries: BTreeMap::new(),
        }
    }

    /// Replace the TTL, e.g. after deserializing.
    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.get_at(key, Utc::now())
    }

    /// Lookup as of `now`; expired entries read as absent.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<&T> {
        self.entries
            .get(key)
            .filter(|value| self.is_fresh_at(*value, now))
    }

    pub fn put(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), value);
    }

    pub fn invalidate(&mut self, key: &str) -> Option<T> {
        self.entries.remove(key)
    }

    pub fn is_fresh_at(&self, value: &T, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(value.stamped_at()) < self.ttl
    }

    /// All entries, expired or not.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &T)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Stamped> Default for ResultCache<T> {
    fn default() -> Self {
        Self::new(default_ttl())
    }
}

impl<T: Serialize> ResultCache<T> {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

impl<T: Stamped + for<'de> Deserialize<'de>> ResultCache<T> {
    pub fn from_json(bytes: &[u8], ttl: TimeDelta) -> Result<Self> {
        let cache: Self = serde_json::from_slice(bytes)?;
        Ok(cache.with_ttl(ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Observation, ObservationMap, ObservationSource};

    fn result_set(fetched_at: DateTime<Utc>) -> ResultSet {
        let mut observations = ObservationMap::new();
        observations.insert(
            "Denver".into(),
            Observation {
                region: "Denver".into(),
                value: Some(453_195),
                period: Some("M08".into()),
                year: Some("2025".into()),
                period_name: Some("August".into()),
                observed_at: fetched_at,
                source: ObservationSource::Upstream,
                error: None,
                series_id: Some("LAUCN080310000000006".into()),
            },
        );
        observations.insert("Weld".into(), Observation::error("Weld", "HTTP 503"));
        ResultSet {
            observations,
            fetched_at,
        }
    }

    #[test]
    fn test_get_within_ttl() {
        let now = Utc::now();
        let mut cache = ResultCache::default();
        cache.put("colorado", result_set(now - TimeDelta::hours(23)));

        assert!(cache.get_at("colorado", now).is_some());
        assert!(cache.get("colorado").is_some());
    }

    #[test]
    fn test_expired_entry_reads_as_absent() {
        let now = Utc::now();
        let mut cache = ResultCache::default();
        cache.put("colorado", result_set(now - TimeDelta::hours(25)));

        assert!(cache.get_at("colorado", now).is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.get_at("colorado", now - TimeDelta::hours(2)).is_some());
    }

    #[test]
    fn test_boundary_is_expired() {
        let now = Utc::now();
        let mut cache = ResultCache::default();
        cache.put("colorado", result_set(now - default_ttl()));
        assert!(cache.get_at("colorado", now).is_none());
    }

    #[test]
    fn test_keys_are_independent() {
        let now = Utc::now();
        let mut cache = ResultCache::default();
        cache.put("colorado", result_set(now - TimeDelta::hours(30)));
        cache.put("utah", result_set(now));

        assert!(cache.get_at("colorado", now).is_none());
        assert!(cache.get_at("utah", now).is_some());

        cache.invalidate("utah");
        assert!(cache.get_at("utah", now).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_json_round_trip() {
        let mut cache = ResultCache::new(TimeDelta::hours(6));
        cache.put("colorado", result_set(Utc::now()));

        let bytes = cache.to_json().unwrap();
        let loaded = ResultCache::<ResultSet>::from_json(&bytes, TimeDelta::hours(6)).unwrap();

        assert_eq!(loaded, cache);
    }
}
