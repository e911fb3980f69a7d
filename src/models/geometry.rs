//! Geometry document wrapper.
//!
//! Documents are externally owned topology files shaped like
//! `{ "objects": { "<collection>": { "geometries": [ { "id", "properties" } ] } } }`.
//! Everything outside the geometry list is carried through untouched.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::region::AREA_ID_WIDTH;

const COUNTY_SUFFIX: &str = " County";

/// A topology document carrying per-region properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeometryDocument(Value);

impl GeometryDocument {
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Load a document from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Geometry entries of a named collection.
    pub fn geometries(&self, collection: &str) -> Result<&Vec<Value>> {
        self.0
            .get("objects")
            .and_then(|o| o.get(collection))
            .and_then(|c| c.get("geometries"))
            .and_then(Value::as_array)
            .ok_or_else(|| missing_collection(collection))
    }

    pub fn geometries_mut(&mut self, collection: &str) -> Result<&mut Vec<Value>> {
        self.0
            .get_mut("objects")
            .and_then(|o| o.get_mut(collection))
            .and_then(|c| c.get_mut("geometries"))
            .and_then(Value::as_array_mut)
            .ok_or_else(|| missing_collection(collection))
    }
}

/// A merged document and when it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedDocument {
    pub document: GeometryDocument,
    pub merged_at: DateTime<Utc>,
}

impl MergedDocument {
    pub fn new(document: GeometryDocument) -> Self {
        Self {
            document,
            merged_at: Utc::now(),
        }
    }
}

fn missing_collection(collection: &str) -> AppError {
    AppError::geometry(format!("objects.{collection}.geometries is missing or not a list"))
}

/// Identifier candidates for one geometry entry, most specific first.
///
/// Numeric ids are zero-padded to area-id width; `properties.name` is offered
/// both as-is and without a trailing " County".
pub fn geometry_identifiers(geometry: &Value) -> Vec<String> {
    let mut ids = Vec::new();

    match geometry.get("id") {
        Some(Value::String(s)) => ids.push(s.clone()),
        Some(Value::Number(n)) => {
            if let Some(n) = n.as_u64() {
                ids.push(format!("{:0width$}", n, width = AREA_ID_WIDTH));
            }
        }
        _ => {}
    }

    if let Some(name) = geometry
        .get("properties")
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
    {
        ids.push(name.to_string());
        if let Some(stripped) = name.strip_suffix(COUNTY_SUFFIX) {
            ids.push(stripped.to_string());
        }
    }

    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_geometries_lookup() {
        let doc = GeometryDocument::from_value(json!({
            "type": "Topology",
            "objects": { "counties": { "geometries": [ { "id": "Denver" } ] } }
        }));
        assert_eq!(doc.geometries("counties").unwrap().len(), 1);
        assert!(matches!(
            doc.geometries("states"),
            Err(AppError::Geometry(_))
        ));
    }

    #[test]
    fn test_identifiers() {
        let geometry = json!({ "id": 8031, "properties": { "name": "Denver County" } });
        assert_eq!(
            geometry_identifiers(&geometry),
            vec!["08031", "Denver County", "Denver"]
        );

        let bare = json!({ "properties": { "name": "Weld" } });
        assert_eq!(geometry_identifiers(&bare), vec!["Weld"]);

        assert!(geometry_identifiers(&json!({})).is_empty());
    }
}
