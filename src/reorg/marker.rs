//! Completion marker stored in the `_system` collection.

use crate::reorg::codec::{decode_value, encode_document};
use crate::reorg::store::DocumentStore;
use crate::reorg::value::{Document, Value};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

pub const MARKER_COLLECTION: &str = "_system";
pub const MARKER_KEY_FIELD: &str = "type";
pub const MARKER_TYPE: &str = "reorganization_marker";

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub version: String,
    /// Absent only on hand-written markers.
    pub completed_at: Option<DateTime<Utc>>,
    pub collections: Vec<String>,
    pub summary: BTreeMap<String, Value>,
    pub build_id: String,
}

impl Marker {
    pub fn new(
        version: &str,
        collections: &[String],
        summary: serde_json::Value,
        build_id: &str,
    ) -> Self {
        let summary = match decode_value(summary) {
            Value::Map(map) => map,
            _ => BTreeMap::new(),
        };
        Self {
            version: version.to_string(),
            completed_at: Some(Utc::now()),
            collections: collections.to_vec(),
            summary,
            build_id: build_id.to_string(),
        }
    }

    pub fn completed_at_display(&self) -> String {
        self.completed_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(MARKER_KEY_FIELD.to_string(), Value::from(MARKER_TYPE));
        doc.insert("version".to_string(), Value::from(self.version.as_str()));
        if let Some(at) = self.completed_at {
            doc.insert("completed_at".to_string(), Value::DateTime(at));
        }
        doc.insert(
            "collections".to_string(),
            Value::List(self.collections.iter().map(|c| Value::from(c.as_str())).collect()),
        );
        doc.insert("summary".to_string(), Value::Map(self.summary.clone()));
        doc.insert("build_id".to_string(), Value::from(self.build_id.as_str()));
        doc
    }

    pub fn from_document(doc: &Document) -> Self {
        let text = |field: &str| {
            doc.get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let completed_at = match doc.get("completed_at") {
            Some(Value::DateTime(at)) => Some(*at),
            Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|at| at.with_timezone(&Utc)),
            _ => None,
        };
        let collections = match doc.get("collections") {
            Some(Value::List(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        let summary = match doc.get("summary") {
            Some(Value::Map(map)) => map.clone(),
            _ => BTreeMap::new(),
        };
        Self {
            version: text("version"),
            completed_at,
            collections,
            summary,
            build_id: text("build_id"),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        encode_document(&self.to_document())
    }
}

fn is_marker(doc: &Document) -> bool {
    doc.get(MARKER_KEY_FIELD).and_then(Value::as_str) == Some(MARKER_TYPE)
}

pub fn read_marker(store: &dyn DocumentStore) -> Result<Option<Marker>> {
    Ok(store
        .find_all(MARKER_COLLECTION)?
        .iter()
        .find(|doc| is_marker(doc))
        .map(Marker::from_document))
}

/// Upserts on the fixed key, so at most one marker exists.
pub fn write_marker(store: &mut dyn DocumentStore, marker: &Marker) -> Result<()> {
    store.replace_one(
        MARKER_COLLECTION,
        MARKER_KEY_FIELD,
        &Value::from(MARKER_TYPE),
        marker.to_document(),
        true,
    )?;
    Ok(())
}

pub fn delete_marker(store: &mut dyn DocumentStore) -> Result<usize> {
    store.delete_many(MARKER_COLLECTION, MARKER_KEY_FIELD, &Value::from(MARKER_TYPE))
}
