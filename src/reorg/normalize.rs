//! Legacy/canonical field-name mapping for plan records.
//!
//! Admin tooling writes either spelling, so this is the one place both shapes
//! are reconciled. When both spellings are present the canonical value wins.

use crate::reorg::value::{Document, Value};
use serde::Serialize;

/// `(legacy, canonical)` field pairs.
pub const FIELD_MAP: &[(&str, &str)] = &[
    ("plan_name", "name"),
    ("plan_type", "type"),
    ("plan_subtype", "sub_type"),
    ("base_price", "price"),
    ("popular", "is_popular"),
    ("plan_description", "description"),
    ("plan_features", "features"),
];

const POPULARITY_FIELD: &str = "is_popular";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToCanonical,
    ToLegacy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldConflict {
    pub legacy_field: String,
    pub canonical_field: String,
    pub legacy_value: String,
    pub canonical_value: String,
}

fn is_present(doc: &Document, field: &str) -> bool {
    doc.get(field).is_some_and(|v| !v.is_null())
}

/// Copy each mapped field to its counterpart when the source spelling is
/// present and the target spelling is not. Nothing is removed.
pub fn normalize(doc: &Document, direction: Direction) -> Document {
    let mut out = doc.clone();
    for (legacy, canonical) in FIELD_MAP {
        let (from, to) = match direction {
            Direction::ToCanonical => (*legacy, *canonical),
            Direction::ToLegacy => (*canonical, *legacy),
        };
        if is_present(doc, to) {
            continue;
        }
        if let Some(value) = doc.get(from).filter(|v| !v.is_null()) {
            out.insert(to.to_string(), value.clone());
        }
    }

    if direction == Direction::ToCanonical && !is_present(&out, POPULARITY_FIELD) {
        out.insert(POPULARITY_FIELD.to_string(), Value::Bool(false));
    }
    out
}

pub fn canonical_name(field: &str) -> Option<&'static str> {
    FIELD_MAP
        .iter()
        .find(|(legacy, _)| *legacy == field)
        .map(|(_, canonical)| *canonical)
}

pub fn legacy_name(field: &str) -> Option<&'static str> {
    FIELD_MAP
        .iter()
        .find(|(_, canonical)| *canonical == field)
        .map(|(legacy, _)| *legacy)
}

/// Pairs present under both spellings with different values. The canonical
/// value is what `normalize` keeps.
pub fn conflicts(doc: &Document) -> Vec<FieldConflict> {
    FIELD_MAP
        .iter()
        .filter_map(|(legacy, canonical)| {
            let legacy_value = doc.get(*legacy).filter(|v| !v.is_null())?;
            let canonical_value = doc.get(*canonical).filter(|v| !v.is_null())?;
            if legacy_value == canonical_value {
                return None;
            }
            Some(FieldConflict {
                legacy_field: (*legacy).to_string(),
                canonical_field: (*canonical).to_string(),
                legacy_value: legacy_value.key_string(),
                canonical_value: canonical_value.key_string(),
            })
        })
        .collect()
}

/// Remove legacy spellings whose canonical counterpart is present.
pub fn strip_legacy(doc: &mut Document) -> Vec<String> {
    let mut removed = Vec::new();
    for (legacy, canonical) in FIELD_MAP {
        if doc.contains_key(*legacy) && is_present(doc, canonical) {
            doc.remove(*legacy);
            removed.push((*legacy).to_string());
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorg::value::doc;

    #[test]
    fn legacy_fields_gain_canonical_names() {
        let d = doc([("plan_name", "Opal"), ("base_price", "1.00"), ("popular", "true")]);
        let out = normalize(&d, Direction::ToCanonical);

        assert_eq!(out.get("name"), Some(&Value::from("Opal")));
        assert_eq!(out.get("price"), Some(&Value::from("1.00")));
        assert_eq!(out.get("is_popular"), Some(&Value::from("true")));
        assert_eq!(out.get("plan_name"), Some(&Value::from("Opal")));
    }

    #[test]
    fn canonical_value_wins_over_legacy() {
        let d = doc([("plan_name", "A"), ("name", "B")]);
        let out = normalize(&d, Direction::ToCanonical);
        assert_eq!(out.get("name"), Some(&Value::from("B")));

        let found = conflicts(&d);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].legacy_value, "A");
        assert_eq!(found[0].canonical_value, "B");
    }

    #[test]
    fn popularity_defaults_to_false() {
        let out = normalize(&doc([("name", "Opal")]), Direction::ToCanonical);
        assert_eq!(out.get("is_popular"), Some(&Value::Bool(false)));
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let mut d = doc([("plan_name", "Opal"), ("plan_type", "shared"), ("price", "3")]);
        d.insert("popular".into(), Value::Null);
        let once = normalize(&d, Direction::ToCanonical);
        let twice = normalize(&once, Direction::ToCanonical);
        assert_eq!(once, twice);
    }

    #[test]
    fn to_legacy_mirrors_mapping() {
        let mut d = doc([("name", "Opal"), ("type", "shared")]);
        d.insert("is_popular".into(), Value::Bool(true));
        let out = normalize(&d, Direction::ToLegacy);

        assert_eq!(out.get("plan_name"), Some(&Value::from("Opal")));
        assert_eq!(out.get("plan_type"), Some(&Value::from("shared")));
        assert_eq!(out.get("popular"), Some(&Value::Bool(true)));
        assert!(!out.contains_key("base_price"));
    }

    #[test]
    fn unmapped_fields_pass_through() {
        let d = doc([("plan_name", "Opal"), ("ram_mb", "512")]);
        let out = normalize(&d, Direction::ToCanonical);
        assert_eq!(out.get("ram_mb"), Some(&Value::from("512")));
    }

    #[test]
    fn strip_legacy_only_drops_covered_fields() {
        let mut d = doc([("plan_name", "Opal"), ("name", "Opal"), ("plan_type", "shared")]);
        let removed = strip_legacy(&mut d);
        assert_eq!(removed, vec!["plan_name"]);
        assert!(d.contains_key("plan_type"));
    }

    #[test]
    fn name_lookups_are_symmetric() {
        assert_eq!(canonical_name("base_price"), Some("price"));
        assert_eq!(legacy_name("price"), Some("base_price"));
        assert_eq!(canonical_name("price"), None);
    }
}
