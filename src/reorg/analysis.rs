//! Read-only pre-flight look at the drift collection. Never a gate.

use crate::reorg::coerce::type_matches;
use crate::reorg::dedupe::find_duplicates;
use crate::reorg::normalize::{FIELD_MAP, canonical_name};
use crate::reorg::schema::SchemaDescription;
use crate::reorg::store::DocumentStore;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub database: String,
    pub collection_counts: BTreeMap<String, usize>,
    pub drift_collection: String,
    pub sampled_documents: usize,
    pub legacy_field_usage: BTreeMap<String, usize>,
    pub documents_with_legacy_fields: usize,
    pub documents_with_both_spellings: usize,
    pub missing_required: BTreeMap<String, usize>,
    pub type_issues: BTreeMap<String, usize>,
    pub duplicate_groups: usize,
    pub recommendations: Vec<String>,
}

pub struct AnalysisInput<'a> {
    pub targets: &'a [String],
    pub drift_collection: &'a str,
    pub identity_fields: &'a [String],
    pub schema: &'a SchemaDescription,
    pub sample_size: usize,
}

pub fn analyze(store: &dyn DocumentStore, input: &AnalysisInput<'_>) -> Result<AnalysisReport> {
    let mut collection_counts = BTreeMap::new();
    for collection in input.targets {
        let count = store
            .count(collection)
            .with_context(|| format!("failed to count `{collection}`"))?;
        collection_counts.insert(collection.clone(), count);
    }

    let docs = store
        .find_all(input.drift_collection)
        .with_context(|| format!("failed to sample `{}`", input.drift_collection))?;
    let sample = &docs[..docs.len().min(input.sample_size)];

    let mut report = AnalysisReport {
        database: store.database_name().to_string(),
        collection_counts,
        drift_collection: input.drift_collection.to_string(),
        sampled_documents: sample.len(),
        legacy_field_usage: BTreeMap::new(),
        documents_with_legacy_fields: 0,
        documents_with_both_spellings: 0,
        missing_required: BTreeMap::new(),
        type_issues: BTreeMap::new(),
        duplicate_groups: find_duplicates(store, input.drift_collection, input.identity_fields)?
            .len(),
        recommendations: Vec::new(),
    };

    for doc in sample {
        let legacy_keys = doc
            .keys()
            .filter(|key| canonical_name(key).is_some())
            .collect::<Vec<_>>();
        if !legacy_keys.is_empty() {
            report.documents_with_legacy_fields += 1;
        }
        for key in legacy_keys {
            *report.legacy_field_usage.entry(key.clone()).or_default() += 1;
        }
        if FIELD_MAP
            .iter()
            .any(|(legacy, canonical)| doc.contains_key(*legacy) && doc.contains_key(*canonical))
        {
            report.documents_with_both_spellings += 1;
        }

        for (field, spec) in &input.schema.fields {
            match doc.get(field) {
                None if spec.required => {
                    *report.missing_required.entry(field.clone()).or_default() += 1;
                }
                Some(value) => {
                    let types = spec.type_names();
                    if !types.is_empty() && !types.iter().any(|t| type_matches(t, value)) {
                        *report.type_issues.entry(field.clone()).or_default() += 1;
                    }
                }
                None => {}
            }
        }
    }

    report.recommendations = recommendations(&report);
    Ok(report)
}

fn recommendations(report: &AnalysisReport) -> Vec<String> {
    let mut out = Vec::new();
    let sampled = report.sampled_documents;
    if sampled == 0 {
        out.push(format!(
            "collection `{}` is empty; nothing to migrate",
            report.drift_collection
        ));
        return out;
    }
    if report.documents_with_legacy_fields > 0 {
        out.push(format!(
            "{} of {sampled} sampled documents use legacy field names; migration renames them",
            report.documents_with_legacy_fields
        ));
    }
    if report.documents_with_both_spellings > 0 {
        out.push(format!(
            "{} sampled documents carry both spellings of a field; canonical values win",
            report.documents_with_both_spellings
        ));
    }
    for (field, count) in &report.missing_required {
        out.push(format!(
            "required field `{field}` is missing in {count} sampled documents; a legacy alias may supply it"
        ));
    }
    for (field, count) in &report.type_issues {
        out.push(format!(
            "field `{field}` has an unexpected type in {count} sampled documents; migration attempts coercion"
        ));
    }
    if report.duplicate_groups > 0 {
        out.push(format!(
            "{} duplicate groups found; the oldest document of each is kept",
            report.duplicate_groups
        ));
    }
    if out.is_empty() {
        out.push("no drift detected in sample".to_string());
    }
    out
}
