//! Declarative schema descriptions and document validation.
//!
//! A schema is a floor, not a closed contract: fields it does not mention are
//! accepted as-is.

use crate::error::ReorgError;
use crate::reorg::codec::decode_value;
use crate::reorg::coerce::type_matches;
use crate::reorg::store::DocumentStore;
use crate::reorg::value::{Document, Value, document_label, store_id};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

pub const KNOWN_TYPES: &[&str] = &[
    "string",
    "int",
    "float",
    "number",
    "bool",
    "null",
    "list",
    "map",
    "datetime",
    "object_id",
    "any",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    One(String),
    Many(Vec<String>),
}

impl TypeSpec {
    pub fn names(&self) -> Vec<String> {
        match self {
            TypeSpec::One(t) => vec![t.clone()],
            TypeSpec::Many(ts) => ts.clone(),
        }
    }
}

fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub types: Option<TypeSpec>,
    #[serde(default)]
    pub required: bool,
    /// Present-but-null is a real default, distinct from no default at all.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: String,
}

impl FieldSpec {
    fn new(types: &[&str], required: bool, description: &str) -> Self {
        let types = match types {
            [one] => TypeSpec::One((*one).to_string()),
            many => TypeSpec::Many(many.iter().map(|t| (*t).to_string()).collect()),
        };
        Self {
            types: Some(types),
            required,
            default: None,
            description: description.to_string(),
        }
    }

    fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn type_names(&self) -> Vec<String> {
        self.types.as_ref().map(TypeSpec::names).unwrap_or_default()
    }

    pub fn default_value(&self) -> Option<Value> {
        self.default.clone().map(decode_value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDescription {
    pub fields: BTreeMap<String, FieldSpec>,
}

impl SchemaDescription {
    pub fn required_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn check(&self) -> Result<(), ReorgError> {
        for (name, spec) in &self.fields {
            for t in spec.type_names() {
                if !KNOWN_TYPES.contains(&t.as_str()) {
                    return Err(ReorgError::InvalidSchema(format!(
                        "field `{name}` declares unknown type `{t}`"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn parse(raw: &str) -> Result<Self, ReorgError> {
        let schema: SchemaDescription =
            json5::from_str(raw).map_err(|err| ReorgError::InvalidSchema(err.to_string()))?;
        schema.check()?;
        Ok(schema)
    }
}

pub fn load_schema_file(path: &Path) -> Result<SchemaDescription> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    SchemaDescription::parse(&raw).with_context(|| format!("failed to load {}", path.display()))
}

/// Canonical hosting-plan schema.
pub fn plan_schema() -> SchemaDescription {
    use serde_json::json;

    let fields = [
        ("id", FieldSpec::new(&["string", "int"], true, "logical plan id")),
        ("name", FieldSpec::new(&["string"], true, "display name")),
        ("type", FieldSpec::new(&["string"], true, "hosting category")),
        (
            "sub_type",
            FieldSpec::new(&["string", "null"], false, "category variant").with_default(json!(null)),
        ),
        ("price", FieldSpec::new(&["float", "int"], true, "monthly price")),
        (
            "is_popular",
            FieldSpec::new(&["bool"], false, "highlight flag").with_default(json!(false)),
        ),
        (
            "description",
            FieldSpec::new(&["string"], false, "marketing copy").with_default(json!("")),
        ),
        (
            "features",
            FieldSpec::new(&["list"], false, "feature bullet points").with_default(json!([])),
        ),
        (
            "currency",
            FieldSpec::new(&["string"], false, "ISO currency code").with_default(json!("USD")),
        ),
        (
            "billing_cycle",
            FieldSpec::new(&["string"], false, "billing period").with_default(json!("monthly")),
        ),
        (
            "is_active",
            FieldSpec::new(&["bool"], false, "listed for sale").with_default(json!(true)),
        ),
        ("ram_gb", FieldSpec::new(&["float", "int"], false, "memory in GB")),
        ("storage_gb", FieldSpec::new(&["float", "int"], false, "disk in GB")),
        ("bandwidth_gb", FieldSpec::new(&["float", "int"], false, "monthly transfer in GB")),
        ("cpu_cores", FieldSpec::new(&["int", "float"], false, "vCPU count")),
        ("created_at", FieldSpec::new(&["datetime", "string"], false, "creation time")),
    ];

    SchemaDescription {
        fields: fields
            .into_iter()
            .map(|(name, spec)| (name.to_string(), spec))
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Missing {
        field: String,
    },
    TypeMismatch {
        field: String,
        expected: Vec<String>,
        actual: &'static str,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Missing { field } => write!(f, "missing required field `{field}`"),
            ValidationError::TypeMismatch {
                field,
                expected,
                actual,
            } => write!(
                f,
                "field `{field}` expected {} but found {actual}",
                expected.join("|")
            ),
        }
    }
}

pub fn validate(doc: &Document, schema: &SchemaDescription) -> (bool, Vec<ValidationError>) {
    let mut errors = Vec::new();
    for (field, spec) in &schema.fields {
        let Some(value) = doc.get(field) else {
            if spec.required {
                errors.push(ValidationError::Missing {
                    field: field.clone(),
                });
            }
            continue;
        };

        let expected = spec.type_names();
        if !expected.is_empty() && !expected.iter().any(|t| type_matches(t, value)) {
            errors.push(ValidationError::TypeMismatch {
                field: field.clone(),
                expected,
                actual: value.type_name(),
            });
        }
    }
    (errors.is_empty(), errors)
}

/// Fill defaults for optional fields still missing. Returns filled names.
pub fn fill_defaults(doc: &mut Document, schema: &SchemaDescription) -> Vec<String> {
    let mut filled = Vec::new();
    for (field, spec) in &schema.fields {
        if spec.required || doc.contains_key(field) {
            continue;
        }
        if let Some(default) = spec.default_value() {
            doc.insert(field.clone(), default);
            filled.push(field.clone());
        }
    }
    filled
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionValidationReport {
    pub collection: String,
    pub total_documents: usize,
    pub valid_documents: usize,
    pub invalid_documents: usize,
    pub valid_percentage: f64,
    pub errors_by_document: BTreeMap<String, Vec<String>>,
    pub truncated: bool,
}

impl CollectionValidationReport {
    pub fn success(&self) -> bool {
        self.invalid_documents == 0
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    ((part as f64 / total as f64) * 10_000.0).round() / 100.0
}

/// Report key for a document. A label already taken, as when two documents
/// share a logical id, gets the `_id` appended so neither entry is lost.
fn report_key<V>(doc: &Document, entries: &BTreeMap<String, V>) -> String {
    let label = document_label(doc);
    if !entries.contains_key(&label) {
        return label;
    }
    let base = match store_id(doc) {
        Some(oid) => format!("{label} (_id:{oid})"),
        None => label,
    };
    let mut key = base.clone();
    let mut n = 2;
    while entries.contains_key(&key) {
        key = format!("{base} #{n}");
        n += 1;
    }
    key
}

pub fn validate_collection(
    store: &dyn DocumentStore,
    collection: &str,
    schema: &SchemaDescription,
    max_reported: usize,
) -> Result<CollectionValidationReport> {
    let docs = store
        .find_all(collection)
        .with_context(|| format!("failed to scan `{collection}` for validation"))?;

    let mut report = CollectionValidationReport {
        collection: collection.to_string(),
        total_documents: docs.len(),
        valid_documents: 0,
        invalid_documents: 0,
        valid_percentage: 100.0,
        errors_by_document: BTreeMap::new(),
        truncated: false,
    };

    for doc in &docs {
        let (ok, errors) = validate(doc, schema);
        if ok {
            report.valid_documents += 1;
            continue;
        }
        report.invalid_documents += 1;
        if report.errors_by_document.len() < max_reported {
            let key = report_key(doc, &report.errors_by_document);
            report
                .errors_by_document
                .insert(key, errors.iter().map(ToString::to_string).collect());
        } else {
            report.truncated = true;
        }
    }

    report.valid_percentage = percentage(report.valid_documents, report.total_documents);
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiCompatibilityReport {
    pub collection: String,
    pub required_fields: Vec<String>,
    pub total_documents: usize,
    pub incompatible_documents: usize,
    pub missing_by_document: BTreeMap<String, Vec<String>>,
    pub truncated: bool,
    pub compatible: bool,
}

/// Check the fields the serving layer reads are present and non-null.
pub fn api_compatibility(
    store: &dyn DocumentStore,
    collection: &str,
    required_fields: &[String],
    max_reported: usize,
) -> Result<ApiCompatibilityReport> {
    let docs = store
        .find_all(collection)
        .with_context(|| format!("failed to scan `{collection}` for api compatibility"))?;

    let mut report = ApiCompatibilityReport {
        collection: collection.to_string(),
        required_fields: required_fields.to_vec(),
        total_documents: docs.len(),
        incompatible_documents: 0,
        missing_by_document: BTreeMap::new(),
        truncated: false,
        compatible: true,
    };

    for doc in &docs {
        let missing = required_fields
            .iter()
            .filter(|field| doc.get(field.as_str()).is_none_or(Value::is_null))
            .cloned()
            .collect::<Vec<_>>();
        if missing.is_empty() {
            continue;
        }
        report.incompatible_documents += 1;
        if report.missing_by_document.len() < max_reported {
            let key = report_key(doc, &report.missing_by_document);
            report.missing_by_document.insert(key, missing);
        } else {
            report.truncated = true;
        }
    }

    report.compatible = report.incompatible_documents == 0;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorg::store::memory::MemoryStore;
    use crate::reorg::value::doc;

    fn valid_plan(id: &str) -> Document {
        let mut d = doc([("id", id), ("name", "Opal"), ("type", "shared")]);
        d.insert("price".into(), Value::Float(1.0));
        d
    }

    fn minimal_schema() -> SchemaDescription {
        SchemaDescription::parse(
            r#"{
                // the serving layer's floor
                id: { type: ["string", "int"], required: true },
                name: { type: "string", required: true },
                type: { type: "string", required: true },
                price: { type: ["float", "int"], required: true },
            }"#,
        )
        .expect("schema")
    }

    #[test]
    fn missing_price_is_reported_by_name() {
        let mut store = MemoryStore::new("hosting");
        let mut broken = valid_plan("p-2");
        broken.remove("price");
        store
            .insert_many("plans", vec![valid_plan("p-1"), broken, valid_plan("p-3")])
            .expect("seed");

        let report = validate_collection(&store, "plans", &minimal_schema(), 50).expect("report");
        assert_eq!(report.total_documents, 3);
        assert_eq!(report.invalid_documents, 1);
        assert_eq!(report.valid_documents, 2);
        assert_eq!(report.valid_percentage, 66.67);
        let errors = report.errors_by_document.get("p-2").expect("p-2 errors");
        assert_eq!(errors, &vec!["missing required field `price`".to_string()]);
    }

    #[test]
    fn type_mismatch_names_expected_and_actual() {
        let mut d = valid_plan("p-1");
        d.insert("price".into(), Value::from("1.00"));
        let (ok, errors) = validate(&d, &minimal_schema());
        assert!(!ok);
        assert_eq!(
            errors[0].to_string(),
            "field `price` expected float|int but found string"
        );
    }

    #[test]
    fn unknown_fields_are_not_errors() {
        let mut d = valid_plan("p-1");
        d.insert("legacy_notes".into(), Value::from("whatever"));
        let (ok, errors) = validate(&d, &plan_schema());
        assert!(ok, "{errors:?}");
    }

    #[test]
    fn error_listing_is_truncated_but_counts_are_exact() {
        let mut store = MemoryStore::new("hosting");
        let broken = (0..5)
            .map(|i| doc([("id", format!("p-{i}"))]))
            .collect::<Vec<_>>();
        store.insert_many("plans", broken).expect("seed");

        let report = validate_collection(&store, "plans", &minimal_schema(), 2).expect("report");
        assert_eq!(report.invalid_documents, 5);
        assert_eq!(report.errors_by_document.len(), 2);
        assert!(report.truncated);
    }

    #[test]
    fn explicit_null_default_is_kept() {
        let schema = SchemaDescription::parse(r#"{ sub_type: { type: ["string", "null"], default: null } }"#)
            .expect("schema");
        let mut d = Document::new();
        assert_eq!(fill_defaults(&mut d, &schema), vec!["sub_type"]);
        assert_eq!(d.get("sub_type"), Some(&Value::Null));
    }

    #[test]
    fn unknown_type_names_are_rejected() {
        let err = SchemaDescription::parse(r#"{ price: { type: "money" } }"#).expect_err("bad");
        assert!(matches!(err, ReorgError::InvalidSchema(_)));
    }

    #[test]
    fn plan_schema_defaults_fill_optional_fields_only() {
        let mut d = valid_plan("p-1");
        let filled = fill_defaults(&mut d, &plan_schema());
        assert!(filled.contains(&"is_popular".to_string()));
        assert!(filled.contains(&"currency".to_string()));
        assert!(!filled.contains(&"ram_gb".to_string()));
        assert_eq!(d.get("features"), Some(&Value::List(Vec::new())));
        assert_eq!(plan_schema().required_fields(), vec!["id", "name", "price", "type"]);
    }

    #[test]
    fn api_check_flags_null_required_fields() {
        let mut store = MemoryStore::new("hosting");
        let mut nulled = valid_plan("p-2");
        nulled.insert("name".into(), Value::Null);
        store
            .insert_many("plans", vec![valid_plan("p-1"), nulled])
            .expect("seed");

        let required = ["id", "name", "type", "price"].map(String::from).to_vec();
        let report = api_compatibility(&store, "plans", &required, 10).expect("report");
        assert!(!report.compatible);
        assert_eq!(report.missing_by_document.get("p-2"), Some(&vec!["name".to_string()]));
    }

    #[test]
    fn documents_sharing_an_id_keep_separate_entries() {
        let mut store = MemoryStore::new("hosting");
        let mut priceless = valid_plan("p-1");
        priceless.remove("price");
        let mut nameless = valid_plan("p-1");
        nameless.remove("name");
        let mut bare = Document::new();
        bare.insert("id".into(), Value::from("p-1"));
        store
            .insert_many("plans", vec![priceless, nameless, bare])
            .expect("seed");

        let report = validate_collection(&store, "plans", &minimal_schema(), 10).expect("report");
        assert_eq!(report.invalid_documents, 3);
        assert_eq!(report.errors_by_document.len(), 3);
        assert!(report.errors_by_document.keys().all(|k| k.starts_with("p-1")));

        let required = ["name", "price"].map(String::from).to_vec();
        let api = api_compatibility(&store, "plans", &required, 10).expect("report");
        assert_eq!(api.missing_by_document.len(), 3);
        let mut reported = api.missing_by_document.values().flatten().cloned().collect::<Vec<_>>();
        reported.sort();
        assert_eq!(reported, vec!["name", "name", "price", "price"]);
    }

    #[test]
    fn repeated_label_without_store_id_is_numbered() {
        let mut entries: BTreeMap<String, ()> = BTreeMap::new();
        let d = doc([("id", "p-1")]);
        entries.insert(report_key(&d, &entries), ());
        entries.insert(report_key(&d, &entries), ());
        entries.insert(report_key(&d, &entries), ());
        assert_eq!(
            entries.keys().cloned().collect::<Vec<_>>(),
            vec!["p-1", "p-1 #2", "p-1 #3"]
        );
    }
}
