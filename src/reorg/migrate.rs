use crate::reorg::codec::encode_value;
use crate::reorg::coerce::{coerce_for, synthesize_units};
use crate::reorg::normalize::{
    Direction, FieldConflict, canonical_name, conflicts, legacy_name, normalize, strip_legacy,
};
use crate::reorg::schema::{
    CollectionValidationReport, SchemaDescription, fill_defaults, validate_collection,
};
use crate::reorg::store::{DocumentStore, ReplaceOutcome};
use crate::reorg::util::truncate_with_ellipsis;
use crate::reorg::value::{
    Document, LOGICAL_ID_FIELD, Value, document_label, logical_id, shared_logical_ids,
};
use crate::reorg::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use serde::Serialize;

const DIFF_VALUE_CHARS: usize = 60;

#[derive(Debug, Clone, Copy)]
pub struct MigrationOptions {
    pub dry_run: bool,
    /// Only rename fields; leave values, defaults and legacy aliases alone.
    pub preserve_data_only: bool,
    pub max_reported: usize,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            preserve_data_only: false,
            max_reported: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    FieldRename,
    ValueChange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub kind: ChangeKind,
    pub before: Option<String>,
    pub after: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentDiff {
    pub document: String,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentConflict {
    pub document: String,
    #[serde(flatten)]
    pub conflict: FieldConflict,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub collection: String,
    pub dry_run: bool,
    pub preserve_data_only: bool,
    pub total_documents: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub written: usize,
    pub write_errors: usize,
    pub errors: Vec<String>,
    pub coercion_failures: Vec<String>,
    pub conflicts: Vec<DocumentConflict>,
    pub diffs: Vec<DocumentDiff>,
    pub diffs_truncated: bool,
    pub validation: Option<CollectionValidationReport>,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct MigratedDocument {
    pub document: Document,
    pub coercion_failures: Vec<String>,
}

/// Bring one document to canonical form. Pure.
pub fn migrate_document(
    current: &Document,
    schema: &SchemaDescription,
    preserve_data_only: bool,
) -> MigratedDocument {
    let mut doc = normalize(current, Direction::ToCanonical);
    let mut coercion_failures = Vec::new();
    if preserve_data_only {
        return MigratedDocument {
            document: doc,
            coercion_failures,
        };
    }

    for (field, spec) in &schema.fields {
        let types = spec.type_names();
        if types.is_empty() {
            continue;
        }
        let Some(value) = doc.get(field).filter(|v| !v.is_null()) else {
            continue;
        };
        match coerce_for(&types, value) {
            Ok(coerced) => {
                doc.insert(field.clone(), coerced);
            }
            Err(err) => coercion_failures.push(format!("{field}: {err}")),
        }
    }
    synthesize_units(&mut doc);
    fill_defaults(&mut doc, schema);
    strip_legacy(&mut doc);

    MigratedDocument {
        document: doc,
        coercion_failures,
    }
}

fn render(value: &Value) -> String {
    truncate_with_ellipsis(&value.key_string(), DIFF_VALUE_CHARS)
}

/// Equal, or encoding to the same archive JSON. NaN never equals itself, so
/// a stored NaN would otherwise count as a change on every run.
fn same_value(a: &Value, b: &Value) -> bool {
    a == b || encode_value(a) == encode_value(b)
}

pub fn diff(before: &Document, after: &Document) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    for (field, new_value) in after {
        match before.get(field) {
            Some(old_value) if same_value(old_value, new_value) => {}
            Some(old_value) => changes.push(FieldChange {
                field: field.clone(),
                kind: ChangeKind::ValueChange,
                before: Some(render(old_value)),
                after: Some(render(new_value)),
            }),
            None => {
                let renamed = legacy_name(field).is_some_and(|legacy| before.contains_key(legacy));
                changes.push(FieldChange {
                    field: field.clone(),
                    kind: if renamed {
                        ChangeKind::FieldRename
                    } else {
                        ChangeKind::ValueChange
                    },
                    before: None,
                    after: Some(render(new_value)),
                });
            }
        }
    }
    for (field, old_value) in before {
        if after.contains_key(field) {
            continue;
        }
        changes.push(FieldChange {
            field: field.clone(),
            kind: if canonical_name(field).is_some() {
                ChangeKind::FieldRename
            } else {
                ChangeKind::ValueChange
            },
            before: Some(render(old_value)),
            after: None,
        });
    }
    changes
}

pub fn migrate_collection(
    store: &mut dyn DocumentStore,
    collection: &str,
    schema: &SchemaDescription,
    options: MigrationOptions,
) -> Result<MigrationReport> {
    let docs = store
        .find_all(collection)
        .with_context(|| format!("failed to scan `{collection}` for migration"))?;
    let ambiguous = shared_logical_ids(&docs);

    let mut report = MigrationReport {
        collection: collection.to_string(),
        dry_run: options.dry_run,
        preserve_data_only: options.preserve_data_only,
        total_documents: docs.len(),
        changed: 0,
        unchanged: 0,
        written: 0,
        write_errors: 0,
        errors: Vec::new(),
        coercion_failures: Vec::new(),
        conflicts: Vec::new(),
        diffs: Vec::new(),
        diffs_truncated: false,
        validation: None,
        success: true,
    };

    for current in docs {
        let label = document_label(&current);
        for conflict in conflicts(&current) {
            warn::emit(WarnEvent {
                code: "FIELD_CONFLICT",
                stage: "migrate",
                action: "normalize",
                collection,
                document: &label,
                reason: &format!(
                    "{} and {} disagree, keeping {}",
                    conflict.legacy_field, conflict.canonical_field, conflict.canonical_field
                ),
                err: "",
            });
            report.conflicts.push(DocumentConflict {
                document: label.clone(),
                conflict,
            });
        }

        let migrated = migrate_document(&current, schema, options.preserve_data_only);
        report.coercion_failures.extend(
            migrated
                .coercion_failures
                .iter()
                .map(|failure| format!("{label}: {failure}")),
        );

        let changes = diff(&current, &migrated.document);
        if changes.is_empty() {
            report.unchanged += 1;
            continue;
        }
        report.changed += 1;
        if report.diffs.len() < options.max_reported {
            report.diffs.push(DocumentDiff {
                document: label.clone(),
                changes,
            });
        } else {
            report.diffs_truncated = true;
        }

        if options.dry_run {
            continue;
        }

        let Some(id) = logical_id(&current).cloned() else {
            report.write_errors += 1;
            report
                .errors
                .push(format!("{label}: no logical id, document not written"));
            continue;
        };
        if ambiguous.contains(&id.key_string()) {
            report.write_errors += 1;
            report.errors.push(format!(
                "{label}: logical id shared by several documents, document not written"
            ));
            continue;
        }

        match store.replace_one(collection, LOGICAL_ID_FIELD, &id, migrated.document, false) {
            Ok(ReplaceOutcome::Replaced) => report.written += 1,
            Ok(_) => {
                report.write_errors += 1;
                report
                    .errors
                    .push(format!("{label}: document vanished before write-back"));
            }
            Err(err) => {
                let err_text = format!("{err:#}");
                warn::emit(WarnEvent {
                    code: "MIGRATE_WRITE_FAILED",
                    stage: "migrate",
                    action: "replace",
                    collection,
                    document: &label,
                    reason: "store rejected write-back",
                    err: &err_text,
                });
                report.write_errors += 1;
                report.errors.push(format!("{label}: {err_text}"));
            }
        }
    }

    if !options.dry_run {
        report.validation = Some(validate_collection(
            store,
            collection,
            schema,
            options.max_reported,
        )?);
    }
    report.success = report.write_errors == 0;
    Ok(report)
}
