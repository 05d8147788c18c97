use crate::reorg::codec::encode_value;
use crate::reorg::normalize::{Direction, normalize};
use crate::reorg::store::DocumentStore;
use crate::reorg::value::{
    Document, LOGICAL_ID_FIELD, STORE_ID_FIELD, Value, document_label, logical_id,
    shared_logical_ids, store_id,
};
use crate::reorg::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

const CREATED_AT_FIELD: &str = "created_at";

#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    /// Identity field -> rendered value.
    pub identity: BTreeMap<String, String>,
    /// Oldest first. Index 0 survives.
    pub members: Vec<Document>,
}

impl DuplicateGroup {
    pub fn survivor(&self) -> &Document {
        &self.members[0]
    }

    pub fn removable(&self) -> &[Document] {
        &self.members[1..]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupOutcome {
    pub identity: BTreeMap<String, String>,
    pub survivor: String,
    pub removed: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DedupeReport {
    pub collection: String,
    pub identity_fields: Vec<String>,
    pub dry_run: bool,
    pub duplicate_groups: usize,
    pub documents_removed: usize,
    pub groups: Vec<GroupOutcome>,
    pub errors: Vec<String>,
}

impl DedupeReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// `created_at` when it is a datetime or RFC 3339 text, else the time inside
/// `_id`.
pub fn creation_time(doc: &Document) -> Option<DateTime<Utc>> {
    match doc.get(CREATED_AT_FIELD) {
        Some(Value::DateTime(at)) => return Some(*at),
        Some(Value::String(raw)) => {
            if let Ok(at) = DateTime::parse_from_rfc3339(raw.trim()) {
                return Some(at.with_timezone(&Utc));
            }
        }
        _ => {}
    }
    store_id(doc).map(|oid| oid.timestamp())
}

/// Stable: ties keep scan order. Undated documents go last.
pub fn sort_oldest_first(members: &mut [Document]) {
    members.sort_by_key(|doc| match creation_time(doc) {
        Some(at) => (0, Some(at)),
        None => (1, None),
    });
}

/// Identity is read through the canonical view, so legacy and canonical
/// spellings of the same plan group together. `None` when every identity
/// field is null: such documents cannot be told apart and are never grouped.
fn identity_key(doc: &Document, identity_fields: &[String]) -> Option<Vec<String>> {
    let view = normalize(doc, Direction::ToCanonical);
    let values = identity_fields
        .iter()
        .map(|field| view.get(field.as_str()).unwrap_or(&Value::Null))
        .collect::<Vec<_>>();
    if values.iter().all(|v| v.is_null()) {
        return None;
    }
    Some(values.into_iter().map(|v| encode_value(v).to_string()).collect())
}

fn group_duplicates(docs: Vec<Document>, identity_fields: &[String]) -> Vec<DuplicateGroup> {
    let mut grouped: BTreeMap<Vec<String>, Vec<Document>> = BTreeMap::new();
    for doc in docs {
        let Some(key) = identity_key(&doc, identity_fields) else {
            continue;
        };
        grouped.entry(key).or_default().push(doc);
    }

    let mut groups = Vec::new();
    for (_, mut members) in grouped {
        if members.len() < 2 {
            continue;
        }
        sort_oldest_first(&mut members);
        let view = normalize(&members[0], Direction::ToCanonical);
        let identity = identity_fields
            .iter()
            .map(|field| {
                let rendered = view
                    .get(field.as_str())
                    .map(Value::key_string)
                    .unwrap_or_else(|| "null".to_string());
                (field.clone(), rendered)
            })
            .collect();
        groups.push(DuplicateGroup { identity, members });
    }
    groups
}

fn scan(store: &dyn DocumentStore, collection: &str) -> Result<Vec<Document>> {
    store
        .find_all(collection)
        .with_context(|| format!("failed to scan `{collection}` for duplicates"))
}

pub fn find_duplicates(
    store: &dyn DocumentStore,
    collection: &str,
    identity_fields: &[String],
) -> Result<Vec<DuplicateGroup>> {
    Ok(group_duplicates(scan(store, collection)?, identity_fields))
}

/// Where a removable member is deleted: by logical id only when no other
/// document in the collection carries it, else by `_id`.
fn delete_key(doc: &Document, shared: &BTreeSet<String>) -> Option<(&'static str, Value)> {
    if let Some(id) = logical_id(doc)
        && !shared.contains(&id.key_string())
    {
        return Some((LOGICAL_ID_FIELD, id.clone()));
    }
    store_id(doc).map(|oid| (STORE_ID_FIELD, Value::ObjectId(oid)))
}

pub fn remove(
    store: &mut dyn DocumentStore,
    collection: &str,
    identity_fields: &[String],
    dry_run: bool,
) -> Result<DedupeReport> {
    let docs = scan(store, collection)?;
    let shared = shared_logical_ids(&docs);
    let groups = group_duplicates(docs, identity_fields);
    let mut report = DedupeReport {
        collection: collection.to_string(),
        identity_fields: identity_fields.to_vec(),
        dry_run,
        duplicate_groups: groups.len(),
        documents_removed: 0,
        groups: Vec::with_capacity(groups.len()),
        errors: Vec::new(),
    };

    for group in &groups {
        let survivor = group.survivor();
        let mut outcome = GroupOutcome {
            identity: group.identity.clone(),
            survivor: document_label(survivor),
            removed: Vec::new(),
            errors: Vec::new(),
        };

        for doc in group.removable() {
            let label = document_label(doc);
            if dry_run {
                outcome.removed.push(label);
                continue;
            }

            let Some((field, value)) = delete_key(doc, &shared) else {
                outcome
                    .errors
                    .push(format!("{label}: no unambiguous id or _id to delete by"));
                continue;
            };
            match store.delete_many(collection, field, &value) {
                Ok(1) => outcome.removed.push(label),
                Ok(deleted) => {
                    let err_text = format!("delete by `{field}` matched {deleted} documents");
                    warn::emit(WarnEvent {
                        code: "DEDUPE_DELETE_MISMATCH",
                        stage: "deduplicate",
                        action: "delete",
                        collection,
                        document: &label,
                        reason: "expected exactly one document",
                        err: &err_text,
                    });
                    outcome.errors.push(format!("{label}: {err_text}"));
                }
                Err(err) => {
                    let err_text = format!("{err:#}");
                    warn::emit(WarnEvent {
                        code: "DEDUPE_DELETE_FAILED",
                        stage: "deduplicate",
                        action: "delete",
                        collection,
                        document: &label,
                        reason: "store rejected delete",
                        err: &err_text,
                    });
                    outcome.errors.push(format!("{label}: {err_text}"));
                }
            }
        }

        report.documents_removed += outcome.removed.len();
        report.errors.extend(outcome.errors.iter().cloned());
        report.groups.push(outcome);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorg::store::memory::MemoryStore;
    use crate::reorg::value::{ObjectId, doc};
    use chrono::TimeZone;

    fn fields() -> Vec<String> {
        ["name", "type", "sub_type"].map(String::from).to_vec()
    }

    fn plan(id: &str, name: &str, year: i32) -> Document {
        let mut d = doc([("id", id), ("name", name), ("type", "shared")]);
        let at = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap();
        d.insert("created_at".into(), Value::DateTime(at));
        d
    }

    fn ids(store: &MemoryStore) -> Vec<String> {
        let mut ids = store
            .find_all("plans")
            .unwrap()
            .iter()
            .map(document_label)
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    #[test]
    fn oldest_member_survives() {
        let mut store = MemoryStore::new("hosting").with_collection(
            "plans",
            vec![
                plan("p-2022", "Opal", 2022),
                plan("p-2020", "Opal", 2020),
                plan("p-2021", "Opal", 2021),
                plan("p-other", "Ruby", 2019),
            ],
        );

        let report = remove(&mut store, "plans", &fields(), false).expect("dedupe");
        assert!(report.success());
        assert_eq!(report.duplicate_groups, 1);
        assert_eq!(report.documents_removed, 2);
        assert_eq!(report.groups[0].survivor, "p-2020");
        assert_eq!(ids(&store), vec!["p-2020", "p-other"]);
        assert_eq!(report.groups[0].identity.get("sub_type").map(String::as_str), Some("null"));
    }

    #[test]
    fn dry_run_reports_without_deleting() {
        let mut store = MemoryStore::new("hosting")
            .with_collection("plans", vec![plan("a", "Opal", 2021), plan("b", "Opal", 2020)]);

        let report = remove(&mut store, "plans", &fields(), true).expect("dry run");
        assert_eq!(report.documents_removed, 1);
        assert_eq!(report.groups[0].removed, vec!["a"]);
        assert_eq!(store.write_ops(), 0);
        assert_eq!(store.count("plans").unwrap(), 2);
    }

    #[test]
    fn shared_logical_id_deletes_by_store_id() {
        let mut store = MemoryStore::new("hosting").with_collection(
            "plans",
            vec![plan("same", "Opal", 2020), plan("same", "Opal", 2021)],
        );

        let report = remove(&mut store, "plans", &fields(), false).expect("dedupe");
        assert_eq!(report.documents_removed, 1);
        let left = store.find_all("plans").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(creation_time(&left[0]).map(|t| t.format("%Y").to_string()), Some("2020".into()));
    }

    #[test]
    fn id_shared_outside_the_group_deletes_by_store_id() {
        let mut store = MemoryStore::new("hosting").with_collection(
            "plans",
            vec![plan("a", "Opal", 2020), plan("b", "Opal", 2021), plan("b", "Ruby", 2019)],
        );
        let identity = ["name", "type"].map(String::from).to_vec();

        let report = remove(&mut store, "plans", &identity, false).expect("dedupe");
        assert!(report.success());
        assert_eq!(report.documents_removed, 1);
        let mut names = store
            .find_all("plans")
            .unwrap()
            .iter()
            .filter_map(|d| d.get("name").and_then(Value::as_str).map(String::from))
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["Opal", "Ruby"]);
    }

    #[test]
    fn shared_id_without_store_id_is_left_alone() {
        let mut store = MemoryStore::new("hosting").with_raw_collection(
            "plans",
            vec![plan("a", "Opal", 2020), plan("b", "Opal", 2021), plan("b", "Ruby", 2019)],
        );
        let identity = ["name", "type"].map(String::from).to_vec();

        let report = remove(&mut store, "plans", &identity, false).expect("dedupe");
        assert!(!report.success());
        assert_eq!(report.documents_removed, 0);
        assert!(report.errors[0].starts_with("b:"));
        assert_eq!(store.count("plans").unwrap(), 3);
        assert_eq!(store.write_ops(), 0);
    }

    #[test]
    fn undated_members_sort_last_and_id_time_is_used() {
        let undated = doc([("id", "undated")]);
        let mut by_oid = doc([("id", "by-oid")]);
        let at = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
        by_oid.insert("_id".into(), Value::ObjectId(ObjectId::with_time(at)));
        let mut text = doc([("id", "text"), ("created_at", "2020-03-01T00:00:00Z")]);
        text.insert("_id".into(), Value::ObjectId(ObjectId::with_time(at)));

        assert_eq!(creation_time(&by_oid), Some(at));
        assert_eq!(creation_time(&undated), None);

        let mut members = vec![undated, text, by_oid];
        sort_oldest_first(&mut members);
        let order = members.iter().map(document_label).collect::<Vec<_>>();
        assert_eq!(order, vec!["by-oid", "text", "undated"]);
    }

    #[test]
    fn delete_failure_is_recorded_and_other_groups_continue() {
        let mut store = MemoryStore::new("hosting")
            .with_collection(
                "plans",
                vec![
                    plan("keep-a", "Opal", 2020),
                    plan("stuck", "Opal", 2021),
                    plan("keep-b", "Ruby", 2020),
                    plan("gone", "Ruby", 2021),
                ],
            )
            .fail_deletes_for(Value::from("stuck"));

        let report = remove(&mut store, "plans", &fields(), false).expect("dedupe");
        assert!(!report.success());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("stuck:"));
        assert_eq!(report.documents_removed, 1);
        assert_eq!(ids(&store), vec!["keep-a", "keep-b", "stuck"]);
    }

    #[test]
    fn legacy_spelling_groups_with_canonical() {
        let mut legacy = doc([("id", "old"), ("plan_name", "Opal"), ("plan_type", "shared")]);
        let at = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        legacy.insert("created_at".into(), Value::DateTime(at));
        let mut store = MemoryStore::new("hosting").with_collection(
            "plans",
            vec![plan("new", "Opal", 2021), legacy, doc([("id", "bare")]), doc([("id", "bare-2")])],
        );

        let report = remove(&mut store, "plans", &fields(), false).expect("dedupe");
        assert_eq!(report.duplicate_groups, 1);
        assert_eq!(report.groups[0].survivor, "old");
        assert_eq!(ids(&store), vec!["bare", "bare-2", "old"]);
    }

    #[test]
    fn unique_collection_has_no_groups() {
        let mut store = MemoryStore::new("hosting")
            .with_collection("plans", vec![plan("a", "Opal", 2020), plan("b", "Ruby", 2020)]);
        let report = remove(&mut store, "plans", &fields(), false).expect("dedupe");
        assert_eq!(report.duplicate_groups, 0);
        assert_eq!(store.write_ops(), 0);
    }
}
