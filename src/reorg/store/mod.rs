//! Document store seam.
//!
//! Every component takes the store as an explicit `&dyn DocumentStore` or
//! `&mut dyn DocumentStore` argument; nothing reads a process-wide handle.

pub mod json_dir;
#[cfg(test)]
pub mod memory;

use crate::error::ReorgError;
use crate::reorg::value::{Document, ObjectId, STORE_ID_FIELD, Value};
use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    Inserted,
    NotFound,
}

pub trait DocumentStore {
    fn database_name(&self) -> &str;

    /// Fails with `ReorgError::ConnectionFailure` when the store is unreachable.
    fn ping(&self) -> Result<()>;

    fn list_collections(&self) -> Result<Vec<String>>;

    /// Full scan of one collection. A missing collection is empty.
    fn find_all(&self, collection: &str) -> Result<Vec<Document>>;

    fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.find_all(collection)?.len())
    }

    /// Inserts every document, assigning `_id` where absent.
    fn insert_many(&mut self, collection: &str, docs: Vec<Document>) -> Result<usize>;

    /// Replaces the first document whose `field` equals `value`. The stored
    /// `_id` survives the replacement.
    fn replace_one(
        &mut self,
        collection: &str,
        field: &str,
        value: &Value,
        doc: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome>;

    fn delete_many(&mut self, collection: &str, field: &str, value: &Value) -> Result<usize>;

    fn drop_collection(&mut self, collection: &str) -> Result<()>;
}

pub fn validate_collection_name(name: &str) -> Result<(), ReorgError> {
    let bad = name.trim().is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(ReorgError::InvalidCollection(name.to_string()));
    }
    Ok(())
}

pub(crate) fn ensure_store_id(mut doc: Document) -> Document {
    if !matches!(doc.get(STORE_ID_FIELD), Some(Value::ObjectId(_))) {
        doc.insert(STORE_ID_FIELD.to_string(), Value::ObjectId(ObjectId::new()));
    }
    doc
}

pub(crate) fn apply_insert(docs: &mut Vec<Document>, incoming: Vec<Document>) -> usize {
    let inserted = incoming.len();
    docs.extend(incoming.into_iter().map(ensure_store_id));
    inserted
}

pub(crate) fn apply_replace(
    docs: &mut Vec<Document>,
    field: &str,
    value: &Value,
    mut doc: Document,
    upsert: bool,
) -> ReplaceOutcome {
    if let Some(existing) = docs.iter_mut().find(|d| d.get(field) == Some(value)) {
        match existing.get(STORE_ID_FIELD) {
            Some(oid) => {
                doc.insert(STORE_ID_FIELD.to_string(), oid.clone());
            }
            None => {
                doc.remove(STORE_ID_FIELD);
            }
        }
        *existing = doc;
        return ReplaceOutcome::Replaced;
    }

    if !upsert {
        return ReplaceOutcome::NotFound;
    }
    doc.entry(field.to_string()).or_insert_with(|| value.clone());
    docs.push(ensure_store_id(doc));
    ReplaceOutcome::Inserted
}

pub(crate) fn apply_delete(docs: &mut Vec<Document>, field: &str, value: &Value) -> usize {
    let before = docs.len();
    docs.retain(|d| d.get(field) != Some(value));
    before - docs.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorg::value::{doc, store_id};

    #[test]
    fn collection_names_are_checked() {
        assert!(validate_collection_name("plans").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name(".hidden").is_err());
        assert!(validate_collection_name("a/b").is_err());
    }

    #[test]
    fn replace_keeps_existing_store_id() {
        let mut docs = Vec::new();
        apply_insert(&mut docs, vec![doc([("id", "p-1"), ("name", "Old")])]);
        let original = store_id(&docs[0]).expect("assigned");

        let mut replacement = doc([("id", "p-1"), ("name", "New")]);
        replacement.insert("_id".into(), Value::ObjectId(ObjectId::new()));
        let outcome = apply_replace(&mut docs, "id", &Value::from("p-1"), replacement, false);

        assert_eq!(outcome, ReplaceOutcome::Replaced);
        assert_eq!(store_id(&docs[0]), Some(original));
        assert_eq!(docs[0].get("name"), Some(&Value::from("New")));
    }

    #[test]
    fn replace_without_upsert_reports_not_found() {
        let mut docs = Vec::new();
        let outcome = apply_replace(&mut docs, "id", &Value::from("x"), doc([("id", "x")]), false);
        assert_eq!(outcome, ReplaceOutcome::NotFound);
        assert!(docs.is_empty());

        let outcome = apply_replace(&mut docs, "id", &Value::from("x"), doc([("id", "x")]), true);
        assert_eq!(outcome, ReplaceOutcome::Inserted);
        assert_eq!(docs.len(), 1);
    }
}
