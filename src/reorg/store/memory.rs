use super::{DocumentStore, ReplaceOutcome, apply_delete, apply_insert, apply_replace};
use crate::error::ReorgError;
use crate::reorg::value::{Document, Value};
use anyhow::Result;
use std::collections::BTreeMap;

/// In-memory store for tests. Counts mutating calls so callers can assert
/// that an operation performed zero writes.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    database: String,
    collections: BTreeMap<String, Vec<Document>>,
    reachable: bool,
    write_ops: usize,
    fail_deletes_for: Option<Value>,
}

impl MemoryStore {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            collections: BTreeMap::new(),
            reachable: true,
            write_ops: 0,
            fail_deletes_for: None,
        }
    }

    pub fn with_collection(mut self, name: &str, docs: Vec<Document>) -> Self {
        let mut stored = Vec::new();
        apply_insert(&mut stored, docs);
        self.collections.insert(name.to_string(), stored);
        self
    }

    /// Seeds documents as given, without assigning `_id`.
    pub fn with_raw_collection(mut self, name: &str, docs: Vec<Document>) -> Self {
        self.collections.insert(name.to_string(), docs);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Make `delete_many` fail whenever it targets `value`.
    pub fn fail_deletes_for(mut self, value: Value) -> Self {
        self.fail_deletes_for = Some(value);
        self
    }

    pub fn write_ops(&self) -> usize {
        self.write_ops
    }

    fn check(&self) -> Result<()> {
        if !self.reachable {
            return Err(ReorgError::ConnectionFailure(format!(
                "memory store `{}` is offline",
                self.database
            ))
            .into());
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn database_name(&self) -> &str {
        &self.database
    }

    fn ping(&self) -> Result<()> {
        self.check()
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.collections.keys().cloned().collect())
    }

    fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        self.check()?;
        Ok(self.collections.get(collection).cloned().unwrap_or_default())
    }

    fn insert_many(&mut self, collection: &str, docs: Vec<Document>) -> Result<usize> {
        self.check()?;
        self.write_ops += 1;
        let stored = self.collections.entry(collection.to_string()).or_default();
        Ok(apply_insert(stored, docs))
    }

    fn replace_one(
        &mut self,
        collection: &str,
        field: &str,
        value: &Value,
        doc: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome> {
        self.check()?;
        self.write_ops += 1;
        let stored = self.collections.entry(collection.to_string()).or_default();
        Ok(apply_replace(stored, field, value, doc, upsert))
    }

    fn delete_many(&mut self, collection: &str, field: &str, value: &Value) -> Result<usize> {
        self.check()?;
        if self.fail_deletes_for.as_ref() == Some(value) {
            anyhow::bail!("simulated delete failure for {}", value.key_string());
        }
        self.write_ops += 1;
        let Some(stored) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        Ok(apply_delete(stored, field, value))
    }

    fn drop_collection(&mut self, collection: &str) -> Result<()> {
        self.check()?;
        self.write_ops += 1;
        self.collections.remove(collection);
        Ok(())
    }
}
