use super::{
    DocumentStore, ReplaceOutcome, apply_delete, apply_insert, apply_replace,
    validate_collection_name,
};
use crate::error::ReorgError;
use crate::reorg::codec::{decode_document, encode_document};
use crate::reorg::util::write_atomic;
use crate::reorg::value::{Document, Value};
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs;
use std::path::{Path, PathBuf};

/// File-backed store: one JSON array per collection under
/// `<root>/<database>/<collection>.json`, written in the archive codec's
/// tagged form so store-native values survive.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
    database: String,
}

impl JsonDirStore {
    pub fn open(root: &Path, database: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            database: database.to_string(),
        }
    }

    fn database_dir(&self) -> PathBuf {
        self.root.join(&self.database)
    }

    fn collection_path(&self, collection: &str) -> Result<PathBuf> {
        validate_collection_name(collection)?;
        Ok(self.database_dir().join(format!("{collection}.json")))
    }

    fn read_collection(&self, collection: &str) -> Result<Vec<Document>> {
        let path = self.collection_path(collection)?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parsed: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let serde_json::Value::Array(items) = parsed else {
            anyhow::bail!("{} should hold a JSON array of documents", path.display());
        };
        items
            .into_iter()
            .map(|item| {
                decode_document(item)
                    .with_context(|| format!("invalid document in {}", path.display()))
            })
            .collect()
    }

    fn write_collection(&self, collection: &str, docs: &[Document]) -> Result<()> {
        let path = self.collection_path(collection)?;
        let encoded = docs.iter().map(encode_document).collect::<Vec<_>>();
        let data = serde_json::to_string_pretty(&encoded)?;
        write_atomic(&path, format!("{data}\n").as_bytes())
    }

    /// Run a read-modify-write cycle on one collection under the store lock.
    fn mutate<T>(
        &mut self,
        collection: &str,
        apply: impl FnOnce(&mut Vec<Document>) -> T,
    ) -> Result<T> {
        self.ping()?;
        let dir = self.database_dir();
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let lock_path = dir.join(".lock");
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open {}", lock_path.display()))?;
        FileExt::lock_exclusive(&lock)
            .with_context(|| format!("failed to lock {}", lock_path.display()))?;

        let result: Result<T> = (|| {
            let mut docs = self.read_collection(collection)?;
            let out = apply(&mut docs);
            self.write_collection(collection, &docs)?;
            Ok(out)
        })();

        let _ = FileExt::unlock(&lock);
        result
    }
}

impl DocumentStore for JsonDirStore {
    fn database_name(&self) -> &str {
        &self.database
    }

    fn ping(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(ReorgError::ConnectionFailure(format!(
                "store directory {} does not exist",
                self.root.display()
            ))
            .into());
        }
        Ok(())
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        self.ping()?;
        let dir = self.database_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in
            fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?
        {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_collection_name(stem).is_ok() {
                out.push(stem.to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        self.ping()?;
        self.read_collection(collection)
    }

    fn insert_many(&mut self, collection: &str, docs: Vec<Document>) -> Result<usize> {
        self.mutate(collection, |stored| apply_insert(stored, docs))
    }

    fn replace_one(
        &mut self,
        collection: &str,
        field: &str,
        value: &Value,
        doc: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome> {
        self.mutate(collection, |stored| {
            apply_replace(stored, field, value, doc, upsert)
        })
    }

    fn delete_many(&mut self, collection: &str, field: &str, value: &Value) -> Result<usize> {
        self.mutate(collection, |stored| apply_delete(stored, field, value))
    }

    fn drop_collection(&mut self, collection: &str) -> Result<()> {
        self.ping()?;
        let path = self.collection_path(collection)?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }
}
