use crate::error::ReorgError;
use crate::reorg::codec::decode_archive;
use crate::reorg::store::{DocumentStore, ReplaceOutcome, validate_collection_name};
use crate::reorg::value::{LOGICAL_ID_FIELD, STORE_ID_FIELD, Value, logical_id, store_id};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    /// Drop the target, then insert everything.
    Replace,
    /// Insert everything without looking at existing documents.
    Append,
    /// Replace-or-insert keyed on the logical id.
    Upsert,
}

impl FromStr for RestoreMode {
    type Err = ReorgError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            "upsert" | "update" => Ok(Self::Upsert),
            _ => Err(ReorgError::InvalidMergeMode(raw.to_string())),
        }
    }
}

impl fmt::Display for RestoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Upsert => "upsert",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub archive_path: String,
    pub collection: String,
    pub mode: RestoreMode,
    pub documents_restored: usize,
    pub final_count: usize,
    pub inserted: usize,
    pub updated: usize,
}

pub fn restore(
    store: &mut dyn DocumentStore,
    archive_path: &Path,
    target: Option<&str>,
    mode: RestoreMode,
) -> Result<RestoreResult> {
    let bytes = fs::read(archive_path)
        .with_context(|| format!("failed to read {}", archive_path.display()))?;
    let archive = decode_archive(&bytes)
        .with_context(|| format!("failed to decode {}", archive_path.display()))?;
    if archive.documents.len() != archive.metadata.document_count {
        return Err(ReorgError::CorruptArchive(format!(
            "{}: metadata declares {} documents but archive holds {}",
            archive_path.display(),
            archive.metadata.document_count,
            archive.documents.len()
        ))
        .into());
    }

    let collection = target.unwrap_or(&archive.metadata.collection).to_string();
    validate_collection_name(&collection)?;

    let documents_restored = archive.documents.len();
    let mut inserted = 0usize;
    let mut updated = 0usize;

    match mode {
        RestoreMode::Replace => {
            store.drop_collection(&collection)?;
            if !archive.documents.is_empty() {
                inserted = store.insert_many(&collection, archive.documents)?;
            }
        }
        RestoreMode::Append => {
            if !archive.documents.is_empty() {
                inserted = store.insert_many(&collection, archive.documents)?;
            }
        }
        RestoreMode::Upsert => {
            for doc in archive.documents {
                // Without a logical id the archived `_id` is the only stable key.
                let key = match (logical_id(&doc).cloned(), store_id(&doc)) {
                    (Some(id), _) => (LOGICAL_ID_FIELD, id),
                    (None, Some(oid)) => (STORE_ID_FIELD, Value::ObjectId(oid)),
                    (None, None) => {
                        inserted += store.insert_many(&collection, vec![doc])?;
                        continue;
                    }
                };
                match store.replace_one(&collection, key.0, &key.1, doc, true)? {
                    ReplaceOutcome::Replaced => updated += 1,
                    ReplaceOutcome::Inserted => inserted += 1,
                    ReplaceOutcome::NotFound => {}
                }
            }
        }
    }

    let final_count = store.count(&collection)?;
    Ok(RestoreResult {
        archive_path: archive_path.display().to_string(),
        collection,
        mode,
        documents_restored,
        final_count,
        inserted,
        updated,
    })
}
