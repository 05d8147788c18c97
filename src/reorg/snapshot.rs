use crate::reorg::codec::{
    Archive, ArchiveMetadata, decode_archive_json, documents_digest, encode_archive,
    missing_metadata_fields,
};
use crate::reorg::store::{DocumentStore, validate_collection_name};
use crate::reorg::util::{file_stamp, parse_file_stamp, write_atomic};
use crate::reorg::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ARCHIVE_SUFFIX: &str = ".json.gz";
pub const MANIFEST_PREFIX: &str = "backup_manifest_";

#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub archive_path: PathBuf,
    pub metadata: ArchiveMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedEntry {
    pub archive_path: String,
    #[serde(flatten)]
    pub metadata: ArchiveMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestEntry {
    Failed(FailedEntry),
    Archived(ArchivedEntry),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub timestamp: String,
    pub collections: BTreeMap<String, ManifestEntry>,
    pub backup_dir: String,
    pub total_collections: usize,
    pub successful_backups: usize,
    pub created_at: String,
}

impl BackupManifest {
    pub fn failures(&self) -> usize {
        self.total_collections
            .saturating_sub(self.successful_backups)
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures() == 0
    }
}

#[derive(Debug, Clone)]
pub struct ManifestOutcome {
    pub manifest_path: PathBuf,
    pub manifest: BackupManifest,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub archive_path: String,
    pub is_valid: bool,
    pub exists: bool,
    pub decodable: bool,
    pub metadata: Option<ArchiveMetadata>,
    pub actual_document_count: Option<usize>,
    pub verification_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub archive_path: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub readable: bool,
    pub collection: Option<String>,
    pub created_at: Option<String>,
    pub document_count: Option<usize>,
    pub error: Option<String>,
    #[serde(skip)]
    sort_time: Option<DateTime<Utc>>,
}

pub fn archive_file_name(collection: &str, at: &DateTime<Utc>) -> String {
    format!("{collection}_{}{ARCHIVE_SUFFIX}", file_stamp(at))
}

pub fn manifest_file_name(at: &DateTime<Utc>) -> String {
    format!("{MANIFEST_PREFIX}{}.json", file_stamp(at))
}

/// Split `<collection>_<YYYYMMDD>_<HHMMSS>.json.gz` into collection and time.
fn parse_archive_file_name(file_name: &str) -> Option<(String, DateTime<Utc>)> {
    let stem = file_name.strip_suffix(ARCHIVE_SUFFIX)?;
    let mut parts = stem.rsplitn(3, '_');
    let time = parts.next()?;
    let date = parts.next()?;
    let collection = parts.next()?;
    let at = parse_file_stamp(&format!("{date}_{time}"))?;
    Some((collection.to_string(), at))
}

/// Seconds precision keeps file name and metadata in agreement.
fn truncate_to_second(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

pub fn backup(
    store: &dyn DocumentStore,
    backups_dir: &Path,
    collection: &str,
    timestamp: Option<DateTime<Utc>>,
) -> Result<BackupOutcome> {
    validate_collection_name(collection)?;
    let at = truncate_to_second(timestamp.unwrap_or_else(Utc::now));

    let documents = store
        .find_all(collection)
        .with_context(|| format!("failed to read collection `{collection}`"))?;
    let archive = Archive::new(collection, store.database_name(), at, documents);
    let bytes = encode_archive(&archive)?;

    let archive_path = backups_dir.join(archive_file_name(collection, &at));
    write_atomic(&archive_path, &bytes)?;

    Ok(BackupOutcome {
        archive_path,
        metadata: archive.metadata,
    })
}

pub fn backup_many(
    store: &dyn DocumentStore,
    backups_dir: &Path,
    collections: &[String],
) -> Result<ManifestOutcome> {
    let at = truncate_to_second(Utc::now());
    let mut entries = BTreeMap::new();
    let mut successful = 0usize;

    for collection in collections {
        let entry = match backup(store, backups_dir, collection, Some(at)) {
            Ok(out) => {
                successful += 1;
                ManifestEntry::Archived(ArchivedEntry {
                    archive_path: out.archive_path.display().to_string(),
                    metadata: out.metadata,
                })
            }
            Err(err) => {
                let err_text = format!("{err:#}");
                warn::emit(WarnEvent {
                    code: "BACKUP_FAILED",
                    stage: "backup",
                    action: "write-archive",
                    collection,
                    document: "",
                    reason: "collection-backup-failed",
                    err: &err_text,
                });
                ManifestEntry::Failed(FailedEntry { error: err_text })
            }
        };
        entries.insert(collection.clone(), entry);
    }

    let manifest = BackupManifest {
        timestamp: file_stamp(&at),
        total_collections: entries.len(),
        collections: entries,
        backup_dir: backups_dir.display().to_string(),
        successful_backups: successful,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };

    let manifest_path = backups_dir.join(manifest_file_name(&at));
    let data = serde_json::to_string_pretty(&manifest)?;
    write_atomic(&manifest_path, format!("{data}\n").as_bytes())?;

    Ok(ManifestOutcome {
        manifest_path,
        manifest,
    })
}

pub fn read_manifest(path: &Path) -> Result<BackupManifest> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn verify(archive_path: &Path) -> VerificationReport {
    let mut report = VerificationReport {
        archive_path: archive_path.display().to_string(),
        ..VerificationReport::default()
    };

    if !archive_path.is_file() {
        report
            .verification_errors
            .push("archive file does not exist".to_string());
        return report;
    }
    report.exists = true;

    let json = match fs::read(archive_path)
        .map_err(anyhow::Error::from)
        .and_then(|bytes| Ok(decode_archive_json(&bytes)?))
    {
        Ok(json) => json,
        Err(err) => {
            report.verification_errors.push(format!("{err:#}"));
            return report;
        }
    };
    report.decodable = true;

    for field in missing_metadata_fields(&json) {
        report
            .verification_errors
            .push(format!("missing metadata field `{field}`"));
    }

    let documents = json.get("documents").and_then(|d| d.as_array());
    match documents {
        Some(items) => report.actual_document_count = Some(items.len()),
        None => report
            .verification_errors
            .push("documents array missing".to_string()),
    }

    if let Some(meta) = json.get("metadata") {
        match serde_json::from_value::<ArchiveMetadata>(meta.clone()) {
            Ok(metadata) => {
                if let Some(actual) = report.actual_document_count
                    && actual != metadata.document_count
                {
                    report.verification_errors.push(format!(
                        "document count mismatch: metadata={} actual={actual}",
                        metadata.document_count
                    ));
                }
                if let (Some(expected), Some(items)) = (&metadata.content_sha256, documents)
                    && documents_digest(items) != *expected
                {
                    report
                        .verification_errors
                        .push("content checksum mismatch".to_string());
                }
                report.metadata = Some(metadata);
            }
            Err(err) if report.verification_errors.is_empty() => {
                report
                    .verification_errors
                    .push(format!("invalid metadata: {err}"));
            }
            Err(_) => {}
        }
    }

    report.is_valid = report.verification_errors.is_empty();
    report
}

fn summarize(path: &Path) -> ArchiveSummary {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let parsed_name = parse_archive_file_name(&file_name);
    let size_bytes = fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    let mut summary = ArchiveSummary {
        archive_path: path.display().to_string(),
        file_name,
        size_bytes,
        readable: false,
        collection: parsed_name.as_ref().map(|(c, _)| c.clone()),
        created_at: None,
        document_count: None,
        error: None,
        sort_time: parsed_name.as_ref().map(|(_, at)| *at),
    };

    let metadata = fs::read(path)
        .map_err(anyhow::Error::from)
        .and_then(|bytes| Ok(decode_archive_json(&bytes)?))
        .and_then(|json| {
            let meta = json
                .get("metadata")
                .cloned()
                .context("metadata missing")?;
            Ok(serde_json::from_value::<ArchiveMetadata>(meta)?)
        });

    match metadata {
        Ok(meta) => {
            summary.readable = true;
            if let Some(at) = meta.created_at_time() {
                summary.sort_time = Some(at);
            }
            summary.collection = Some(meta.collection);
            summary.created_at = Some(meta.created_at);
            summary.document_count = Some(meta.document_count);
        }
        Err(err) => {
            let err_text = format!("{err:#}");
            warn::emit(WarnEvent {
                code: "ARCHIVE_UNREADABLE",
                stage: "list",
                action: "read-metadata",
                collection: summary.collection.as_deref().unwrap_or(""),
                document: "",
                reason: "archive-metadata-unreadable",
                err: &err_text,
            });
            summary.error = Some(err_text);
        }
    }

    summary
}

/// Archives newest first by recorded creation time. Unreadable archives fall
/// back to the file-name timestamp and sort last when that is missing too.
pub fn list(backups_dir: &Path, collection: Option<&str>) -> Result<Vec<ArchiveSummary>> {
    if !backups_dir.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in fs::read_dir(backups_dir)
        .with_context(|| format!("failed to read {}", backups_dir.display()))?
    {
        let path = entry?.path();
        let is_archive = path.is_file()
            && path
                .file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|name| name.ends_with(ARCHIVE_SUFFIX));
        if !is_archive {
            continue;
        }

        let summary = summarize(&path);
        if let Some(filter) = collection
            && summary.collection.as_deref() != Some(filter)
        {
            continue;
        }
        out.push(summary);
    }

    out.sort_by(|a, b| {
        b.sort_time
            .cmp(&a.sort_time)
            .then_with(|| b.file_name.cmp(&a.file_name))
    });
    Ok(out)
}

/// Keep the `keep` newest archives and delete the rest.
pub fn cleanup(backups_dir: &Path, keep: usize, collection: Option<&str>) -> Result<usize> {
    let archives = list(backups_dir, collection)?;
    if archives.len() <= keep {
        return Ok(0);
    }

    let mut deleted = 0usize;
    for summary in archives.iter().skip(keep) {
        match fs::remove_file(&summary.archive_path) {
            Ok(_) => deleted += 1,
            Err(err) => warn::emit(WarnEvent {
                code: "CLEANUP_FAILED",
                stage: "cleanup",
                action: "remove-archive",
                collection: summary.collection.as_deref().unwrap_or(""),
                document: "",
                reason: "remove-failed",
                err: &format!("{} ({err})", summary.archive_path),
            }),
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorg::codec::decode_archive;
    use crate::reorg::store::memory::MemoryStore;
    use crate::reorg::value::{Document, Value, doc};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn plans(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| {
                let mut d = doc([("id", format!("p-{i}")), ("name", format!("Plan {i}"))]);
                d.insert("price".into(), Value::Float(i as f64 + 0.99));
                d
            })
            .collect()
    }

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, secs).unwrap()
    }

    #[test]
    fn backup_of_36_documents_verifies_clean() {
        let tmp = tempdir().expect("tempdir");
        let store = MemoryStore::new("hosting").with_collection("plans", plans(36));

        let out = backup(&store, tmp.path(), "plans", None).expect("backup");
        assert_eq!(out.metadata.document_count, 36);
        assert_eq!(out.metadata.database, "hosting");

        let report = verify(&out.archive_path);
        assert!(report.is_valid, "{:?}", report.verification_errors);
        assert!(report.verification_errors.is_empty());
        assert_eq!(report.actual_document_count, Some(36));
    }

    #[test]
    fn archive_name_embeds_collection_and_utc_stamp() {
        let tmp = tempdir().expect("tempdir");
        let store = MemoryStore::new("hosting").with_collection("plan_items", plans(1));

        let out = backup(&store, tmp.path(), "plan_items", Some(at(7))).expect("backup");
        let name = out.archive_path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "plan_items_20240501_100007.json.gz");
        assert_eq!(
            parse_archive_file_name(name),
            Some(("plan_items".to_string(), at(7)))
        );
    }

    #[test]
    fn verify_flags_count_mismatch() {
        let tmp = tempdir().expect("tempdir");
        let mut archive = Archive::new("plans", "hosting", at(0), plans(3));
        archive.metadata.document_count = 5;
        let path = tmp.path().join("plans_20240501_100000.json.gz");
        fs::write(&path, encode_archive(&archive).expect("encode")).expect("write");

        let report = verify(&path);
        assert!(!report.is_valid);
        assert!(
            report
                .verification_errors
                .iter()
                .any(|e| e.contains("count mismatch"))
        );
    }

    #[test]
    fn verify_reports_missing_and_corrupt_files() {
        let tmp = tempdir().expect("tempdir");
        let missing = verify(&tmp.path().join("nope.json.gz"));
        assert!(!missing.exists && !missing.is_valid);

        let corrupt = tmp.path().join("plans_20240501_100000.json.gz");
        fs::write(&corrupt, b"garbage").expect("write");
        let report = verify(&corrupt);
        assert!(report.exists);
        assert!(!report.decodable);
        assert!(!report.is_valid);
    }

    #[test]
    fn backup_many_shares_one_timestamp_and_survives_failures() {
        let tmp = tempdir().expect("tempdir");
        let store = MemoryStore::new("hosting")
            .with_collection("plans", plans(2))
            .with_collection("pages", plans(1));
        let collections = vec!["plans".to_string(), "bad/name".to_string(), "pages".to_string()];

        let out = backup_many(&store, tmp.path(), &collections).expect("batch");
        assert_eq!(out.manifest.total_collections, 3);
        assert_eq!(out.manifest.successful_backups, 2);
        assert!(!out.manifest.all_succeeded());
        assert!(matches!(
            out.manifest.collections.get("bad/name"),
            Some(ManifestEntry::Failed(_))
        ));

        let stamps = out
            .manifest
            .collections
            .values()
            .filter_map(|e| match e {
                ManifestEntry::Archived(a) => Some(a.metadata.created_at.clone()),
                ManifestEntry::Failed(_) => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(stamps.len(), 2);
        assert_eq!(stamps[0], stamps[1]);

        let reread = read_manifest(&out.manifest_path).expect("manifest");
        assert_eq!(reread, out.manifest);
    }

    #[test]
    fn list_is_newest_first_and_flags_unreadable() {
        let tmp = tempdir().expect("tempdir");
        let store = MemoryStore::new("hosting").with_collection("plans", plans(1));
        backup(&store, tmp.path(), "plans", Some(at(1))).expect("old");
        backup(&store, tmp.path(), "plans", Some(at(3))).expect("new");
        fs::write(tmp.path().join("plans_20240501_100002.json.gz"), b"junk").expect("junk");
        fs::write(tmp.path().join("notes.txt"), b"ignored").expect("other");

        let listed = list(tmp.path(), Some("plans")).expect("list");
        let names = listed.iter().map(|s| s.file_name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "plans_20240501_100003.json.gz",
                "plans_20240501_100002.json.gz",
                "plans_20240501_100001.json.gz",
            ]
        );
        assert!(!listed[1].readable);
        assert!(listed[1].error.is_some());
        assert!(list(tmp.path(), Some("pages")).expect("list").is_empty());
    }

    #[test]
    fn cleanup_keeps_newest() {
        let tmp = tempdir().expect("tempdir");
        let store = MemoryStore::new("hosting").with_collection("plans", plans(1));
        for secs in 0..5 {
            backup(&store, tmp.path(), "plans", Some(at(secs))).expect("backup");
        }

        assert_eq!(cleanup(tmp.path(), 10, None).expect("noop"), 0);
        assert_eq!(cleanup(tmp.path(), 2, None).expect("cleanup"), 3);

        let left = list(tmp.path(), None).expect("list");
        assert_eq!(left.len(), 2);
        assert_eq!(left[0].file_name, "plans_20240501_100004.json.gz");
        let kept = fs::read(&left[1].archive_path).expect("read");
        assert_eq!(decode_archive(&kept).expect("decode").documents.len(), 1);
    }
}
