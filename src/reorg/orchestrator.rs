//! Full reorganization run and the manifest-driven way back.

use crate::error::Stage;
use crate::reorg::analysis::{AnalysisInput, AnalysisReport, analyze};
use crate::reorg::audit;
use crate::reorg::config::ReorgConfig;
use crate::reorg::dedupe::{self, DedupeReport};
use crate::reorg::marker::{Marker, delete_marker, read_marker, write_marker};
use crate::reorg::migrate::{MigrationOptions, MigrationReport, migrate_collection};
use crate::reorg::paths::ReorgPaths;
use crate::reorg::restore::{RestoreMode, restore};
use crate::reorg::schema::{
    ApiCompatibilityReport, CollectionValidationReport, SchemaDescription, api_compatibility,
    validate_collection,
};
use crate::reorg::snapshot::{ManifestEntry, backup_many, read_manifest};
use crate::reorg::store::DocumentStore;
use crate::reorg::warn::{self, WarnEvent};
use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReorgOptions {
    /// Run even when a completion marker exists.
    pub force: bool,
    /// Analyze and preview only. No backup, no writes, no marker.
    pub dry_run: bool,
}

pub struct ReorgContext<'a> {
    pub paths: &'a ReorgPaths,
    pub config: &'a ReorgConfig,
    pub schema: &'a SchemaDescription,
    pub build_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReorgOutcome {
    pub state: RunState,
    pub stage_reached: Stage,
    pub success: bool,
    pub dry_run: bool,
    pub already_reorganized: bool,
    pub completed_at: Option<String>,
    pub manifest_path: Option<String>,
    pub analysis: Option<AnalysisReport>,
    pub backup_failures: Vec<String>,
    pub dedupe: Option<DedupeReport>,
    pub migration: Option<MigrationReport>,
    pub validation: Option<CollectionValidationReport>,
    pub api: Option<ApiCompatibilityReport>,
    pub error: Option<String>,
}

impl ReorgOutcome {
    fn new(dry_run: bool) -> Self {
        Self {
            state: RunState::NotStarted,
            stage_reached: Stage::Analysis,
            success: false,
            dry_run,
            already_reorganized: false,
            completed_at: None,
            manifest_path: None,
            analysis: None,
            backup_failures: Vec::new(),
            dedupe: None,
            migration: None,
            validation: None,
            api: None,
            error: None,
        }
    }

    fn fail(&mut self, paths: &ReorgPaths, message: String) -> Result<()> {
        self.state = RunState::Failed;
        self.success = false;
        audit::append_event(paths, self.stage_reached.as_str(), "failed", &message)?;
        self.error = Some(message);
        Ok(())
    }
}

/// Runs a stage. A stage error fails the run at that stage instead of
/// propagating, so the caller always learns how far it got.
fn stage<T>(
    outcome: &mut ReorgOutcome,
    paths: &ReorgPaths,
    at: Stage,
    run: impl FnOnce() -> Result<T>,
) -> Result<Option<T>> {
    outcome.stage_reached = at;
    audit::append_event(paths, at.as_str(), "started", "")?;
    match run() {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            outcome.fail(paths, format!("{err:#}"))?;
            Ok(None)
        }
    }
}

pub fn reorganize(
    store: &mut dyn DocumentStore,
    ctx: &ReorgContext<'_>,
    options: ReorgOptions,
) -> Result<ReorgOutcome> {
    let paths = ctx.paths;
    let settings = &ctx.config.reorganize;
    let drift = settings.drift_collection.as_str();
    let max_reported = ctx.config.validation.max_reported;

    store.ping()?;
    let mut outcome = ReorgOutcome::new(options.dry_run);

    if !options.force
        && let Some(marker) = read_marker(store)?
    {
        let completed_at = marker.completed_at_display();
        audit::append_event(
            paths,
            "reorganize",
            "skipped",
            &format!("already reorganized at {completed_at} (version {})", marker.version),
        )?;
        outcome.state = RunState::Completed;
        outcome.stage_reached = Stage::Complete;
        outcome.success = true;
        outcome.already_reorganized = true;
        outcome.completed_at = Some(completed_at);
        return Ok(outcome);
    }
    outcome.state = RunState::InProgress;

    let input = AnalysisInput {
        targets: &settings.target_collections,
        drift_collection: drift,
        identity_fields: &settings.identity_fields,
        schema: ctx.schema,
        sample_size: settings.sample_size,
    };
    let Some(analysis) = stage(&mut outcome, paths, Stage::Analysis, || analyze(&*store, &input))?
    else {
        return Ok(outcome);
    };
    audit::append_event(
        paths,
        Stage::Analysis.as_str(),
        "ok",
        &format!(
            "sampled={} legacy={} duplicates={}",
            analysis.sampled_documents,
            analysis.documents_with_legacy_fields,
            analysis.duplicate_groups
        ),
    )?;
    outcome.analysis = Some(analysis);

    if options.dry_run {
        return preview(store, ctx, outcome);
    }

    let Some(manifest) = stage(&mut outcome, paths, Stage::Backup, || {
        backup_many(&*store, &paths.backups_dir, &settings.target_collections)
    })?
    else {
        return Ok(outcome);
    };
    outcome.manifest_path = Some(manifest.manifest_path.display().to_string());
    if !manifest.manifest.all_succeeded() {
        outcome.backup_failures = manifest
            .manifest
            .collections
            .iter()
            .filter_map(|(collection, entry)| match entry {
                ManifestEntry::Failed(failed) => Some(format!("{collection}: {}", failed.error)),
                ManifestEntry::Archived(_) => None,
            })
            .collect();
        let message = format!(
            "{} of {} backups failed; aborting before any mutation",
            manifest.manifest.failures(),
            manifest.manifest.total_collections
        );
        outcome.fail(paths, message)?;
        return Ok(outcome);
    }
    audit::append_event(
        paths,
        Stage::Backup.as_str(),
        "ok",
        &format!("manifest={}", manifest.manifest_path.display()),
    )?;

    let Some(dedupe) = stage(&mut outcome, paths, Stage::Deduplicate, || {
        dedupe::remove(store, drift, &settings.identity_fields, false)
    })?
    else {
        return Ok(outcome);
    };
    audit::append_event(
        paths,
        Stage::Deduplicate.as_str(),
        if dedupe.success() { "ok" } else { "partial" },
        &format!(
            "groups={} removed={} errors={}",
            dedupe.duplicate_groups,
            dedupe.documents_removed,
            dedupe.errors.len()
        ),
    )?;
    let duplicates_removed = dedupe.documents_removed;
    outcome.dedupe = Some(dedupe);

    let migration_options = MigrationOptions {
        dry_run: false,
        preserve_data_only: false,
        max_reported,
    };
    let Some(migration) = stage(&mut outcome, paths, Stage::Migrate, || {
        migrate_collection(store, drift, ctx.schema, migration_options)
    })?
    else {
        return Ok(outcome);
    };
    audit::append_event(
        paths,
        Stage::Migrate.as_str(),
        if migration.success { "ok" } else { "partial" },
        &format!(
            "changed={} written={} write_errors={} conflicts={}",
            migration.changed,
            migration.written,
            migration.write_errors,
            migration.conflicts.len()
        ),
    )?;
    let migration_ok = migration.success;
    let migrated = migration.written;
    outcome.migration = Some(migration);

    let Some((validation, api)) = stage(&mut outcome, paths, Stage::Validate, || {
        let validation = validate_collection(&*store, drift, ctx.schema, max_reported)?;
        let api = api_compatibility(&*store, drift, &settings.api_required_fields, max_reported)?;
        Ok((validation, api))
    })?
    else {
        return Ok(outcome);
    };

    let success = migration_ok && validation.invalid_documents == 0 && api.compatible;
    let verdict = format!(
        "valid={}/{} api_incompatible={}",
        validation.valid_documents, validation.total_documents, api.incompatible_documents
    );
    let valid_documents = validation.valid_documents;
    outcome.validation = Some(validation);
    outcome.api = Some(api);

    if !success {
        let reason = if migration_ok {
            format!("validation failed: {verdict}")
        } else {
            format!("migration had write errors; {verdict}")
        };
        outcome.fail(paths, reason)?;
        return Ok(outcome);
    }
    audit::append_event(paths, Stage::Validate.as_str(), "ok", &verdict)?;

    outcome.stage_reached = Stage::Complete;
    let marker = Marker::new(
        &settings.marker_version,
        &settings.target_collections,
        json!({
            "duplicates_removed": duplicates_removed,
            "documents_migrated": migrated,
            "valid_documents": valid_documents,
            "manifest_path": outcome.manifest_path,
        }),
        ctx.build_id,
    );
    write_marker(store, &marker)?;
    audit::append_event(
        paths,
        Stage::Complete.as_str(),
        "ok",
        &format!("marker version {}", marker.version),
    )?;

    outcome.state = RunState::Completed;
    outcome.success = true;
    outcome.completed_at = Some(marker.completed_at_display());
    Ok(outcome)
}

fn preview(
    store: &mut dyn DocumentStore,
    ctx: &ReorgContext<'_>,
    mut outcome: ReorgOutcome,
) -> Result<ReorgOutcome> {
    let paths = ctx.paths;
    let settings = &ctx.config.reorganize;
    let drift = settings.drift_collection.as_str();

    let Some(dedupe) = stage(&mut outcome, paths, Stage::Deduplicate, || {
        dedupe::remove(store, drift, &settings.identity_fields, true)
    })?
    else {
        return Ok(outcome);
    };
    outcome.dedupe = Some(dedupe);

    let options = MigrationOptions {
        dry_run: true,
        preserve_data_only: false,
        max_reported: ctx.config.validation.max_reported,
    };
    let Some(migration) = stage(&mut outcome, paths, Stage::Migrate, || {
        migrate_collection(store, drift, ctx.schema, options)
    })?
    else {
        return Ok(outcome);
    };
    audit::append_event(
        paths,
        Stage::Migrate.as_str(),
        "preview",
        &format!("would change {} documents", migration.changed),
    )?;
    outcome.migration = Some(migration);
    outcome.state = RunState::Completed;
    outcome.success = true;
    Ok(outcome)
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionRestoreStatus {
    pub collection: String,
    pub status: String,
    pub detail: String,
    pub final_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmergencyRestoreReport {
    pub manifest_path: String,
    pub collections: Vec<CollectionRestoreStatus>,
    pub successful: usize,
    pub failed: usize,
    pub marker_removed: bool,
}

/// Manifest paths may be stale when the backup dir moved; fall back to the
/// archive next to the manifest.
fn locate_archive(recorded: &str, manifest_path: &Path) -> PathBuf {
    let recorded = PathBuf::from(recorded);
    if recorded.exists() {
        return recorded;
    }
    match (manifest_path.parent(), recorded.file_name()) {
        (Some(dir), Some(name)) if dir.join(name).exists() => dir.join(name),
        _ => recorded,
    }
}

pub fn emergency_restore(
    store: &mut dyn DocumentStore,
    paths: &ReorgPaths,
    manifest_path: &Path,
) -> Result<EmergencyRestoreReport> {
    store.ping()?;
    let manifest = read_manifest(manifest_path)?;
    audit::append_event(
        paths,
        "emergency_restore",
        "started",
        &format!("manifest={}", manifest_path.display()),
    )?;

    let mut report = EmergencyRestoreReport {
        manifest_path: manifest_path.display().to_string(),
        collections: Vec::new(),
        successful: 0,
        failed: 0,
        marker_removed: false,
    };

    for (collection, entry) in &manifest.collections {
        let entry = match entry {
            ManifestEntry::Archived(archived) => archived,
            ManifestEntry::Failed(failed) => {
                report.failed += 1;
                report.collections.push(CollectionRestoreStatus {
                    collection: collection.clone(),
                    status: "error".to_string(),
                    detail: format!("no archive was written: {}", failed.error),
                    final_count: None,
                });
                continue;
            }
        };

        let archive = locate_archive(&entry.archive_path, manifest_path);
        match restore(store, &archive, Some(collection.as_str()), RestoreMode::Replace) {
            Ok(result) => {
                report.successful += 1;
                report.collections.push(CollectionRestoreStatus {
                    collection: collection.clone(),
                    status: "restored".to_string(),
                    detail: format!("{} documents", result.documents_restored),
                    final_count: Some(result.final_count),
                });
            }
            Err(err) => {
                let err_text = format!("{err:#}");
                warn::emit(WarnEvent {
                    code: "RESTORE_FAILED",
                    stage: "emergency_restore",
                    action: "restore",
                    collection,
                    document: "",
                    reason: "archive could not be restored",
                    err: &err_text,
                });
                report.failed += 1;
                report.collections.push(CollectionRestoreStatus {
                    collection: collection.clone(),
                    status: "error".to_string(),
                    detail: err_text,
                    final_count: None,
                });
            }
        }
    }

    if report.successful > 0 {
        report.marker_removed = delete_marker(store)? > 0;
    }
    audit::append_event(
        paths,
        "emergency_restore",
        if report.failed == 0 { "ok" } else { "partial" },
        &format!("restored={} failed={}", report.successful, report.failed),
    )?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReorgError;
    use crate::reorg::audit::audit_log_path;
    use crate::reorg::marker::MARKER_COLLECTION;
    use crate::reorg::paths::test_paths;
    use crate::reorg::schema::plan_schema;
    use crate::reorg::snapshot::list;
    use crate::reorg::store::memory::MemoryStore;
    use crate::reorg::value::{Document, Value, doc};
    use std::fs;
    use tempfile::tempdir;

    fn legacy(id: &str, name: &str, created: &str) -> Document {
        doc([
            ("id", id),
            ("plan_name", name),
            ("plan_type", "shared"),
            ("base_price", "4.99"),
            ("created_at", created),
        ])
    }

    fn drifted_store() -> MemoryStore {
        MemoryStore::new("hosting")
            .with_collection(
                "plans",
                vec![
                    legacy("p-1", "Opal", "2020-01-01T00:00:00Z"),
                    legacy("p-1-copy", "Opal", "2021-01-01T00:00:00Z"),
                    legacy("p-2", "Ruby", "2020-01-01T00:00:00Z"),
                ],
            )
            .with_collection("pages", vec![doc([("slug", "home")])])
    }

    fn run(store: &mut MemoryStore, root: &Path, options: ReorgOptions) -> ReorgOutcome {
        let paths = test_paths(root);
        let config = ReorgConfig::default();
        let schema = plan_schema();
        let ctx = ReorgContext {
            paths: &paths,
            config: &config,
            schema: &schema,
            build_id: "test-build",
        };
        reorganize(store, &ctx, options).expect("reorganize")
    }

    #[test]
    fn full_run_dedupes_migrates_and_marks() {
        let tmp = tempdir().expect("tempdir");
        let mut store = drifted_store();
        let outcome = run(&mut store, tmp.path(), ReorgOptions::default());

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.state, RunState::Completed);
        assert_eq!(outcome.stage_reached, Stage::Complete);
        assert_eq!(outcome.dedupe.as_ref().map(|d| d.documents_removed), Some(1));
        assert_eq!(outcome.validation.as_ref().map(|v| v.invalid_documents), Some(0));

        let plans = store.find_all("plans").unwrap();
        assert_eq!(plans.len(), 2);
        assert!(plans.iter().all(|p| matches!(p.get("price"), Some(Value::Float(_)))));

        let marker = read_marker(&store).unwrap().expect("marker");
        assert_eq!(marker.version, "2.0");
        assert_eq!(marker.build_id, "test-build");
        assert_eq!(marker.summary.get("duplicates_removed"), Some(&Value::Int(1)));

        let paths = test_paths(tmp.path());
        let archives = list(&paths.backups_dir, None).expect("list");
        assert_eq!(archives.len(), 4);
        let audit = fs::read_to_string(audit_log_path(&paths)).expect("audit log");
        assert!(audit.contains("\"phase\":\"complete\""));
    }

    #[test]
    fn second_run_short_circuits_without_writes() {
        let tmp = tempdir().expect("tempdir");
        let mut store = drifted_store();
        let first = run(&mut store, tmp.path(), ReorgOptions::default());
        assert!(first.success);

        let writes = store.write_ops();
        let second = run(&mut store, tmp.path(), ReorgOptions::default());
        assert!(second.success);
        assert!(second.already_reorganized);
        assert_eq!(second.completed_at, first.completed_at);
        assert_eq!(store.write_ops(), writes);
    }

    #[test]
    fn force_reruns_and_keeps_one_marker() {
        let tmp = tempdir().expect("tempdir");
        let mut store = drifted_store();
        run(&mut store, tmp.path(), ReorgOptions::default());
        let again = run(
            &mut store,
            tmp.path(),
            ReorgOptions {
                force: true,
                dry_run: false,
            },
        );
        assert!(again.success);
        assert!(!again.already_reorganized);
        assert_eq!(again.migration.as_ref().map(|m| m.changed), Some(0));
        assert_eq!(store.count(MARKER_COLLECTION).unwrap(), 1);
    }

    #[test]
    fn dry_run_touches_nothing() {
        let tmp = tempdir().expect("tempdir");
        let mut store = drifted_store();
        let outcome = run(
            &mut store,
            tmp.path(),
            ReorgOptions {
                force: false,
                dry_run: true,
            },
        );

        assert!(outcome.success);
        assert!(outcome.manifest_path.is_none());
        assert_eq!(outcome.migration.as_ref().map(|m| m.changed), Some(3));
        assert_eq!(store.write_ops(), 0);
        assert!(read_marker(&store).unwrap().is_none());
        assert!(!test_paths(tmp.path()).backups_dir.exists());
    }

    #[test]
    fn unreachable_store_is_a_hard_error() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let config = ReorgConfig::default();
        let schema = plan_schema();
        let ctx = ReorgContext {
            paths: &paths,
            config: &config,
            schema: &schema,
            build_id: "test-build",
        };
        let mut store = drifted_store().unreachable();

        let err = reorganize(&mut store, &ctx, ReorgOptions::default()).expect_err("offline");
        assert!(matches!(
            err.downcast_ref::<ReorgError>(),
            Some(ReorgError::ConnectionFailure(_))
        ));
    }

    #[test]
    fn backup_failure_aborts_before_mutation() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let mut config = ReorgConfig::default();
        config.reorganize.target_collections.push("bad/name".to_string());
        let schema = plan_schema();
        let ctx = ReorgContext {
            paths: &paths,
            config: &config,
            schema: &schema,
            build_id: "test-build",
        };
        let mut store = drifted_store();

        let outcome = reorganize(&mut store, &ctx, ReorgOptions::default()).expect("outcome");
        assert!(!outcome.success);
        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(outcome.stage_reached, Stage::Backup);
        assert!(outcome.manifest_path.is_some());
        assert_eq!(outcome.backup_failures.len(), 1);
        assert_eq!(store.write_ops(), 0);
        assert!(read_marker(&store).unwrap().is_none());
    }

    #[test]
    fn invalid_data_fails_at_validation_without_marker() {
        let tmp = tempdir().expect("tempdir");
        let mut store = MemoryStore::new("hosting")
            .with_collection("plans", vec![doc([("id", "p-1"), ("plan_name", "No price")])]);
        let outcome = run(&mut store, tmp.path(), ReorgOptions::default());

        assert!(!outcome.success);
        assert_eq!(outcome.stage_reached, Stage::Validate);
        assert_eq!(outcome.api.as_ref().map(|a| a.compatible), Some(false));
        assert!(read_marker(&store).unwrap().is_none());
    }

    #[test]
    fn emergency_restore_rolls_back_and_clears_marker() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let mut store = drifted_store();
        let outcome = run(&mut store, tmp.path(), ReorgOptions::default());
        let manifest_path = PathBuf::from(outcome.manifest_path.expect("manifest"));

        let report = emergency_restore(&mut store, &paths, &manifest_path).expect("restore");
        assert_eq!(report.failed, 0);
        assert_eq!(report.successful, 4);
        assert!(report.marker_removed);
        assert!(read_marker(&store).unwrap().is_none());

        let plans = store.find_all("plans").unwrap();
        assert_eq!(plans.len(), 3);
        assert!(plans.iter().all(|p| p.contains_key("plan_name") && !p.contains_key("name")));
    }
}
